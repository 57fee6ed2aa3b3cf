//! PostgreSQL source store
//!
//! Every call opens its own connection and drops it when done, so each stage
//! holds source access only for as long as it needs it.

use super::store::SourceStore;
use crate::rows::{Column, ColumnType, RowBuffer, Schema, Value};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use eyre::{Context, Result};
use std::error::Error;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, NoTls};

/// Column type for a PostgreSQL type, `None` when it has no native mapping
pub fn column_type(ty: &Type) -> Option<ColumnType> {
    match *ty {
        Type::BOOL => Some(ColumnType::Boolean),
        Type::INT2 | Type::INT4 | Type::INT8 => Some(ColumnType::Integer),
        Type::FLOAT4 | Type::FLOAT8 => Some(ColumnType::Float),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => Some(ColumnType::Text),
        Type::DATE => Some(ColumnType::Date),
        Type::TIMESTAMP | Type::TIMESTAMPTZ => Some(ColumnType::Timestamp),
        _ => None,
    }
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let value = match *ty {
            Type::BOOL => Value::Boolean(bool::from_sql(ty, raw)?),
            Type::INT2 => Value::Integer(i16::from_sql(ty, raw)?.into()),
            Type::INT4 => Value::Integer(i32::from_sql(ty, raw)?.into()),
            Type::INT8 => Value::Integer(i64::from_sql(ty, raw)?),
            Type::FLOAT4 => Value::Float(f32::from_sql(ty, raw)?.into()),
            Type::FLOAT8 => Value::Float(f64::from_sql(ty, raw)?),
            Type::DATE => Value::Date(NaiveDate::from_sql(ty, raw)?),
            Type::TIMESTAMP => Value::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => Value::Timestamp(DateTime::<Utc>::from_sql(ty, raw)?.naive_utc()),
            _ => Value::Text(String::from_sql(ty, raw)?),
        };
        Ok(value)
    }

    fn from_sql_null(_: &Type) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Value::Null)
    }

    fn accepts(ty: &Type) -> bool {
        column_type(ty).is_some()
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Wrap `sql` so every column without a native mapping is read as text
///
/// Returns `None` when all columns map natively and `sql` can run as is.
pub fn text_cast_query(sql: &str, columns: &[(String, Type)]) -> Option<String> {
    if columns.iter().all(|(_, ty)| column_type(ty).is_some()) {
        return None;
    }
    let select = columns
        .iter()
        .map(|(name, ty)| match column_type(ty) {
            Some(_) => quote_ident(name),
            None => format!("{}::text AS {}", quote_ident(name), quote_ident(name)),
        })
        .collect::<Vec<_>>()
        .join(", ");
    let inner = sql.trim().trim_end_matches(';');
    Some(format!("SELECT {} FROM ({}) AS src", select, inner))
}

/// PostgreSQL source reached through a connection string
///
/// # Example
/// ```no_run
/// use articles_etl::client::{PostgresSource, SourceStore};
///
/// # async fn example() -> eyre::Result<()> {
/// let source = PostgresSource::new("postgres://etl@localhost/blog");
/// let count = source.count("SELECT COUNT(*) FROM public.articles;").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresSource {
    url: String,
}

impl PostgresSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    async fn connect(&self) -> Result<Client> {
        log::debug!("Connecting to source database");
        let (client, connection) = tokio_postgres::connect(&self.url, NoTls)
            .await
            .context("Failed to connect to source database")?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::warn!("Source connection closed with error: {}", e);
            }
        });
        Ok(client)
    }

    /// Verify the source is reachable
    pub async fn test_connection(&self) -> Result<()> {
        let client = self.connect().await?;
        client
            .simple_query("SELECT 1")
            .await
            .context("Source database did not answer")?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // the connection string may carry a password
        f.debug_struct("PostgresSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceStore for PostgresSource {
    async fn fetch(&self, sql: &str) -> Result<RowBuffer> {
        let client = self.connect().await?;
        let statement = client
            .prepare(sql)
            .await
            .with_context(|| format!("Failed to prepare source query: {}", sql))?;

        let columns: Vec<(String, Type)> = statement
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.type_().clone()))
            .collect();
        let schema: Schema = columns
            .iter()
            .map(|(name, ty)| Column::new(name.clone(), column_type(ty).unwrap_or(ColumnType::Text)))
            .collect();

        let rows = match text_cast_query(sql, &columns) {
            Some(cast) => {
                log::debug!("Reading unmapped column types as text: {}", cast);
                client.query(&cast, &[]).await
            }
            None => client.query(&statement, &[]).await,
        }
        .with_context(|| format!("Failed to run source query: {}", sql))?;

        let mut buffer = RowBuffer::new(schema);
        for row in rows {
            let values = (0..row.len())
                .map(|i| row.try_get::<_, Value>(i))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to decode source row")?;
            buffer.push(values)?;
        }
        Ok(buffer)
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let client = self.connect().await?;
        let row = client
            .query_one(sql, &[])
            .await
            .with_context(|| format!("Failed to run source count: {}", sql))?;
        let count: i64 = row.try_get(0).context("Source count is not an integer")?;
        Ok(u64::try_from(count)?)
    }
}
