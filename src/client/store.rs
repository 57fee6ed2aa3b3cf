//! Store traits the pipeline stages talk to
//!
//! [`SourceStore`] is the relational side, [`Warehouse`] the analytical
//! side. Stages only see these traits, so tests can swap in in-memory stores.

use crate::rows::RowBuffer;
use async_trait::async_trait;
use eyre::{Result, eyre};
use std::path::Path;

/// Rows returned by a warehouse statement, every cell as text or NULL
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    /// Case-insensitive column lookup
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Cell at `(row, column name)`
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)?.as_deref()
    }

    /// First cell of the first row
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_deref()
    }

    /// First cell parsed as a non-negative count
    pub fn count(&self) -> Result<u64> {
        let cell = self
            .scalar()
            .ok_or_else(|| eyre!("Count query returned no value"))?;
        cell.trim()
            .parse()
            .map_err(|e| eyre!("Count query returned '{}': {}", cell, e))
    }
}

/// Relational source of rows
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Run a query and return every row together with its derived schema
    async fn fetch(&self, sql: &str) -> Result<RowBuffer>;

    /// Run a `SELECT COUNT(*)` style query
    async fn count(&self, sql: &str) -> Result<u64>;
}

/// Destination warehouse that hands out stage-scoped sessions
#[async_trait]
pub trait Warehouse: Send + Sync {
    type Session: WarehouseSession;

    /// Open a session; it is released when the returned value is dropped
    async fn connect(&self) -> Result<Self::Session>;
}

/// An open destination session
#[async_trait]
pub trait WarehouseSession: Send + Sync {
    /// Execute a single SQL statement
    async fn execute(&self, sql: &str) -> Result<ResultSet>;

    /// Transfer a local file into a named stage
    async fn put(&self, file: &Path, stage: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_parsing() {
        let rs = ResultSet::new(vec!["COUNT(*)".into()], vec![vec![Some("42".into())]]);
        assert_eq!(rs.count().unwrap(), 42);

        let empty = ResultSet::default();
        assert!(empty.count().is_err());

        let null = ResultSet::new(vec!["COUNT(*)".into()], vec![vec![None]]);
        assert!(null.count().is_err());

        let junk = ResultSet::new(vec!["COUNT(*)".into()], vec![vec![Some("-1".into())]]);
        assert!(junk.count().is_err());
    }

    #[test]
    fn test_cell_lookup_ignores_case() {
        let rs = ResultSet::new(
            vec!["file".into(), "ROWS_LOADED".into()],
            vec![vec![Some("a.csv.gz".into()), Some("3".into())]],
        );
        assert_eq!(rs.cell(0, "rows_loaded"), Some("3"));
        assert_eq!(rs.cell(0, "FILE"), Some("a.csv.gz"));
        assert_eq!(rs.cell(1, "file"), None);
    }
}
