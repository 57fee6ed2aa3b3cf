//! Row buffer with an explicit schema

use super::{ColumnType, Value};
use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};

/// A named, typed column
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered list of typed columns
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

impl FromIterator<Column> for Schema {
    fn from_iter<I: IntoIterator<Item = Column>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// In-memory table: a schema plus rows positionally aligned to it
///
/// No key or uniqueness constraint is enforced. The only invariant is that
/// every row has exactly one value per schema column.
///
/// # Example
/// ```
/// use articles_etl::rows::{Column, ColumnType, RowBuffer, Schema, Value};
///
/// let schema = Schema::new(vec![
///     Column::new("id", ColumnType::Integer),
///     Column::new("title", ColumnType::Text),
/// ]);
/// let mut buffer = RowBuffer::new(schema);
/// buffer.push(vec![Value::from(1_i64), Value::from("A")]).unwrap();
///
/// assert_eq!(buffer.len(), 1);
/// assert_eq!(buffer.get(0, "title"), Some(&Value::from("A")));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RowBuffer {
    schema: Schema,
    rows: Vec<Vec<Value>>,
}

impl RowBuffer {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Build a buffer from pre-collected rows, checking their width
    pub fn with_rows(schema: Schema, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut buffer = Self::new(schema);
        buffer.rows.reserve(rows.len());
        for row in rows {
            buffer.push(row)?;
        }
        Ok(buffer)
    }

    pub fn push(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.schema.len() {
            return Err(eyre!(
                "Row {} has {} value(s), schema has {} column(s)",
                self.rows.len(),
                row.len(),
                self.schema.len()
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Look up a cell by row index and column name
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.schema.index_of(column)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }

    /// All values of one column, in row order
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.schema.index_of(name)?;
        Some(self.rows.iter().map(|r| &r[index]).collect())
    }

    pub fn into_parts(self) -> (Schema, Vec<Vec<Value>>) {
        (self.schema, self.rows)
    }
}
