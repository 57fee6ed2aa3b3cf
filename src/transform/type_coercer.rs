//! Column type coercion for the destination warehouse
//!
//! Maps every source column type to a type the warehouse loads without
//! surprises: integers become floats (so NULL-able integer columns survive),
//! dates and timestamps become text, text stays text.

use crate::etl::Transformer;
use crate::rows::{Column, ColumnType, RowBuffer, Schema, Value};
use eyre::Result;

/// A cell did not match its column's declared type
#[derive(Debug, thiserror::Error)]
#[error("cannot coerce column '{column}' ({expected}): found {found:?} in row {row}")]
pub struct CoercionError {
    pub column: String,
    pub expected: ColumnType,
    pub found: Value,
    pub row: usize,
}

/// Transformer applying a static per-column coercion table
///
/// | From      | To    |
/// |-----------|-------|
/// | Text      | Text  |
/// | Integer   | Float |
/// | Date      | Text  |
/// | Timestamp | Text  |
/// | Float     | Float |
/// | Boolean   | Boolean |
///
/// The table is idempotent: coercing an already coerced buffer is a no-op.
///
/// # Example
/// ```
/// use articles_etl::etl::Transformer;
/// use articles_etl::rows::{Column, ColumnType, RowBuffer, Schema, Value};
/// use articles_etl::transform::TypeCoercer;
///
/// let schema = Schema::new(vec![Column::new("id", ColumnType::Integer)]);
/// let buffer = RowBuffer::with_rows(schema, vec![vec![Value::Integer(1)]]).unwrap();
///
/// let coerced = TypeCoercer.transform(buffer).unwrap();
/// assert_eq!(coerced.schema().columns()[0].ty, ColumnType::Float);
/// assert_eq!(coerced.get(0, "id"), Some(&Value::Float(1.0)));
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct TypeCoercer;

impl TypeCoercer {
    /// Destination type for a source column type
    pub fn target(ty: ColumnType) -> ColumnType {
        match ty {
            ColumnType::Text | ColumnType::Date | ColumnType::Timestamp => ColumnType::Text,
            ColumnType::Integer | ColumnType::Float => ColumnType::Float,
            ColumnType::Boolean => ColumnType::Boolean,
        }
    }

    fn coerce(from: ColumnType, value: Value) -> std::result::Result<Value, Value> {
        match (from, value) {
            (_, Value::Null) => Ok(Value::Null),
            (ColumnType::Text, Value::Text(s)) => Ok(Value::Text(s)),
            (ColumnType::Integer, Value::Integer(i)) => Ok(Value::Float(i as f64)),
            (ColumnType::Float, Value::Float(f)) => Ok(Value::Float(f)),
            (ColumnType::Boolean, Value::Boolean(b)) => Ok(Value::Boolean(b)),
            (ColumnType::Date | ColumnType::Timestamp, v @ (Value::Date(_) | Value::Timestamp(_))) => {
                Ok(Value::Text(v.to_field()))
            }
            (_, other) => Err(other),
        }
    }
}

impl Transformer for TypeCoercer {
    type Input = RowBuffer;
    type Output = RowBuffer;

    fn transform(&self, input: Self::Input) -> Result<Self::Output> {
        let (schema, rows) = input.into_parts();
        let sources: Vec<ColumnType> = schema.columns().iter().map(|c| c.ty).collect();

        let coerced_schema: Schema = schema
            .columns()
            .iter()
            .map(|c| Column::new(c.name.clone(), Self::target(c.ty)))
            .collect();

        for (from, to) in schema.columns().iter().zip(coerced_schema.columns()) {
            if from.ty != to.ty {
                log::debug!("Coercing column '{}': {} -> {}", from.name, from.ty, to.ty);
            }
        }

        let mut coerced = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            let row = row
                .into_iter()
                .zip(&sources)
                .enumerate()
                .map(|(col, (value, from))| {
                    Self::coerce(*from, value).map_err(|found| CoercionError {
                        column: schema.columns()[col].name.clone(),
                        expected: *from,
                        found,
                        row: index,
                    })
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            coerced.push(row);
        }

        let output = RowBuffer::with_rows(coerced_schema, coerced)?;
        log::info!("Transformed data with {} rows", output.len());
        Ok(output)
    }
}
