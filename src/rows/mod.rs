//! Tabular data model shared by every pipeline stage
//!
//! A [`RowBuffer`] carries an explicit [`Schema`] derived once at extraction,
//! so later stages never have to guess a column's type from its cells.

mod buffer;
mod value;

pub use buffer::{Column, RowBuffer, Schema};
pub use value::{ColumnType, Value};
