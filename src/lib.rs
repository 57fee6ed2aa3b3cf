//! Articles ETL
//!
//! Hourly copy of `public.articles` from PostgreSQL into Snowflake through a
//! staged CSV file, with a row-count check at the end of every run.

pub mod articles;
pub mod cli;
pub mod client;
pub mod etl;
pub mod rows;
pub mod schedule;
pub mod storage;
pub mod transform;

// Re-exports for convenience
pub use client::{Auth, AuthType, PostgresSource, SnowflakeClient};
pub use etl::{Extractor, Loader, Pipeline, RetryPolicy, Transformer, Validator};
pub use rows::{Column, ColumnType, RowBuffer, Schema, Value};
pub use storage::{CsvReader, CsvWriter, StagedFile};
