//! Full-table extractor
//!
//! Reads every row of a source table in one query. There is no pagination
//! and no watermark: each run sees the whole table.

use crate::client::SourceStore;
use crate::etl::Extractor;
use crate::rows::RowBuffer;

use eyre::{Context, Result};

/// Extractor for a whole source table
pub struct TableExtractor<S> {
    source: S,
    query: String,
}

impl<S: SourceStore> TableExtractor<S> {
    /// Create an extractor running `query` against `source`
    pub fn new(source: S, query: impl Into<String>) -> Self {
        Self {
            source,
            query: query.into(),
        }
    }

    /// Extractor for `public.articles`
    pub fn articles(source: S) -> Self {
        Self::new(source, super::SOURCE_QUERY)
    }
}

impl<S: SourceStore> Extractor for TableExtractor<S> {
    type Output = RowBuffer;

    async fn extract(&self) -> Result<Self::Output> {
        log::debug!("Running source query: {}", self.query);
        let buffer = self
            .source
            .fetch(&self.query)
            .await
            .with_context(|| "Failed to extract rows from source")?;
        log::info!("Extracted {} rows from PostgreSQL", buffer.len());
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::{Column, ColumnType, Schema, Value};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingSource {
        queries: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl SourceStore for RecordingSource {
        async fn fetch(&self, sql: &str) -> Result<RowBuffer> {
            self.queries.lock().unwrap().push(sql.to_string());
            if self.fail {
                eyre::bail!("connection refused");
            }
            let schema = Schema::new(vec![Column::new("id", ColumnType::Integer)]);
            RowBuffer::with_rows(schema, vec![vec![Value::Integer(1)], vec![Value::Integer(2)]])
        }

        async fn count(&self, _sql: &str) -> Result<u64> {
            Ok(2)
        }
    }

    #[tokio::test]
    async fn test_extracts_whole_table() {
        let extractor = TableExtractor::articles(RecordingSource {
            queries: Mutex::new(Vec::new()),
            fail: false,
        });

        let buffer = extractor.extract().await.unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(
            *extractor.source.queries.lock().unwrap(),
            vec!["SELECT * FROM public.articles;".to_string()]
        );
    }

    #[tokio::test]
    async fn test_source_errors_propagate() {
        let extractor = TableExtractor::articles(RecordingSource {
            queries: Mutex::new(Vec::new()),
            fail: true,
        });

        let err = extractor.extract().await.unwrap_err();
        assert!(format!("{:#}", err).contains("connection refused"));
    }
}
