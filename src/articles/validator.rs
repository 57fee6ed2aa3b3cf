//! Row-count reconciliation between source and destination

use super::LoadReport;
use crate::client::{SourceStore, Warehouse, WarehouseSession};
use crate::etl::Validator;
use async_trait::async_trait;
use eyre::{Context, Result};

/// A run whose destination does not match its source
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error(
        "Data validation failed! Source: {source_count}, Destination: {destination_count}{}",
        skipped_suffix(.skipped)
    )]
    CountMismatch {
        source_count: u64,
        destination_count: u64,
        /// Rows the bulk copy skipped, when the load reported them
        skipped: Option<u64>,
    },
}

fn skipped_suffix(skipped: &Option<u64>) -> String {
    match skipped {
        Some(n) if *n > 0 => format!(" ({} row(s) skipped during load)", n),
        _ => String::new(),
    }
}

/// Whether `err` was caused by a count mismatch rather than a store failure
pub fn is_validation_failure(err: &eyre::Report) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<ValidationError>().is_some())
}

/// Counts observed by a successful validation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    pub source: u64,
    pub destination: u64,
}

/// Validator comparing `COUNT(*)` on both sides
///
/// Counts are taken after the load committed. Nothing stops the source from
/// changing in between, so a busy source can fail validation on its own.
pub struct RowCountValidator<S, W> {
    source: S,
    warehouse: W,
    source_query: String,
    destination_query: String,
}

impl<S: SourceStore, W: Warehouse> RowCountValidator<S, W> {
    pub fn new(
        source: S,
        warehouse: W,
        source_query: impl Into<String>,
        destination_query: impl Into<String>,
    ) -> Self {
        Self {
            source,
            warehouse,
            source_query: source_query.into(),
            destination_query: destination_query.into(),
        }
    }

    /// Validator for `public.articles` on both sides
    pub fn articles(source: S, warehouse: W) -> Self {
        Self::new(
            source,
            warehouse,
            super::SOURCE_COUNT_QUERY,
            super::DESTINATION_COUNT_QUERY,
        )
    }

    /// Count rows on both sides without judging the result
    pub async fn counts(&self) -> Result<(u64, u64)> {
        let source = self
            .source
            .count(&self.source_query)
            .await
            .with_context(|| "Failed to count source rows")?;

        let session = self
            .warehouse
            .connect()
            .await
            .with_context(|| "Failed to connect to destination warehouse")?;
        let destination = session
            .execute(&self.destination_query)
            .await
            .with_context(|| "Failed to count destination rows")?
            .count()?;

        Ok((source, destination))
    }
}

#[async_trait]
impl<S: SourceStore, W: Warehouse> Validator for RowCountValidator<S, W> {
    type Evidence = LoadReport;
    type Report = ValidationReport;

    async fn validate(&self, evidence: Option<&LoadReport>) -> Result<ValidationReport> {
        let (source, destination) = self.counts().await?;
        log::info!(
            "PostgreSQL count: {}, Snowflake count: {}",
            source,
            destination
        );

        if source != destination {
            return Err(ValidationError::CountMismatch {
                source_count: source,
                destination_count: destination,
                skipped: evidence.map(LoadReport::rows_skipped),
            }
            .into());
        }

        Ok(ValidationReport {
            source,
            destination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::articles::FileLoad;
    use crate::client::ResultSet;
    use crate::rows::RowBuffer;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct FixedSource(u64);

    #[async_trait]
    impl SourceStore for FixedSource {
        async fn fetch(&self, _sql: &str) -> Result<RowBuffer> {
            eyre::bail!("not used")
        }
        async fn count(&self, sql: &str) -> Result<u64> {
            assert_eq!(sql, "SELECT COUNT(*) FROM public.articles;");
            Ok(self.0)
        }
    }

    #[derive(Clone)]
    struct FixedWarehouse {
        count: u64,
        queries: Arc<Mutex<Vec<String>>>,
    }

    struct FixedSession(FixedWarehouse);

    #[async_trait]
    impl Warehouse for FixedWarehouse {
        type Session = FixedSession;
        async fn connect(&self) -> Result<FixedSession> {
            Ok(FixedSession(self.clone()))
        }
    }

    #[async_trait]
    impl WarehouseSession for FixedSession {
        async fn execute(&self, sql: &str) -> Result<ResultSet> {
            self.0.queries.lock().unwrap().push(sql.to_string());
            Ok(ResultSet::new(
                vec!["COUNT(*)".into()],
                vec![vec![Some(self.0.count.to_string())]],
            ))
        }
        async fn put(&self, _file: &Path, _stage: &str) -> Result<()> {
            Ok(())
        }
    }

    fn validator(source: u64, destination: u64) -> RowCountValidator<FixedSource, FixedWarehouse> {
        RowCountValidator::articles(
            FixedSource(source),
            FixedWarehouse {
                count: destination,
                queries: Arc::new(Mutex::new(Vec::new())),
            },
        )
    }

    #[tokio::test]
    async fn test_matching_counts() {
        let validator = validator(3, 3);
        let report = validator.validate(None).await.unwrap();
        assert_eq!(
            report,
            ValidationReport {
                source: 3,
                destination: 3
            }
        );
        assert_eq!(
            *validator.warehouse.queries.lock().unwrap(),
            vec!["SELECT COUNT(*) FROM articles;".to_string()]
        );
    }

    #[tokio::test]
    async fn test_mismatch_carries_skipped_rows() {
        let evidence = LoadReport {
            files: vec![FileLoad {
                rows_parsed: 3,
                rows_loaded: 2,
                errors_seen: 1,
                ..Default::default()
            }],
        };

        let err = validator(3, 2).validate(Some(&evidence)).await.unwrap_err();
        assert!(is_validation_failure(&err));
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::CountMismatch {
                source_count: 3,
                destination_count: 2,
                skipped: Some(1),
            })
        );
        assert_eq!(
            err.to_string(),
            "Data validation failed! Source: 3, Destination: 2 (1 row(s) skipped during load)"
        );
    }

    #[tokio::test]
    async fn test_mismatch_without_evidence() {
        let err = validator(5, 7).validate(None).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Data validation failed! Source: 5, Destination: 7"
        );
    }

    #[test]
    fn test_store_errors_are_not_validation_failures() {
        let err = eyre::eyre!("connection refused").wrap_err("Failed to count source rows");
        assert!(!is_validation_failure(&err));

        let err = eyre::Report::new(ValidationError::CountMismatch {
            source_count: 1,
            destination_count: 0,
            skipped: None,
        })
        .wrap_err("validate_data failed after 4 attempt(s)");
        assert!(is_validation_failure(&err));
    }
}
