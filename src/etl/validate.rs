//! Validator trait for post-load correctness checks

use async_trait::async_trait;
use eyre::Result;

/// Validator trait for checking the outcome of a run against live state
///
/// A validator re-reads the stores instead of trusting earlier payloads.
/// The evidence (e.g. a load report) is optional and only enriches the
/// failure it reports.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Diagnostics produced by an earlier stage
    type Evidence: Send + Sync;

    /// Summary returned when validation passes
    type Report: Send;

    /// # Errors
    /// Returns a distinguished error when the check fails, or any
    /// connectivity/query error encountered while checking
    async fn validate(&self, evidence: Option<&Self::Evidence>) -> Result<Self::Report>;
}
