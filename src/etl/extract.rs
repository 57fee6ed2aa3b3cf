//! Extractor trait for reading data out of a source store

use eyre::Result;

/// Extractor trait for extracting data from a source
///
/// Implementors define how to read a complete payload from sources like:
/// - Relational tables
/// - Files
/// - In-memory fixtures (tests)
///
/// # Example
/// ```no_run
/// use articles_etl::etl::Extractor;
/// use articles_etl::rows::RowBuffer;
/// use eyre::Result;
///
/// struct EmptyTable;
///
/// impl Extractor for EmptyTable {
///     type Output = RowBuffer;
///
///     async fn extract(&self) -> Result<Self::Output> {
///         Ok(RowBuffer::default())
///     }
/// }
/// ```
pub trait Extractor: Send + Sync {
    /// The payload produced by extraction
    type Output: Send;

    /// Extract the payload from the source
    ///
    /// # Errors
    /// Returns an error if extraction fails (connectivity, query, decoding, etc.)
    fn extract(&self) -> impl std::future::Future<Output = Result<Self::Output>> + Send;
}
