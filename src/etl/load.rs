//! Loader trait for writing data to destinations

use async_trait::async_trait;
use eyre::Result;

/// Loader trait for loading a payload into a destination
///
/// Implementors define how to write to destinations:
/// - Local files (the serializer)
/// - Warehouse tables (the bulk loader)
///
/// The payload is borrowed so a failed attempt can be retried with the same
/// input. The returned receipt is what the next stage consumes.
///
/// # Example
/// ```no_run
/// use articles_etl::etl::Loader;
/// use async_trait::async_trait;
/// use eyre::Result;
/// use std::path::PathBuf;
///
/// struct TextFile {
///     path: PathBuf,
/// }
///
/// #[async_trait]
/// impl Loader for TextFile {
///     type Item = String;
///     type Receipt = usize;
///
///     async fn load(&self, item: &Self::Item) -> Result<usize> {
///         std::fs::write(&self.path, item)?;
///         Ok(item.len())
///     }
/// }
/// ```
#[async_trait]
pub trait Loader: Send + Sync {
    /// The payload to load
    type Item: Send + Sync;

    /// What loading produced (a file handle, a load report, ...)
    type Receipt: Send;

    /// Load the payload to the destination
    ///
    /// # Errors
    /// Returns an error if loading fails (network, I/O, rejected statement, etc.)
    async fn load(&self, item: &Self::Item) -> Result<Self::Receipt>;
}
