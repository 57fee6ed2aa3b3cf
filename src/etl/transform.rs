//! Transformer trait for data transformation

use eyre::Result;

/// Transformer trait for transforming a payload between stages
///
/// Implementors define how to transform data:
/// - Type coercion
/// - Data cleaning
/// - Format conversion
///
/// Transformers are synchronous and must be pure: the same input always
/// yields the same output.
///
/// # Example
/// ```no_run
/// use articles_etl::etl::Transformer;
/// use eyre::Result;
///
/// struct Uppercase;
///
/// impl Transformer for Uppercase {
///     type Input = String;
///     type Output = String;
///
///     fn transform(&self, input: Self::Input) -> Result<Self::Output> {
///         Ok(input.to_uppercase())
///     }
/// }
/// ```
pub trait Transformer: Send + Sync {
    /// Input payload type
    type Input: Send;

    /// Output payload type after transformation
    type Output: Send;

    /// Transform a payload
    ///
    /// # Errors
    /// Returns an error if transformation fails (coercion, validation, etc.)
    fn transform(&self, input: Self::Input) -> Result<Self::Output>;
}
