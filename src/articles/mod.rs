//! The `public.articles` pipeline: Postgres → CSV → Snowflake
//!
//! Concrete stages for the articles table and the fixed statements they
//! issue. The pipeline takes no per-run parameters: every run re-reads the
//! whole source table.

mod extractor;
mod loader;
mod validator;

pub use extractor::TableExtractor;
pub use loader::{FileLoad, LoadMode, LoadReport, StageLoader};
pub use validator::{RowCountValidator, ValidationError, ValidationReport, is_validation_failure};

use crate::client::{SourceStore, Warehouse};
use crate::etl::{Pipeline, RetryPolicy};
use crate::storage::CsvWriter;
use crate::transform::TypeCoercer;

/// Full-table read of the source
pub const SOURCE_QUERY: &str = "SELECT * FROM public.articles;";

/// Source row count used by validation
pub const SOURCE_COUNT_QUERY: &str = "SELECT COUNT(*) FROM public.articles;";

/// Destination table the bulk copy writes into
pub const DESTINATION_TABLE: &str = "public.articles";

/// Destination row count used by validation
pub const DESTINATION_COUNT_QUERY: &str = "SELECT COUNT(*) FROM articles;";

/// Named staging area recreated on every run
pub const STAGE_NAME: &str = "article_stage";

/// The five-stage articles pipeline over concrete stores
pub type ArticlesPipeline<S, W> =
    Pipeline<TableExtractor<S>, TypeCoercer, CsvWriter, StageLoader<W>, RowCountValidator<S, W>>;

/// Wire the articles stages together
///
/// `source` and `warehouse` are cloned into the stages that need them; each
/// stage opens its own connections when it runs.
pub fn pipeline<S, W>(
    source: S,
    warehouse: W,
    serializer: CsvWriter,
    mode: LoadMode,
    retry: RetryPolicy,
) -> ArticlesPipeline<S, W>
where
    S: SourceStore + Clone,
    W: Warehouse + Clone,
{
    Pipeline::new(
        TableExtractor::articles(source.clone()),
        TypeCoercer,
        serializer,
        StageLoader::articles(warehouse.clone()).with_mode(mode),
        RowCountValidator::articles(source, warehouse),
    )
    .with_retry(retry)
}
