//! Warehouse bulk loader
//!
//! Ships a staged CSV file to Snowflake: recreate the named stage, upload
//! the file into it, then `COPY INTO` the target table. Bad rows are skipped
//! by the warehouse (`ON_ERROR = 'CONTINUE'`); the copy result is parsed so
//! the number of skipped rows is reported instead of lost.

use crate::client::{ResultSet, Warehouse, WarehouseSession};
use crate::etl::Loader;
use crate::storage::StagedFile;
use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use std::str::FromStr;

/// What happens to existing destination rows
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadMode {
    /// Truncate the destination before copying, so it mirrors the source
    #[default]
    Replace,
    /// Copy on top of whatever the destination already holds
    Append,
}

impl FromStr for LoadMode {
    type Err = eyre::Report;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            other => Err(eyre!(
                "Unknown load mode '{}', expected 'replace' or 'append'",
                other
            )),
        }
    }
}

impl std::fmt::Display for LoadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Append => write!(f, "append"),
        }
    }
}

/// Outcome of the bulk copy for one staged file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileLoad {
    pub file: String,
    pub status: String,
    pub rows_parsed: u64,
    pub rows_loaded: u64,
    pub errors_seen: u64,
    pub first_error: Option<String>,
}

/// Outcome of a bulk copy, one entry per file picked up from the stage
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub files: Vec<FileLoad>,
}

impl LoadReport {
    /// Parse the result set returned by `COPY INTO`
    ///
    /// A copy that found no files returns a single `status` column; that
    /// parses to an empty report.
    pub fn from_copy_result(result: &ResultSet) -> Result<Self> {
        if result.column_index("file").is_none() {
            return Ok(Self::default());
        }

        let number = |row: usize, column: &str| -> Result<u64> {
            match result.cell(row, column) {
                Some(cell) => cell
                    .parse()
                    .map_err(|e| eyre!("Invalid {} '{}' in copy result: {}", column, cell, e)),
                None => Ok(0),
            }
        };

        let files = (0..result.rows.len())
            .map(|row| {
                Ok(FileLoad {
                    file: result.cell(row, "file").unwrap_or_default().to_string(),
                    status: result.cell(row, "status").unwrap_or_default().to_string(),
                    rows_parsed: number(row, "rows_parsed")?,
                    rows_loaded: number(row, "rows_loaded")?,
                    errors_seen: number(row, "errors_seen")?,
                    first_error: result.cell(row, "first_error").map(str::to_string),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { files })
    }

    pub fn rows_parsed(&self) -> u64 {
        self.files.iter().map(|f| f.rows_parsed).sum()
    }

    pub fn rows_loaded(&self) -> u64 {
        self.files.iter().map(|f| f.rows_loaded).sum()
    }

    /// Rows the warehouse parsed but did not load
    pub fn rows_skipped(&self) -> u64 {
        self.rows_parsed().saturating_sub(self.rows_loaded())
    }

    pub fn first_error(&self) -> Option<&str> {
        self.files.iter().find_map(|f| f.first_error.as_deref())
    }
}

/// Loader for staged CSV files into a warehouse table
///
/// # Example
/// ```no_run
/// use articles_etl::articles::{LoadMode, StageLoader};
/// use articles_etl::client::{Auth, SnowflakeClient};
/// use articles_etl::etl::Loader;
/// use articles_etl::storage::CsvWriter;
/// use url::Url;
///
/// # async fn example(buffer: articles_etl::rows::RowBuffer) -> eyre::Result<()> {
/// let url = Url::parse("https://acme.snowflakecomputing.com")?;
/// let warehouse = SnowflakeClient::try_new(url, Auth::Pat("token".into()))?;
/// let loader = StageLoader::articles(warehouse).with_mode(LoadMode::Append);
///
/// let staged = CsvWriter::new().write(&buffer)?;
/// let report = loader.load(&staged).await?;
/// println!("loaded {}, skipped {}", report.rows_loaded(), report.rows_skipped());
/// # Ok(())
/// # }
/// ```
pub struct StageLoader<W> {
    warehouse: W,
    stage: String,
    table: String,
    mode: LoadMode,
}

impl<W: Warehouse> StageLoader<W> {
    pub fn new(warehouse: W, stage: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            warehouse,
            stage: stage.into(),
            table: table.into(),
            mode: LoadMode::default(),
        }
    }

    /// Loader for `public.articles` through `article_stage`
    pub fn articles(warehouse: W) -> Self {
        Self::new(warehouse, super::STAGE_NAME, super::DESTINATION_TABLE)
    }

    pub fn with_mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    pub fn create_stage_sql(&self) -> String {
        format!(
            "CREATE OR REPLACE STAGE {} FILE_FORMAT = (TYPE = 'CSV') ENCRYPTION = (TYPE = 'SNOWFLAKE_SSE');",
            self.stage
        )
    }

    pub fn truncate_sql(&self) -> String {
        format!("TRUNCATE TABLE IF EXISTS {};", self.table)
    }

    pub fn copy_sql(&self) -> String {
        format!(
            "COPY INTO {} FROM @{} FILE_FORMAT = (TYPE = CSV FIELD_OPTIONALLY_ENCLOSED_BY = '\"' SKIP_HEADER = 1) ON_ERROR = 'CONTINUE';",
            self.table, self.stage
        )
    }

    async fn copy_file(&self, session: &W::Session, file: &StagedFile) -> Result<LoadReport> {
        session
            .execute(&self.create_stage_sql())
            .await
            .with_context(|| format!("Failed to create stage {}", self.stage))?;

        if self.mode == LoadMode::Replace {
            session
                .execute(&self.truncate_sql())
                .await
                .with_context(|| format!("Failed to truncate {}", self.table))?;
        }

        session.put(file.path(), &self.stage).await?;
        log::debug!("Uploaded {} to @{}", file.path().display(), self.stage);

        let result = session
            .execute(&self.copy_sql())
            .await
            .with_context(|| format!("Failed to copy @{} into {}", self.stage, self.table))?;
        LoadReport::from_copy_result(&result)
    }
}

#[async_trait]
impl<W: Warehouse> Loader for StageLoader<W> {
    type Item = StagedFile;
    type Receipt = LoadReport;

    async fn load(&self, item: &Self::Item) -> Result<LoadReport> {
        let session = self
            .warehouse
            .connect()
            .await
            .with_context(|| "Failed to connect to destination warehouse")?;

        // the session is released when it goes out of scope, success or not
        let report = self.copy_file(&session, item).await?;
        drop(session);

        if report.files.is_empty() {
            log::warn!("Bulk copy found no files in @{}", self.stage);
        }
        if report.rows_skipped() > 0 {
            log::warn!(
                "Bulk copy skipped {} of {} row(s) in {}; first error: {}",
                report.rows_skipped(),
                report.rows_parsed(),
                self.table,
                report.first_error().unwrap_or("unknown")
            );
        }
        if report.rows_parsed() != item.rows() as u64 {
            log::warn!(
                "Staged {} row(s) but the warehouse parsed {}",
                item.rows(),
                report.rows_parsed()
            );
        }

        log::info!(
            "Loaded {} row(s) into {} ({} mode)",
            report.rows_loaded(),
            self.table,
            self.mode
        );
        Ok(report)
    }
}
