//! Delimited-text (CSV) file operations

use super::StagedFile;
use crate::etl::{Extractor, Loader};
use crate::rows::{Column, ColumnType, RowBuffer, Schema, Value};

use async_trait::async_trait;
use eyre::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write a buffer as comma-separated text with a header row
///
/// Fields are quoted only when necessary. NULL becomes an empty field.
pub fn write_csv<W: Write>(writer: W, buffer: &RowBuffer) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    if !buffer.schema().is_empty() {
        writer.write_record(buffer.schema().names())?;
    }
    for row in buffer.rows() {
        writer.write_record(row.iter().map(Value::to_field))?;
    }
    writer.flush()?;
    Ok(())
}

/// Serialize buffers to uniquely named temporary CSV files
///
/// # Example
/// ```no_run
/// use articles_etl::rows::RowBuffer;
/// use articles_etl::storage::CsvWriter;
///
/// # fn example(buffer: RowBuffer) -> eyre::Result<()> {
/// let staged = CsvWriter::new().write(&buffer)?;
/// println!("{} rows in {}", staged.rows(), staged.path().display());
/// // the file is removed when `staged` goes out of scope
/// # Ok(())
/// # }
/// ```
pub struct CsvWriter {
    dir: Option<PathBuf>,
    prefix: String,
    retain: bool,
}

impl CsvWriter {
    /// Write into the system temporary directory
    pub fn new() -> Self {
        Self {
            dir: None,
            prefix: "articles-".to_string(),
            retain: false,
        }
    }

    /// Write into a specific directory
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: Some(dir.as_ref().to_path_buf()),
            ..Self::new()
        }
    }

    /// Keep written files on disk instead of deleting them with their handle
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn write(&self, buffer: &RowBuffer) -> Result<StagedFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.prefix).suffix(".csv");
        let file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .context("Failed to create temporary CSV file")?;

        write_csv(file.as_file(), buffer)
            .with_context(|| format!("Failed to write CSV file: {}", file.path().display()))?;

        let path = file.into_temp_path();
        log::info!("Written data to {}", path.display());

        if self.retain {
            let kept = path.keep().context("Failed to retain CSV file")?;
            log::debug!("Retaining {} after the run", kept.display());
            Ok(StagedFile::retained(kept, buffer.len()))
        } else {
            Ok(StagedFile::scoped(path, buffer.len()))
        }
    }
}

impl Default for CsvWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Loader for CsvWriter {
    type Item = RowBuffer;
    type Receipt = StagedFile;

    async fn load(&self, item: &Self::Item) -> Result<StagedFile> {
        self.write(item)
    }
}

/// Read a CSV file with a header row back into a buffer
///
/// Every column is typed text; empty fields read back as NULL.
pub struct CsvReader {
    path: PathBuf,
}

impl CsvReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn read(&self) -> Result<RowBuffer> {
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Failed to open CSV file: {}", self.path.display()))?;

        let schema: Schema = reader
            .headers()?
            .iter()
            .map(|name| Column::new(name, ColumnType::Text))
            .collect();

        let mut buffer = RowBuffer::new(schema);
        for record in reader.records() {
            let record = record
                .with_context(|| format!("Failed to parse CSV file: {}", self.path.display()))?;
            let row = record
                .iter()
                .map(|field| match field {
                    "" => Value::Null,
                    text => Value::from(text),
                })
                .collect();
            buffer.push(row)?;
        }
        Ok(buffer)
    }
}

impl Extractor for CsvReader {
    type Output = RowBuffer;

    async fn extract(&self) -> Result<Self::Output> {
        self.read()
    }
}
