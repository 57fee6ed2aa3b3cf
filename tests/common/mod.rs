//! In-memory stand-ins for the source database and the destination warehouse

#![allow(dead_code)]

use articles_etl::client::{ResultSet, SourceStore, Warehouse, WarehouseSession};
use articles_etl::rows::{Column, ColumnType, RowBuffer, Schema, Value};
use async_trait::async_trait;
use chrono::NaiveDate;
use eyre::{Result, bail, eyre};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Source holding a fixed buffer
#[derive(Clone)]
pub struct MemorySource {
    buffer: RowBuffer,
    pub fetches: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new(buffer: RowBuffer) -> Self {
        Self {
            buffer,
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn fetch(&self, _sql: &str) -> Result<RowBuffer> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.buffer.clone())
    }

    async fn count(&self, _sql: &str) -> Result<u64> {
        Ok(self.buffer.len() as u64)
    }
}

#[derive(Default)]
pub struct WarehouseState {
    /// Stage name to the contents of every file uploaded into it
    pub stages: HashMap<String, Vec<String>>,
    /// Destination table, one string per cell
    pub table: Vec<Vec<String>>,
    /// Columns rejecting anything that does not parse as a number
    pub numeric_columns: Vec<usize>,
    pub statements: Vec<String>,
    pub connects: usize,
    pub open_sessions: usize,
    pub unreachable: bool,
}

/// Warehouse that understands the handful of statements the loader issues
#[derive(Clone, Default)]
pub struct MemoryWarehouse {
    pub state: Arc<Mutex<WarehouseState>>,
}

impl MemoryWarehouse {
    pub fn with_numeric_columns(columns: &[usize]) -> Self {
        let warehouse = Self::default();
        warehouse.state.lock().unwrap().numeric_columns = columns.to_vec();
        warehouse
    }

    pub fn unreachable() -> Self {
        let warehouse = Self::default();
        warehouse.state.lock().unwrap().unreachable = true;
        warehouse
    }

    pub fn rows(&self) -> usize {
        self.state.lock().unwrap().table.len()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }
}

pub struct MemorySession {
    state: Arc<Mutex<WarehouseState>>,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.state.lock().unwrap().open_sessions -= 1;
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    type Session = MemorySession;

    async fn connect(&self) -> Result<MemorySession> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if state.unreachable {
            bail!("could not reach warehouse");
        }
        state.open_sessions += 1;
        Ok(MemorySession {
            state: self.state.clone(),
        })
    }
}

fn count_result(n: usize) -> ResultSet {
    ResultSet::new(vec!["COUNT(*)".into()], vec![vec![Some(n.to_string())]])
}

fn copy_into(state: &mut WarehouseState, stage: &str) -> Result<ResultSet> {
    let files = state
        .stages
        .get(stage)
        .ok_or_else(|| eyre!("Stage '{}' does not exist", stage))?
        .clone();
    if files.is_empty() {
        return Ok(ResultSet::new(
            vec!["status".into()],
            vec![vec![Some("Copy executed with 0 files processed.".into())]],
        ));
    }

    let mut report = Vec::new();
    for (i, contents) in files.iter().enumerate() {
        // SKIP_HEADER = 1
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(contents.as_bytes());
        let (mut parsed, mut loaded) = (0, 0);
        let mut first_error = None;
        for record in reader.records() {
            let record = record?;
            parsed += 1;
            let bad = state.numeric_columns.iter().find_map(|&col| {
                let field = record.get(col).unwrap_or_default();
                (!field.is_empty() && field.parse::<f64>().is_err())
                    .then(|| format!("Numeric value '{}' is not recognized", field))
            });
            match bad {
                Some(error) => {
                    first_error.get_or_insert(error);
                }
                None => {
                    state
                        .table
                        .push(record.iter().map(str::to_string).collect());
                    loaded += 1;
                }
            }
        }
        report.push(vec![
            Some(format!("{}/file-{}.csv.gz", stage, i)),
            Some(if parsed == loaded { "LOADED" } else { "PARTIALLY_LOADED" }.into()),
            Some(parsed.to_string()),
            Some(loaded.to_string()),
            Some(parsed.to_string()),
            Some((parsed - loaded).to_string()),
            first_error,
        ]);
    }

    Ok(ResultSet::new(
        [
            "file",
            "status",
            "rows_parsed",
            "rows_loaded",
            "error_limit",
            "errors_seen",
            "first_error",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        report,
    ))
}

#[async_trait]
impl WarehouseSession for MemorySession {
    async fn execute(&self, sql: &str) -> Result<ResultSet> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(sql.to_string());

        let words: Vec<&str> = sql.split_whitespace().collect();
        match words.as_slice() {
            ["CREATE", "OR", "REPLACE", "STAGE", name, ..] => {
                state.stages.insert(name.to_string(), Vec::new());
                Ok(ResultSet::default())
            }
            ["TRUNCATE", ..] => {
                state.table.clear();
                Ok(ResultSet::default())
            }
            ["COPY", "INTO", _, "FROM", stage, ..] => {
                let stage = stage.trim_start_matches('@').to_string();
                copy_into(&mut state, &stage)
            }
            ["SELECT", "COUNT(*)", ..] => Ok(count_result(state.table.len())),
            ["SELECT", "1" | "1;"] => Ok(count_result(1)),
            _ => bail!("Unsupported statement: {}", sql),
        }
    }

    async fn put(&self, file: &Path, stage: &str) -> Result<()> {
        let contents = std::fs::read_to_string(file)?;
        let mut state = self.state.lock().unwrap();
        state
            .statements
            .push(format!("PUT file://{} @{}", file.display(), stage));
        state
            .stages
            .get_mut(stage)
            .ok_or_else(|| eyre!("Stage '{}' does not exist", stage))?
            .push(contents);
        Ok(())
    }
}

fn timestamp(day: u32, hour: u32) -> Value {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .map(Value::from)
        .unwrap_or(Value::Null)
}

/// Three articles covering NULLs, embedded delimiters and line breaks
pub fn sample_articles() -> RowBuffer {
    let schema = Schema::new(vec![
        Column::new("id", ColumnType::Integer),
        Column::new("title", ColumnType::Text),
        Column::new("views", ColumnType::Integer),
        Column::new("rating", ColumnType::Float),
        Column::new("published", ColumnType::Boolean),
        Column::new("created_at", ColumnType::Timestamp),
    ]);
    RowBuffer::with_rows(
        schema,
        vec![
            vec![
                Value::Integer(1),
                Value::from("Hello, world"),
                Value::Integer(10),
                Value::Float(4.5),
                Value::Boolean(true),
                timestamp(1, 8),
            ],
            vec![
                Value::Integer(2),
                Value::from("A \"quoted\" title"),
                Value::Integer(20),
                Value::Null,
                Value::Boolean(false),
                timestamp(2, 9),
            ],
            vec![
                Value::Integer(3),
                Value::from("Line\nbreak"),
                Value::Integer(30),
                Value::Float(3.0),
                Value::Boolean(true),
                Value::Null,
            ],
        ],
    )
    .unwrap()
}

/// Articles where one `views` cell cannot be loaded into a numeric column
pub fn articles_with_bad_views() -> RowBuffer {
    let schema = Schema::new(vec![
        Column::new("id", ColumnType::Integer),
        Column::new("views", ColumnType::Text),
    ]);
    RowBuffer::with_rows(
        schema,
        vec![
            vec![Value::Integer(1), Value::from("10")],
            vec![Value::Integer(2), Value::from("lots")],
            vec![Value::Integer(3), Value::from("30")],
        ],
    )
    .unwrap()
}
