//! Run-scoped hand-off slots between pipeline stages
//!
//! Each stage publishes its payload under `(stage, key)` and the next stage
//! reads it from there. Slots live in a [`RunContext`] owned by a single run
//! and are dropped with it, so nothing outlives the run.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Payload names, one per producing stage
pub mod keys {
    pub const DATAFRAME: &str = "dataframe";
    pub const TRANSFORMED_DATAFRAME: &str = "transformed_dataframe";
    pub const CSV_FILENAME: &str = "csv_filename";
    pub const LOAD_REPORT: &str = "load_report";
}

/// The five pipeline stages in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Extract,
    Transform,
    Serialize,
    Load,
    Validate,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Extract,
        Stage::Transform,
        Stage::Serialize,
        Stage::Load,
        Stage::Validate,
    ];

    /// Task identifier as known to operators and logs
    pub fn task_id(&self) -> &'static str {
        match self {
            Self::Extract => "extract_data",
            Self::Transform => "transform_data",
            Self::Serialize => "load_to_csv",
            Self::Load => "upload_to_snowflake",
            Self::Validate => "validate_data",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.task_id())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("no payload '{key}' was published by {stage}")]
    Missing { stage: Stage, key: &'static str },

    #[error("payload '{key}' published by {stage} is not a {expected}")]
    WrongType {
        stage: Stage,
        key: &'static str,
        expected: &'static str,
    },

    #[error("payload '{key}' was already published by {stage}")]
    AlreadyPublished { stage: Stage, key: &'static str },
}

/// Per-run state: identity plus the hand-off slots
///
/// Payloads are written once and may be read any number of times, so a
/// consuming stage that is retried sees the same input on every attempt.
///
/// # Example
/// ```
/// use articles_etl::etl::{RunContext, Stage};
///
/// let mut ctx = RunContext::new();
/// ctx.publish(Stage::Extract, "dataframe", vec![1, 2, 3]).unwrap();
///
/// let rows: &Vec<i32> = ctx.get(Stage::Extract, "dataframe").unwrap();
/// assert_eq!(rows.len(), 3);
/// assert!(ctx.publish(Stage::Extract, "dataframe", vec![4]).is_err());
/// ```
pub struct RunContext {
    run_id: String,
    started_at: DateTime<Utc>,
    slots: HashMap<(Stage, &'static str), Box<dyn Any + Send + Sync>>,
}

impl RunContext {
    pub fn new() -> Self {
        let started_at = Utc::now();
        Self {
            run_id: started_at.format("%Y%m%dT%H%M%S%.3fZ").to_string(),
            started_at,
            slots: HashMap::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Publish a payload under `(stage, key)`
    pub fn publish<T>(&mut self, stage: Stage, key: &'static str, value: T) -> Result<(), HandoffError>
    where
        T: Any + Send + Sync,
    {
        if self.slots.contains_key(&(stage, key)) {
            return Err(HandoffError::AlreadyPublished { stage, key });
        }
        log::trace!("[{}] published {}/{}", self.run_id, stage, key);
        self.slots.insert((stage, key), Box::new(value));
        Ok(())
    }

    /// Borrow a published payload
    pub fn get<T>(&self, stage: Stage, key: &'static str) -> Result<&T, HandoffError>
    where
        T: Any,
    {
        self.slots
            .get(&(stage, key))
            .ok_or(HandoffError::Missing { stage, key })?
            .downcast_ref::<T>()
            .ok_or(HandoffError::WrongType {
                stage,
                key,
                expected: std::any::type_name::<T>(),
            })
    }

    /// Drop a payload before the end of the run, returning whether it existed
    pub fn discard(&mut self, stage: Stage, key: &'static str) -> bool {
        let existed = self.slots.remove(&(stage, key)).is_some();
        if existed {
            log::trace!("[{}] discarded {}/{}", self.run_id, stage, key);
        }
        existed
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
