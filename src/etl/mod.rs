//! Core ETL (Extract, Transform, Load) abstractions
//!
//! This module provides the trait definitions for the pipeline stages, the
//! run-scoped hand-off slots between them, the per-stage retry policy, and
//! the [`Pipeline`] that sequences everything.

mod extract;
mod handoff;
mod load;
mod pipeline;
mod retry;
mod transform;
mod validate;

pub use extract::Extractor;
pub use handoff::{HandoffError, RunContext, Stage, keys};
pub use load::Loader;
pub use pipeline::Pipeline;
pub use retry::RetryPolicy;
pub use transform::Transformer;
pub use validate::Validator;
