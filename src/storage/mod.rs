//! Local file storage for serialized buffers
//!
//! This module handles the file I/O between the transform and load stages:
//! - CSV writing and reading
//! - Scoped staged-file handles

mod csv_file;
mod staged;

pub use csv_file::{CsvReader, CsvWriter, write_csv};
pub use staged::StagedFile;
