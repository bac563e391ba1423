//! Persistence of experiment results.

pub mod storage;

pub use storage::{read_records, session_file_name, write_records, CsvWriter};
