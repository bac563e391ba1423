//! CSV result files with clean feature flag handling.
//!
//! Each file starts with the run metadata as pretty-printed JSON, one `# `-prefixed comment
//! line per JSON line, followed by a header row and one row per record. Column names come
//! from the record's serde field names.

use crate::{error::AppResult, metadata::RunMetadata};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

/// `<prefix>_<YYYYmmdd_HHMMSS>.csv`
pub fn session_file_name(prefix: &str) -> String {
    format!(
        "{}_{}.csv",
        prefix,
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    )
}

/// Write `records` to a new file at `path` and return the path.
pub fn write_records<T: Serialize>(
    path: impl AsRef<Path>,
    metadata: &RunMetadata,
    records: &[T],
) -> AppResult<PathBuf> {
    let mut writer = CsvWriter::create(path, metadata)?;
    for record in records {
        writer.write(record)?;
    }
    writer.finish()
}

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tracing::info;

    pub struct CsvWriter {
        path: PathBuf,
        writer: csv::Writer<File>,
        rows: usize,
    }

    impl CsvWriter {
        /// Create the file (and missing parent directories) and write the metadata block.
        pub fn create(path: impl AsRef<Path>, metadata: &RunMetadata) -> AppResult<Self> {
            metadata.validate()?;
            let path = path.as_ref().to_path_buf();
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let mut file = File::create(&path)?;
            let json_string = serde_json::to_string_pretty(metadata)?;
            for line in json_string.lines() {
                file.write_all(b"# ")
                    .and_then(|_| file.write_all(line.as_bytes()))
                    .and_then(|_| file.write_all(b"\n"))?;
            }

            info!("CSV writer initialized at '{}'.", path.display());
            Ok(Self {
                path,
                writer: csv::Writer::from_writer(file),
                rows: 0,
            })
        }

        pub fn write<T: Serialize>(&mut self, record: &T) -> AppResult<()> {
            self.writer.serialize(record)?;
            self.rows += 1;
            Ok(())
        }

        pub fn finish(mut self) -> AppResult<PathBuf> {
            self.writer.flush()?;
            info!(rows = self.rows, "CSV file written: {}", self.path.display());
            Ok(self.path)
        }
    }

    /// Read back the records of a result file, skipping the metadata block.
    pub fn read_records<T: DeserializeOwned>(path: impl AsRef<Path>) -> AppResult<Vec<T>> {
        let mut reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .from_path(path)?;
        let mut records = Vec::new();
        for record in reader.deserialize() {
            records.push(record?);
        }
        Ok(records)
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use crate::error::DaqError;

    pub struct CsvWriter;

    impl CsvWriter {
        pub fn create(_path: impl AsRef<Path>, _metadata: &RunMetadata) -> AppResult<Self> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }

        pub fn write<T: Serialize>(&mut self, _record: &T) -> AppResult<()> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }

        pub fn finish(self) -> AppResult<PathBuf> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }

    pub fn read_records<T: DeserializeOwned>(_path: impl AsRef<Path>) -> AppResult<Vec<T>> {
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::{read_records, CsvWriter};

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::{read_records, CsvWriter};

#[cfg(all(test, feature = "storage_csv"))]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        frequency_hz: f64,
        power: f64,
    }

    #[test]
    fn test_metadata_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sweep.csv");
        let metadata = RunMetadata::builder("resonance_sweep")
            .parameter("points", 2)
            .build();
        let rows = vec![
            Row {
                frequency_hz: 37000.0,
                power: 0.5,
            },
            Row {
                frequency_hz: 38000.0,
                power: 2.25,
            },
        ];

        let written = write_records(&path, &metadata, &rows).unwrap();
        assert_eq!(written, path);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# {"));
        assert!(text.contains("#   \"experiment\": \"resonance_sweep\""));
        assert!(text.contains("frequency_hz,power\n"));

        let back: Vec<Row> = read_records(&path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_unnamed_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unnamed.csv");
        let rows: Vec<Row> = Vec::new();

        assert!(write_records(&path, &RunMetadata::default(), &rows).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_session_file_name() {
        let name = session_file_name("feedback");
        assert!(name.starts_with("feedback_"));
        assert!(name.ends_with(".csv"));
    }
}
