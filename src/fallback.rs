use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::dataset::Dataset;

#[derive(Error, Debug)]
pub enum FallbackError {
    #[error("Could not prepare fallback directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Writes datasets as CSV files into a local directory.
pub struct FallbackWriter {
    dir: PathBuf,
}

impl FallbackWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes `dataset` with a header row and returns the absolute file path.
    pub fn save_local(&self, dataset: &Dataset, filename: &str) -> Result<PathBuf, FallbackError> {
        fs::create_dir_all(&self.dir).map_err(|source| FallbackError::Directory {
            path: self.dir.clone(),
            source,
        })?;

        let dir = fs::canonicalize(&self.dir).map_err(|source| FallbackError::Directory {
            path: self.dir.clone(),
            source,
        })?;
        let path = dir.join(filename);

        write_csv(dataset, &path).map_err(|source| FallbackError::Write {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), rows = dataset.len(), "Saved dataset locally");
        Ok(path)
    }
}

fn write_csv(dataset: &Dataset, path: &Path) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(dataset.columns())?;
    for row in dataset.rows() {
        writer.write_record(row.iter().map(|cell| cell.render()))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::assemble;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn writes_header_and_rows() {
        let tmp = TempDir::new().unwrap();
        let records = vec![
            json!({"id": "1", "name": "Spring, sale"}),
            json!({"id": "2"}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
        let dataset = assemble(records).unwrap();

        let writer = FallbackWriter::new(tmp.path().join("out"));
        let path = writer.save_local(&dataset, "campaigns.csv").unwrap();

        assert!(path.is_absolute());
        assert!(path.ends_with("campaigns.csv"));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.headers().unwrap(), vec!["id", "name"]);
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "Spring, sale");
        assert_eq!(&rows[1][1], "");
    }
}
