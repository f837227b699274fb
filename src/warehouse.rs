use async_trait::async_trait;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

use crate::credentials::CredentialsError;
use crate::dataset::Dataset;
use crate::validation::{ensure_valid, ValidationError};

/// Destination table, written `<dataset>.<table>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableId {
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteDisposition {
    #[default]
    Replace,
    Append,
}

impl WriteDisposition {
    pub fn as_bigquery(self) -> &'static str {
        match self {
            WriteDisposition::Replace => "WRITE_TRUNCATE",
            WriteDisposition::Append => "WRITE_APPEND",
        }
    }
}

impl FromStr for WriteDisposition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "replace" | "truncate" => Ok(WriteDisposition::Replace),
            "append" => Ok(WriteDisposition::Append),
            other => Err(format!("unknown write disposition '{}'", other)),
        }
    }
}

#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("Credentials error: {0}")]
    Credentials(#[from] CredentialsError),
    #[error("Warehouse request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Warehouse rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Load job {job_id} failed: {message}")]
    Job { job_id: String, message: String },
    #[error("Load job {0} did not finish in time")]
    Timeout(String),
    #[error("Invalid warehouse response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Bulk-uploads every row of `dataset` into `table`.
    async fn upload(&self, dataset: &Dataset, table: &TableId) -> Result<(), WarehouseError>;
}

/// Validates `dataset`, then uploads it. An empty dataset never reaches the warehouse.
pub async fn load(warehouse: &dyn Warehouse, dataset: &Dataset, table: &TableId) -> Result<(), LoadError> {
    ensure_valid(dataset, &table.table)?;
    warehouse.upload(dataset, table).await?;
    info!(table = %table, rows = dataset.len(), "Dataset loaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::assemble;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Warehouse for Recording {
        async fn upload(&self, _dataset: &Dataset, table: &TableId) -> Result<(), WarehouseError> {
            self.calls.lock().unwrap().push(table.to_string());
            Ok(())
        }
    }

    #[test]
    fn table_id_formats_as_dataset_dot_table() {
        assert_eq!(TableId::new("marketing", "campaigns").to_string(), "marketing.campaigns");
    }

    #[test]
    fn write_disposition_parses() {
        assert_eq!("append".parse::<WriteDisposition>(), Ok(WriteDisposition::Append));
        assert_eq!("REPLACE".parse::<WriteDisposition>(), Ok(WriteDisposition::Replace));
        assert!("upsert".parse::<WriteDisposition>().is_err());
    }

    #[tokio::test]
    async fn empty_dataset_is_rejected_before_upload() {
        let warehouse = Recording::default();
        let err = load(&warehouse, &Dataset::default(), &TableId::new("ds", "adsets"))
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::Validation(ValidationError::Empty(ref name)) if name == "adsets"));
        assert!(warehouse.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn valid_dataset_is_uploaded() {
        let warehouse = Recording::default();
        let dataset = assemble(json!({"id": "1"}).as_object().cloned().into_iter().collect()).unwrap();

        load(&warehouse, &dataset, &TableId::new("ds", "campaigns")).await.unwrap();

        assert_eq!(*warehouse.calls.lock().unwrap(), vec!["ds.campaigns".to_string()]);
    }
}
