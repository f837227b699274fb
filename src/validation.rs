use thiserror::Error;
use tracing::{error, info, warn};

use crate::dataset::Dataset;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Dataset '{0}' is empty")]
    Empty(String),
}

/// Checks a dataset before it is loaded. Only an empty dataset fails;
/// null counts and column types are reported but never reject.
pub fn validate(dataset: &Dataset, name: &str) -> bool {
    if dataset.is_empty() {
        error!(dataset = name, "Dataset is empty");
        return false;
    }

    for (idx, column) in dataset.columns().iter().enumerate() {
        let nulls = dataset.null_count(idx);
        if nulls > 0 {
            warn!(dataset = name, column = %column, nulls, rows = dataset.len(), "Column has null values");
        }
        info!(dataset = name, column = %column, dtype = %dataset.column_type(idx), "Column type");
    }

    true
}

/// [`validate`], as a `Result` for callers that must abort.
pub fn ensure_valid(dataset: &Dataset, name: &str) -> Result<(), ValidationError> {
    if validate(dataset, name) {
        Ok(())
    } else {
        Err(ValidationError::Empty(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::assemble;
    use serde_json::json;

    #[test]
    fn empty_dataset_fails() {
        let dataset = Dataset::default();
        assert!(!validate(&dataset, "campaigns"));
        assert_eq!(
            ensure_valid(&dataset, "campaigns"),
            Err(ValidationError::Empty("campaigns".to_string()))
        );
    }

    #[test]
    fn dataset_with_nulls_passes() {
        let records = vec![json!({"id": "1"}), json!({"id": "2", "name": "b"})]
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        let dataset = assemble(records).unwrap();

        assert_eq!(dataset.null_count(dataset.column_index("name").unwrap()), 1);
        assert!(validate(&dataset, "campaigns"));
        assert!(ensure_valid(&dataset, "campaigns").is_ok());
    }
}
