use chrono::{DateTime, SubsecRound, Utc};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::dataset::{AssemblyError, Batches, Datasets};
use crate::facebook::MetaAdsApi;
use crate::fallback::{FallbackError, FallbackWriter};
use crate::models::{AdAccount, Collection, ParentContext};
use crate::normalize::normalize_all;
use crate::warehouse::{load, LoadError, TableId, Warehouse};

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Nothing was loaded; every dataset was written locally, the failing one untyped.
    #[error("{source}; datasets saved locally instead")]
    InvalidData {
        #[source]
        source: AssemblyError,
        files: Vec<PathBuf>,
    },
    #[error("{cause} and the local fallback failed too: {source}")]
    Fallback {
        cause: String,
        #[source]
        source: FallbackError,
    },
}

#[derive(Debug)]
pub struct RunReport {
    pub collected_at: DateTime<Utc>,
    pub accounts: usize,
    pub datasets: Datasets,
}

#[derive(Debug)]
pub enum RunOutcome {
    Loaded(RunReport),
    NoAccounts,
    /// The warehouse load failed and every dataset was written locally instead.
    FellBack {
        report: RunReport,
        cause: LoadError,
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    ConfigMissing,
    NoAccounts,
    LoadFailedFallbackSucceeded,
    LoadFailedFallbackFailed,
    InvalidData,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::ConfigMissing => 2,
            ExitStatus::NoAccounts => 3,
            ExitStatus::LoadFailedFallbackSucceeded => 4,
            ExitStatus::LoadFailedFallbackFailed => 5,
            ExitStatus::InvalidData => 6,
        }
    }

    pub fn of(result: &Result<RunOutcome, PipelineError>) -> Self {
        match result {
            Ok(RunOutcome::Loaded(_)) => ExitStatus::Success,
            Ok(RunOutcome::NoAccounts) => ExitStatus::NoAccounts,
            Ok(RunOutcome::FellBack { .. }) => ExitStatus::LoadFailedFallbackSucceeded,
            Err(PipelineError::Fallback { .. }) => ExitStatus::LoadFailedFallbackFailed,
            Err(PipelineError::InvalidData { .. }) => ExitStatus::InvalidData,
        }
    }
}

pub struct Pipeline {
    api: MetaAdsApi,
    warehouse: Box<dyn Warehouse>,
    fallback: FallbackWriter,
    dataset: String,
}

impl Pipeline {
    pub fn new(api: MetaAdsApi, warehouse: Box<dyn Warehouse>, fallback: FallbackWriter, dataset: String) -> Self {
        Self {
            api,
            warehouse,
            fallback,
            dataset,
        }
    }

    /// One full fetch, assemble and load pass.
    pub async fn run(&self) -> Result<RunOutcome, PipelineError> {
        // Rows carry the stamp at microsecond precision.
        let collected_at = Utc::now().trunc_subsecs(6);
        info!(collected_at = %collected_at, "Starting collection run");

        let accounts = self.api.get_ad_accounts().await;
        if accounts.is_empty() {
            error!("No ad accounts found, nothing to collect");
            return Ok(RunOutcome::NoAccounts);
        }

        let mut batches = Batches::default();
        for account in &accounts {
            self.process_account(account, collected_at, &mut batches).await;
        }

        let datasets = match batches.assemble() {
            Ok(datasets) => datasets,
            Err(failure) => return Err(self.keep_untyped(failure)),
        };
        let report = RunReport {
            collected_at,
            accounts: accounts.len(),
            datasets,
        };

        match self.load_all(&report.datasets).await {
            Ok(()) => {
                info!(accounts = report.accounts, "Run complete, all datasets loaded");
                Ok(RunOutcome::Loaded(report))
            }
            Err(cause) => {
                warn!(error = %cause, "Warehouse load failed, saving all datasets locally instead");
                match self.save_all_local(&report.datasets) {
                    Ok(files) => Ok(RunOutcome::FellBack { report, cause, files }),
                    Err(source) => Err(PipelineError::Fallback {
                        cause: format!("Warehouse load failed ({cause})"),
                        source,
                    }),
                }
            }
        }
    }

    fn keep_untyped(&self, failure: AssemblyError) -> PipelineError {
        error!(error = %failure, "Datasets could not be typed, skipping the warehouse load");
        match self.save_all_local(&failure.untyped) {
            Ok(files) => PipelineError::InvalidData { source: failure, files },
            Err(source) => PipelineError::Fallback {
                cause: failure.to_string(),
                source,
            },
        }
    }

    async fn process_account(&self, account: &AdAccount, collected_at: DateTime<Utc>, batches: &mut Batches) {
        info!(account_id = %account.account_id(), account_name = %account.name, status = account.status(), "Processing account");
        let context = ParentContext::for_account(account, collected_at);

        for collection in Collection::ALL {
            let raw = self.api.get_collection(account, collection).await;
            let fetched = raw.len();
            batches.extend(collection, normalize_all(raw, &context));
            info!(
                account_id = %context.account_id,
                collection = %collection,
                rows = fetched,
                total = batches.len(collection),
                "Collected"
            );
        }
    }

    /// Loads the three datasets in order, stopping at the first failure.
    pub async fn load_all(&self, datasets: &Datasets) -> Result<(), LoadError> {
        for (collection, dataset) in datasets.iter() {
            let table = TableId::new(self.dataset.clone(), collection.table_name());
            load(self.warehouse.as_ref(), dataset, &table).await?;
        }
        Ok(())
    }

    pub fn save_all_local(&self, datasets: &Datasets) -> Result<Vec<PathBuf>, FallbackError> {
        datasets
            .iter()
            .map(|(collection, dataset)| self.fallback.save_local(dataset, &collection.fallback_filename()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let statuses = [
            ExitStatus::Success,
            ExitStatus::Failure,
            ExitStatus::ConfigMissing,
            ExitStatus::NoAccounts,
            ExitStatus::LoadFailedFallbackSucceeded,
            ExitStatus::LoadFailedFallbackFailed,
            ExitStatus::InvalidData,
        ];
        let mut codes: Vec<u8> = statuses.iter().map(|s| s.code()).collect();
        codes.dedup();
        assert_eq!(codes, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn outcomes_map_to_exit_status() {
        assert_eq!(ExitStatus::of(&Ok(RunOutcome::NoAccounts)), ExitStatus::NoAccounts);

        let fallback_failed = Err(PipelineError::Fallback {
            cause: "Warehouse load failed".to_string(),
            source: FallbackError::Directory {
                path: PathBuf::from("/nowhere"),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            },
        });
        assert_eq!(ExitStatus::of(&fallback_failed), ExitStatus::LoadFailedFallbackFailed);
    }
}
