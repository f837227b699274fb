use std::process::ExitCode;
use tracing::{error, info};

use meta_ads_loader::bigquery::BigQueryLoader;
use meta_ads_loader::config::Config;
use meta_ads_loader::credentials::ServiceAccountKey;
use meta_ads_loader::facebook::MetaAdsApi;
use meta_ads_loader::fallback::FallbackWriter;
use meta_ads_loader::http::ApiClient;
use meta_ads_loader::logging::{init_logging, LogSettings};
use meta_ads_loader::pipeline::{ExitStatus, Pipeline, RunOutcome};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let log_settings = match LogSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Config error: {e}");
            return ExitCode::from(ExitStatus::ConfigMissing.code());
        }
    };
    let _guard = match init_logging(&log_settings) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialise logging: {e}");
            return ExitCode::from(ExitStatus::Failure.code());
        }
    };

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration error");
            return ExitCode::from(ExitStatus::ConfigMissing.code());
        }
    };

    let key = match ServiceAccountKey::from_file(&config.credentials_path) {
        Ok(key) => key,
        Err(e) => {
            error!(error = %e, "Could not load warehouse credentials");
            return ExitCode::from(ExitStatus::ConfigMissing.code());
        }
    };

    let client = match ApiClient::new(config.retry.clone(), config.http_timeout) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Could not build HTTP client");
            return ExitCode::from(ExitStatus::Failure.code());
        }
    };

    let api = MetaAdsApi::new(
        client,
        config.access_token.clone(),
        config.api_base_url.clone(),
        config.insights.clone(),
    );
    let warehouse = match BigQueryLoader::new(config.warehouse.clone(), key) {
        Ok(loader) => loader,
        Err(e) => {
            error!(error = %e, "Could not build warehouse client");
            return ExitCode::from(ExitStatus::Failure.code());
        }
    };
    let fallback = FallbackWriter::new(config.fallback_dir.clone());
    let pipeline = Pipeline::new(api, Box::new(warehouse), fallback, config.dataset.clone());

    let result = pipeline.run().await;
    match &result {
        Ok(RunOutcome::Loaded(report)) => {
            info!(
                campaigns = report.datasets.campaigns.len(),
                adsets = report.datasets.adsets.len(),
                insights = report.datasets.insights.len(),
                "Data loaded into the warehouse"
            );
        }
        Ok(RunOutcome::NoAccounts) => {}
        Ok(RunOutcome::FellBack { files, .. }) => {
            for file in files {
                info!(path = %file.display(), "Fallback file written");
            }
        }
        Err(e) => error!(error = %e, "Run failed"),
    }

    ExitCode::from(ExitStatus::of(&result).code())
}
