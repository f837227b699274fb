use dotenv::dotenv;
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::bigquery::BigQueryConfig;
use crate::constants::{
    BIGQUERY_BASE_URL, DEFAULT_CHUNK_SIZE, DEFAULT_HTTP_TIMEOUT_SECS, FACEBOOK_API_VERSION,
    FACEBOOK_BASE_URL, FALLBACK_DIR_NAME,
};
use crate::facebook::InsightQuery;
use crate::http::{Backoff, RetryPolicy};
use crate::warehouse::WriteDisposition;

/// Runtime settings. Not `Debug`: it holds the API access token.
#[derive(Clone)]
pub struct Config {
    pub access_token: String,
    pub api_base_url: String,
    pub insights: InsightQuery,
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
    pub warehouse: BigQueryConfig,
    pub dataset: String,
    pub credentials_path: PathBuf,
    pub fallback_dir: PathBuf,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable not found: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),
    #[error("Credentials file {path} is not readable: {reason}")]
    CredentialsUnreadable { path: PathBuf, reason: String },
}

fn required(name: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnv(name.to_string())),
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn list(name: &str) -> Option<Vec<String>> {
    optional(name).map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn parsed_list<T>(name: &str) -> Result<Option<Vec<T>>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    list(name)
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    item.parse().map_err(|e: T::Err| ConfigError::Invalid {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })
                })
                .collect()
        })
        .transpose()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let access_token = required("META_ACCESS_TOKEN")?;

        let api_base_url = optional("META_API_BASE_URL")
            .unwrap_or_else(|| format!("{}/{}", FACEBOOK_BASE_URL, FACEBOOK_API_VERSION));
        Url::parse(&api_base_url).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;

        let mut insights = InsightQuery::default();
        if let Some(fields) = list("META_INSIGHT_FIELDS") {
            insights.fields = fields;
        }
        if let Some(level) = optional("META_INSIGHT_LEVEL") {
            insights.level = level;
        }
        insights.date_preset = optional("META_INSIGHT_DATE_PRESET");

        let mut retry = RetryPolicy::default();
        retry.max_retries = parsed("HTTP_MAX_RETRIES", retry.max_retries)?;
        retry.backoff = parsed::<Backoff>("HTTP_BACKOFF", retry.backoff)?;
        let factor: f64 = parsed("HTTP_BACKOFF_FACTOR_SECS", retry.base_delay.as_secs_f64())?;
        retry.base_delay = Duration::try_from_secs_f64(factor).map_err(|e| ConfigError::Invalid {
            name: "HTTP_BACKOFF_FACTOR_SECS".to_string(),
            reason: e.to_string(),
        })?;
        if let Some(codes) = parsed_list::<u16>("HTTP_RETRY_STATUS_CODES")? {
            retry.retryable_status_codes = codes.into_iter().collect::<HashSet<_>>();
        }
        let http_timeout = Duration::from_secs(parsed("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?);

        let project_id = required("BIGQUERY_PROJECT_ID")?;
        let dataset = required("BIGQUERY_DATASET")?;
        let api_url = optional("BIGQUERY_API_URL").unwrap_or_else(|| BIGQUERY_BASE_URL.to_string());
        Url::parse(&api_url).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;

        let mut warehouse = BigQueryConfig::new(project_id, api_url);
        warehouse.write_disposition =
            parsed::<WriteDisposition>("BIGQUERY_WRITE_DISPOSITION", WriteDisposition::Replace)?;
        warehouse.chunk_size = parsed("BIGQUERY_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        warehouse.location = optional("BIGQUERY_LOCATION");
        warehouse.timeout = http_timeout;

        let credentials_path = PathBuf::from(required("GOOGLE_APPLICATION_CREDENTIALS")?);
        std::fs::File::open(&credentials_path).map_err(|e| ConfigError::CredentialsUnreadable {
            path: credentials_path.clone(),
            reason: e.to_string(),
        })?;

        let fallback_dir = optional("FALLBACK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join(FALLBACK_DIR_NAME));

        Ok(Self {
            access_token,
            api_base_url,
            insights,
            retry,
            http_timeout,
            warehouse,
            dataset,
            credentials_path,
            fallback_dir,
        })
    }
}
