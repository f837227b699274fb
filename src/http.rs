//! Retrying GET client for the Marketing API.
//!
//! Failures never surface as `Err` variants of a transport error type: every
//! outcome that is not a JSON body comes back as an [`ErrorEnvelope`], the same
//! `{"error": {"message": ..}}` shape the Graph API itself returns, so call
//! sites branch on a single value.

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use url::Url;

use crate::constants::{
    DEFAULT_BACKOFF_FACTOR_SECS, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_STATUS_CODES,
    FB_THROTTLING_ERROR_CODES, MAX_BACKOFF_SECS,
};

const MAX_LOGGED_BODY: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorBody {
                message: message.into(),
                kind: None,
                code: None,
            },
        }
    }

    pub fn message(&self) -> &str {
        &self.error.message
    }

    /// Reads the envelope out of a response body that carries an `error` key.
    pub fn from_body(body: &Value) -> Option<Self> {
        let error = body.get("error")?;
        match serde_json::from_value::<ApiErrorBody>(error.clone()) {
            Ok(error) => Some(Self { error }),
            Err(_) => Some(Self::new(error.to_string())),
        }
    }
}

impl std::fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.error.code {
            Some(code) => write!(f, "{} (code {})", self.error.message, code),
            None => f.write_str(&self.error.message),
        }
    }
}

impl std::error::Error for ErrorEnvelope {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Exponential,
    Fixed,
}

impl FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exponential" | "exp" => Ok(Backoff::Exponential),
            "fixed" | "constant" => Ok(Backoff::Fixed),
            other => Err(format!("unknown backoff policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
    pub base_delay: Duration,
    pub retryable_status_codes: HashSet<u16>,
    /// Graph API error codes that mean "slow down" even on a 4xx status.
    pub retryable_error_codes: HashSet<i64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::Exponential,
            base_delay: Duration::from_secs_f64(DEFAULT_BACKOFF_FACTOR_SECS),
            retryable_status_codes: DEFAULT_RETRY_STATUS_CODES.iter().copied().collect(),
            retryable_error_codes: FB_THROTTLING_ERROR_CODES.iter().copied().collect(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(Duration::from_secs(MAX_BACKOFF_SECS))
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_status_codes.contains(&status.as_u16())
    }

    fn is_throttling(&self, envelope: &ErrorEnvelope) -> bool {
        envelope
            .error
            .code
            .map_or(false, |code| self.retryable_error_codes.contains(&code))
    }
}

enum Attempt {
    Done(Result<Value, ErrorEnvelope>),
    Retry {
        reason: String,
        retry_after: Option<Duration>,
    },
}

pub struct ApiClient {
    client: Client,
    policy: RetryPolicy,
}

impl ApiClient {
    pub fn new(policy: RetryPolicy, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, policy })
    }

    /// Issues a GET, retrying connection failures and retryable statuses.
    ///
    /// Makes at most `max_retries + 1` attempts.
    pub async fn get(&self, url: &str) -> Result<Value, ErrorEnvelope> {
        let target = redact_url(url);
        let attempts = self.policy.max_retries + 1;
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            debug!(url = %target, attempt, "GET");

            let retry_after = match self.attempt(url).await {
                Attempt::Done(Ok(body)) => return Ok(body),
                Attempt::Done(Err(envelope)) => {
                    error!(url = %target, attempt, error = %envelope, "Request failed");
                    return Err(envelope);
                }
                Attempt::Retry {
                    reason,
                    retry_after,
                } => {
                    warn!(url = %target, attempt, max_attempts = attempts, reason = %reason, "Request attempt failed");
                    last_reason = reason;
                    retry_after
                }
            };

            if attempt < attempts {
                let delay = retry_after
                    .map(|d| d.min(Duration::from_secs(MAX_BACKOFF_SECS)))
                    .unwrap_or_else(|| self.policy.delay_for(attempt));
                sleep(delay).await;
            }
        }

        error!(url = %target, attempts, reason = %last_reason, "Giving up after retries");
        Err(ErrorEnvelope::new(format!(
            "request to {} failed after {} attempts: {}",
            target, attempts, last_reason
        )))
    }

    async fn attempt(&self, url: &str) -> Attempt {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                return Attempt::Retry {
                    reason: format!("connection error: {}", e.without_url()),
                    retry_after: None,
                }
            }
        };

        let status = response.status();
        let retry_after = retry_after(&response);

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Attempt::Retry {
                    reason: format!("failed to read body: {}", e.without_url()),
                    retry_after: None,
                }
            }
        };

        if self.policy.is_retryable_status(status) {
            return Attempt::Retry {
                reason: format!("HTTP {}", status),
                retry_after,
            };
        }

        let parsed: Option<Value> = serde_json::from_str(&body).ok();

        if let Some(envelope) = parsed.as_ref().and_then(ErrorEnvelope::from_body) {
            if self.policy.is_throttling(&envelope) {
                return Attempt::Retry {
                    reason: format!("throttled: {}", envelope),
                    retry_after,
                };
            }
            return Attempt::Done(Err(envelope));
        }

        if !status.is_success() {
            return Attempt::Done(Err(ErrorEnvelope::new(format!(
                "HTTP {}: {}",
                status,
                truncate(&body, MAX_LOGGED_BODY)
            ))));
        }

        match parsed {
            Some(body) => Attempt::Done(Ok(body)),
            None => Attempt::Done(Err(ErrorEnvelope::new(format!(
                "invalid JSON in response: {}",
                truncate(&body, MAX_LOGGED_BODY)
            )))),
        }
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Strips `access_token` from a URL so it can be logged.
pub fn redact_url(raw: &str) -> String {
    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => return "<invalid url>".to_string(),
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "access_token")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    url.to_string()
}
