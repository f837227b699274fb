// API Versions
pub const FACEBOOK_API_VERSION: &str = "v20.0";

// API Base URLs
pub const FACEBOOK_BASE_URL: &str = "https://graph.facebook.com";
pub const BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com";

// Facebook API Fields
pub const FB_ACCOUNT_FIELDS: &[&str] = &["id", "name", "account_id", "account_status"];
pub const FB_CAMPAIGN_FIELDS: &[&str] = &[
    "id",
    "name",
    "status",
    "effective_status",
    "objective",
    "start_time",
    "end_time",
    "created_time",
];
pub const FB_ADSET_FIELDS: &[&str] = &[
    "id",
    "name",
    "status",
    "effective_status",
    "campaign_id",
    "daily_budget",
    "lifetime_budget",
    "start_time",
    "end_time",
    "created_time",
];
pub const FB_DEFAULT_INSIGHT_FIELDS: &[&str] = &[
    "impressions",
    "clicks",
    "ctr",
    "spend",
    "frequency",
    "results",
    "cost_per_result",
];
pub const FB_DEFAULT_INSIGHT_LEVEL: &str = "campaign";

// Marketing API error codes that signal throttling rather than a bad request
pub const FB_THROTTLING_ERROR_CODES: &[i64] = &[4, 17, 32, 613];

// Retry Settings
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_FACTOR_SECS: f64 = 1.0;
pub const DEFAULT_RETRY_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504];
pub const MAX_BACKOFF_SECS: u64 = 120;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

// Warehouse Settings
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
pub const JOB_POLL_INTERVAL_MS: u64 = 1000;
pub const JOB_POLL_MAX_ATTEMPTS: u32 = 600;

// Local fallback
pub const FALLBACK_DIR_NAME: &str = "meta-ads-loader";

// Logging
pub const DEFAULT_LOG_FILE: &str = "meta_ads.log";
