pub mod bigquery;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod dataset;
pub mod facebook;
pub mod fallback;
pub mod fetcher;
pub mod http;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod validation;
pub mod warehouse;
