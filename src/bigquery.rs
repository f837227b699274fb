//! BigQuery load jobs over the REST API.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::constants::{
    BIGQUERY_SCOPE, DEFAULT_CHUNK_SIZE, DEFAULT_HTTP_TIMEOUT_SECS, JOB_POLL_INTERVAL_MS, JOB_POLL_MAX_ATTEMPTS,
};
use crate::credentials::{ServiceAccountKey, TokenSource};
use crate::dataset::{ColumnType, Dataset};
use crate::warehouse::{TableId, Warehouse, WarehouseError, WriteDisposition};

const BOUNDARY: &str = "meta_ads_loader_part";

#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    pub project_id: String,
    pub location: Option<String>,
    pub write_disposition: WriteDisposition,
    pub chunk_size: usize,
    pub api_url: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
    /// Per-request limit for token, upload and poll calls.
    pub timeout: Duration,
}

impl BigQueryConfig {
    pub fn new(project_id: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            location: None,
            write_disposition: WriteDisposition::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            api_url: api_url.into(),
            poll_interval: Duration::from_millis(JOB_POLL_INTERVAL_MS),
            max_polls: JOB_POLL_MAX_ATTEMPTS,
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    #[serde(default)]
    status: JobStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    message: String,
}

pub struct BigQueryLoader {
    http: Client,
    config: BigQueryConfig,
    tokens: TokenSource,
}

impl BigQueryLoader {
    pub fn new(config: BigQueryConfig, key: ServiceAccountKey) -> Result<Self, WarehouseError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        let tokens = TokenSource::new(key, BIGQUERY_SCOPE, http.clone());
        Ok(Self { http, config, tokens })
    }

    fn api_url(&self) -> &str {
        self.config.api_url.trim_end_matches('/')
    }

    fn load_configuration(&self, dataset: &Dataset, table: &TableId, disposition: WriteDisposition) -> Value {
        json!({
            "configuration": {
                "load": {
                    "destinationTable": {
                        "projectId": self.config.project_id,
                        "datasetId": table.dataset,
                        "tableId": table.table,
                    },
                    "schema": schema(dataset),
                    "sourceFormat": "NEWLINE_DELIMITED_JSON",
                    "createDisposition": "CREATE_IF_NEEDED",
                    "writeDisposition": disposition.as_bigquery(),
                }
            },
            "jobReference": {
                "projectId": self.config.project_id,
                "location": self.config.location,
            }
        })
    }

    async fn submit(&self, token: &str, metadata: &Value, payload: &[u8]) -> Result<Job, WarehouseError> {
        let url = format!(
            "{}/upload/bigquery/v2/projects/{}/jobs?uploadType=multipart",
            self.api_url(),
            self.config.project_id
        );

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(CONTENT_TYPE, format!("multipart/related; boundary={}", BOUNDARY))
            .body(multipart_body(metadata, payload))
            .send()
            .await?;

        parse_job(response).await
    }

    async fn poll(&self, token: &str, reference: &JobReference) -> Result<Job, WarehouseError> {
        let url = format!(
            "{}/bigquery/v2/projects/{}/jobs/{}",
            self.api_url(),
            self.config.project_id,
            reference.job_id
        );

        let mut request = self.http.get(&url).header(AUTHORIZATION, format!("Bearer {}", token));
        if let Some(location) = reference.location.as_deref() {
            request = request.query(&[("location", location)]);
        }

        parse_job(request.send().await?).await
    }

    async fn wait_for(&self, token: &str, mut job: Job) -> Result<(), WarehouseError> {
        let mut polls = 0;
        while job.status.state != "DONE" {
            if polls >= self.config.max_polls {
                return Err(WarehouseError::Timeout(job.job_reference.job_id));
            }
            polls += 1;
            sleep(self.config.poll_interval).await;
            debug!(job_id = %job.job_reference.job_id, state = %job.status.state, "Polling load job");
            job = self.poll(token, &job.job_reference).await?;
        }

        match job.status.error_result {
            Some(error) => Err(WarehouseError::Job {
                job_id: job.job_reference.job_id,
                message: error.message,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Warehouse for BigQueryLoader {
    async fn upload(&self, dataset: &Dataset, table: &TableId) -> Result<(), WarehouseError> {
        let token = self.tokens.token().await?;
        let lines: Vec<String> = dataset.json_rows().map(|row| row.to_string()).collect();
        let chunk_size = self.config.chunk_size.max(1);

        for (idx, chunk) in lines.chunks(chunk_size).enumerate() {
            // Only the first chunk may truncate; the rest add to it.
            let disposition = if idx == 0 {
                self.config.write_disposition
            } else {
                WriteDisposition::Append
            };

            let metadata = self.load_configuration(dataset, table, disposition);
            let payload = chunk.join("\n");
            let job = self.submit(&token, &metadata, payload.as_bytes()).await?;
            info!(
                table = %table,
                job_id = %job.job_reference.job_id,
                chunk = idx + 1,
                rows = chunk.len(),
                "Load job submitted"
            );
            self.wait_for(&token, job).await?;
        }

        Ok(())
    }
}

async fn parse_job(response: reqwest::Response) -> Result<Job, WarehouseError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(WarehouseError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let body: Value = response.json().await?;
    serde_json::from_value(body).map_err(|e| WarehouseError::InvalidResponse(e.to_string()))
}

fn bigquery_type(column: ColumnType) -> &'static str {
    match column {
        ColumnType::Int64 => "INTEGER",
        ColumnType::Float64 => "FLOAT",
        ColumnType::Bool => "BOOLEAN",
        ColumnType::Timestamp => "TIMESTAMP",
        ColumnType::Date => "DATE",
        ColumnType::Null | ColumnType::String | ColumnType::Json | ColumnType::Mixed => "STRING",
    }
}

fn schema(dataset: &Dataset) -> Value {
    let fields: Vec<Value> = dataset
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            json!({
                "name": name,
                "type": bigquery_type(dataset.column_type(idx)),
                "mode": "NULLABLE",
            })
        })
        .collect();
    json!({ "fields": fields })
}

fn multipart_body(metadata: &Value, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: application/octet-stream\r\n\r\n",
            b = BOUNDARY,
            meta = metadata
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}
