use serde_json::Value;
use tracing::{error, info, warn};

use crate::constants::{FB_ACCOUNT_FIELDS, FB_DEFAULT_INSIGHT_FIELDS, FB_DEFAULT_INSIGHT_LEVEL};
use crate::fetcher::{collection_url, fetch_collection};
use crate::http::ApiClient;
use crate::models::{AdAccount, Collection};

/// How insights are queried for each account.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightQuery {
    pub fields: Vec<String>,
    pub level: String,
    pub date_preset: Option<String>,
}

impl Default for InsightQuery {
    fn default() -> Self {
        Self {
            fields: FB_DEFAULT_INSIGHT_FIELDS.iter().map(|f| f.to_string()).collect(),
            level: FB_DEFAULT_INSIGHT_LEVEL.to_string(),
            date_preset: None,
        }
    }
}

pub struct MetaAdsApi {
    client: ApiClient,
    access_token: String,
    base_url: String,
    insights: InsightQuery,
}

impl MetaAdsApi {
    pub fn new(client: ApiClient, access_token: String, base_url: String, insights: InsightQuery) -> Self {
        Self {
            client,
            access_token,
            base_url,
            insights,
        }
    }

    pub async fn get_ad_accounts(&self) -> Vec<AdAccount> {
        let raw = self.fetch("me/adaccounts", FB_ACCOUNT_FIELDS, &[]).await;

        let mut accounts = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<AdAccount>(value) {
                Ok(account) => accounts.push(account),
                Err(e) => warn!(error = %e, "Skipping malformed ad account"),
            }
        }

        info!(count = accounts.len(), "Ad accounts found");
        accounts
    }

    pub async fn get_campaigns(&self, account: &AdAccount) -> Vec<Value> {
        self.get_collection(account, Collection::Campaigns).await
    }

    pub async fn get_adsets(&self, account: &AdAccount) -> Vec<Value> {
        self.get_collection(account, Collection::AdSets).await
    }

    pub async fn get_insights(&self, account: &AdAccount) -> Vec<Value> {
        self.get_collection(account, Collection::Insights).await
    }

    pub async fn get_collection(&self, account: &AdAccount, collection: Collection) -> Vec<Value> {
        let endpoint = format!("act_{}/{}", account.account_id(), collection.table_name());

        match collection.default_fields() {
            Some(fields) => self.fetch(&endpoint, fields, &[]).await,
            None => {
                let fields: Vec<&str> = self.insights.fields.iter().map(String::as_str).collect();
                let mut extra = vec![("level", self.insights.level.as_str())];
                if let Some(preset) = self.insights.date_preset.as_deref() {
                    extra.push(("date_preset", preset));
                }
                self.fetch(&endpoint, &fields, &extra).await
            }
        }
    }

    async fn fetch(&self, endpoint: &str, fields: &[&str], extra: &[(&str, &str)]) -> Vec<Value> {
        match collection_url(&self.base_url, endpoint, fields, extra, &self.access_token) {
            Ok(url) => fetch_collection(&self.client, url).await,
            Err(e) => {
                error!(endpoint, error = %e, "Could not build request URL");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RetryPolicy;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(base_url: String, insights: InsightQuery) -> MetaAdsApi {
        let policy = RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let client = ApiClient::new(policy, Duration::from_secs(5)).unwrap();
        MetaAdsApi::new(client, "tok".to_string(), base_url, insights)
    }

    #[tokio::test]
    async fn accounts_are_parsed_and_malformed_entries_skipped() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/me/adaccounts"))
            .and(query_param("fields", "id,name,account_id,account_status"))
            .and(query_param("access_token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"id": "act_111", "name": "Acct1", "account_id": "111", "account_status": 1},
                    {"name": "no id"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let accounts = api(server.uri(), InsightQuery::default()).get_ad_accounts().await;

        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].account_id(), "111");
        assert_eq!(accounts[0].name, "Acct1");
    }

    #[tokio::test]
    async fn insights_request_carries_level_and_date_preset() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/act_111/insights"))
            .and(query_param("fields", "spend,clicks"))
            .and(query_param("level", "adset"))
            .and(query_param("date_preset", "last_7d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"spend": "1.00", "date_start": "2024-01-01", "date_stop": "2024-01-07"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let insights = InsightQuery {
            fields: vec!["spend".to_string(), "clicks".to_string()],
            level: "adset".to_string(),
            date_preset: Some("last_7d".to_string()),
        };
        let account = AdAccount {
            id: "act_111".to_string(),
            name: "Acct1".to_string(),
            account_status: Some(1),
        };

        let rows = api(server.uri(), insights).get_insights(&account).await;
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn remote_error_yields_empty_collection() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/act_111/campaigns"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"message": "Permission denied", "code": 200}
            })))
            .mount(&server)
            .await;

        let account = AdAccount {
            id: "act_111".to_string(),
            name: "Acct1".to_string(),
            account_status: Some(1),
        };

        let rows = api(server.uri(), InsightQuery::default()).get_campaigns(&account).await;
        assert!(rows.is_empty());
    }
}
