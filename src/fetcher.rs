//! Cursor pagination over Graph API collection endpoints.

use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, error, warn};
use url::Url;

use crate::http::{redact_url, ApiClient, ErrorEnvelope};

/// Builds `base/endpoint?fields=..&<extra>&access_token=..`.
pub fn collection_url(
    base_url: &str,
    endpoint: &str,
    fields: &[&str],
    extra_params: &[(&str, &str)],
    access_token: &str,
) -> Result<String, url::ParseError> {
    let raw = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    );
    let joined = fields.join(",");

    let mut params: Vec<(&str, &str)> = Vec::with_capacity(extra_params.len() + 2);
    params.push(("fields", joined.as_str()));
    params.extend_from_slice(extra_params);
    params.push(("access_token", access_token));

    Ok(Url::parse_with_params(&raw, &params)?.to_string())
}

/// A one-shot walk over the pages of a collection.
///
/// Each call to [`Pages::next_page`] fetches the next page; once the cursor runs
/// out (or a page fails, or a cursor leads back to a page already read) the
/// walk is finished for good. Start over with a new `Pages` to re-read from
/// page one.
pub struct Pages<'a> {
    client: &'a ApiClient,
    next: Option<String>,
    visited: HashSet<String>,
}

impl<'a> Pages<'a> {
    pub fn new(client: &'a ApiClient, first_url: String) -> Self {
        Self {
            client,
            next: Some(first_url),
            visited: HashSet::new(),
        }
    }

    pub async fn next_page(&mut self) -> Option<Result<Vec<Value>, ErrorEnvelope>> {
        let url = self.next.take()?;
        self.visited.insert(url.clone());

        let body = match self.client.get(&url).await {
            Ok(body) => body,
            Err(envelope) => return Some(Err(envelope)),
        };

        let records = match body.get("data").and_then(Value::as_array) {
            Some(data) => data.clone(),
            None => {
                warn!(url = %redact_url(&url), "Response carried no data array");
                Vec::new()
            }
        };

        self.next = body
            .get("paging")
            .and_then(|p| p.get("next"))
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(next) = self.next.as_deref().filter(|next| self.visited.contains(*next)) {
            warn!(url = %redact_url(next), "Next page cursor points at a page already read, stopping");
            self.next = None;
        }

        Some(Ok(records))
    }
}

/// Fetches every page of a collection and concatenates their `data` arrays.
///
/// A failing page ends the walk; the records gathered up to that point are
/// still returned.
pub async fn fetch_collection(client: &ApiClient, first_url: String) -> Vec<Value> {
    let target = redact_url(&first_url);
    let mut pages = Pages::new(client, first_url);
    let mut records = Vec::new();
    let mut page_count = 0usize;

    while let Some(page) = pages.next_page().await {
        match page {
            Ok(batch) => {
                page_count += 1;
                records.extend(batch);
            }
            Err(envelope) => {
                error!(
                    url = %target,
                    pages_read = page_count,
                    records_kept = records.len(),
                    error = %envelope,
                    "Pagination stopped on error"
                );
                break;
            }
        }
    }

    debug!(url = %target, pages = page_count, records = records.len(), "Collection fetched");
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RetryPolicy;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> ApiClient {
        let policy = RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        ApiClient::new(policy, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn url_carries_fields_extra_params_and_token() {
        let url = collection_url(
            "https://graph.facebook.com/v20.0/",
            "/act_1/insights",
            &["spend", "clicks"],
            &[("level", "campaign")],
            "tok",
        )
        .unwrap();

        assert_eq!(
            url,
            "https://graph.facebook.com/v20.0/act_1/insights?fields=spend%2Cclicks&level=campaign&access_token=tok"
        );
    }

    #[tokio::test]
    async fn follows_cursor_until_exhausted() {
        let server = MockServer::start().await;
        let page2 = format!("{}/items?after=p2&access_token=tok", server.uri());
        let page3 = format!("{}/items?after=p3&access_token=tok", server.uri());

        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param_is_missing("after"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "1"}, {"id": "2"}],
                "paging": {"next": page2}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("after", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "3"}],
                "paging": {"next": page3}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("after", "p3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "4"}],
                "paging": {"cursors": {"before": "x"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client();
        let records = fetch_collection(&client, format!("{}/items?access_token=tok", server.uri())).await;

        let ids: Vec<&str> = records.iter().filter_map(|r| r["id"].as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn keeps_records_read_before_a_failing_page() {
        let server = MockServer::start().await;
        let page2 = format!("{}/items?after=p2", server.uri());

        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param_is_missing("after"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "1"}],
                "paging": {"next": page2}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("after", "p2"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "Permissions error", "code": 200}
            })))
            .mount(&server)
            .await;

        let client = client();
        let records = fetch_collection(&client, format!("{}/items", server.uri())).await;

        assert_eq!(records, vec![json!({"id": "1"})]);
    }

    #[tokio::test]
    async fn self_referencing_cursor_stops() {
        let server = MockServer::start().await;
        let url = format!("{}/items", server.uri());

        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "1"}],
                "paging": {"next": url.clone()}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client();
        let records = fetch_collection(&client, url).await;
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn cursor_cycle_stops_after_each_page_is_read_once() {
        let server = MockServer::start().await;
        let first = format!("{}/items?after=a", server.uri());
        let second = format!("{}/items?after=b", server.uri());

        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("after", "a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "1"}],
                "paging": {"next": second.clone()}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("after", "b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "2"}],
                "paging": {"next": first.clone()}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client();
        let records = tokio::time::timeout(Duration::from_secs(5), fetch_collection(&client, first))
            .await
            .expect("cursor cycle should end the walk");

        let ids: Vec<&str> = records.iter().filter_map(|r| r["id"].as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn pages_are_not_restartable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "1"}]})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client();
        let mut pages = Pages::new(&client, server.uri());
        assert!(pages.next_page().await.is_some());
        assert!(pages.next_page().await.is_none());
        assert!(pages.next_page().await.is_none());
    }
}
