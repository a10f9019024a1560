use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::builder::build_search_body;
use crate::error::{QueryError, Result};
use elkwatch_common::types::{LogDocument, QueryCondition};

/// Hard cap on documents drained from one scroll, regardless of match size.
const MAX_SCROLL_RESULTS: usize = 10_000;

/// Server-side scroll context keep-alive.
const SCROLL_KEEP_ALIVE: &str = "1m";

/// Connection settings for one Elasticsearch data source.
///
/// `url` may list several endpoints separated by `;`; queries rotate across
/// them and fail over on transport errors.
#[derive(Debug, Clone, Default)]
pub struct EsConnection {
    pub url: String,
    pub username: String,
    pub password: String,
    pub use_ssl: bool,
    pub skip_verify: bool,
    pub ca_certificate: String,
}

/// Pooled HTTP client for one data source.
pub struct EsClient {
    endpoints: Vec<String>,
    client: reqwest::Client,
    username: String,
    password: String,
    query_timeout: Duration,
    cursor: AtomicUsize,
}

impl EsClient {
    pub fn new(connection: &EsConnection, query_timeout: Duration) -> Result<Self> {
        let endpoints = parse_endpoints(&connection.url);
        if endpoints.is_empty() {
            return Err(QueryError::InvalidConfig(format!(
                "no valid ES addresses found in URL: {}",
                connection.url
            )));
        }

        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10));

        let wants_tls =
            connection.use_ssl || endpoints.iter().any(|e| e.starts_with("https://"));
        if wants_tls {
            if connection.skip_verify {
                builder = builder.danger_accept_invalid_certs(true);
            }
            if !connection.ca_certificate.is_empty() {
                let cert = reqwest::Certificate::from_pem(connection.ca_certificate.as_bytes())
                    .map_err(|e| {
                        QueryError::InvalidConfig(format!("failed to parse CA certificate: {e}"))
                    })?;
                // 配置了自定义 CA 时，它是唯一信任根
                builder = builder.tls_built_in_root_certs(false).add_root_certificate(cert);
            }
        }

        let client = builder.build()?;

        Ok(Self {
            endpoints,
            client,
            username: connection.username.clone(),
            password: connection.password.clone(),
            query_timeout,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Queries matching log documents for one evaluation window.
    ///
    /// Runs a scroll search against `index_pattern` with `batch_size` pages,
    /// drains follow-up pages until empty or the 10,000-document cap, and
    /// clears the server-side cursor afterwards (best-effort). Each returned
    /// document is `_source` merged with `_index` and `_id`.
    ///
    /// The whole call is bounded by the configured query timeout; a caller
    /// with a tighter budget can wrap this future in its own timeout.
    pub async fn query_logs(
        &self,
        index_pattern: &str,
        conditions: &[QueryCondition],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Vec<LogDocument>> {
        let body = build_search_body(conditions, from, to)?;
        tracing::debug!(index_pattern, body = %body, "Elasticsearch query");

        match tokio::time::timeout(
            self.query_timeout,
            self.scroll_all(index_pattern, &body, batch_size),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout(self.query_timeout)),
        }
    }

    async fn scroll_all(
        &self,
        index_pattern: &str,
        body: &Value,
        batch_size: usize,
    ) -> Result<Vec<LogDocument>> {
        let (base, response) = self.initial_search(index_pattern, body, batch_size).await?;

        let mut results = Vec::new();
        let mut scroll_id = response
            .get("_scroll_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let initial_docs = extract_documents(&response);
        tracing::debug!(
            index_pattern,
            initial_docs = initial_docs.len(),
            "Initial search completed"
        );
        results.extend(initial_docs);

        while let Some(id) = scroll_id.clone() {
            if results.len() >= MAX_SCROLL_RESULTS {
                break;
            }

            let scroll_resp = self
                .client
                .post(format!("{base}/_search/scroll"))
                .basic_auth_opt(&self.username, &self.password)
                .json(&json!({ "scroll": SCROLL_KEEP_ALIVE, "scroll_id": id }))
                .send()
                .await;

            let Ok(resp) = scroll_resp else { break };
            if !resp.status().is_success() {
                break;
            }
            let Ok(page) = resp.json::<Value>().await else {
                break;
            };

            let docs = extract_documents(&page);
            if docs.is_empty() {
                break;
            }
            results.extend(docs);
            scroll_id = page
                .get("_scroll_id")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        if let Some(id) = scroll_id {
            let _ = self
                .client
                .delete(format!("{base}/_search/scroll"))
                .basic_auth_opt(&self.username, &self.password)
                .json(&json!({ "scroll_id": [id] }))
                .send()
                .await;
        }

        tracing::debug!(index_pattern, total_results = results.len(), "Query completed");
        Ok(results)
    }

    /// Runs the initial scroll search, failing over across endpoints on
    /// transport errors (up to 3 attempts). Returns the endpoint that
    /// answered so follow-up scroll requests stay on the same node.
    async fn initial_search(
        &self,
        index_pattern: &str,
        body: &Value,
        batch_size: usize,
    ) -> Result<(String, Value)> {
        let mut last_err: Option<reqwest::Error> = None;

        for _ in 0..3 {
            let base = self.next_endpoint();
            let url = format!("{base}/{index_pattern}/_search");
            let sent = self
                .client
                .post(&url)
                .query(&[
                    ("scroll", SCROLL_KEEP_ALIVE.to_string()),
                    ("size", batch_size.to_string()),
                ])
                .basic_auth_opt(&self.username, &self.password)
                .json(body)
                .send()
                .await;

            match sent {
                Ok(resp) => {
                    let status = resp.status();
                    if !status.is_success() {
                        let detail = resp.text().await.unwrap_or_default();
                        return Err(QueryError::SearchFailed {
                            status: status.as_u16(),
                            body: detail,
                        });
                    }
                    let parsed = resp.json::<Value>().await?;
                    return Ok((base, parsed));
                }
                Err(e) => {
                    tracing::warn!(endpoint = %base, error = %e, "ES endpoint failed, trying next");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(QueryError::Http(e)),
            None => Err(QueryError::InvalidConfig("no ES endpoints configured".into())),
        }
    }

    fn next_endpoint(&self) -> String {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        self.endpoints[idx].clone()
    }

    /// Pings the cluster root. Used by the data-source connection test.
    pub async fn test_connection(&self) -> Result<()> {
        let base = self.next_endpoint();
        let resp = self
            .client
            .get(&base)
            .basic_auth_opt(&self.username, &self.password)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(QueryError::SearchFailed {
                status: status.as_u16(),
                body: detail,
            });
        }
        Ok(())
    }
}

/// Splits a semicolon-separated endpoint list, trimming whitespace and
/// trailing slashes, dropping empty entries.
fn parse_endpoints(url: &str) -> Vec<String> {
    url.split(';')
        .map(|part| part.trim().trim_end_matches('/'))
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

trait BasicAuthOpt {
    fn basic_auth_opt(self, username: &str, password: &str) -> Self;
}

impl BasicAuthOpt for reqwest::RequestBuilder {
    fn basic_auth_opt(self, username: &str, password: &str) -> Self {
        if username.is_empty() || password.is_empty() {
            self
        } else {
            self.basic_auth(username, Some(password))
        }
    }
}

/// Extracts hit documents, merging `_source` with `_index` and `_id`.
fn extract_documents(response: &Value) -> Vec<LogDocument> {
    let hits = response
        .get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(Value::as_array);

    let Some(hits) = hits else {
        return Vec::new();
    };

    hits.iter()
        .map(|hit| {
            let mut doc = hit
                .get("_source")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            if let Some(index) = hit.get("_index").and_then(Value::as_str) {
                doc.insert("_index".to_string(), json!(index));
            }
            if let Some(id) = hit.get("_id").and_then(Value::as_str) {
                doc.insert("_id".to_string(), json!(id));
            }
            doc
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_endpoints_splits_and_trims() {
        let endpoints = parse_endpoints(
            "https://10.170.1.54:9200; https://10.170.1.55:9200/ ;;  ",
        );
        assert_eq!(
            endpoints,
            vec![
                "https://10.170.1.54:9200".to_string(),
                "https://10.170.1.55:9200".to_string(),
            ]
        );
        assert!(parse_endpoints("").is_empty());
    }

    #[test]
    fn client_requires_at_least_one_endpoint() {
        let connection = EsConnection {
            url: " ; ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            EsClient::new(&connection, Duration::from_secs(30)),
            Err(QueryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn client_rotates_endpoints() {
        let connection = EsConnection {
            url: "http://a:9200;http://b:9200".to_string(),
            ..Default::default()
        };
        let client = EsClient::new(&connection, Duration::from_secs(30)).unwrap();
        assert_eq!(client.next_endpoint(), "http://a:9200");
        assert_eq!(client.next_endpoint(), "http://b:9200");
        assert_eq!(client.next_endpoint(), "http://a:9200");
    }

    #[test]
    fn extract_documents_merges_index_and_id() {
        let response = json!({
            "hits": {
                "hits": [
                    {
                        "_index": "prod-nginx-2025.11.28",
                        "_id": "doc-1",
                        "_source": { "response_code": 502, "domain": "api.example.com" }
                    },
                    { "_index": "prod-nginx-2025.11.28", "_id": "doc-2" }
                ]
            }
        });

        let docs = extract_documents(&response);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["response_code"], json!(502));
        assert_eq!(docs[0]["_index"], json!("prod-nginx-2025.11.28"));
        assert_eq!(docs[0]["_id"], json!("doc-1"));
        // _source 缺失时仍保留索引元数据
        assert_eq!(docs[1]["_id"], json!("doc-2"));
    }

    #[test]
    fn extract_documents_handles_malformed_response() {
        assert!(extract_documents(&json!({})).is_empty());
        assert!(extract_documents(&json!({ "hits": {} })).is_empty());
        assert!(extract_documents(&json!({ "hits": { "hits": "bogus" } })).is_empty());
    }

    #[tokio::test]
    async fn test_connection_reports_unreachable_endpoint() {
        let connection = EsConnection {
            // 不可达端口，连接应当立刻被拒绝
            url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let client = EsClient::new(&connection, Duration::from_secs(2)).unwrap();
        assert!(client.test_connection().await.is_err());
    }
}
