use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::SourceConfig;
use crate::error::{Result, WikigraphError};
use crate::models::RawRecord;

/// Anything that can answer a rendered query with result rows.
#[async_trait]
pub trait FactSource: Send + Sync {
    async fn execute(&self, query: &str) -> Result<Vec<RawRecord>>;
}

/// SPARQL JSON results document
#[derive(Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Deserialize)]
struct SparqlResults {
    bindings: Vec<RawRecord>,
}

/// Hard minimum spacing between request starts.
///
/// One instance is shared (behind an `Arc`) by every client of the process,
/// so the limit holds across lanes, not just within one.
#[derive(Debug)]
pub struct Throttle {
    min_delay: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_start: Mutex::new(None),
        }
    }

    /// Wait until a request may start, then claim the slot.
    pub async fn acquire(&self) {
        // Holding the lock while sleeping queues callers in arrival order.
        let mut last = self.last_start.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_delay;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// HTTP client for a SPARQL endpoint.
///
/// Cheap to clone; clones share the connection pool and the throttle, but no
/// per-query state.
#[derive(Clone)]
pub struct SparqlClient {
    client: Client,
    endpoint: String,
    throttle: Arc<Throttle>,
}

impl SparqlClient {
    /// Build a client with its own throttle.
    pub fn new(source: &SourceConfig) -> Result<Self> {
        let throttle = Arc::new(Throttle::new(Duration::from_millis(source.min_delay_ms)));
        Self::with_throttle(source, throttle)
    }

    /// Build a client that shares an existing throttle.
    pub fn with_throttle(source: &SourceConfig, throttle: Arc<Throttle>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(source.timeout_secs))
            .user_agent(source.user_agent.clone())
            .build()
            .map_err(|e| WikigraphError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: source.endpoint.clone(),
            throttle,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl FactSource for SparqlClient {
    /// Execute one query. No retry loop here; transient failures are
    /// reported as such and retried by the lane.
    async fn execute(&self, query: &str) -> Result<Vec<RawRecord>> {
        self.throttle.acquire().await;
        let start = std::time::Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/sparql-results+json")
            .form(&[("query", query)])
            .send()
            .await
            .map_err(|e| WikigraphError::FactSourceTransient(format!("Network error: {}", e)))?;

        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(classify_status(status, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| WikigraphError::FactSourceTransient(format!("Failed to read response: {}", e)))?;

        let rows = parse_bindings(&body)?;
        log::debug!(
            "SPARQL query returned {} rows in {:?}",
            rows.len(),
            start.elapsed()
        );
        Ok(rows)
    }
}

/// Throttling and server-side failures are worth another attempt; anything
/// else means the query itself was refused.
fn classify_status(status: StatusCode, body: &str) -> WikigraphError {
    let snippet: String = body.chars().take(300).collect();
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        WikigraphError::FactSourceTransient(format!("SPARQL endpoint {}: {}", status, snippet))
    } else {
        WikigraphError::FactSourceQuery(format!("SPARQL endpoint {}: {}", status, snippet))
    }
}

fn parse_bindings(body: &str) -> Result<Vec<RawRecord>> {
    let parsed: SparqlResponse = serde_json::from_str(body)
        .map_err(|e| WikigraphError::FactSourceQuery(format!("Failed to parse response: {}", e)))?;
    Ok(parsed.results.bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bindings() {
        let body = r#"{
            "head": {"vars": ["person", "personLabel"]},
            "results": {"bindings": [
                {"person": {"type": "uri", "value": "http://www.wikidata.org/entity/Q352"},
                 "personLabel": {"xml:lang": "en", "type": "literal", "value": "Adolf Hitler"}}
            ]}
        }"#;
        let rows = parse_bindings(body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["personLabel"].value, "Adolf Hitler");
        assert_eq!(rows[0]["person"].kind, "uri");
    }

    #[test]
    fn test_parse_empty_bindings() {
        let body = r#"{"head": {"vars": []}, "results": {"bindings": []}}"#;
        assert!(parse_bindings(body).unwrap().is_empty());
    }

    #[test]
    fn test_parse_failure_is_query_error() {
        let err = parse_bindings("<html>Query timeout</html>").unwrap_err();
        assert!(matches!(err, WikigraphError::FactSourceQuery(_)));
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "MalformedQueryException"),
            WikigraphError::FactSourceQuery(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            WikigraphError::FactSourceQuery(_)
        ));
    }

    #[test]
    fn test_client_builds_from_config() {
        let source = SourceConfig::default();
        let client = SparqlClient::new(&source).unwrap();
        assert_eq!(client.endpoint(), "https://query.wikidata.org/sparql");
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spaces_calls() {
        let throttle = Arc::new(Throttle::new(Duration::from_millis(500)));
        let start = Instant::now();
        for _ in 0..3 {
            throttle.acquire().await;
        }
        // first call is free, the next two wait a full delay each
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_shared_across_tasks() {
        let throttle = Arc::new(Throttle::new(Duration::from_millis(200)));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let t = Arc::clone(&throttle);
            handles.push(tokio::spawn(async move { t.acquire().await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_throttle_zero_delay_does_not_wait() {
        let throttle = Throttle::new(Duration::ZERO);
        let start = Instant::now();
        throttle.acquire().await;
        throttle.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
