//! Elasticsearch audit index for the banking ledger.
//!
//! Audit records are written as JSON documents into one index per UTC day
//! (`bank-transactions-YYYY-MM-DD`) and searched across all of them with the
//! `bank-transactions-*` pattern. Only the REST API is used, over `reqwest`.
//!
//! Writes are not refreshed, so a record may take up to the index refresh
//! interval to become searchable.
//!
//! # Example
//!
//! ```no_run
//! use banking_ledger_core::audit::AuditIndex;
//! use banking_ledger_elasticsearch::ElasticsearchAuditIndex;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let index = ElasticsearchAuditIndex::new("http://localhost:9200");
//! index.ping().await?;
//!
//! let page = index.history("BR10000001", 1).await?;
//! tracing::info!(total = page.total, "account history");
//! # Ok(())
//! # }
//! ```

use banking_ledger_core::BoxFuture;
use banking_ledger_core::audit::{
    AuditError, AuditIndex, AuditRecord, HISTORY_PAGE_SIZE, HistoryPage, INDEX_PATTERN,
};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`AuditIndex`] backed by an Elasticsearch cluster.
#[derive(Clone, Debug)]
pub struct ElasticsearchAuditIndex {
    client: Client,
    base_url: String,
}

impl ElasticsearchAuditIndex {
    /// Create an index client for the cluster at `base_url`
    /// (e.g. `http://localhost:9200`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to configure HTTP client, using defaults");
                Client::new()
            });
        Self::with_client(client, base_url)
    }

    /// Create an index client using a preconfigured `reqwest` client.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Cluster URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn search(&self, body: &Value) -> Result<SearchHits, AuditError> {
        let response = self
            .client
            .post(format!("{}/{INDEX_PATTERN}/_search", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| AuditError::Request(e.to_string()))?;

        let text = success_body(response).await?;
        parse_search_response(&text)
    }
}

impl AuditIndex for ElasticsearchAuditIndex {
    fn index<'a>(
        &'a self,
        index: &'a str,
        record: &'a AuditRecord,
    ) -> BoxFuture<'a, Result<(), AuditError>> {
        Box::pin(async move {
            let body =
                serde_json::to_vec(record).map_err(|e| AuditError::Serialization(e.to_string()))?;

            let response = self
                .client
                .post(format!("{}/{index}/_doc", self.base_url))
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
                .map_err(|e| AuditError::Request(e.to_string()))?;

            success_body(response).await?;

            tracing::debug!(
                index,
                transaction_id = %record.transaction_id,
                status = %record.status,
                "Audit record indexed"
            );
            Ok(())
        })
    }

    fn find_by_transaction_id<'a>(
        &'a self,
        transaction_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<AuditRecord>, AuditError>> {
        Box::pin(async move {
            let hits = self.search(&transaction_query(transaction_id)).await?;
            Ok(hits.records)
        })
    }

    fn history<'a>(
        &'a self,
        account_number: &'a str,
        page: usize,
    ) -> BoxFuture<'a, Result<HistoryPage, AuditError>> {
        Box::pin(async move {
            let page = page.max(1);
            let hits = self.search(&history_query(account_number, page)).await?;
            Ok(HistoryPage {
                account_number: account_number.to_string(),
                records: hits.records,
                total: hits.total,
                page,
            })
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), AuditError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.base_url)
                .send()
                .await
                .map_err(|e| AuditError::Request(e.to_string()))?;
            success_body(response).await?;
            Ok(())
        })
    }
}

/// Body of a successful response, or [`AuditError::Rejected`].
async fn success_body(response: Response) -> Result<String, AuditError> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        Ok(body)
    } else {
        Err(AuditError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Exact match on the transaction (reference) id.
///
/// Dynamic mapping indexes strings as analyzed `text` with a `keyword`
/// subfield; a `match` on the text field would split `tx-1` into `tx` and `1`.
fn transaction_query(transaction_id: &str) -> Value {
    json!({
        "query": {
            "term": { "transaction_id.keyword": transaction_id }
        }
    })
}

/// One page of an account's records, newest first.
fn history_query(account_number: &str, page: usize) -> Value {
    json!({
        "query": {
            "term": { "account_number.keyword": account_number }
        },
        "sort": [
            { "timestamp": { "order": "desc" } }
        ],
        "from": (page.max(1) - 1) * HISTORY_PAGE_SIZE,
        "size": HISTORY_PAGE_SIZE
    })
}

#[derive(Debug)]
struct SearchHits {
    records: Vec<AuditRecord>,
    total: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    total: Total,
    hits: Vec<Hit>,
}

/// `hits.total` is an object since Elasticsearch 7 and a bare count before.
#[derive(Deserialize)]
#[serde(untagged)]
enum Total {
    Object { value: usize },
    Count(usize),
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: AuditRecord,
}

fn parse_search_response(body: &str) -> Result<SearchHits, AuditError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| AuditError::Response(e.to_string()))?;

    let total = match response.hits.total {
        Total::Object { value } | Total::Count(value) => value,
    };

    Ok(SearchHits {
        records: response.hits.hits.into_iter().map(|hit| hit.source).collect(),
        total,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use banking_ledger_core::Decimal;
    use banking_ledger_core::audit::AuditStatus;

    #[test]
    fn history_query_pages_newest_first() {
        let query = history_query("BR10000001", 3);

        assert_eq!(query["query"]["term"]["account_number.keyword"], "BR10000001");
        assert_eq!(query["sort"][0]["timestamp"]["order"], "desc");
        assert_eq!(query["from"], 20);
        assert_eq!(query["size"], 10);
    }

    #[test]
    fn history_query_treats_page_zero_as_first() {
        assert_eq!(history_query("BR10000001", 0)["from"], 0);
        assert_eq!(history_query("BR10000001", 1)["from"], 0);
    }

    #[test]
    fn transaction_query_matches_id() {
        let query = transaction_query("tx-42");
        assert_eq!(query["query"]["term"]["transaction_id.keyword"], "tx-42");
        assert!(query["query"].get("match").is_none());
    }

    #[test]
    fn parses_search_hits() {
        let body = r#"{
            "took": 3,
            "hits": {
                "total": { "value": 27, "relation": "eq" },
                "hits": [{
                    "_index": "bank-transactions-2025-01-01",
                    "_id": "abc",
                    "_source": {
                        "transaction_id": "tx-1",
                        "account_number": "BR10000001",
                        "amount": 60.0,
                        "type": "WITHDRAWAL",
                        "status": "FAILED",
                        "timestamp": "2025-01-01T00:00:00Z",
                        "branch_code": "BR1",
                        "balance_after_transaction": 40.0,
                        "description": "insufficient funds: available 40.00, requested 60.00"
                    }
                }]
            }
        }"#;

        let hits = parse_search_response(body).expect("valid response");

        assert_eq!(hits.total, 27);
        assert_eq!(hits.records.len(), 1);
        let record = &hits.records[0];
        assert_eq!(record.status, AuditStatus::Failed);
        assert_eq!(record.amount, Decimal::new(60, 0));
        assert_eq!(record.balance_after, Decimal::new(40, 0));
        assert_eq!(record.transaction_type, "WITHDRAWAL");
    }

    #[test]
    fn parses_legacy_total() {
        let hits = parse_search_response(r#"{"hits": {"total": 0, "hits": []}}"#).unwrap();
        assert_eq!(hits.total, 0);
        assert!(hits.records.is_empty());
    }

    #[test]
    fn malformed_response_is_not_transient() {
        let err = parse_search_response("<html>").unwrap_err();
        assert!(matches!(err, AuditError::Response(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let index = ElasticsearchAuditIndex::new("http://localhost:9200/");
        assert_eq!(index.base_url(), "http://localhost:9200");
    }

    #[tokio::test]
    async fn unreachable_cluster_is_a_transient_error() {
        let index = ElasticsearchAuditIndex::new("http://127.0.0.1:1");

        let err = index.ping().await.unwrap_err();
        assert!(matches!(err, AuditError::Request(_)));
        assert!(err.is_transient());
    }
}
