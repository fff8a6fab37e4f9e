//! Read-only [`TraceStore`] over a remote HTTP trace API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracelens_core::error::{Result, TraceError};
use tracelens_core::model::span::{Span, parse_spans};
use tracelens_core::model::trace::TraceSummary;
use tracelens_core::query::{StatusResponse, TraceFilter};
use tracelens_core::store::TraceStore;

#[derive(Clone)]
pub struct HttpTraceStore {
    client: Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SpansBody {
    Bare(Vec<Value>),
    Wrapped { spans: Vec<Value> },
}

#[derive(Deserialize)]
struct SummariesBody {
    items: Vec<TraceSummary>,
    total: usize,
}

impl HttpTraceStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(TraceError::Config("upstream url is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TraceError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Option<reqwest::Response>> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(TraceError::UpstreamUnavailable(format!(
                "GET {url} returned {}",
                resp.status()
            )));
        }
        Ok(Some(resp))
    }

    fn transport_error(&self, url: &str, err: reqwest::Error) -> TraceError {
        if err.is_timeout() {
            TraceError::Timeout(self.timeout)
        } else {
            TraceError::UpstreamUnavailable(format!("GET {url} failed: {err}"))
        }
    }
}

fn summary_query(filter: &TraceFilter) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("offset", filter.offset.to_string()),
        ("limit", filter.limit.to_string()),
    ];
    if let Some(service) = &filter.service_name {
        query.push(("service_name", service.clone()));
    }
    if let Some(start) = filter.start_time {
        query.push(("start_time", start.to_rfc3339()));
    }
    if let Some(end) = filter.end_time {
        query.push(("end_time", end.to_rfc3339()));
    }
    if let Some(experiment_id) = &filter.experiment_id {
        query.push(("experiment_id", experiment_id.clone()));
    }
    if let Some(run_id) = &filter.run_id {
        query.push(("run_id", run_id.clone()));
    }
    query
}

#[async_trait]
impl TraceStore for HttpTraceStore {
    async fn fetch_spans(&self, trace_id: &str) -> Result<Vec<Span>> {
        let url = format!("{}/traces/{trace_id}/spans", self.base_url);
        let Some(resp) = self.get(&url, &[]).await? else {
            return Ok(Vec::new());
        };
        let body = resp
            .json::<SpansBody>()
            .await
            .map_err(|e| TraceError::MalformedSpan(format!("unreadable span list from {url}: {e}")))?;
        let records = match body {
            SpansBody::Bare(records) | SpansBody::Wrapped { spans: records } => records,
        };
        parse_spans(records)
    }

    async fn fetch_summaries(&self, filter: &TraceFilter) -> Result<(Vec<TraceSummary>, usize)> {
        let url = format!("{}/traces", self.base_url);
        let Some(resp) = self.get(&url, &summary_query(filter)).await? else {
            return Ok((Vec::new(), 0));
        };
        let body = resp.json::<SummariesBody>().await.map_err(|e| {
            TraceError::UpstreamUnavailable(format!("unreadable trace list from {url}: {e}"))
        })?;
        Ok((body.items, body.total))
    }

    async fn status(&self) -> Result<StatusResponse> {
        Ok(StatusResponse {
            backend: format!("http:{}", self.base_url),
            spans_count: None,
            traces_count: None,
            oldest_ts: None,
            newest_ts: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::extract::{Path, Query};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use testkit::sample_records;

    use super::*;

    async fn spawn_upstream() -> String {
        let app = Router::new()
            .route(
                "/api/traces/{id}/spans",
                get(|Path(id): Path<String>| async move {
                    match id.as_str() {
                        "bare" => Ok(Json(json!(sample_records("bare")))),
                        "wrapped" => Ok(Json(json!({"spans": sample_records("wrapped")}))),
                        "broken" => Ok(Json(json!([{"name": "no id"}]))),
                        "slow" => {
                            tokio::time::sleep(Duration::from_millis(500)).await;
                            Ok(Json(json!([])))
                        }
                        "boom" => Err(AxumStatus::INTERNAL_SERVER_ERROR),
                        _ => Err(AxumStatus::NOT_FOUND),
                    }
                }),
            )
            .route(
                "/api/traces",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    Json(json!({
                        "items": [{
                            "trace_id": "t1",
                            "service_name": q.get("service_name"),
                            "operation_name": format!("limit={}", q["limit"]),
                            "start_time": "2026-02-01T00:00:00Z",
                            "duration_ms": 12.5
                        }],
                        "total": 41
                    }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api/")
    }

    #[tokio::test]
    async fn fetches_bare_and_wrapped_span_lists() {
        let store = HttpTraceStore::new(&spawn_upstream().await, Duration::from_secs(5)).unwrap();
        assert!(store.base_url().ends_with("/api"));

        let bare = store.fetch_spans("bare").await.unwrap();
        assert_eq!(bare.len(), 3);
        let wrapped = store.fetch_spans("wrapped").await.unwrap();
        assert_eq!(wrapped.len(), 3);
        assert!(wrapped.iter().all(|s| s.trace_id == "wrapped"));
    }

    #[tokio::test]
    async fn maps_upstream_failures() {
        let store =
            HttpTraceStore::new(&spawn_upstream().await, Duration::from_millis(100)).unwrap();

        assert!(store.fetch_spans("unknown").await.unwrap().is_empty());
        assert!(matches!(
            store.fetch_spans("broken").await,
            Err(TraceError::MalformedSpan(_))
        ));
        assert!(matches!(
            store.fetch_spans("boom").await,
            Err(TraceError::UpstreamUnavailable(_))
        ));
        assert!(matches!(
            store.fetch_spans("slow").await,
            Err(TraceError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn forwards_summary_filter() {
        let store = HttpTraceStore::new(&spawn_upstream().await, Duration::from_secs(5)).unwrap();
        let (items, total) = store
            .fetch_summaries(&TraceFilter {
                service_name: Some("api".into()),
                limit: 0,
                ..TraceFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(items[0].service_name.as_deref(), Some("api"));
        assert_eq!(items[0].operation_name.as_deref(), Some("limit=0"));
        assert_eq!(total, 41);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let store = HttpTraceStore::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            store.fetch_spans("t1").await,
            Err(TraceError::UpstreamUnavailable(_))
        ));
    }
}
