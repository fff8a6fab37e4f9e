use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use tracelens_core::error::{Result, TraceError};
use tracelens_core::model::span::Span;
use tracelens_core::model::trace::TraceSummary;
use tracelens_core::query::{StatusResponse, TraceFilter};
use tracelens_core::store::TraceStore;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

pub fn span(trace_id: &str, span_id: &str, parent: Option<&str>, start_ms: i64, end_ms: i64) -> Span {
    let base = base_time();
    Span {
        trace_id: trace_id.to_string(),
        span_id: span_id.to_string(),
        parent_span_id: parent.map(str::to_string),
        name: format!("op-{span_id}"),
        service_name: Some("api".to_string()),
        start_time: Some(base + chrono::Duration::milliseconds(start_ms)),
        end_time: Some(base + chrono::Duration::milliseconds(end_ms)),
        ..Span::default()
    }
}

/// A checkout request: root, a failing cache lookup with an escaped error
/// payload, and a database call.
pub fn sample_trace(trace_id: &str) -> Vec<Span> {
    let mut root = span(trace_id, "root", None, 0, 1800);
    root.name = "GET /v1/orders".to_string();
    root.kind = Some("SERVER".to_string());
    root.status_code = Some("STATUS_CODE_OK".to_string());
    root.attributes
        .insert("experiment_id".to_string(), json!("exp-1"));
    root.attributes.insert("run_id".to_string(), json!("run-1"));

    let mut cache = span(trace_id, "cache", Some("root"), 900, 1600);
    cache.name = "cache.get redis".to_string();
    cache.status_code = Some("ERROR".to_string());
    cache.status_message = Some("{\"reason\":\"\\u201cdeadline exceeded\\u201d\"}".to_string());
    cache
        .attributes
        .insert("peer".to_string(), json!("redis:6379"));
    cache.events.push(json!({
        "name": "exception",
        "attributes": {"message": "caf\\u00e9 unavailable"}
    }));

    let mut db = span(trace_id, "db", Some("root"), 100, 700);
    db.name = "SELECT orders".to_string();
    db.attributes
        .insert("db.response".to_string(), json!("{\"rows\": 3, \"cached\": false}"));

    vec![cache, root, db]
}

/// Three spans whose parent links form a loop, plus one hanging off it.
pub fn cyclic_trace(trace_id: &str) -> Vec<Span> {
    vec![
        span(trace_id, "b", Some("a"), 10, 20),
        span(trace_id, "c", Some("b"), 20, 30),
        span(trace_id, "a", Some("c"), 0, 40),
        span(trace_id, "leaf", Some("c"), 25, 26),
    ]
}

pub fn duplicate_trace(trace_id: &str) -> Vec<Span> {
    let mut second = span(trace_id, "root", None, 5, 6);
    second.name = "shadowed".to_string();
    vec![
        span(trace_id, "root", None, 0, 10),
        second,
        span(trace_id, "child", Some("root"), 1, 2),
    ]
}

/// `depth` spans chained parent to child.
pub fn chain_trace(trace_id: &str, depth: usize) -> Vec<Span> {
    (0..depth)
        .map(|i| {
            let parent = (i > 0).then(|| format!("s{}", i - 1));
            span(trace_id, &format!("s{i}"), parent.as_deref(), i as i64, i as i64 + 1)
        })
        .collect()
}

/// Wire-shaped records, as a store or an import file would carry them.
pub fn sample_records(trace_id: &str) -> Vec<Value> {
    sample_trace(trace_id)
        .into_iter()
        .map(|span| serde_json::to_value(span).unwrap())
        .collect()
}

/// In-memory [`TraceStore`] with injectable latency and failures.
#[derive(Default)]
pub struct MemoryTraceStore {
    traces: BTreeMap<String, Vec<Span>>,
    latency: Option<Duration>,
    failure: Mutex<Option<TraceError>>,
}

impl MemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace(mut self, trace_id: &str, spans: Vec<Span>) -> Self {
        self.traces.insert(trace_id.to_string(), spans);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The next call fails with `err`; later calls succeed again.
    pub fn fail_next(&self, err: TraceError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    async fn enter(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let failure = self.failure.lock().unwrap().take();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn summary(trace_id: &str, spans: &[Span]) -> TraceSummary {
        let root = spans
            .iter()
            .filter(|s| s.parent_span_id.is_none())
            .min_by_key(|s| s.start_time)
            .or_else(|| spans.first());
        TraceSummary {
            trace_id: trace_id.to_string(),
            service_name: root.and_then(Span::service).map(str::to_string),
            operation_name: root.map(|s| s.name.clone()),
            start_time: spans.iter().filter_map(|s| s.start_time).min(),
            duration_ms: root.and_then(Span::effective_duration_ms),
            status_code: root.and_then(|s| s.status_code.clone()),
        }
    }
}

#[async_trait]
impl TraceStore for MemoryTraceStore {
    async fn fetch_spans(&self, trace_id: &str) -> Result<Vec<Span>> {
        self.enter().await?;
        Ok(self.traces.get(trace_id).cloned().unwrap_or_default())
    }

    async fn fetch_summaries(&self, filter: &TraceFilter) -> Result<(Vec<TraceSummary>, usize)> {
        self.enter().await?;
        let matching = self
            .traces
            .iter()
            .filter(|(_, spans)| {
                let tagged = |key: &str, want: &Option<String>| match want {
                    Some(want) => spans
                        .iter()
                        .any(|s| s.attribute_str(key) == Some(want.as_str())),
                    None => true,
                };
                tagged("experiment_id", &filter.experiment_id) && tagged("run_id", &filter.run_id)
            })
            .map(|(id, spans)| Self::summary(id, spans))
            .filter(|summary| filter.matches(summary))
            .collect::<Vec<_>>();
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect();
        Ok((items, total))
    }

    async fn status(&self) -> Result<StatusResponse> {
        self.enter().await?;
        let starts = self
            .traces
            .values()
            .flatten()
            .filter_map(|s| s.start_time)
            .collect::<Vec<_>>();
        Ok(StatusResponse {
            backend: "memory".to_string(),
            spans_count: Some(self.traces.values().map(Vec::len).sum()),
            traces_count: Some(self.traces.len()),
            oldest_ts: starts.iter().min().copied(),
            newest_ts: starts.iter().max().copied(),
        })
    }
}
