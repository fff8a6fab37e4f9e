use duckdb::params;
use tracelens_core::error::{Result, TraceError};
use tracelens_core::model::span::Span;

use crate::Store;

impl Store {
    /// Inserts spans in one transaction and returns how many rows were new.
    /// A span whose `(trace_id, span_id)` is already stored is skipped, so the
    /// first copy wins.
    pub fn insert_spans(&self, spans: &[Span]) -> Result<usize> {
        if spans.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| TraceError::Store(format!("begin tx failed: {e}")))?;

        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO spans
                     (trace_id, span_id, parent_span_id, name, kind, service, start_ts, end_ts,
                      duration_ms, status_code, status_message, attrs_json, events_json, links_json,
                      experiment_id, run_id)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(|e| TraceError::Store(format!("prepare insert spans failed: {e}")))?;

            for span in spans {
                if span.span_id.trim().is_empty() {
                    return Err(TraceError::MalformedSpan(format!(
                        "span in trace {} has an empty span_id",
                        span.trace_id
                    )));
                }
                inserted += stmt
                    .execute(params![
                        span.trace_id,
                        span.span_id,
                        span.parent_span_id,
                        span.name,
                        span.kind,
                        span.service(),
                        span.start_time.map(|ts| ts.to_rfc3339()),
                        span.end_time.map(|ts| ts.to_rfc3339()),
                        span.duration_ms,
                        span.status_code,
                        span.status_message,
                        to_json(&span.attributes)?,
                        to_json(&span.events)?,
                        to_json(&span.links)?,
                        span.attribute_str("experiment_id"),
                        span.attribute_str("run_id"),
                    ])
                    .map_err(|e| TraceError::Store(format!("insert span failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| TraceError::Store(format!("commit spans failed: {e}")))?;
        tracing::debug!(received = spans.len(), inserted, "spans stored");
        Ok(inserted)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| TraceError::Internal(format!("encode payload: {e}")))
}
