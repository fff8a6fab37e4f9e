use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::{params, params_from_iter};
use serde_json::Value;
use tracelens_core::error::{Result, TraceError};
use tracelens_core::model::span::Span;
use tracelens_core::model::trace::TraceSummary;
use tracelens_core::query::TraceFilter;
use tracelens_core::time::millis_between;

use crate::Store;

struct SpanRow {
    span: Span,
    attrs_json: String,
    events_json: String,
    links_json: String,
}

impl Store {
    /// All stored spans of one trace, ordered by start time. Unknown ids give
    /// an empty list.
    pub fn fetch_trace_spans(&self, trace_id: &str) -> Result<Vec<Span>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT trace_id, span_id, parent_span_id, name, kind, service, start_ts, end_ts,
                        duration_ms, status_code, status_message, attrs_json, events_json, links_json
                 FROM spans
                 WHERE trace_id = ?
                 ORDER BY start_ts ASC NULLS FIRST, span_id ASC",
            )
            .map_err(|e| TraceError::Store(format!("prepare trace spans failed: {e}")))?;

        let rows = stmt
            .query_map(params![trace_id], |row| {
                Ok(SpanRow {
                    span: Span {
                        trace_id: row.get::<_, String>(0)?,
                        span_id: row.get::<_, String>(1)?,
                        parent_span_id: row.get::<_, Option<String>>(2)?,
                        name: row.get::<_, String>(3)?,
                        kind: row.get::<_, Option<String>>(4)?,
                        service_name: row.get::<_, Option<String>>(5)?,
                        start_time: row.get::<_, Option<NaiveDateTime>>(6)?.map(naive_to_utc),
                        end_time: row.get::<_, Option<NaiveDateTime>>(7)?.map(naive_to_utc),
                        duration_ms: row.get::<_, Option<f64>>(8)?,
                        status_code: row.get::<_, Option<String>>(9)?,
                        status_message: row.get::<_, Option<String>>(10)?,
                        ..Span::default()
                    },
                    attrs_json: row.get::<_, String>(11)?,
                    events_json: row.get::<_, String>(12)?,
                    links_json: row.get::<_, String>(13)?,
                })
            })
            .map_err(|e| TraceError::Store(format!("query trace spans failed: {e}")))?;

        let mut spans = Vec::new();
        for row in rows {
            let row = row.map_err(|e| TraceError::Store(format!("map trace span failed: {e}")))?;
            spans.push(decode_payloads(row)?);
        }
        Ok(spans)
    }

    /// Trace summaries, newest first, plus the count of all matches.
    ///
    /// Each summary takes its name, duration and status from the trace's root
    /// span (the earliest parentless span, else the earliest span) and its
    /// start from the earliest span.
    pub fn list_summaries(&self, filter: &TraceFilter) -> Result<(Vec<TraceSummary>, usize)> {
        filter.validate()?;
        let conn = self.conn()?;

        let mut where_parts = Vec::new();
        let mut args: Vec<duckdb::types::Value> = Vec::new();
        if let Some(experiment_id) = &filter.experiment_id {
            where_parts.push(
                "EXISTS (SELECT 1 FROM spans e WHERE e.trace_id = s.trace_id AND e.experiment_id = ?)",
            );
            args.push(duckdb::types::Value::Text(experiment_id.clone()));
        }
        if let Some(run_id) = &filter.run_id {
            where_parts.push(
                "EXISTS (SELECT 1 FROM spans r WHERE r.trace_id = s.trace_id AND r.run_id = ?)",
            );
            args.push(duckdb::types::Value::Text(run_id.clone()));
        }
        let where_sql = if where_parts.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_parts.join(" AND "))
        };

        let sql = format!(
            "SELECT trace_id, name, service, start_ts, end_ts, duration_ms, status_code, trace_start
             FROM (
               SELECT s.trace_id, s.name, s.service, s.start_ts, s.end_ts, s.duration_ms,
                      s.status_code,
                      MIN(s.start_ts) OVER (PARTITION BY s.trace_id) AS trace_start,
                      ROW_NUMBER() OVER (
                        PARTITION BY s.trace_id
                        ORDER BY CASE WHEN s.parent_span_id IS NULL THEN 0 ELSE 1 END,
                                 s.start_ts ASC NULLS FIRST,
                                 s.span_id ASC
                      ) AS rn
               FROM spans s
               {where_sql}
             ) ranked
             WHERE rn = 1
             ORDER BY trace_start DESC NULLS LAST, trace_id ASC"
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| TraceError::Store(format!("prepare traces failed: {e}")))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                let start = row.get::<_, Option<NaiveDateTime>>(3)?.map(naive_to_utc);
                let end = row.get::<_, Option<NaiveDateTime>>(4)?.map(naive_to_utc);
                let declared = row.get::<_, Option<f64>>(5)?;
                Ok(TraceSummary {
                    trace_id: row.get::<_, String>(0)?,
                    operation_name: Some(row.get::<_, String>(1)?),
                    service_name: row.get::<_, Option<String>>(2)?,
                    start_time: row.get::<_, Option<NaiveDateTime>>(7)?.map(naive_to_utc),
                    duration_ms: root_duration(declared, start, end),
                    status_code: row.get::<_, Option<String>>(6)?,
                })
            })
            .map_err(|e| TraceError::Store(format!("query traces failed: {e}")))?;

        let mut matching = Vec::new();
        for row in rows {
            let summary = row.map_err(|e| TraceError::Store(format!("map traces row failed: {e}")))?;
            if filter.matches(&summary) {
                matching.push(summary);
            }
        }

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect();
        Ok((items, total))
    }
}

fn decode_payloads(row: SpanRow) -> Result<Span> {
    let SpanRow {
        mut span,
        attrs_json,
        events_json,
        links_json,
    } = row;
    let bad = |field: &str, e: serde_json::Error| {
        TraceError::MalformedSpan(format!(
            "stored {field} of span {} unreadable: {e}",
            span.span_id
        ))
    };
    let attrs = serde_json::from_str::<Value>(&attrs_json).map_err(|e| bad("attributes", e))?;
    let attributes = match attrs {
        Value::Object(map) => map,
        Value::Null => Default::default(),
        other => {
            return Err(TraceError::MalformedSpan(format!(
                "stored attributes of span {} are not an object: {other}",
                span.span_id
            )));
        }
    };
    let events = serde_json::from_str::<Vec<Value>>(&events_json).map_err(|e| bad("events", e))?;
    let links = serde_json::from_str::<Vec<Value>>(&links_json).map_err(|e| bad("links", e))?;
    span.attributes = attributes;
    span.events = events;
    span.links = links;
    Ok(span)
}

fn root_duration(
    declared: Option<f64>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Option<f64> {
    declared.or_else(|| match (start, end) {
        (Some(start), Some(end)) => Some(millis_between(start, end)),
        _ => None,
    })
}

fn naive_to_utc(ts: NaiveDateTime) -> DateTime<Utc> {
    ts.and_utc()
}
