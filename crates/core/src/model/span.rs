use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, TraceError};
use crate::time::{add_millis, millis_between, wire_ts};

/// Status codes that count as success. Anything else is an error.
const OK_STATUS_CODES: &[&str] = &["OK", "UNSET", "STATUS_CODE_OK", "STATUS_CODE_UNSET"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Span {
    #[serde(default)]
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, with = "wire_ts")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "wire_ts",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attributes: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub events: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub links: Vec<Value>,
}

impl Span {
    /// Declared duration, or the distance between start and end.
    pub fn effective_duration_ms(&self) -> Option<f64> {
        if let Some(ms) = self.duration_ms.filter(|ms| ms.is_finite()) {
            return Some(ms);
        }
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(millis_between(start, end)),
            _ => None,
        }
    }

    /// Declared end, or start plus declared duration.
    pub fn effective_end(&self) -> Option<DateTime<Utc>> {
        if self.end_time.is_some() {
            return self.end_time;
        }
        let start = self.start_time?;
        add_millis(start, self.duration_ms?)
    }

    pub fn service(&self) -> Option<&str> {
        self.service_name
            .as_deref()
            .or_else(|| self.attributes.get("service.name").and_then(Value::as_str))
    }

    pub fn is_error(&self) -> bool {
        match self.status_code.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(code) => !OK_STATUS_CODES
                .iter()
                .any(|ok| ok.eq_ignore_ascii_case(code)),
        }
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

/// Tree order: start time ascending (missing first), then span id.
pub fn tree_order(a: &Span, b: &Span) -> Ordering {
    a.start_time
        .cmp(&b.start_time)
        .then_with(|| a.span_id.cmp(&b.span_id))
}

/// Decodes raw wire records, failing on the first one that breaks the span
/// contract.
pub fn parse_spans(records: Vec<Value>) -> Result<Vec<Span>> {
    records
        .into_iter()
        .enumerate()
        .map(|(idx, record)| parse_span(idx, record))
        .collect()
}

fn parse_span(idx: usize, record: Value) -> Result<Span> {
    let label = record
        .get("span_id")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "<missing>".to_string());
    serde_json::from_value::<Span>(record)
        .map_err(|e| TraceError::MalformedSpan(format!("record #{idx} (span_id={label}): {e}")))
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn wire_shape_round_trips_optional_fields() {
        let span: Span = serde_json::from_value(json!({
            "span_id": "a",
            "name": "GET /",
            "start_time": "2026-02-01T00:00:00Z",
            "end_time": "2026-02-01T00:00:01.250Z",
            "attributes": {"service.name": "api"},
            "events": null
        }))
        .unwrap();
        assert_eq!(span.parent_span_id, None);
        assert_eq!(span.effective_duration_ms(), Some(1250.0));
        assert_eq!(span.service(), Some("api"));
        assert!(span.events.is_empty());
        assert!(!span.is_error());
    }

    #[test]
    fn effective_end_uses_duration_when_end_missing() {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let span = Span {
            span_id: "a".into(),
            start_time: Some(start),
            duration_ms: Some(40.0),
            ..Span::default()
        };
        assert_eq!(
            span.effective_end(),
            Some(start + chrono::Duration::milliseconds(40))
        );
    }

    #[test]
    fn status_codes_classify_errors() {
        let mut span = Span::default();
        for ok in ["OK", "ok", "UNSET", "STATUS_CODE_OK", ""] {
            span.status_code = Some(ok.to_string());
            assert!(!span.is_error(), "{ok} should be success");
        }
        for bad in ["ERROR", "STATUS_CODE_ERROR", "500"] {
            span.status_code = Some(bad.to_string());
            assert!(span.is_error(), "{bad} should be error");
        }
    }

    #[test]
    fn parse_spans_reports_offending_record() {
        let err = parse_spans(vec![
            json!({"span_id": "ok", "name": "x"}),
            json!({"span_id": 42, "name": "y"}),
        ])
        .unwrap_err();
        match err {
            TraceError::MalformedSpan(msg) => assert!(msg.contains("record #1"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn parse_spans_requires_span_id() {
        assert!(parse_spans(vec![json!({"name": "anonymous"})]).is_err());
    }
}
