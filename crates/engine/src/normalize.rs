//! Best-effort decoding of text payloads carried in span attributes.
//!
//! Text is run through an ordered chain of decoders; the first decoder that
//! produces output wins and anything no decoder recognizes is returned as is.
//! Nothing here fails: malformed payloads simply fall through the chain.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracelens_core::config::DEFAULT_NORMALIZE_MAX_DEPTH;
use tracelens_core::model::issue::BuildIssue;
use tracelens_core::model::span::Span;
use tracelens_core::model::tree::SpanTreeNode;

pub type Decoder = fn(&str) -> Option<String>;

/// Decoders in the order they are attempted.
pub const DECODE_CHAIN: [(&str, Decoder); 3] = [
    ("json_object", decode_json_object),
    ("json_string", decode_json_string),
    ("unicode_escapes", replace_unicode_escapes),
];

fn unicode_escape_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:\\u[0-9a-fA-F]{4})+").expect("static regex is valid"))
}

pub fn normalize_text(input: &str) -> Cow<'_, str> {
    if input.is_empty() {
        return Cow::Borrowed(input);
    }
    for (_, decode) in DECODE_CHAIN {
        if let Some(out) = decode(input) {
            return Cow::Owned(out);
        }
    }
    Cow::Borrowed(input)
}

/// A stringified JSON object: its `reason` if present, otherwise the object
/// pretty-printed with sorted keys.
pub fn decode_json_object(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }
    let Value::Object(map) = serde_json::from_str::<Value>(trimmed).ok()? else {
        return None;
    };
    match map.get("reason") {
        Some(Value::String(reason)) => Some(reason.clone()),
        Some(other) => Some(other.to_string()),
        None => serde_json::to_string_pretty(&sort_keys(Value::Object(map))).ok(),
    }
}

/// The whole input read as the body of a JSON string literal.
pub fn decode_json_string(input: &str) -> Option<String> {
    if !unicode_escape_run().is_match(input) {
        return None;
    }
    serde_json::from_str::<String>(&format!("\"{input}\"")).ok()
}

/// Rewrites each run of `\uXXXX` escapes in place, leaving the rest of the
/// text untouched. Surrogate pairs are combined; lone surrogates stay escaped.
pub fn replace_unicode_escapes(input: &str) -> Option<String> {
    let re = unicode_escape_run();
    if !re.is_match(input) {
        return None;
    }
    let out = re.replace_all(input, |caps: &Captures<'_>| {
        let units = caps[0]
            .split("\\u")
            .filter(|hex| !hex.is_empty())
            .filter_map(|hex| u16::from_str_radix(hex, 16).ok())
            .collect::<Vec<_>>();
        let mut decoded = String::with_capacity(units.len());
        for unit in char::decode_utf16(units) {
            match unit {
                Ok(c) => decoded.push(c),
                Err(e) => decoded.push_str(&format!("\\u{:04x}", e.unpaired_surrogate())),
            }
        }
        decoded
    });
    Some(out.into_owned())
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries = map.into_iter().collect::<Vec<_>>();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<_, _>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub value: Value,
    pub depth_exceeded: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    max_depth: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_NORMALIZE_MAX_DEPTH)
    }
}

impl Normalizer {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Normalizes every string inside `value`. Containers nested `max_depth`
    /// levels down are copied verbatim and flagged.
    pub fn normalize_value(&self, value: &Value) -> Normalized {
        let mut depth_exceeded = false;
        let value = self.normalize_at(value, 0, &mut depth_exceeded);
        Normalized {
            value,
            depth_exceeded,
        }
    }

    fn normalize_at(&self, value: &Value, depth: usize, exceeded: &mut bool) -> Value {
        match value {
            Value::String(s) => Value::String(normalize_text(s).into_owned()),
            Value::Array(_) | Value::Object(_) if depth >= self.max_depth => {
                *exceeded = true;
                value.clone()
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.normalize_at(item, depth + 1, exceeded))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.normalize_at(v, depth + 1, exceeded)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Normalizes a span's attributes, events and status message in place.
    pub fn normalize_span(&self, span: &mut Span) -> Vec<BuildIssue> {
        let mut issues = Vec::new();

        for (key, value) in span.attributes.iter_mut() {
            let normalized = self.normalize_value(value);
            if normalized.depth_exceeded {
                issues.push(BuildIssue::NormalizationDepthExceeded {
                    span_id: span.span_id.clone(),
                    field: format!("attributes.{key}"),
                });
            }
            *value = normalized.value;
        }

        for (idx, event) in span.events.iter_mut().enumerate() {
            let normalized = self.normalize_value(event);
            if normalized.depth_exceeded {
                issues.push(BuildIssue::NormalizationDepthExceeded {
                    span_id: span.span_id.clone(),
                    field: format!("events[{idx}]"),
                });
            }
            *event = normalized.value;
        }

        if let Some(message) = span.status_message.as_mut() {
            *message = normalize_text(message).into_owned();
        }

        issues
    }

    /// Normalizes every node of a freshly built forest, in tree order.
    pub fn normalize_forest(&self, roots: &mut [SpanTreeNode]) -> Vec<BuildIssue> {
        let mut issues = Vec::new();
        let mut stack = roots.iter_mut().rev().collect::<Vec<_>>();
        while let Some(node) = stack.pop() {
            issues.extend(self.normalize_span(&mut node.span));
            stack.extend(node.children.iter_mut().rev());
        }
        issues
    }
}
