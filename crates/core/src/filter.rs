use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};

/// A span field the flat list can be ordered by.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    TraceId,
    SpanId,
    ParentSpanId,
    Name,
    Kind,
    ServiceName,
    #[default]
    StartTime,
    EndTime,
    DurationMs,
    StatusCode,
    StatusMessage,
    Attributes,
    Events,
    Links,
}

impl SortKey {
    pub const ALL: [SortKey; 14] = [
        Self::TraceId,
        Self::SpanId,
        Self::ParentSpanId,
        Self::Name,
        Self::Kind,
        Self::ServiceName,
        Self::StartTime,
        Self::EndTime,
        Self::DurationMs,
        Self::StatusCode,
        Self::StatusMessage,
        Self::Attributes,
        Self::Events,
        Self::Links,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TraceId => "trace_id",
            Self::SpanId => "span_id",
            Self::ParentSpanId => "parent_span_id",
            Self::Name => "name",
            Self::Kind => "kind",
            Self::ServiceName => "service_name",
            Self::StartTime => "start_time",
            Self::EndTime => "end_time",
            Self::DurationMs => "duration_ms",
            Self::StatusCode => "status_code",
            Self::StatusMessage => "status_message",
            Self::Attributes => "attributes",
            Self::Events => "events",
            Self::Links => "links",
        }
    }
}

impl FromStr for SortKey {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().replace('_', "").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|key| key.as_str().replace('_', "") == normalized)
            .ok_or_else(|| TraceError::InvalidSortKey(s.to_string()))
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Asc),
            "desc" | "descending" => Ok(Self::Desc),
            _ => Err(TraceError::Parse(format!("unknown sort direction: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimeWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn all() -> Self {
        Self {
            since: None,
            until: None,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        if let Some(since) = self.since
            && ts < since
        {
            return false;
        }
        if let Some(until) = self.until
            && ts > until
        {
            return false;
        }
        true
    }
}
