use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::issue::BuildIssue;
use crate::model::span::Span;
use crate::model::tree::SpanTreeNode;
use crate::time::wire_ts;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RollupStatus {
    #[default]
    Ok,
    Error,
}

impl RollupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }

    pub fn merge(self, other: Self) -> Self {
        if self == Self::Error || other == Self::Error {
            Self::Error
        } else {
            Self::Ok
        }
    }
}

impl fmt::Display for RollupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TraceMetrics {
    pub rollup_status: RollupStatus,
    pub total_duration_ms: Option<f64>,
    pub span_count: usize,
    pub max_depth: usize,
    pub error_count: usize,
    pub root_count: usize,
}

/// A fully reconstructed trace. Built fresh for every query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trace {
    pub trace_id: String,
    pub service_name: Option<String>,
    pub operation_name: Option<String>,
    #[serde(default, with = "wire_ts")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, with = "wire_ts")]
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub status: RollupStatus,
    pub metrics: TraceMetrics,
    pub roots: Vec<SpanTreeNode>,
    pub flat: Vec<Span>,
    #[serde(default)]
    pub warnings: Vec<BuildIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceSummary {
    pub trace_id: String,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default, with = "wire_ts")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub status_code: Option<String>,
}
