use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};
use crate::filter::{SortDirection, SortKey, TimeWindow};
use crate::model::issue::BuildIssue;
use crate::model::span::Span;
use crate::model::trace::{RollupStatus, TraceMetrics, TraceSummary};

pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceFilter {
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub experiment_id: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for TraceFilter {
    fn default() -> Self {
        Self {
            service_name: None,
            start_time: None,
            end_time: None,
            experiment_id: None,
            run_id: None,
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl TraceFilter {
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time)
            && start > end
        {
            return Err(TraceError::InvalidArgument(format!(
                "start_time {start} is after end_time {end}"
            )));
        }
        Ok(())
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            since: self.start_time,
            until: self.end_time,
        }
    }

    pub fn matches(&self, summary: &TraceSummary) -> bool {
        if let Some(service) = &self.service_name
            && summary.service_name.as_deref() != Some(service.as_str())
        {
            return false;
        }
        match summary.start_time {
            Some(ts) => self.window().contains(ts),
            None => self.start_time.is_none() && self.end_time.is_none(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TracePage {
    pub items: Vec<TraceSummary>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRequest {
    pub trace_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TreeViewRequest {
    pub trace_id: String,
    #[serde(default)]
    pub expanded: Vec<String>,
    #[serde(default)]
    pub expand_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListViewRequest {
    pub trace_id: String,
    #[serde(default)]
    pub sort_key: Option<String>,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub page_size: Option<usize>,
}

/// One visible line of the tree projection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderRow {
    pub depth: usize,
    pub expanded: bool,
    pub has_children: bool,
    pub descendant_count: usize,
    pub branch_status: RollupStatus,
    pub span: Span,
}

/// Tree rows together with the trace-level facts a renderer shows above them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeViewResponse {
    pub trace_id: String,
    pub service_name: Option<String>,
    pub operation_name: Option<String>,
    pub duration_ms: Option<f64>,
    pub status: RollupStatus,
    pub metrics: TraceMetrics,
    #[serde(default)]
    pub warnings: Vec<BuildIssue>,
    pub rows: Vec<RenderRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListPage {
    pub rows: Vec<Span>,
    pub total: usize,
    pub sort_key: SortKey,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub backend: String,
    pub spans_count: Option<usize>,
    pub traces_count: Option<usize>,
    pub oldest_ts: Option<DateTime<Utc>>,
    pub newest_ts: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn filter_rejects_inverted_window() {
        let t0 = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let filter = TraceFilter {
            start_time: Some(t0 + chrono::Duration::hours(1)),
            end_time: Some(t0),
            ..TraceFilter::default()
        };
        assert!(matches!(
            filter.validate(),
            Err(TraceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn filter_matches_service_and_window() {
        let t0 = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let summary = TraceSummary {
            trace_id: "t1".into(),
            service_name: Some("api".into()),
            operation_name: Some("GET /".into()),
            start_time: Some(t0),
            duration_ms: Some(12.0),
            status_code: None,
        };
        let filter = TraceFilter {
            service_name: Some("api".into()),
            start_time: Some(t0 - chrono::Duration::minutes(1)),
            ..TraceFilter::default()
        };
        assert!(filter.matches(&summary));

        let other = TraceFilter {
            service_name: Some("worker".into()),
            ..TraceFilter::default()
        };
        assert!(!other.matches(&summary));
    }

    #[test]
    fn filter_defaults_when_deserialized_from_empty_object() {
        let filter: TraceFilter = serde_json::from_str("{}").unwrap();
        assert_eq!(filter, TraceFilter::default());
    }
}
