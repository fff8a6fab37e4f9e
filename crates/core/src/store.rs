//! Boundary to the component that owns persisted spans.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::span::Span;
use crate::model::trace::TraceSummary;
use crate::query::{StatusResponse, TraceFilter};

/// Source of raw span records.
///
/// Implementations report storage and transport failures as
/// [`TraceError::UpstreamUnavailable`](crate::TraceError::UpstreamUnavailable)
/// (or `Timeout` for their own deadlines) and never retry. An unknown trace
/// id is an empty span list, not an error.
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn fetch_spans(&self, trace_id: &str) -> Result<Vec<Span>>;

    /// One page of summaries plus the total count ignoring pagination.
    async fn fetch_summaries(&self, filter: &TraceFilter) -> Result<(Vec<TraceSummary>, usize)>;

    async fn status(&self) -> Result<StatusResponse>;
}
