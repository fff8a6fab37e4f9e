use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracelens_core::config::{Config, DEFAULT_NORMALIZE_MAX_DEPTH};
use tracelens_core::error::{Result, TraceError};
use tracelens_core::model::span::{Span, tree_order};
use tracelens_core::model::trace::Trace;
use tracelens_core::model::tree::{SpanTreeNode, walk_forest};
use tracelens_core::query::{
    DEFAULT_PAGE_SIZE, ListPage, ListViewRequest, StatusResponse, TraceFilter, TracePage,
    TreeViewRequest, TreeViewResponse,
};
use tracelens_core::store::TraceStore;

use crate::aggregate::{aggregate, time_bounds};
use crate::builder::build;
use crate::normalize::Normalizer;
use crate::view::{ExpansionState, list_view, tree_view};

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Deadline for each store call. `None` waits indefinitely.
    pub fetch_timeout: Option<Duration>,
    pub normalize_max_depth: usize,
    pub default_page_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: None,
            normalize_max_depth: DEFAULT_NORMALIZE_MAX_DEPTH,
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl EngineOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            fetch_timeout: Some(cfg.fetch_timeout),
            normalize_max_depth: cfg.normalize_max_depth,
            default_page_size: cfg.default_page_size,
        }
    }
}

/// Entry point for trace queries: fetch from the store, then reconstruct.
///
/// Cloning is cheap and clones share the store. Calls hold no shared mutable
/// state, so any number may run concurrently.
#[derive(Clone)]
pub struct TraceQueryFacade {
    store: Arc<dyn TraceStore>,
    options: EngineOptions,
}

impl TraceQueryFacade {
    pub fn new(store: impl TraceStore + 'static, options: EngineOptions) -> Self {
        Self::from_arc(Arc::new(store), options)
    }

    pub fn from_arc(store: Arc<dyn TraceStore>, options: EngineOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub async fn get_trace(&self, trace_id: &str) -> Result<Trace> {
        let trace_id = trace_id.trim();
        if trace_id.is_empty() {
            return Err(TraceError::InvalidArgument("trace id is empty".to_string()));
        }

        let spans = self.bounded(self.store.fetch_spans(trace_id)).await?;
        if spans.is_empty() {
            return Err(TraceError::NotFound(format!("trace {trace_id}")));
        }
        let trace = reconstruct(trace_id, spans, self.options.normalize_max_depth)?;
        tracing::debug!(
            trace_id,
            spans = trace.metrics.span_count,
            warnings = trace.warnings.len(),
            "trace reconstructed"
        );
        Ok(trace)
    }

    pub async fn list_traces(&self, filter: &TraceFilter) -> Result<TracePage> {
        filter.validate()?;
        let (items, total) = self.bounded(self.store.fetch_summaries(filter)).await?;
        Ok(TracePage { items, total })
    }

    pub async fn tree_view(&self, req: &TreeViewRequest) -> Result<TreeViewResponse> {
        let trace = self.get_trace(&req.trace_id).await?;
        let state = if req.expand_all {
            ExpansionState::fully_expanded(&trace)
        } else {
            req.expanded.iter().cloned().collect()
        };
        let rows = tree_view(&trace, &state);
        Ok(TreeViewResponse {
            trace_id: trace.trace_id,
            service_name: trace.service_name,
            operation_name: trace.operation_name,
            duration_ms: trace.duration_ms,
            status: trace.status,
            metrics: trace.metrics,
            warnings: trace.warnings,
            rows,
        })
    }

    pub async fn list_view(&self, req: &ListViewRequest) -> Result<ListPage> {
        let trace = self.get_trace(&req.trace_id).await?;
        list_view(
            &trace,
            req.sort_key.as_deref(),
            req.direction,
            req.offset,
            req.page_size.unwrap_or(self.options.default_page_size),
        )
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        self.bounded(self.store.status()).await
    }

    /// Applies the fetch deadline and folds store failures into the
    /// caller-facing taxonomy. Dropping the returned future drops the fetch.
    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let result = match self.options.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| TraceError::Timeout(limit))?,
            None => fut.await,
        };
        result.map_err(|err| match err {
            TraceError::UpstreamUnavailable(_)
            | TraceError::Timeout(_)
            | TraceError::MalformedSpan(_)
            | TraceError::NotFound(_)
            | TraceError::InvalidArgument(_) => err,
            other => {
                tracing::warn!(error = %other, "trace store call failed");
                TraceError::UpstreamUnavailable(other.to_string())
            }
        })
    }
}

/// Build, normalize and aggregate one span set into a [`Trace`].
pub fn reconstruct(trace_id: &str, spans: Vec<Span>, normalize_max_depth: usize) -> Result<Trace> {
    let mut built = build(spans)?;
    let normalizer = Normalizer::new(normalize_max_depth);
    let mut warnings = built.issues;
    warnings.extend(normalizer.normalize_forest(&mut built.roots));

    let roots = built.roots;
    let metrics = aggregate(&roots);
    let (start_time, end_time) = time_bounds(&roots);
    let flat = flatten(&roots);
    let head = roots.first().map(|node| &node.span);
    let service_name = head
        .and_then(Span::service)
        .or_else(|| flat.iter().find_map(Span::service))
        .map(str::to_string);
    let operation_name = head.map(|span| span.name.clone());

    Ok(Trace {
        trace_id: trace_id.to_string(),
        service_name,
        operation_name,
        start_time,
        end_time,
        duration_ms: metrics.total_duration_ms,
        status: metrics.rollup_status,
        metrics,
        roots,
        flat,
        warnings,
    })
}

fn flatten(roots: &[SpanTreeNode]) -> Vec<Span> {
    let mut flat = walk_forest(roots)
        .map(|(node, _)| node.span.clone())
        .collect::<Vec<_>>();
    flat.sort_by(tree_order);
    flat
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;
    use tracelens_core::filter::SortDirection;
    use tracelens_core::model::issue::BuildIssue;
    use tracelens_core::model::trace::RollupStatus;

    use super::*;

    fn span(id: &str, parent: Option<&str>, start: &str) -> Span {
        serde_json::from_value(json!({
            "trace_id": "t1",
            "span_id": id,
            "parent_span_id": parent,
            "name": format!("op-{id}"),
            "start_time": start,
        }))
        .unwrap()
    }

    #[test]
    fn reconstruct_composes_summary_from_root() {
        let mut root = span("r", None, "2026-02-01T00:00:00Z");
        root.end_time = root.start_time.map(|t| t + chrono::Duration::milliseconds(80));
        root.attributes
            .insert("service.name".into(), json!("checkout"));
        let mut child = span("c", Some("r"), "2026-02-01T00:00:00.010Z");
        child.status_code = Some("ERROR".into());
        child.status_message = Some("{\"reason\":\"card declined\"}".into());

        let trace = reconstruct("t1", vec![child, root], 64).unwrap();
        assert_eq!(trace.service_name.as_deref(), Some("checkout"));
        assert_eq!(trace.operation_name.as_deref(), Some("op-r"));
        assert_eq!(trace.duration_ms, Some(80.0));
        assert_eq!(trace.status, RollupStatus::Error);
        assert_eq!(trace.metrics.span_count, 2);
        assert_eq!(trace.flat.len(), 2);
        assert_eq!(trace.flat[0].span_id, "r");
        assert_eq!(
            trace.roots[0].children[0].span.status_message.as_deref(),
            Some("card declined")
        );
        assert!(trace.warnings.is_empty());
    }

    #[test]
    fn reconstruct_attaches_issues_as_warnings() {
        let spans = vec![
            span("a", Some("a"), "2026-02-01T00:00:00Z"),
            span("a", None, "2026-02-01T00:00:01Z"),
        ];
        let trace = reconstruct("t1", spans, 64).unwrap();
        assert_eq!(trace.warnings.len(), 2);
        assert_eq!(trace.roots.len(), 1);
    }

    #[test]
    fn reconstruct_reports_payloads_past_the_depth_bound() {
        let mut root = span("r", None, "2026-02-01T00:00:00Z");
        root.attributes
            .insert("payload".into(), json!({"a": {"b": {"c": "caf\\u00e9"}}}));
        root.attributes.insert("flat".into(), json!("caf\\u00e9"));

        let trace = reconstruct("t1", vec![root], 2).unwrap();
        assert_eq!(
            trace.warnings,
            vec![BuildIssue::NormalizationDepthExceeded {
                span_id: "r".into(),
                field: "attributes.payload".into(),
            }]
        );
        let attrs = &trace.roots[0].span.attributes;
        assert_eq!(attrs["payload"]["a"]["b"]["c"], "caf\\u00e9");
        assert_eq!(attrs["flat"], "café");
    }

    #[test]
    fn parentless_spans_are_all_roots_and_match_full_list_page() {
        let spans = (0..6)
            .map(|i| span(&format!("s{i}"), None, &format!("2026-02-01T00:00:0{i}Z")))
            .collect::<Vec<_>>();
        let trace = reconstruct("t1", spans, 64).unwrap();
        assert_eq!(trace.roots.len(), 6);
        assert_eq!(trace.metrics.max_depth, 1);

        let page = list_view(&trace, None, SortDirection::Asc, 0, 6).unwrap();
        let root_ids = trace
            .roots
            .iter()
            .map(|node| node.span.span_id.clone())
            .collect::<HashSet<_>>();
        let listed_ids = page
            .rows
            .iter()
            .map(|span| span.span_id.clone())
            .collect::<HashSet<_>>();
        assert_eq!(page.total, 6);
        assert_eq!(root_ids, listed_ids);
    }

    #[test]
    fn open_child_keeps_duration_equal_to_bounds() {
        let mut root = span("r", None, "2026-02-01T00:00:00Z");
        root.end_time = root.start_time.map(|t| t + chrono::Duration::milliseconds(10));
        let child = span("c", Some("r"), "2026-02-01T00:00:00.020Z");

        let trace = reconstruct("t1", vec![root, child], 64).unwrap();
        let bounds = trace.end_time.unwrap() - trace.start_time.unwrap();
        assert_eq!(trace.duration_ms, Some(10.0));
        assert_eq!(trace.duration_ms, Some(bounds.num_milliseconds() as f64));
    }
}
