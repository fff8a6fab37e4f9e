use chrono::{DateTime, Utc};
use tracelens_core::model::span::Span;
use tracelens_core::model::trace::{RollupStatus, TraceMetrics};
use tracelens_core::model::tree::{SpanTreeNode, Walk, walk_forest};
use tracelens_core::time::millis_between;

/// Metrics over a whole forest. Every node is visited exactly once.
pub fn aggregate(roots: &[SpanTreeNode]) -> TraceMetrics {
    let mut metrics = fold(walk_forest(roots));
    metrics.root_count = roots.len();
    metrics
}

/// Metrics for one subtree, with depth counted from `node`.
pub fn branch_metrics(node: &SpanTreeNode) -> TraceMetrics {
    let mut metrics = fold(node.walk());
    metrics.root_count = 1;
    metrics
}

fn fold(walk: Walk<'_>) -> TraceMetrics {
    let mut metrics = TraceMetrics::default();
    let mut bounds = Bounds::default();

    for (node, depth) in walk {
        let span = &node.span;
        metrics.span_count += 1;
        metrics.max_depth = metrics.max_depth.max(depth + 1);
        if span.is_error() {
            metrics.error_count += 1;
            metrics.rollup_status = RollupStatus::Error;
        }
        bounds.widen(span);
    }

    metrics.total_duration_ms = bounds.duration_ms();
    metrics
}

/// Earliest start and latest end across the forest.
pub fn time_bounds(roots: &[SpanTreeNode]) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let mut bounds = Bounds::default();
    for (node, _) in walk_forest(roots) {
        bounds.widen(&node.span);
    }
    (bounds.start, bounds.end)
}

/// Minimum over start times and maximum over effective ends. An open span
/// widens the start side only.
#[derive(Default)]
struct Bounds {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl Bounds {
    fn widen(&mut self, span: &Span) {
        if let Some(ts) = span.start_time {
            self.start = Some(self.start.map_or(ts, |s| s.min(ts)));
        }
        if let Some(ts) = span.effective_end() {
            self.end = Some(self.end.map_or(ts, |e| e.max(ts)));
        }
    }

    fn duration_ms(&self) -> Option<f64> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(millis_between(start, end)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn node(id: &str, start_ms: i64, end_ms: Option<i64>, status: Option<&str>) -> SpanTreeNode {
        let base = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        SpanTreeNode::leaf(Span {
            span_id: id.into(),
            start_time: Some(base + Duration::milliseconds(start_ms)),
            end_time: end_ms.map(|ms| base + Duration::milliseconds(ms)),
            status_code: status.map(str::to_string),
            ..Span::default()
        })
    }

    #[test]
    fn empty_forest_has_zero_depth_and_no_duration() {
        let metrics = aggregate(&[]);
        assert_eq!(metrics, TraceMetrics::default());
        assert_eq!(metrics.max_depth, 0);
        assert_eq!(metrics.total_duration_ms, None);
    }

    #[test]
    fn rollup_error_when_any_node_fails() {
        let mut root = node("r", 0, Some(100), Some("OK"));
        let mut child = node("c", 10, Some(50), None);
        child.children.push(node("g", 20, Some(30), Some("ERROR")));
        root.children.push(child);

        let metrics = aggregate(std::slice::from_ref(&root));
        assert_eq!(metrics.rollup_status, RollupStatus::Error);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.span_count, 3);
        assert_eq!(metrics.max_depth, 3);
        assert_eq!(metrics.root_count, 1);
        assert_eq!(metrics.total_duration_ms, Some(100.0));

        let branch = branch_metrics(&root.children[0]);
        assert_eq!(branch.span_count, 2);
        assert_eq!(branch.max_depth, 2);
        assert_eq!(branch.rollup_status, RollupStatus::Error);
        assert_eq!(branch.total_duration_ms, Some(40.0));
    }

    #[test]
    fn absent_status_counts_as_ok() {
        let roots = vec![node("a", 0, None, None), node("b", 5, Some(8), Some("UNSET"))];
        let metrics = aggregate(&roots);
        assert_eq!(metrics.rollup_status, RollupStatus::Ok);
        assert_eq!(metrics.root_count, 2);
        assert_eq!(metrics.max_depth, 1);
        assert_eq!(metrics.total_duration_ms, Some(8.0));
    }

    #[test]
    fn duration_uses_latest_end_not_last_span() {
        let roots = vec![node("a", 0, Some(500), None), node("b", 100, Some(200), None)];
        assert_eq!(aggregate(&roots).total_duration_ms, Some(500.0));
        let (start, end) = time_bounds(&roots);
        assert_eq!((end.unwrap() - start.unwrap()).num_milliseconds(), 500);
    }

    #[test]
    fn open_span_start_does_not_stretch_the_end() {
        let mut root = node("r", 0, Some(10), None);
        root.children.push(node("c", 20, None, None));
        let roots = vec![root];

        let metrics = aggregate(&roots);
        let (start, end) = time_bounds(&roots);
        let span = (end.unwrap() - start.unwrap()).num_milliseconds() as f64;
        assert_eq!(metrics.total_duration_ms, Some(10.0));
        assert_eq!(metrics.total_duration_ms, Some(span));
    }

    #[test]
    fn untimed_spans_yield_no_duration() {
        let roots = vec![SpanTreeNode::leaf(Span {
            span_id: "x".into(),
            ..Span::default()
        })];
        assert_eq!(aggregate(&roots).total_duration_ms, None);
    }
}
