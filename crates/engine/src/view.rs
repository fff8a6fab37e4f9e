//! Read-only projections over a reconstructed trace.
//!
//! Expand/collapse state lives in [`ExpansionState`], owned by the caller; the
//! projections never modify the [`Trace`] they read.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracelens_core::error::Result;
use tracelens_core::filter::{SortDirection, SortKey};
use tracelens_core::model::span::Span;
use tracelens_core::model::trace::{RollupStatus, Trace};
use tracelens_core::model::tree::{SpanTreeNode, walk_forest};
use tracelens_core::query::{ListPage, RenderRow};

/// Caller-local set of expanded span ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionState {
    expanded: HashSet<String>,
}

impl ExpansionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every node that has children, expanded.
    pub fn fully_expanded(trace: &Trace) -> Self {
        let mut state = Self::new();
        state.expand_all(trace);
        state
    }

    pub fn expand(&mut self, span_id: impl Into<String>) {
        self.expanded.insert(span_id.into());
    }

    pub fn collapse(&mut self, span_id: &str) {
        self.expanded.remove(span_id);
    }

    /// Flips one node and returns whether it is now expanded.
    pub fn toggle(&mut self, span_id: &str) -> bool {
        if self.expanded.remove(span_id) {
            false
        } else {
            self.expanded.insert(span_id.to_string());
            true
        }
    }

    pub fn expand_all(&mut self, trace: &Trace) {
        self.expanded.extend(
            walk_forest(&trace.roots)
                .filter(|(node, _)| !node.children.is_empty())
                .map(|(node, _)| node.span.span_id.clone()),
        );
    }

    pub fn collapse_all(&mut self) {
        self.expanded.clear();
    }

    pub fn is_expanded(&self, span_id: &str) -> bool {
        self.expanded.contains(span_id)
    }

    pub fn ids(&self) -> &HashSet<String> {
        &self.expanded
    }
}

impl FromIterator<String> for ExpansionState {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            expanded: iter.into_iter().collect(),
        }
    }
}

/// Per-node descendant count and subtree status, keyed by span id.
fn branch_index(roots: &[SpanTreeNode]) -> HashMap<&str, (usize, RollupStatus)> {
    let preorder = walk_forest(roots).map(|(node, _)| node).collect::<Vec<_>>();
    let mut index: HashMap<&str, (usize, RollupStatus)> = HashMap::with_capacity(preorder.len());
    for node in preorder.into_iter().rev() {
        let mut descendants = 0;
        let mut status = if node.span.is_error() {
            RollupStatus::Error
        } else {
            RollupStatus::Ok
        };
        for child in &node.children {
            if let Some((count, child_status)) = index.get(child.span_id()) {
                descendants += count + 1;
                status = status.merge(*child_status);
            }
        }
        index.insert(node.span_id(), (descendants, status));
    }
    index
}

/// Depth-first rows of the forest. Children of a node are emitted only while
/// the node is expanded.
pub fn tree_view(trace: &Trace, expansion: &ExpansionState) -> Vec<RenderRow> {
    let branches = branch_index(&trace.roots);
    let mut rows = Vec::new();
    let mut stack = trace
        .roots
        .iter()
        .rev()
        .map(|node| (node, 0usize))
        .collect::<Vec<_>>();

    while let Some((node, depth)) = stack.pop() {
        let expanded = expansion.is_expanded(node.span_id());
        let (descendant_count, branch_status) = branches
            .get(node.span_id())
            .copied()
            .unwrap_or((0, RollupStatus::Ok));
        rows.push(RenderRow {
            depth,
            expanded,
            has_children: !node.children.is_empty(),
            descendant_count,
            branch_status,
            span: node.span.clone(),
        });
        if expanded {
            stack.extend(node.children.iter().rev().map(|child| (child, depth + 1)));
        }
    }
    rows
}

/// One page of `trace.flat`, stably sorted by `sort_key` (start time when
/// absent). Unknown keys fail with `InvalidSortKey`.
pub fn list_view(
    trace: &Trace,
    sort_key: Option<&str>,
    direction: SortDirection,
    offset: usize,
    page_size: usize,
) -> Result<ListPage> {
    let sort_key = match sort_key.map(str::trim).filter(|k| !k.is_empty()) {
        Some(raw) => raw.parse::<SortKey>()?,
        None => SortKey::default(),
    };

    let mut sorted = trace.flat.iter().collect::<Vec<_>>();
    sorted.sort_by(|a, b| {
        let ord = compare_by(sort_key, a, b);
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });

    Ok(ListPage {
        total: sorted.len(),
        rows: sorted
            .into_iter()
            .skip(offset)
            .take(page_size)
            .cloned()
            .collect(),
        sort_key,
        direction,
    })
}

/// Absent values order before present ones.
pub fn compare_by(key: SortKey, a: &Span, b: &Span) -> Ordering {
    match key {
        SortKey::TraceId => a.trace_id.cmp(&b.trace_id),
        SortKey::SpanId => a.span_id.cmp(&b.span_id),
        SortKey::ParentSpanId => a.parent_span_id.cmp(&b.parent_span_id),
        SortKey::Name => a.name.cmp(&b.name),
        SortKey::Kind => a.kind.cmp(&b.kind),
        SortKey::ServiceName => a.service().cmp(&b.service()),
        SortKey::StartTime => a.start_time.cmp(&b.start_time),
        SortKey::EndTime => a.effective_end().cmp(&b.effective_end()),
        SortKey::DurationMs => cmp_f64(a.effective_duration_ms(), b.effective_duration_ms()),
        SortKey::StatusCode => a.status_code.cmp(&b.status_code),
        SortKey::StatusMessage => a.status_message.cmp(&b.status_message),
        SortKey::Attributes => a.attributes.len().cmp(&b.attributes.len()),
        SortKey::Events => a.events.len().cmp(&b.events.len()),
        SortKey::Links => a.links.len().cmp(&b.links.len()),
    }
}

fn cmp_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}
