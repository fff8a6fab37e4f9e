//! Reconstruction of the span forest from an unordered span set.

use std::collections::HashMap;

use tracelens_core::error::{Result, TraceError};
use tracelens_core::model::issue::BuildIssue;
use tracelens_core::model::span::{Span, tree_order};
use tracelens_core::model::tree::SpanTreeNode;

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutput {
    pub roots: Vec<SpanTreeNode>,
    pub issues: Vec<BuildIssue>,
}

/// Builds an ordered, acyclic forest out of `spans`.
///
/// Duplicate ids keep the first record. Parent links to unknown ids make a
/// root. Every parent cycle is cut at its smallest span id, which becomes a
/// root. Children and roots are ordered by start time, then span id.
///
/// Fails only when a record has no usable `span_id`.
pub fn build(spans: Vec<Span>) -> Result<BuildOutput> {
    let mut issues = Vec::new();
    let mut kept: Vec<Span> = Vec::with_capacity(spans.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(spans.len());

    for (record_index, span) in spans.into_iter().enumerate() {
        if span.span_id.trim().is_empty() {
            return Err(TraceError::MalformedSpan(format!(
                "record #{record_index} has an empty span_id (name={:?})",
                span.name
            )));
        }
        if index.contains_key(&span.span_id) {
            tracing::debug!(span_id = %span.span_id, record_index, "dropping duplicate span");
            issues.push(BuildIssue::DuplicateSpanId {
                span_id: span.span_id,
                record_index,
            });
            continue;
        }
        index.insert(span.span_id.clone(), kept.len());
        kept.push(span);
    }

    let mut parent = kept
        .iter()
        .map(|s| {
            s.parent_span_id
                .as_deref()
                .and_then(|id| index.get(id).copied())
        })
        .collect::<Vec<_>>();
    issues.extend(break_cycles(&kept, &mut parent));

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); kept.len()];
    let mut roots = Vec::new();
    for (idx, p) in parent.iter().enumerate() {
        match p {
            Some(p) => children[*p].push(idx),
            None => roots.push(idx),
        }
    }

    let order = |a: &usize, b: &usize| tree_order(&kept[*a], &kept[*b]);
    for list in &mut children {
        list.sort_by(order);
    }
    roots.sort_by(order);

    let forest = materialize(kept, &roots, &children);
    tracing::debug!(
        roots = forest.len(),
        issues = issues.len(),
        "span forest built"
    );
    Ok(BuildOutput {
        roots: forest,
        issues,
    })
}

/// Finds every cycle in the parent relation and detaches the member with the
/// smallest span id. Each node is walked once, so no walk is longer than the
/// span count.
fn break_cycles(spans: &[Span], parent: &mut [Option<usize>]) -> Vec<BuildIssue> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Unvisited,
        OnPath,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; spans.len()];
    let mut issues = Vec::new();
    let mut path: Vec<usize> = Vec::new();

    for start in 0..spans.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        path.clear();
        let mut cursor = Some(start);
        while let Some(idx) = cursor {
            match marks[idx] {
                Mark::Done => break,
                Mark::OnPath => {
                    let from = path.iter().position(|&p| p == idx).unwrap_or(0);
                    let mut members = path[from..]
                        .iter()
                        .map(|&m| (spans[m].span_id.as_str(), m))
                        .collect::<Vec<_>>();
                    members.sort();
                    let (broken_at, broken_idx) = members[0];
                    parent[broken_idx] = None;
                    tracing::warn!(span_id = broken_at, size = members.len(), "parent cycle broken");
                    issues.push(BuildIssue::CycleDetected {
                        broken_at: broken_at.to_string(),
                        members: members.iter().map(|(id, _)| id.to_string()).collect(),
                    });
                    break;
                }
                Mark::Unvisited => {
                    marks[idx] = Mark::OnPath;
                    path.push(idx);
                    cursor = parent[idx];
                }
            }
        }
        for &idx in &path {
            marks[idx] = Mark::Done;
        }
    }

    issues.sort_by(|a, b| a.span_id().cmp(b.span_id()));
    issues
}

/// Turns index adjacency into owned nodes bottom-up, without recursion.
fn materialize(spans: Vec<Span>, roots: &[usize], children: &[Vec<usize>]) -> Vec<SpanTreeNode> {
    let mut preorder = Vec::with_capacity(spans.len());
    let mut stack = roots.iter().rev().copied().collect::<Vec<_>>();
    while let Some(idx) = stack.pop() {
        preorder.push(idx);
        stack.extend(children[idx].iter().rev());
    }
    debug_assert_eq!(preorder.len(), spans.len(), "every span reachable from a root");

    let mut slots = spans.into_iter().map(Some).collect::<Vec<_>>();
    let mut built: Vec<Option<SpanTreeNode>> = (0..slots.len()).map(|_| None).collect();
    for &idx in preorder.iter().rev() {
        let Some(span) = slots[idx].take() else {
            continue;
        };
        let kids = children[idx]
            .iter()
            .filter_map(|&c| built[c].take())
            .collect();
        built[idx] = Some(SpanTreeNode {
            span,
            children: kids,
        });
    }

    roots.iter().filter_map(|&r| built[r].take()).collect()
}
