use serde::{Deserialize, Serialize};

use crate::model::span::Span;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanTreeNode {
    pub span: Span,
    #[serde(default)]
    pub children: Vec<SpanTreeNode>,
}

impl SpanTreeNode {
    pub fn leaf(span: Span) -> Self {
        Self {
            span,
            children: Vec::new(),
        }
    }

    pub fn span_id(&self) -> &str {
        &self.span.span_id
    }

    /// Pre-order walk over this node and its descendants, with depth
    /// relative to this node (this node is depth 0).
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: vec![(self, 0)],
        }
    }

    pub fn descendant_count(&self) -> usize {
        self.walk().count() - 1
    }
}

impl Drop for SpanTreeNode {
    // Unlinks descendants onto a heap stack so deep chains drop without recursion.
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// Pre-order walk over a whole forest, roots in order.
pub fn walk_forest(roots: &[SpanTreeNode]) -> Walk<'_> {
    Walk {
        stack: roots.iter().rev().map(|r| (r, 0)).collect(),
    }
}

pub struct Walk<'a> {
    stack: Vec<(&'a SpanTreeNode, usize)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (&'a SpanTreeNode, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (node, depth) = self.stack.pop()?;
        self.stack
            .extend(node.children.iter().rev().map(|c| (c, depth + 1)));
        Some((node, depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, children: Vec<SpanTreeNode>) -> SpanTreeNode {
        SpanTreeNode {
            span: Span {
                span_id: id.to_string(),
                ..Span::default()
            },
            children,
        }
    }

    #[test]
    fn walk_is_preorder_with_depth() {
        let roots = vec![
            node("a", vec![node("b", vec![node("c", vec![])]), node("d", vec![])]),
            node("e", vec![]),
        ];
        let seen = walk_forest(&roots)
            .map(|(n, d)| (n.span_id().to_string(), d))
            .collect::<Vec<_>>();
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), 0),
                ("b".to_string(), 1),
                ("c".to_string(), 2),
                ("d".to_string(), 1),
                ("e".to_string(), 0),
            ]
        );
        assert_eq!(roots[0].descendant_count(), 3);
    }
}
