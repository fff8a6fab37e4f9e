use std::fmt;

use serde::{Deserialize, Serialize};

/// A non-fatal anomaly found while reconstructing a trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildIssue {
    /// A later record reused an id; the first record was kept.
    DuplicateSpanId { span_id: String, record_index: usize },
    /// The parent links of `members` form a loop. `broken_at` was detached
    /// and promoted to a root.
    CycleDetected {
        broken_at: String,
        members: Vec<String>,
    },
    /// A payload nested deeper than the normalizer bound and was left as is.
    NormalizationDepthExceeded { span_id: String, field: String },
}

impl BuildIssue {
    pub fn span_id(&self) -> &str {
        match self {
            Self::DuplicateSpanId { span_id, .. } => span_id,
            Self::CycleDetected { broken_at, .. } => broken_at,
            Self::NormalizationDepthExceeded { span_id, .. } => span_id,
        }
    }
}

impl fmt::Display for BuildIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateSpanId {
                span_id,
                record_index,
            } => write!(
                f,
                "duplicate span id {span_id} at record #{record_index} (first occurrence kept)"
            ),
            Self::CycleDetected { broken_at, members } => write!(
                f,
                "parent cycle through [{}], {broken_at} promoted to root",
                members.join(", ")
            ),
            Self::NormalizationDepthExceeded { span_id, field } => write!(
                f,
                "span {span_id} field {field} nested too deep, left unnormalized"
            ),
        }
    }
}
