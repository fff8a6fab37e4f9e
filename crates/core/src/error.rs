use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace store unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed span: {0}")]
    MalformedSpan(String),

    #[error("invalid sort key: {0}")]
    InvalidSortKey(String),

    #[error("upstream fetch timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TraceError {
    /// Stable tag used by the query servers to classify failures.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::NotFound(_) => "not_found",
            Self::MalformedSpan(_) => "malformed_span",
            Self::InvalidSortKey(_) => "invalid_sort_key",
            Self::Timeout(_) => "timeout",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Config(_) => "config",
            Self::Parse(_) => "parse",
            Self::Store(_) => "store",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, TraceError>;
