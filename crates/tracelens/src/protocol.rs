use serde::{Deserialize, Serialize};
use tracelens_core::TraceError;
use tracelens_core::model::trace::Trace;
use tracelens_core::query::{
    ListPage, ListViewRequest, StatusResponse, TraceFilter, TracePage, TraceRequest,
    TreeViewRequest, TreeViewResponse,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiRequest {
    Trace(TraceRequest),
    Traces(TraceFilter),
    TreeView(TreeViewRequest),
    ListView(ListViewRequest),
    Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiResponse {
    Trace(Box<Trace>),
    Traces(TracePage),
    TreeView(TreeViewResponse),
    ListView(ListPage),
    Status(StatusResponse),
    Error(ErrorBody),
}

/// Failure payload shared by the TCP protocol and the HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl From<&TraceError> for ErrorBody {
    fn from(err: &TraceError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_use_externally_tagged_json() {
        let req: ApiRequest =
            serde_json::from_str(r#"{"TreeView":{"trace_id":"t1","expand_all":true}}"#).unwrap();
        assert!(matches!(req, ApiRequest::TreeView(r) if r.trace_id == "t1" && r.expand_all));

        let status = serde_json::to_string(&ApiRequest::Status).unwrap();
        assert_eq!(status, "\"Status\"");
    }

    #[test]
    fn error_body_carries_kind_tag() {
        let body = ErrorBody::from(&TraceError::NotFound("trace t9".into()));
        assert_eq!(body.error, "not_found");
        assert_eq!(body.message, "not found: trace t9");
    }
}
