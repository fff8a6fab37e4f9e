use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracelens_core::TraceError;
use tracelens_core::filter::SortDirection;
use tracelens_core::model::trace::Trace;
use tracelens_core::query::{
    ListPage, ListViewRequest, TraceFilter, TracePage, TreeViewRequest, TreeViewResponse,
};
use tracelens_engine::TraceQueryFacade;
use tracing::Level;

use crate::protocol::{ApiRequest, ApiResponse, ErrorBody};

pub async fn run_query_server(facade: TraceQueryFacade, tcp_addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(tcp_addr)
        .await
        .context("bind TCP query listener")?;
    tracing::info!(addr = %tcp_addr, "tcp query server listening");
    run_tcp_loop(listener, facade).await
}

pub async fn run_tcp_loop(listener: TcpListener, facade: TraceQueryFacade) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let facade = facade.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_stream(BufReader::new(stream), facade).await {
                tracing::warn!(error = ?err, %peer, "tcp client request failed");
            }
        });
    }
}

/// Answers one response line per request line until the client hangs up.
async fn handle_stream<T>(mut stream: BufReader<T>, facade: TraceQueryFacade) -> anyhow::Result<()>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let n = stream.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ApiRequest>(&line) {
            Ok(req) => handle_request(req, &facade).await,
            Err(e) => ApiResponse::Error(ErrorBody::from(&TraceError::InvalidArgument(format!(
                "unreadable request: {e}"
            )))),
        };
        let payload = serde_json::to_vec(&response)?;
        stream.get_mut().write_all(&payload).await?;
        stream.get_mut().write_all(b"\n").await?;
        stream.get_mut().flush().await?;
    }
}

pub async fn handle_request(req: ApiRequest, facade: &TraceQueryFacade) -> ApiResponse {
    let resp = match req {
        ApiRequest::Trace(r) => facade
            .get_trace(&r.trace_id)
            .await
            .map(|trace| ApiResponse::Trace(Box::new(trace))),
        ApiRequest::Traces(r) => facade.list_traces(&r).await.map(ApiResponse::Traces),
        ApiRequest::TreeView(r) => facade.tree_view(&r).await.map(ApiResponse::TreeView),
        ApiRequest::ListView(r) => facade.list_view(&r).await.map(ApiResponse::ListView),
        ApiRequest::Status => facade.status().await.map(ApiResponse::Status),
    };

    resp.unwrap_or_else(|e| ApiResponse::Error(ErrorBody::from(&e)))
}

pub async fn run_query_http_server(
    facade: TraceQueryFacade,
    http_addr: SocketAddr,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(http_addr)
        .await
        .context("bind HTTP query listener")?;
    tracing::info!(addr = %http_addr, "http query server listening");
    axum::serve(listener, router(facade))
        .await
        .context("serve HTTP query api")
}

pub fn router(facade: TraceQueryFacade) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/traces", get(list_traces))
        .route("/v1/traces/{id}", get(get_trace))
        .route("/v1/traces/{id}/tree", get(tree_view))
        .route("/v1/traces/{id}/spans", get(list_view))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(facade)
}

pub struct HttpError(TraceError);

impl From<TraceError> for HttpError {
    fn from(err: TraceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::warn!(error = %self.0, kind = self.0.kind(), "query failed");
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

fn status_for(err: &TraceError) -> StatusCode {
    match err {
        TraceError::NotFound(_) => StatusCode::NOT_FOUND,
        TraceError::InvalidSortKey(_)
        | TraceError::InvalidArgument(_)
        | TraceError::MalformedSpan(_) => StatusCode::BAD_REQUEST,
        TraceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        TraceError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_traces(
    State(facade): State<TraceQueryFacade>,
    Query(filter): Query<TraceFilter>,
) -> Result<Json<TracePage>, HttpError> {
    Ok(Json(facade.list_traces(&filter).await?))
}

async fn get_trace(
    State(facade): State<TraceQueryFacade>,
    Path(id): Path<String>,
) -> Result<Json<Trace>, HttpError> {
    Ok(Json(facade.get_trace(&id).await?))
}

#[derive(Debug, Default, Deserialize)]
struct TreeParams {
    /// Comma separated span ids.
    #[serde(default)]
    expanded: Option<String>,
    #[serde(default)]
    all: bool,
}

async fn tree_view(
    State(facade): State<TraceQueryFacade>,
    Path(id): Path<String>,
    Query(params): Query<TreeParams>,
) -> Result<Json<TreeViewResponse>, HttpError> {
    let expanded = params
        .expanded
        .as_deref()
        .map(split_ids)
        .unwrap_or_default();
    let req = TreeViewRequest {
        trace_id: id,
        expanded,
        expand_all: params.all,
    };
    Ok(Json(facade.tree_view(&req).await?))
}

#[derive(Debug, Default, Deserialize)]
struct SpansParams {
    #[serde(default)]
    sort: Option<String>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_view(
    State(facade): State<TraceQueryFacade>,
    Path(id): Path<String>,
    Query(params): Query<SpansParams>,
) -> Result<Json<ListPage>, HttpError> {
    let direction = match params.direction.as_deref() {
        Some(raw) => SortDirection::from_str(raw)
            .map_err(|e| TraceError::InvalidArgument(e.to_string()))?,
        None => SortDirection::Asc,
    };
    let req = ListViewRequest {
        trace_id: id,
        sort_key: params.sort,
        direction,
        offset: params.offset,
        page_size: params.limit,
    };
    Ok(Json(facade.list_view(&req).await?))
}

fn split_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
