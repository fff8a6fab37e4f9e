mod client;
mod output;
mod protocol;
mod query_server;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracelens_core::TraceError;
use tracelens_core::config::Config;
use tracelens_core::filter::SortDirection;
use tracelens_core::model::span::{Span, parse_spans};
use tracelens_core::query::{ListViewRequest, TraceFilter, TreeViewRequest};
use tracelens_core::store::TraceStore;
use tracelens_core::time::parse_time_or_relative;
use tracelens_engine::{EngineOptions, TraceQueryFacade};
use tracelens_store::{HttpTraceStore, Store};

use crate::client::QueryClient;
use crate::output::{
    print_list_human, print_status_human, print_trace_human, print_traces_human,
    print_tree_human,
};
use crate::protocol::{ApiRequest, ApiResponse};
use crate::telemetry::{LogFormat, init_cli_tracing, init_run_tracing};

#[derive(Parser, Debug)]
#[command(name = "tracelens")]
#[command(about = "Reconstruct and explore distributed traces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    addr: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the TCP and HTTP query servers")]
    Serve {
        #[arg(long)]
        db_path: Option<PathBuf>,
        #[arg(long)]
        query_tcp_addr: Option<String>,
        #[arg(long)]
        query_http_addr: Option<String>,
        #[arg(long, help = "Read traces from this HTTP trace API instead of the local database")]
        upstream: Option<String>,
    },
    #[command(about = "Load spans from a JSON array or JSON lines file into the local database")]
    Import {
        file: PathBuf,
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    #[command(about = "Show a trace as a span tree")]
    Trace {
        trace_id: String,
        #[arg(long, conflicts_with = "expand")]
        expand_all: bool,
        #[arg(long, value_delimiter = ',', help = "Span ids whose children are shown")]
        expand: Vec<String>,
    },
    #[command(about = "List the spans of a trace as a sorted table")]
    Spans {
        trace_id: String,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        desc: bool,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    #[command(about = "List trace summaries, newest first")]
    Traces {
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        experiment: Option<String>,
        #[arg(long)]
        run: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    #[command(about = "Show store status")]
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            db_path,
            query_tcp_addr,
            query_http_addr,
            upstream,
        } => run_server(db_path, query_tcp_addr, query_http_addr, upstream).await,
        Commands::Import { file, db_path } => {
            init_cli_tracing();
            run_import(&file, db_path, cli.json)
        }
        Commands::Trace {
            trace_id,
            expand_all,
            expand,
        } => {
            init_cli_tracing();
            let req = ApiRequest::TreeView(TreeViewRequest {
                trace_id,
                expanded: expand,
                expand_all,
            });
            request_and_print(cli.addr, req, cli.json).await
        }
        Commands::Spans {
            trace_id,
            sort,
            desc,
            offset,
            limit,
        } => {
            init_cli_tracing();
            let req = ApiRequest::ListView(ListViewRequest {
                trace_id,
                sort_key: sort,
                direction: if desc {
                    SortDirection::Desc
                } else {
                    SortDirection::Asc
                },
                offset,
                page_size: limit,
            });
            request_and_print(cli.addr, req, cli.json).await
        }
        Commands::Traces {
            service,
            since,
            until,
            experiment,
            run,
            offset,
            limit,
        } => {
            init_cli_tracing();
            let (start_time, end_time) = parse_window(since, until)?;
            let req = ApiRequest::Traces(TraceFilter {
                service_name: service,
                start_time,
                end_time,
                experiment_id: experiment,
                run_id: run,
                offset,
                limit,
            });
            request_and_print(cli.addr, req, cli.json).await
        }
        Commands::Status => {
            init_cli_tracing();
            request_and_print(cli.addr, ApiRequest::Status, cli.json).await
        }
    }
}

async fn request_and_print(
    addr: Option<String>,
    req: ApiRequest,
    json: bool,
) -> anyhow::Result<()> {
    let mut client = QueryClient::connect(addr).await?;
    let response = client.request(req).await?;
    print_response(response, json)
}

async fn run_server(
    db_path: Option<PathBuf>,
    query_tcp_addr: Option<String>,
    query_http_addr: Option<String>,
    upstream: Option<String>,
) -> anyhow::Result<()> {
    let mut cfg = Config::load().context("load config")?;
    if let Some(v) = db_path {
        cfg.db_path = v;
    }
    if let Some(v) = query_tcp_addr {
        cfg.query_tcp_addr = v;
    }
    if let Some(v) = query_http_addr {
        cfg.query_http_addr = v;
    }
    if let Some(v) = upstream {
        cfg.upstream_url = Some(v);
    }

    init_run_tracing(LogFormat::from_env());

    let (store, backend): (Arc<dyn TraceStore>, String) = match &cfg.upstream_url {
        Some(url) => {
            let store = HttpTraceStore::new(url, cfg.fetch_timeout)?;
            let backend = format!("http upstream {}", store.base_url());
            (Arc::new(store), backend)
        }
        None => {
            let store = Store::open(&cfg.db_path)?;
            (Arc::new(store), format!("duckdb {}", cfg.db_path.display()))
        }
    };
    let facade = TraceQueryFacade::from_arc(store, EngineOptions::from_config(&cfg));

    eprintln!("tracelens serve");
    eprintln!("  store: {backend}");
    eprintln!("  query tcp: {}", cfg.query_tcp_addr);
    eprintln!("  query http: {}", cfg.query_http_addr);
    eprintln!(
        "  fetch timeout: {}",
        humantime::format_duration(cfg.fetch_timeout)
    );

    let query_task = tokio::spawn(query_server::run_query_server(
        facade.clone(),
        cfg.query_tcp_addr
            .parse()
            .with_context(|| format!("bad query tcp addr {}", cfg.query_tcp_addr))?,
    ));
    let query_http_task = tokio::spawn(query_server::run_query_http_server(
        facade,
        cfg.query_http_addr
            .parse()
            .with_context(|| format!("bad query http addr {}", cfg.query_http_addr))?,
    ));

    tokio::select! {
        res = query_task => {
            res??;
        }
        res = query_http_task => {
            res??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    Ok(())
}

fn run_import(file: &Path, db_path: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let db_path = match db_path {
        Some(path) => path,
        None => Config::load().context("load config")?.db_path,
    };
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("read span file {}", file.display()))?;
    let spans = decode_span_file(&raw)?;

    let store = Store::open(&db_path)?;
    let inserted = store.insert_spans(&spans)?;
    tracing::debug!(received = spans.len(), inserted, "import finished");

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "received": spans.len(),
                "inserted": inserted,
                "db_path": db_path.display().to_string(),
            }))?
        );
    } else {
        println!(
            "imported {inserted} new spans ({} read) into {}",
            spans.len(),
            db_path.display()
        );
    }
    Ok(())
}

/// Accepts a JSON array of span records or one record per line.
fn decode_span_file(raw: &str) -> anyhow::Result<Vec<Span>> {
    let records = if raw.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<Value>>(raw).context("parse span array")?
    } else {
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str::<Value>(line)
                    .with_context(|| format!("parse span record on line {}", idx + 1))
            })
            .collect::<anyhow::Result<Vec<_>>>()?
    };

    let spans = parse_spans(records)?;
    if let Some(span) = spans.iter().find(|s| s.trace_id.trim().is_empty()) {
        return Err(TraceError::MalformedSpan(format!(
            "span {} has no trace_id",
            span.span_id
        ))
        .into());
    }
    Ok(spans)
}

fn parse_window(
    since: Option<String>,
    until: Option<String>,
) -> anyhow::Result<(
    Option<chrono::DateTime<chrono::Utc>>,
    Option<chrono::DateTime<chrono::Utc>>,
)> {
    let since = since.map(|v| parse_time_or_relative(&v)).transpose()?;
    let until = until.map(|v| parse_time_or_relative(&v)).transpose()?;
    Ok((since, until))
}

fn print_response(response: ApiResponse, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        if let ApiResponse::Error(e) = response {
            anyhow::bail!("{} ({})", e.message, e.error);
        }
        return Ok(());
    }

    match response {
        ApiResponse::Trace(v) => print_trace_human(&v),
        ApiResponse::Traces(v) => print_traces_human(&v),
        ApiResponse::TreeView(v) => print_tree_human(&v),
        ApiResponse::ListView(v) => print_list_human(&v),
        ApiResponse::Status(v) => print_status_human(&v),
        ApiResponse::Error(e) => anyhow::bail!("{} ({})", e.message, e.error),
    }
    Ok(())
}
