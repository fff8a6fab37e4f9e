use std::io::IsTerminal;

use chrono::{DateTime, SecondsFormat, Utc};
use owo_colors::OwoColorize;
use tracelens_core::filter::SortDirection;
use tracelens_core::model::issue::BuildIssue;
use tracelens_core::model::span::Span;
use tracelens_core::model::trace::{RollupStatus, Trace, TraceMetrics};
use tracelens_core::model::tree::walk_forest;
use tracelens_core::query::{ListPage, RenderRow, StatusResponse, TracePage, TreeViewResponse};

pub fn print_trace_human(v: &Trace) {
    let color = use_color();
    print_header(
        &v.trace_id,
        v.service_name.as_deref(),
        v.operation_name.as_deref(),
        v.duration_ms,
        v.status,
        &v.metrics,
        color,
    );
    for (node, depth) in walk_forest(&v.roots) {
        let marker = if node.children.is_empty() { "•" } else { "▾" };
        println!("{}", span_line(&node.span, depth, marker, color));
    }
    print_warnings(&v.warnings, color);
}

pub fn print_tree_human(v: &TreeViewResponse) {
    let color = use_color();
    print_header(
        &v.trace_id,
        v.service_name.as_deref(),
        v.operation_name.as_deref(),
        v.duration_ms,
        v.status,
        &v.metrics,
        color,
    );
    for row in &v.rows {
        println!("{}", tree_row_line(row, color));
    }
    print_warnings(&v.warnings, color);
}

pub fn print_list_human(v: &ListPage) {
    let color = use_color();
    for span in &v.rows {
        println!(
            "{} {:>10} {} {} {} span={}",
            fmt_ts(span.start_time),
            fmt_ms(span.effective_duration_ms()),
            status_label(span_status(span), color),
            span.service().unwrap_or("-"),
            span.name,
            span.span_id
        );
    }
    println!(
        "-- {} of {} spans sorted by {} {} --",
        v.rows.len(),
        v.total,
        v.sort_key,
        match v.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    );
}

pub fn print_traces_human(v: &TracePage) {
    for item in &v.items {
        println!(
            "{} trace={} duration={} status={} service={} root=\"{}\"",
            fmt_ts(item.start_time),
            item.trace_id,
            fmt_ms(item.duration_ms),
            item.status_code.as_deref().unwrap_or("-"),
            item.service_name.as_deref().unwrap_or("-"),
            item.operation_name.as_deref().unwrap_or("")
        );
    }
    println!("-- {} of {} traces --", v.items.len(), v.total);
}

pub fn print_status_human(v: &StatusResponse) {
    println!("backend={}", v.backend);
    if let (Some(spans), Some(traces)) = (v.spans_count, v.traces_count) {
        println!("spans={spans} traces={traces}");
    }
    if let Some(oldest) = v.oldest_ts {
        println!(
            "oldest={}",
            oldest.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }
    if let Some(newest) = v.newest_ts {
        println!(
            "newest={}",
            newest.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }
}

fn print_header(
    trace_id: &str,
    service: Option<&str>,
    operation: Option<&str>,
    duration_ms: Option<f64>,
    status: RollupStatus,
    metrics: &TraceMetrics,
    color: bool,
) {
    println!(
        "TRACE {} service={} root=\"{}\" duration={} spans={} depth={} errors={} status={}",
        trace_id,
        service.unwrap_or("-"),
        operation.unwrap_or(""),
        fmt_ms(duration_ms),
        metrics.span_count,
        metrics.max_depth,
        metrics.error_count,
        status_label(status, color)
    );
}

fn print_warnings(warnings: &[BuildIssue], color: bool) {
    for issue in warnings {
        if color {
            eprintln!("{} {issue}", "warning:".yellow());
        } else {
            eprintln!("warning: {issue}");
        }
    }
}

fn tree_row_line(row: &RenderRow, color: bool) -> String {
    let marker = match (row.has_children, row.expanded) {
        (false, _) => "•",
        (true, true) => "▾",
        (true, false) => "▸",
    };
    let mut line = span_line(&row.span, row.depth, marker, color);
    if row.has_children && !row.expanded {
        let hidden = format!(" (+{} hidden", row.descendant_count);
        line.push_str(&hidden);
        if row.branch_status == RollupStatus::Error {
            line.push_str(", has errors");
        }
        line.push(')');
    }
    line
}

fn span_line(span: &Span, depth: usize, marker: &str, color: bool) -> String {
    let service = span.service().unwrap_or("-");
    let service = if color {
        service.cyan().to_string()
    } else {
        service.to_string()
    };
    format!(
        "{}{} {} {} ({}) {} [{}]",
        "  ".repeat(depth),
        marker,
        service,
        span.name,
        fmt_ms(span.effective_duration_ms()),
        status_label(span_status(span), color),
        span.span_id
    )
}

fn span_status(span: &Span) -> RollupStatus {
    if span.is_error() {
        RollupStatus::Error
    } else {
        RollupStatus::Ok
    }
}

fn status_label(status: RollupStatus, color: bool) -> String {
    match (status, color) {
        (RollupStatus::Error, true) => status.as_str().red().to_string(),
        (RollupStatus::Ok, true) => status.as_str().green().to_string(),
        (_, false) => status.as_str().to_string(),
    }
}

fn fmt_ms(ms: Option<f64>) -> String {
    match ms {
        Some(ms) if ms.fract() == 0.0 => format!("{ms:.0}ms"),
        Some(ms) => format!("{ms:.3}ms"),
        None => "-".to_string(),
    }
}

fn fmt_ts(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| "-".to_string())
}

fn use_color() -> bool {
    std::io::stdout().is_terminal()
}

#[cfg(test)]
mod tests {
    use testkit::span;

    use super::*;

    #[test]
    fn collapsed_row_reports_hidden_descendants() {
        let mut s = span("t1", "root", None, 0, 1500);
        s.name = "GET /".into();
        let row = RenderRow {
            depth: 1,
            expanded: false,
            has_children: true,
            descendant_count: 4,
            branch_status: RollupStatus::Error,
            span: s,
        };
        assert_eq!(
            tree_row_line(&row, false),
            "  ▸ api GET / (1500ms) OK [root] (+4 hidden, has errors)"
        );
    }

    #[test]
    fn leaf_row_has_no_suffix() {
        let mut s = span("t1", "db", Some("root"), 0, 12);
        s.status_code = Some("ERROR".into());
        let row = RenderRow {
            depth: 0,
            expanded: false,
            has_children: false,
            descendant_count: 0,
            branch_status: RollupStatus::Error,
            span: s,
        };
        assert_eq!(tree_row_line(&row, false), "• api op-db (12ms) ERROR [db]");
    }

    #[test]
    fn durations_drop_empty_fraction() {
        assert_eq!(fmt_ms(Some(12.0)), "12ms");
        assert_eq!(fmt_ms(Some(0.25)), "0.250ms");
        assert_eq!(fmt_ms(None), "-");
    }
}
