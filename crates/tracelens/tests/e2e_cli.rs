use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::Duration;

use serde_json::Value;
use serial_test::serial;
use testkit::{cyclic_trace, sample_records};

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_tracelens")
}

fn command(temp: &Path) -> Command {
    let mut cmd = Command::new(bin());
    cmd.env("TRACELENS_CONFIG", temp.join("absent.toml"))
        .env_remove("TRACELENS_UPSTREAM_URL")
        .env_remove("TRACELENS_DB_PATH");
    cmd
}

fn write_span_file(temp: &Path) -> PathBuf {
    let mut records = sample_records("t1");
    records.extend(
        cyclic_trace("cyc")
            .into_iter()
            .map(|span| serde_json::to_value(span).unwrap()),
    );
    let path = temp.join("spans.json");
    std::fs::write(&path, serde_json::to_vec(&records).unwrap()).unwrap();
    path
}

fn import(temp: &Path, file: &Path) -> Output {
    command(temp)
        .arg("import")
        .arg(file)
        .arg("--db-path")
        .arg(temp.join("tracelens.duckdb"))
        .output()
        .unwrap()
}

fn spawn_server(temp: &Path) -> (Child, u16, u16) {
    let query_port = free_port();
    let http_port = free_port();

    let child = command(temp)
        .arg("serve")
        .arg("--db-path")
        .arg(temp.join("tracelens.duckdb"))
        .arg("--query-tcp-addr")
        .arg(format!("127.0.0.1:{query_port}"))
        .arg("--query-http-addr")
        .arg(format!("127.0.0.1:{http_port}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    (child, query_port, http_port)
}

async fn wait_http_ready(port: u16, child: &mut Child) {
    let client = reqwest::Client::new();
    let mut ready = false;
    for _ in 0..100 {
        assert!(child.try_wait().unwrap().is_none(), "tracelens exited early");
        if client
            .get(format!("http://127.0.0.1:{port}/healthz"))
            .send()
            .await
            .is_ok()
        {
            ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(ready, "query endpoint not ready");
}

fn run_cli(temp: &Path, query_port: u16, args: &[&str]) -> Output {
    command(temp)
        .args(args)
        .arg("--addr")
        .arg(format!("127.0.0.1:{query_port}"))
        .output()
        .unwrap()
}

#[tokio::test]
#[serial]
async fn e2e_import_then_query_over_tcp() {
    let temp = tempfile::tempdir().unwrap();
    let file = write_span_file(temp.path());

    let imported = import(temp.path(), &file);
    assert!(imported.status.success());
    let stdout = String::from_utf8_lossy(&imported.stdout);
    assert!(stdout.contains("imported 7 new spans"), "{stdout}");

    let (mut child, query_port, http_port) = spawn_server(temp.path());
    wait_http_ready(http_port, &mut child).await;

    let tree = run_cli(temp.path(), query_port, &["trace", "t1", "--expand-all"]);
    let stdout = String::from_utf8_lossy(&tree.stdout);
    assert!(stdout.contains("TRACE t1"), "{stdout}");
    assert!(stdout.contains("root=\"GET /v1/orders\""));
    assert!(stdout.contains("status=ERROR"));
    assert!(stdout.contains("[cache]"));

    let collapsed = run_cli(temp.path(), query_port, &["trace", "t1"]);
    let stdout = String::from_utf8_lossy(&collapsed.stdout);
    assert!(stdout.contains("(+2 hidden, has errors)"), "{stdout}");
    assert!(!stdout.contains("[db]"));

    let cyclic = run_cli(temp.path(), query_port, &["trace", "cyc", "--expand-all"]);
    assert!(cyclic.status.success());
    let stderr = String::from_utf8_lossy(&cyclic.stderr);
    assert!(stderr.contains("warning: parent cycle"), "{stderr}");

    let spans = run_cli(
        temp.path(),
        query_port,
        &["--json", "spans", "t1", "--sort", "duration_ms", "--desc"],
    );
    let value: Value = serde_json::from_slice(&spans.stdout).unwrap();
    assert_eq!(value["ListView"]["rows"][0]["span_id"], "root");
    assert_eq!(value["ListView"]["total"], 3);

    let traces = run_cli(temp.path(), query_port, &["traces"]);
    let stdout = String::from_utf8_lossy(&traces.stdout);
    assert!(stdout.contains("-- 2 of 2 traces --"), "{stdout}");

    let status = run_cli(temp.path(), query_port, &["--json", "status"]);
    let value: Value = serde_json::from_slice(&status.stdout).unwrap();
    assert_eq!(value["Status"]["spans_count"], 7);
    assert_eq!(value["Status"]["traces_count"], 2);

    let missing = run_cli(temp.path(), query_port, &["trace", "nope"]);
    assert!(!missing.status.success());
    let stderr = String::from_utf8_lossy(&missing.stderr);
    assert!(stderr.contains("not_found"), "{stderr}");

    let _ = child.kill();
    let _ = child.wait();
}

#[tokio::test]
#[serial]
async fn e2e_http_query_api() {
    let temp = tempfile::tempdir().unwrap();
    let file = write_span_file(temp.path());
    assert!(import(temp.path(), &file).status.success());

    let (mut child, _query_port, http_port) = spawn_server(temp.path());
    wait_http_ready(http_port, &mut child).await;
    let client = reqwest::Client::new();

    let tree: Value = client
        .get(format!("http://127.0.0.1:{http_port}/v1/traces/t1/tree?all=true"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tree["rows"].as_array().unwrap().len(), 3);
    assert_eq!(tree["metrics"]["error_count"], 1);

    let missing = client
        .get(format!("http://127.0.0.1:{http_port}/v1/traces/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    let listed: Value = client
        .get(format!("http://127.0.0.1:{http_port}/v1/traces?service_name=api"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["total"], 2);

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
#[serial]
fn import_rejects_malformed_records() {
    let temp = tempfile::tempdir().unwrap();
    let file = temp.path().join("bad.json");
    std::fs::write(&file, r#"[{"trace_id":"t1","name":"no id"}]"#).unwrap();

    let output = import(temp.path(), &file);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("malformed span"), "{stderr}");
}

#[test]
fn status_without_server_fails_cleanly() {
    let temp = tempfile::tempdir().unwrap();
    let output = command(temp.path())
        .arg("status")
        .arg("--addr")
        .arg("127.0.0.1:1")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("connect query server"), "{stderr}");
}
