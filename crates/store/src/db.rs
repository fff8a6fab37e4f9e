use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::Connection;
use tracelens_core::error::{Result, TraceError};
use tracelens_core::model::span::Span;
use tracelens_core::model::trace::TraceSummary;
use tracelens_core::query::{StatusResponse, TraceFilter};
use tracelens_core::store::TraceStore;

use crate::schema::SCHEMA_SQL;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| TraceError::Io(format!("failed to create db dir: {e}")))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| TraceError::Store(format!("failed to open duckdb: {e}")))?;
        conn.execute_batch("PRAGMA threads=4;")
            .map_err(|e| TraceError::Store(format!("failed to set pragmas: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| TraceError::Store(format!("failed to initialize schema: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.display().to_string(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TraceError::Store(format!("failed to open in-memory db: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| TraceError::Store(format!("failed to initialize schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: ":memory:".to_string(),
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TraceError::Internal("store mutex poisoned".to_string()))
    }

    pub fn status(&self) -> Result<StatusResponse> {
        let conn = self.conn()?;

        let spans_count = scalar_usize(&conn, "SELECT COUNT(*) FROM spans")?;
        let traces_count = scalar_usize(&conn, "SELECT COUNT(DISTINCT trace_id) FROM spans")?;
        let oldest_ts = scalar_ts(&conn, "SELECT MIN(start_ts) FROM spans")?;
        let newest_ts = scalar_ts(&conn, "SELECT MAX(start_ts) FROM spans")?;

        Ok(StatusResponse {
            backend: format!("duckdb:{}", self.db_path),
            spans_count: Some(spans_count),
            traces_count: Some(traces_count),
            oldest_ts,
            newest_ts,
        })
    }

    /// Runs a blocking store call on tokio's blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Store) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| TraceError::Internal(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl TraceStore for Store {
    async fn fetch_spans(&self, trace_id: &str) -> Result<Vec<Span>> {
        let trace_id = trace_id.to_string();
        self.blocking(move |store| store.fetch_trace_spans(&trace_id))
            .await
    }

    async fn fetch_summaries(&self, filter: &TraceFilter) -> Result<(Vec<TraceSummary>, usize)> {
        let filter = filter.clone();
        self.blocking(move |store| store.list_summaries(&filter))
            .await
    }

    async fn status(&self) -> Result<StatusResponse> {
        self.blocking(|store| store.status()).await
    }
}

fn scalar_usize(conn: &Connection, sql: &str) -> Result<usize> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|v| v as usize)
        .map_err(|e| TraceError::Store(format!("query failed: {e}")))
}

fn scalar_ts(conn: &Connection, sql: &str) -> Result<Option<DateTime<Utc>>> {
    conn.query_row(sql, [], |row| row.get::<_, Option<NaiveDateTime>>(0))
        .map(|opt| opt.map(|dt| dt.and_utc()))
        .map_err(|e| TraceError::Store(format!("query failed: {e}")))
}
