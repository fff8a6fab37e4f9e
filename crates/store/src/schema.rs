pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS spans (
  trace_id TEXT NOT NULL,
  span_id TEXT NOT NULL,
  parent_span_id TEXT,
  name TEXT NOT NULL,
  kind TEXT,
  service TEXT,
  start_ts TIMESTAMP,
  end_ts TIMESTAMP,
  duration_ms DOUBLE,
  status_code TEXT,
  status_message TEXT,
  attrs_json TEXT NOT NULL,
  events_json TEXT NOT NULL,
  links_json TEXT NOT NULL,
  experiment_id TEXT,
  run_id TEXT,
  PRIMARY KEY(trace_id, span_id)
);

CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans(trace_id);
CREATE INDEX IF NOT EXISTS idx_spans_service_start ON spans(service, start_ts);
CREATE INDEX IF NOT EXISTS idx_spans_experiment ON spans(experiment_id);
CREATE INDEX IF NOT EXISTS idx_spans_run ON spans(run_id);
"#;
