use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};
use crate::query::DEFAULT_PAGE_SIZE;

pub const DEFAULT_NORMALIZE_MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub query_tcp_addr: String,
    pub query_http_addr: String,
    pub upstream_url: Option<String>,
    pub fetch_timeout: Duration,
    pub normalize_max_depth: usize,
    pub default_page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_root = env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home).join(".local/share"));

        Self {
            db_path: data_root.join("tracelens/tracelens.duckdb"),
            query_tcp_addr: "127.0.0.1:1787".to_string(),
            query_http_addr: "127.0.0.1:1788".to_string(),
            upstream_url: None,
            fetch_timeout: Duration::from_secs(10),
            normalize_max_depth: DEFAULT_NORMALIZE_MAX_DEPTH,
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(file_overrides) = load_file_overrides(&config_file_path())? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    db_path: Option<PathBuf>,
    query_tcp_addr: Option<String>,
    query_http_addr: Option<String>,
    upstream_url: Option<String>,
    fetch_timeout: Option<String>,
    normalize_max_depth: Option<usize>,
    default_page_size: Option<usize>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("TRACELENS_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("tracelens/config.toml")
}

fn load_file_overrides(path: &Path) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| TraceError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| TraceError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    Ok(ConfigOverrides {
        db_path: env::var("TRACELENS_DB_PATH").ok().map(PathBuf::from),
        query_tcp_addr: env::var("TRACELENS_QUERY_TCP_ADDR").ok(),
        query_http_addr: env::var("TRACELENS_QUERY_HTTP_ADDR").ok(),
        upstream_url: env::var("TRACELENS_UPSTREAM_URL").ok(),
        fetch_timeout: env::var("TRACELENS_FETCH_TIMEOUT").ok(),
        normalize_max_depth: env_usize("TRACELENS_NORMALIZE_MAX_DEPTH")?,
        default_page_size: env_usize("TRACELENS_DEFAULT_PAGE_SIZE")?,
    })
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match env::var(name) {
        Ok(v) => v
            .parse::<usize>()
            .map(Some)
            .map_err(|e| TraceError::Config(format!("bad {name} in environment: {e}"))),
        Err(_) => Ok(None),
    }
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.query_tcp_addr {
        cfg.query_tcp_addr = v;
    }
    if let Some(v) = overrides.query_http_addr {
        cfg.query_http_addr = v;
    }
    if let Some(v) = overrides.upstream_url {
        let v = v.trim().trim_end_matches('/').to_string();
        cfg.upstream_url = (!v.is_empty()).then_some(v);
    }
    if let Some(v) = overrides.fetch_timeout {
        cfg.fetch_timeout = humantime::parse_duration(&v).map_err(|e| {
            TraceError::Config(format!("bad fetch_timeout in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.normalize_max_depth {
        if v == 0 {
            return Err(TraceError::Config(format!(
                "normalize_max_depth in {source} must be at least 1"
            )));
        }
        cfg.normalize_max_depth = v;
    }
    if let Some(v) = overrides.default_page_size {
        cfg.default_page_size = v;
    }
    Ok(())
}
