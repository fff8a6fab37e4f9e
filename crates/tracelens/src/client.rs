use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::protocol::{ApiRequest, ApiResponse};

pub const DEFAULT_QUERY_TCP_ADDR: &str = "127.0.0.1:1787";

pub struct QueryClient {
    stream: BufReader<TcpStream>,
}

impl QueryClient {
    pub async fn connect(addr: Option<String>) -> anyhow::Result<Self> {
        let addr = resolve_addr(addr);
        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("connect query server TCP {addr} (is `tracelens serve` running?)"))?;
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    pub async fn request(&mut self, req: ApiRequest) -> anyhow::Result<ApiResponse> {
        let payload = serde_json::to_vec(&req)?;
        self.stream.get_mut().write_all(&payload).await?;
        self.stream.get_mut().write_all(b"\n").await?;
        self.stream.get_mut().flush().await?;

        let mut line = String::new();
        let n = self.stream.read_line(&mut line).await?;
        if n == 0 {
            anyhow::bail!("query server closed the connection without a response");
        }
        serde_json::from_str(&line).context("decode query server response")
    }
}

fn resolve_addr(addr: Option<String>) -> String {
    addr.or_else(|| std::env::var("TRACELENS_QUERY_TCP_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_QUERY_TCP_ADDR.to_string())
}
