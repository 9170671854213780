//! Line-based JSON-RPC over stdio.
//!
//! One message per line terminated by `\n` — deliberately not the DAP/LSP
//! `Content-Length` framing used on the adapter side of this process.

use super::protocol::JsonRpcMessage;
use super::transport_trait::McpTransportTrait;
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

pub struct StdioTransport {
    stdin: BufReader<tokio::io::Stdin>,
    stdout: tokio::io::Stdout,
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            stdin: BufReader::new(tokio::io::stdin()),
            stdout: tokio::io::stdout(),
        }
    }

    pub async fn read_message(&mut self) -> Result<JsonRpcMessage> {
        loop {
            let mut line = String::new();
            let bytes_read = self.stdin.read_line(&mut line).await?;

            if bytes_read == 0 {
                return Err(Error::Transport("stdin closed".to_string()));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            trace!("reading tool-call message: {} bytes", trimmed.len());
            let msg: JsonRpcMessage = serde_json::from_str(trimmed)?;
            return Ok(msg);
        }
    }

    pub async fn write_message(&mut self, msg: &JsonRpcMessage) -> Result<()> {
        let content = serde_json::to_string(msg)?;
        debug!("sending: {}", content);

        self.stdout.write_all(content.as_bytes()).await?;
        self.stdout.write_all(b"\n").await?;
        self.stdout.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl McpTransportTrait for StdioTransport {
    async fn read_message(&mut self) -> Result<JsonRpcMessage> {
        StdioTransport::read_message(self).await
    }

    async fn write_message(&mut self, msg: &JsonRpcMessage) -> Result<()> {
        StdioTransport::write_message(self, msg).await
    }
}
