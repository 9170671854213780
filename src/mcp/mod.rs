pub mod protocol;
pub mod tools;
pub mod transport;
pub mod transport_trait;

use crate::debug::SessionRegistry;
use crate::{Error, Result};
use protocol::ProtocolHandler;
use std::sync::Arc;
use tools::ToolsHandler;
use tracing::{error, info};
use transport::StdioTransport;

pub struct McpServer {
    transport: StdioTransport,
    handler: ProtocolHandler,
}

impl McpServer {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        info!("initializing tool-call server");
        let tools_handler = Arc::new(ToolsHandler::new(registry));
        Self {
            transport: StdioTransport::new(),
            handler: ProtocolHandler::new(tools_handler),
        }
    }

    /// Serve tool calls until stdin closes. Per-request failures are
    /// answered as JSON-RPC errors and never take the server down.
    pub async fn run(mut self) -> Result<()> {
        info!("serving tool calls on stdio");

        loop {
            match self.transport.read_message().await {
                Ok(msg) => {
                    if let Some(reply) = self.handler.handle_message(msg).await {
                        if let Err(e) = self.transport.write_message(&reply).await {
                            error!("failed to write response: {}", e);
                            return Err(e);
                        }
                    }
                }
                Err(Error::Json(e)) => {
                    // Unparseable input line: log and keep serving.
                    error!("ignoring malformed input line: {}", e);
                }
                Err(e) => {
                    info!("input stream ended: {}", e);
                    return Ok(());
                }
            }
        }
    }
}
