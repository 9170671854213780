use super::protocol::JsonRpcMessage;
use crate::Result;
use async_trait::async_trait;

/// Seam over the stdio JSON-RPC stream so tests can script the client side.
#[async_trait]
pub trait McpTransportTrait: Send {
    async fn read_message(&mut self) -> Result<JsonRpcMessage>;
    async fn write_message(&mut self, msg: &JsonRpcMessage) -> Result<()>;
}
