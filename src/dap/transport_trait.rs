use super::types::Message;
use crate::Result;
use async_trait::async_trait;

/// Read half of the framed DAP stream. Returns the next well-formed
/// message; an error means the stream is unusable (closed socket, IO
/// failure), not a malformed frame.
#[async_trait]
pub trait DapReader: Send {
    async fn read_message(&mut self) -> Result<Message>;
}

/// Write half of the framed DAP stream.
#[async_trait]
pub trait DapWriter: Send {
    async fn write_message(&mut self, msg: &Message) -> Result<()>;
}
