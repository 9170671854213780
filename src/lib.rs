pub mod bus;
pub mod dap;
pub mod debug;
pub mod error;
pub mod mcp;
pub mod process;

pub use error::Error;
pub use mcp::McpServer;

pub type Result<T> = std::result::Result<T, Error>;

use bus::EventBus;
use debug::SessionRegistry;
use std::sync::Arc;
use tracing::info;

/// Serve tool calls on stdio until the input stream ends or a shutdown
/// signal arrives, then terminate every session before returning.
pub async fn serve() -> Result<()> {
    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(SessionRegistry::new(bus));
    let server = McpServer::new(registry.clone());

    let outcome = tokio::select! {
        result = server.run() => result,
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
    };

    registry.shutdown_all().await;
    outcome
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
}
