pub mod handshake;
pub mod registry;
pub mod session;
pub mod state;

pub use registry::SessionRegistry;
pub use session::DebugSession;
pub use state::SessionState;
