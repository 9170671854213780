use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Python setup error: {0}")]
    PythonSetup(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("DAP error: {0}")]
    Dap(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::SessionNotFound(_) => -32001,
            Error::PythonSetup(_) => -32002,
            Error::Dap(_) => -32003,
            Error::Process(_) => -32004,
            Error::Transport(_) => -32005,
            Error::Timeout(_) => -32006,
            Error::InvalidRequest(_) => -32602,
            Error::MethodNotFound(_) => -32601,
            Error::Internal(_) | Error::Io(_) | Error::Json(_) => -32603,
        }
    }

    /// A pending request that will never complete because the socket (or the
    /// whole session) went away.
    pub fn disconnected(context: &str) -> Self {
        Error::Transport(format!("disconnected: {context}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::SessionNotFound("x".into()).error_code(), -32001);
        assert_eq!(Error::PythonSetup("x".into()).error_code(), -32002);
        assert_eq!(Error::InvalidRequest("x".into()).error_code(), -32602);
        assert_eq!(Error::MethodNotFound("x".into()).error_code(), -32601);
        assert_eq!(Error::Internal("x".into()).error_code(), -32603);
        assert_eq!(Error::Timeout("x".into()).error_code(), -32006);
    }

    #[test]
    fn test_disconnected_is_transport() {
        let err = Error::disconnected("terminate requested");
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.to_string().contains("terminate requested"));
    }
}
