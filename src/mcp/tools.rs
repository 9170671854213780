//! Tool surface: parses tool-call arguments, forwards to the session
//! engine, and shapes results as JSON. All the debugging logic lives in
//! `debug::*`; this layer is deliberately thin.

use crate::debug::handshake::HandshakeConfig;
use crate::debug::registry::{SessionRegistry, USER_ATTACH_PORT};
use crate::debug::session::{DebugSession, VariableScope, PYTHON};
use crate::process::supervisor::check_python_setup;
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct StartSessionArgs {
    pub script_path: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AttachArgs {
    pub script_path: String,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct SessionArgs {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct BreakpointArgs {
    pub session_id: String,
    pub file: String,
    pub line: i32,
}

#[derive(Debug, Deserialize)]
pub struct ListBreakpointsArgs {
    pub session_id: String,
    pub file: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GetVariablesArgs {
    pub session_id: String,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateArgs {
    pub session_id: String,
    pub expression: String,
}

pub struct ToolsHandler {
    registry: Arc<SessionRegistry>,
}

impl ToolsHandler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn handle_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        match name {
            "start_debug_session" => self.start_debug_session(arguments).await,
            "attach_to_debugpy" => self.attach_to_debugpy(arguments).await,
            "stop_debug_session" => self.stop_debug_session(arguments).await,
            "list_debug_sessions" => self.list_debug_sessions().await,
            "set_breakpoint" => self.set_breakpoint(arguments).await,
            "remove_breakpoint" => self.remove_breakpoint(arguments).await,
            "list_breakpoints" => self.list_breakpoints(arguments).await,
            "debug_continue" => self.step(arguments, StepKind::Continue).await,
            "debug_step_over" => self.step(arguments, StepKind::Over).await,
            "debug_step_in" => self.step(arguments, StepKind::In).await,
            "debug_step_out" => self.step(arguments, StepKind::Out).await,
            "get_variables" => self.get_variables(arguments).await,
            "get_call_stack" => self.get_call_stack(arguments).await,
            "evaluate_expression" => self.evaluate_expression(arguments).await,
            "check_python_setup" => self.check_python_setup().await,
            _ => Err(Error::MethodNotFound(name.to_string())),
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T> {
        serde_json::from_value(arguments)
            .map_err(|e| Error::InvalidRequest(format!("invalid arguments: {e}")))
    }

    /// Expand `~` and verify the target script exists before spending a
    /// subprocess spawn on it.
    fn resolve_script(path: &str) -> Result<String> {
        let expanded = shellexpand::tilde(path).into_owned();
        if !std::path::Path::new(&expanded).is_file() {
            return Err(Error::InvalidRequest(format!(
                "script not found: {expanded}"
            )));
        }
        Ok(expanded)
    }

    async fn start_debug_session(&self, arguments: Value) -> Result<Value> {
        let args: StartSessionArgs = Self::parse(arguments)?;
        let script = Self::resolve_script(&args.script_path)?;
        let cwd = args.cwd.map(|dir| shellexpand::tilde(&dir).into_owned());

        let port = self.registry.allocate_port();
        let session = DebugSession::launch(
            script,
            args.args,
            cwd,
            port,
            self.registry.bus(),
            HandshakeConfig::default(),
        )
        .await?;

        self.registry.insert(session.clone()).await;
        let summary = session.summary().await;
        Ok(json!({
            "session_id": summary.id,
            "script_path": summary.script,
            "port": summary.port,
            "state": summary.state,
        }))
    }

    async fn attach_to_debugpy(&self, arguments: Value) -> Result<Value> {
        let args: AttachArgs = Self::parse(arguments)?;
        let script = Self::resolve_script(&args.script_path)?;
        let port = args.port.unwrap_or(USER_ATTACH_PORT);

        let session = DebugSession::attach(
            script,
            port,
            self.registry.bus(),
            HandshakeConfig::default(),
        )
        .await?;

        self.registry.insert(session.clone()).await;
        let summary = session.summary().await;
        Ok(json!({
            "session_id": summary.id,
            "script_path": summary.script,
            "port": summary.port,
            "state": summary.state,
        }))
    }

    async fn stop_debug_session(&self, arguments: Value) -> Result<Value> {
        let args: SessionArgs = Self::parse(arguments)?;
        self.registry.remove(&args.session_id).await?;
        Ok(json!({
            "session_id": args.session_id,
            "stopped": true,
        }))
    }

    async fn list_debug_sessions(&self) -> Result<Value> {
        let sessions = self.registry.list().await;
        let counts = self.registry.stats().await;
        Ok(json!({
            "sessions": sessions
                .iter()
                .map(|s| json!({
                    "id": s.id,
                    "script": s.script,
                    "state": s.state,
                    "port": s.port,
                }))
                .collect::<Vec<_>>(),
            "counts": counts,
        }))
    }

    async fn set_breakpoint(&self, arguments: Value) -> Result<Value> {
        let args: BreakpointArgs = Self::parse(arguments)?;
        let session = self.registry.get(&args.session_id).await?;
        let bp = session.set_breakpoint(&args.file, args.line).await?;
        Ok(json!({
            "file": bp.file,
            "line": bp.line,
            "verified": bp.verified,
        }))
    }

    async fn remove_breakpoint(&self, arguments: Value) -> Result<Value> {
        let args: BreakpointArgs = Self::parse(arguments)?;
        let session = self.registry.get(&args.session_id).await?;
        session.remove_breakpoint(&args.file, args.line).await?;
        Ok(json!({
            "file": args.file,
            "line": args.line,
            "removed": true,
        }))
    }

    async fn list_breakpoints(&self, arguments: Value) -> Result<Value> {
        let args: ListBreakpointsArgs = Self::parse(arguments)?;
        let session = self.registry.get(&args.session_id).await?;
        let breakpoints = session.list_breakpoints(args.file.as_deref()).await;
        Ok(json!({
            "breakpoints": breakpoints
                .iter()
                .map(|bp| json!({
                    "file": bp.file,
                    "line": bp.line,
                    "verified": bp.verified,
                }))
                .collect::<Vec<_>>(),
        }))
    }

    async fn step(&self, arguments: Value, kind: StepKind) -> Result<Value> {
        let args: SessionArgs = Self::parse(arguments)?;
        let session = self.registry.get(&args.session_id).await?;

        match kind {
            StepKind::Continue => session.continue_execution().await?,
            StepKind::Over => session.step_over().await?,
            StepKind::In => session.step_in().await?,
            StepKind::Out => session.step_out().await?,
        }

        Ok(json!({
            "session_id": args.session_id,
            "resumed": true,
        }))
    }

    async fn get_variables(&self, arguments: Value) -> Result<Value> {
        let args: GetVariablesArgs = Self::parse(arguments)?;
        let scope = match args.scope.as_deref() {
            Some(name) => VariableScope::parse(name)?,
            None => VariableScope::Local,
        };

        let session = self.registry.get(&args.session_id).await?;
        let variables = session.get_variables(scope).await?;
        Ok(json!({
            "variables": variables,
        }))
    }

    async fn get_call_stack(&self, arguments: Value) -> Result<Value> {
        let args: SessionArgs = Self::parse(arguments)?;
        let session = self.registry.get(&args.session_id).await?;
        let frames = session.get_call_stack().await?;
        Ok(json!({
            "frames": frames
                .iter()
                .map(|frame| json!({
                    "name": frame.name,
                    "file": frame.source.as_ref().and_then(|s| s.path.clone()),
                    "line": frame.line,
                }))
                .collect::<Vec<_>>(),
        }))
    }

    async fn evaluate_expression(&self, arguments: Value) -> Result<Value> {
        let args: EvaluateArgs = Self::parse(arguments)?;
        let session = self.registry.get(&args.session_id).await?;
        let outcome = session.evaluate(&args.expression).await?;
        Ok(serde_json::to_value(outcome)?)
    }

    async fn check_python_setup(&self) -> Result<Value> {
        let report = check_python_setup(PYTHON).await;
        Ok(serde_json::to_value(report)?)
    }

    pub fn list_tools() -> Vec<Value> {
        fn tool(name: &str, description: &str, required: &[&str], props: Value) -> Value {
            json!({
                "name": name,
                "description": description,
                "inputSchema": {
                    "type": "object",
                    "properties": props,
                    "required": required,
                },
            })
        }

        let session_prop = json!({"session_id": {"type": "string"}});
        let breakpoint_props = json!({
            "session_id": {"type": "string"},
            "file": {"type": "string"},
            "line": {"type": "integer", "minimum": 1},
        });

        vec![
            tool(
                "start_debug_session",
                "Launch a Python script under the debugger",
                &["script_path"],
                json!({
                    "script_path": {"type": "string"},
                    "args": {"type": "array", "items": {"type": "string"}},
                    "cwd": {"type": "string"},
                }),
            ),
            tool(
                "attach_to_debugpy",
                "Attach to an already-running debugpy listener",
                &["script_path"],
                json!({
                    "script_path": {"type": "string"},
                    "port": {"type": "integer", "default": USER_ATTACH_PORT},
                }),
            ),
            tool(
                "stop_debug_session",
                "Terminate a debug session",
                &["session_id"],
                session_prop.clone(),
            ),
            tool(
                "list_debug_sessions",
                "List active debug sessions with state counts",
                &[],
                json!({}),
            ),
            tool(
                "set_breakpoint",
                "Set a breakpoint at a file and line",
                &["session_id", "file", "line"],
                breakpoint_props.clone(),
            ),
            tool(
                "remove_breakpoint",
                "Remove a breakpoint at a file and line",
                &["session_id", "file", "line"],
                breakpoint_props,
            ),
            tool(
                "list_breakpoints",
                "List breakpoints for a session",
                &["session_id"],
                json!({
                    "session_id": {"type": "string"},
                    "file": {"type": "string"},
                }),
            ),
            tool(
                "debug_continue",
                "Resume execution of the paused program",
                &["session_id"],
                session_prop.clone(),
            ),
            tool(
                "debug_step_over",
                "Step over the current line",
                &["session_id"],
                session_prop.clone(),
            ),
            tool(
                "debug_step_in",
                "Step into the call on the current line",
                &["session_id"],
                session_prop.clone(),
            ),
            tool(
                "debug_step_out",
                "Step out of the current function",
                &["session_id"],
                session_prop.clone(),
            ),
            tool(
                "get_variables",
                "Inspect variables in the current frame",
                &["session_id"],
                json!({
                    "session_id": {"type": "string"},
                    "scope": {"type": "string", "enum": ["local", "global", "all"], "default": "local"},
                }),
            ),
            tool(
                "get_call_stack",
                "Get the call stack of the paused thread",
                &["session_id"],
                session_prop.clone(),
            ),
            tool(
                "evaluate_expression",
                "Evaluate an expression in the current frame",
                &["session_id", "expression"],
                json!({
                    "session_id": {"type": "string"},
                    "expression": {"type": "string"},
                }),
            ),
            tool(
                "check_python_setup",
                "Report interpreter and debugpy availability",
                &[],
                json!({}),
            ),
        ]
    }
}

enum StepKind {
    Continue,
    Over,
    In,
    Out,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    fn handler() -> ToolsHandler {
        ToolsHandler::new(Arc::new(SessionRegistry::new(Arc::new(EventBus::new()))))
    }

    #[tokio::test]
    async fn test_unknown_tool_name() {
        let result = handler().handle_tool("bogus", json!({})).await;
        assert!(matches!(result, Err(Error::MethodNotFound(_))));
    }

    #[tokio::test]
    async fn test_start_with_missing_script_is_invalid_params() {
        let result = handler()
            .handle_tool(
                "start_debug_session",
                json!({"script_path": "/definitely/not/there.py"}),
            )
            .await;
        match result {
            Err(Error::InvalidRequest(msg)) => assert!(msg.contains("script not found")),
            other => panic!("Expected InvalidRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_with_missing_required_arg() {
        let result = handler()
            .handle_tool("start_debug_session", json!({}))
            .await;
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_breakpoint_on_unknown_session() {
        let result = handler()
            .handle_tool(
                "set_breakpoint",
                json!({"session_id": "nope", "file": "/t/a.py", "line": 3}),
            )
            .await;
        assert!(matches!(result, Err(Error::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_get_variables_rejects_unknown_scope() {
        let registry = Arc::new(SessionRegistry::new(Arc::new(EventBus::new())));
        let handler = ToolsHandler::new(registry);
        let result = handler
            .handle_tool(
                "get_variables",
                json!({"session_id": "nope", "scope": "registers"}),
            )
            .await;
        match result {
            Err(Error::InvalidRequest(msg)) => assert!(msg.contains("unknown scope")),
            other => panic!("Expected InvalidRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_attach_with_real_script_but_dead_port_is_not_a_path_error() {
        // An existing script gets past argument validation; the failure
        // comes from the connect attempt instead.
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("prog.py");
        std::fs::write(&script, "print('hi')\n").unwrap();

        let result = handler()
            .handle_tool(
                "attach_to_debugpy",
                json!({"script_path": script.to_str().unwrap(), "port": 1}),
            )
            .await;

        match result {
            Err(Error::InvalidRequest(msg)) => {
                panic!("path validation should have passed: {msg}")
            }
            Err(_) => {}
            Ok(_) => panic!("attach to a dead port cannot succeed"),
        }
    }

    #[tokio::test]
    async fn test_list_sessions_empty() {
        let result = handler()
            .handle_tool("list_debug_sessions", json!({}))
            .await
            .unwrap();
        assert!(result["sessions"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_every_tool_has_a_schema() {
        let tools = ToolsHandler::list_tools();
        assert_eq!(tools.len(), 15);
        for tool in tools {
            assert!(tool["name"].is_string());
            assert!(tool["description"].is_string());
            assert_eq!(tool["inputSchema"]["type"], "object");
        }
    }
}
