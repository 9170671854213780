//! Debug session lifecycle and operations.
//!
//! One `DebugSession` owns one DAP client (and, for owned sessions, the
//! debuggee subprocess). Adapter events flow through the client's router
//! into the session context; operations validate their preconditions
//! against that context before touching the wire.

use super::handshake::{self, HandshakeConfig};
use super::state::{Breakpoint, SessionContext, SessionState};
use crate::bus::{DebugEvent, EventBus, OutputChannel, SourceLocation};
use crate::dap::client::DapClient;
use crate::dap::router::AdapterEvent;
use crate::dap::types::StackFrame;
use crate::process::supervisor::{classify_line, probe_debugpy, ProcessSupervisor};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const PYTHON: &str = "python3";

/// Connect budget after spawning the adapter ourselves.
const CONNECT_BUDGET_SPAWNED: Duration = Duration::from_secs(10);
/// Single connect attempt against a user-started adapter.
const CONNECT_DEADLINE_ATTACH: Duration = Duration::from_secs(5);
/// Attempts to fetch the stack after a `stopped` event (1 try + retries).
const STACK_FETCH_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableScope {
    Local,
    Global,
    All,
}

impl VariableScope {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "local" => Ok(VariableScope::Local),
            "global" => Ok(VariableScope::Global),
            "all" => Ok(VariableScope::All),
            other => Err(Error::InvalidRequest(format!(
                "unknown scope '{other}' (expected local, global or all)"
            ))),
        }
    }

    /// Case-insensitive substring match against the adapter's scope name
    /// ("Locals", "Globals"). Adapter-dependent: non-Python adapters may
    /// name scopes differently.
    fn matches(&self, scope_name: &str) -> bool {
        let lowered = scope_name.to_ascii_lowercase();
        match self {
            VariableScope::Local => lowered.contains("local"),
            VariableScope::Global => lowered.contains("global"),
            VariableScope::All => true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableInfo {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub scope: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub script: String,
    pub state: String,
    pub port: u16,
}

pub struct DebugSession {
    pub id: String,
    pub script: String,
    pub port: u16,
    client: Arc<DapClient>,
    supervisor: Option<ProcessSupervisor>,
    context: Arc<RwLock<SessionContext>>,
    bus: Arc<EventBus>,
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("id", &self.id)
            .field("script", &self.script)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl DebugSession {
    /// Owned mode: probe debugpy, spawn the interpreter in listen-and-wait
    /// mode, connect, handshake. A handshake failure tears everything down
    /// before the error propagates.
    pub async fn launch(
        script: String,
        args: Vec<String>,
        cwd: Option<String>,
        port: u16,
        bus: Arc<EventBus>,
        config: HandshakeConfig,
    ) -> Result<Arc<Self>> {
        probe_debugpy(PYTHON).await?;

        let workspace = match &cwd {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()
                .map_err(|e| Error::Internal(format!("cannot determine cwd: {e}")))?,
        };

        let id = Uuid::new_v4().to_string();
        let supervisor = ProcessSupervisor::spawn(
            PYTHON,
            &script,
            &args,
            Some(workspace.as_path()),
            &HashMap::new(),
            port,
            &id,
            bus.clone(),
        )
        .await?;

        let client = match DapClient::connect_with_retry(port, CONNECT_BUDGET_SPAWNED).await {
            Ok(client) => client,
            Err(e) => {
                let _ = supervisor.terminate().await;
                return Err(e);
            }
        };

        let session = Self::from_parts(id, script, port, client, Some(supervisor), bus);
        session.wire_events().await;
        session
            .complete_start(&workspace.to_string_lossy(), &config)
            .await?;
        Ok(session)
    }

    /// Attach-only mode: the adapter is already listening (user-started
    /// process); a single connect attempt, then the same handshake.
    pub async fn attach(
        script: String,
        port: u16,
        bus: Arc<EventBus>,
        config: HandshakeConfig,
    ) -> Result<Arc<Self>> {
        let client = DapClient::connect(port, CONNECT_DEADLINE_ATTACH).await?;
        let workspace = std::env::current_dir()
            .map_err(|e| Error::Internal(format!("cannot determine cwd: {e}")))?;

        let id = Uuid::new_v4().to_string();
        let session = Self::from_parts(id, script, port, client, None, bus);
        session.wire_events().await;
        session
            .complete_start(&workspace.to_string_lossy(), &config)
            .await?;
        Ok(session)
    }

    fn from_parts(
        id: String,
        script: String,
        port: u16,
        client: DapClient,
        supervisor: Option<ProcessSupervisor>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            script,
            port,
            client: Arc::new(client),
            supervisor,
            context: Arc::new(RwLock::new(SessionContext::new())),
            bus,
        })
    }

    async fn complete_start(&self, workspace_root: &str, config: &HandshakeConfig) -> Result<()> {
        match handshake::run(&self.client, workspace_root, config).await {
            Ok(outcome) => {
                {
                    let mut ctx = self.context.write().await;
                    ctx.current_thread_id = outcome.thread_id;
                    ctx.current_frame_id = outcome.frame_id;
                    ctx.current_location = outcome.location;
                    ctx.set_state(SessionState::Running);
                }
                info!("session {} running ({})", self.id, self.script);
                self.bus.publish(DebugEvent::SessionStarted {
                    session_id: self.id.clone(),
                    script: self.script.clone(),
                    port: self.port,
                });
                Ok(())
            }
            Err(e) => {
                warn!("session {} handshake failed: {}", self.id, e);
                {
                    let mut ctx = self.context.write().await;
                    ctx.fail(e.to_string());
                }
                self.teardown("handshake failed").await;
                Err(e)
            }
        }
    }

    /// Register adapter event handlers. Event-driven transitions for one
    /// session are serialized by the context lock; handlers never override
    /// a terminal state. Handlers hold a weak reference: the client lives
    /// inside the session, and a strong capture would cycle.
    async fn wire_events(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.client
            .on_event("stopped", move |event| {
                let Some(session) = weak.upgrade() else { return };
                if let AdapterEvent::Stopped {
                    reason,
                    thread_id,
                    hit_breakpoint_ids,
                } = event
                {
                    tokio::spawn(async move {
                        session
                            .handle_stopped(reason, thread_id.unwrap_or(1), hit_breakpoint_ids)
                            .await;
                    });
                }
            })
            .await;

        let weak = Arc::downgrade(self);
        self.client
            .on_event("continued", move |_event| {
                let Some(session) = weak.upgrade() else { return };
                tokio::spawn(async move {
                    {
                        let mut ctx = session.context.write().await;
                        ctx.set_state(SessionState::Running);
                        ctx.current_frame_id = None;
                        ctx.current_location = None;
                    }
                    session.bus.publish(DebugEvent::Resumed {
                        session_id: session.id.clone(),
                    });
                });
            })
            .await;

        let weak = Arc::downgrade(self);
        self.client
            .on_event("terminated", move |_event| {
                let Some(session) = weak.upgrade() else { return };
                tokio::spawn(async move {
                    session.mark_stopped("terminated by adapter").await;
                });
            })
            .await;

        let weak = Arc::downgrade(self);
        self.client
            .on_event("exited", move |event| {
                let Some(session) = weak.upgrade() else { return };
                if let AdapterEvent::Exited { exit_code } = event {
                    tokio::spawn(async move {
                        session.mark_stopped("debuggee exited").await;
                        session.bus.publish(DebugEvent::ProcessExited {
                            session_id: session.id.clone(),
                            exit_code: Some(exit_code),
                            normal: exit_code == 0,
                        });
                    });
                }
            })
            .await;

        let weak = Arc::downgrade(self);
        self.client
            .on_event("output", move |event| {
                let Some(session) = weak.upgrade() else { return };
                if let AdapterEvent::Output { category, output } = event {
                    for line in output.lines() {
                        let line = line.trim_end();
                        if line.is_empty() {
                            continue;
                        }
                        let channel = if category == "stderr"
                            || classify_line(line) == OutputChannel::Error
                        {
                            OutputChannel::Error
                        } else {
                            OutputChannel::Normal
                        };
                        session.bus.publish(DebugEvent::ProgramOutput {
                            session_id: session.id.clone(),
                            channel,
                            line: line.to_string(),
                        });
                    }
                }
            })
            .await;

        // Informational events and anything unknown: forward raw.
        for name in ["thread", "module", "breakpoint"] {
            let weak = Arc::downgrade(self);
            self.client
                .on_event(name, move |event| {
                    let Some(session) = weak.upgrade() else { return };
                    session.forward_raw(event);
                })
                .await;
        }
        let weak = Arc::downgrade(self);
        self.client
            .on_event("*", move |event| {
                let Some(session) = weak.upgrade() else { return };
                if matches!(event, AdapterEvent::Unknown { .. }) {
                    session.forward_raw(event);
                }
            })
            .await;

        let weak = Arc::downgrade(self);
        self.client
            .on_disconnect(move || {
                let Some(session) = weak.upgrade() else { return };
                tokio::spawn(async move {
                    session.mark_stopped("adapter socket closed").await;
                });
            })
            .await;
    }

    fn forward_raw(&self, event: AdapterEvent) {
        let (name, body) = match event {
            AdapterEvent::Thread { body } => ("thread".to_string(), body),
            AdapterEvent::Module { body } => ("module".to_string(), body),
            AdapterEvent::Breakpoint { body } => ("breakpoint".to_string(), body),
            AdapterEvent::Unknown { event, body } => (event, body),
            _ => return,
        };
        self.bus.publish(DebugEvent::Adapter {
            session_id: self.id.clone(),
            event: name,
            body,
        });
    }

    async fn handle_stopped(&self, reason: String, thread_id: i32, hit_breakpoint_ids: Vec<i32>) {
        {
            let mut ctx = self.context.write().await;
            if ctx.state.is_terminal() {
                return;
            }
            ctx.set_state(SessionState::Paused);
            ctx.current_thread_id = Some(thread_id);
        }

        let location = match self.fetch_top_frame(thread_id).await {
            Some(top) => {
                let location = SourceLocation {
                    name: top.name.clone(),
                    path: top.source.as_ref().and_then(|s| s.path.clone()),
                    line: top.line,
                };
                let mut ctx = self.context.write().await;
                ctx.current_frame_id = Some(top.id);
                ctx.current_location = Some(location.clone());
                Some(location)
            }
            None => None,
        };

        self.bus.publish(DebugEvent::Paused {
            session_id: self.id.clone(),
            reason,
            thread_id,
            location,
            hit_breakpoint_ids,
        });
    }

    async fn fetch_top_frame(&self, thread_id: i32) -> Option<StackFrame> {
        for attempt in 1..=STACK_FETCH_ATTEMPTS {
            match self.client.stack_trace(thread_id).await {
                Ok(frames) => return frames.into_iter().next(),
                Err(e) => {
                    debug!(
                        "stack fetch attempt {}/{} failed: {}",
                        attempt, STACK_FETCH_ATTEMPTS, e
                    );
                }
            }
        }
        None
    }

    async fn mark_stopped(&self, why: &str) {
        let changed = {
            let mut ctx = self.context.write().await;
            if ctx.state.is_terminal() {
                false
            } else {
                ctx.set_state(SessionState::Stopped);
                true
            }
        };
        if changed {
            debug!("session {} stopped: {}", self.id, why);
            self.bus.publish(DebugEvent::StateChanged {
                session_id: self.id.clone(),
                state: SessionState::Stopped.as_str().to_string(),
            });
        }
    }

    // === Operations ===

    pub async fn state(&self) -> SessionState {
        self.context.read().await.state
    }

    pub async fn summary(&self) -> SessionSummary {
        let ctx = self.context.read().await;
        SessionSummary {
            id: self.id.clone(),
            script: self.script.clone(),
            state: ctx.state.as_str().to_string(),
            port: self.port,
        }
    }

    async fn ensure_open(&self) -> Result<()> {
        let ctx = self.context.read().await;
        if ctx.state.is_terminal() {
            Err(Error::InvalidRequest(format!(
                "session is {} and accepts no further operations",
                ctx.state
            )))
        } else {
            Ok(())
        }
    }

    /// Set a breakpoint. The server owns the desired line set per file and
    /// always sends the full list; the adapter owns verification and ids.
    pub async fn set_breakpoint(&self, file: &str, line: i32) -> Result<Breakpoint> {
        if line < 1 {
            return Err(Error::InvalidRequest(format!(
                "line must be >= 1, got {line}"
            )));
        }
        self.ensure_open().await?;

        let lines = self.context.read().await.lines_with(file, line);
        let reply = self.client.set_breakpoints(file, &lines).await?;

        let entry = {
            let mut ctx = self.context.write().await;
            ctx.record_breakpoints(file, &lines, &reply);
            ctx.breakpoints_for(file)
                .into_iter()
                .find(|bp| bp.line == line)
        };

        self.bus.publish(DebugEvent::BreakpointsChanged {
            session_id: self.id.clone(),
            path: file.to_string(),
        });

        entry.ok_or_else(|| {
            Error::Internal(format!("breakpoint for {file}:{line} missing after update"))
        })
    }

    pub async fn remove_breakpoint(&self, file: &str, line: i32) -> Result<()> {
        self.ensure_open().await?;

        let lines = self.context.read().await.lines_without(file, line);
        let reply = self.client.set_breakpoints(file, &lines).await?;

        {
            let mut ctx = self.context.write().await;
            ctx.record_breakpoints(file, &lines, &reply);
        }

        self.bus.publish(DebugEvent::BreakpointsChanged {
            session_id: self.id.clone(),
            path: file.to_string(),
        });
        Ok(())
    }

    pub async fn list_breakpoints(&self, file: Option<&str>) -> Vec<Breakpoint> {
        let ctx = self.context.read().await;
        match file {
            Some(file) => ctx.breakpoints_for(file),
            None => ctx.all_breakpoints(),
        }
    }

    async fn active_thread(&self) -> Result<i32> {
        let ctx = self.context.read().await;
        if ctx.state != SessionState::Paused {
            return Err(Error::InvalidRequest("no active thread".to_string()));
        }
        ctx.current_thread_id
            .ok_or_else(|| Error::InvalidRequest("no active thread".to_string()))
    }

    /// The current frame, with a single retry against the adapter: a
    /// caller may observe Paused before the `stopped` side effects have
    /// filled the frame cache.
    async fn active_frame(&self) -> Result<i32> {
        let thread_id = {
            let ctx = self.context.read().await;
            if ctx.state != SessionState::Paused {
                return Err(Error::InvalidRequest("no active frame".to_string()));
            }
            if let Some(frame_id) = ctx.current_frame_id {
                return Ok(frame_id);
            }
            ctx.current_thread_id
        };

        let Some(thread_id) = thread_id else {
            return Err(Error::InvalidRequest("no active frame".to_string()));
        };

        // A failure here is a real transport/timeout/protocol error and
        // must keep its class; "no active frame" is reserved for an
        // adapter that answers with zero frames.
        let frames = self.client.stack_trace(thread_id).await?;
        match frames.first() {
            Some(top) => {
                let mut ctx = self.context.write().await;
                ctx.current_frame_id = Some(top.id);
                Ok(top.id)
            }
            None => Err(Error::InvalidRequest("no active frame".to_string())),
        }
    }

    pub async fn continue_execution(&self) -> Result<()> {
        let thread_id = self.active_thread().await?;
        // State flips to Running on the `continued` event, not here.
        self.client.continue_execution(thread_id).await
    }

    pub async fn step_over(&self) -> Result<()> {
        let thread_id = self.active_thread().await?;
        self.client.next(thread_id).await
    }

    pub async fn step_in(&self) -> Result<()> {
        let thread_id = self.active_thread().await?;
        self.client.step_in(thread_id).await
    }

    pub async fn step_out(&self) -> Result<()> {
        let thread_id = self.active_thread().await?;
        self.client.step_out(thread_id).await
    }

    pub async fn get_call_stack(&self) -> Result<Vec<StackFrame>> {
        let thread_id = self.active_thread().await?;
        self.client.stack_trace(thread_id).await
    }

    pub async fn get_variables(&self, scope: VariableScope) -> Result<Vec<VariableInfo>> {
        let frame_id = self.active_frame().await?;

        let scopes = self.client.scopes(frame_id).await?;
        let mut variables = Vec::new();
        for adapter_scope in scopes {
            if !scope.matches(&adapter_scope.name) {
                continue;
            }
            let members = self.client.variables(adapter_scope.variables_reference).await?;
            variables.extend(members.into_iter().map(|var| VariableInfo {
                name: var.name,
                value: var.value,
                type_: var.type_,
                scope: adapter_scope.name.clone(),
            }));
        }
        Ok(variables)
    }

    /// Evaluation failures from the adapter are data, not errors.
    pub async fn evaluate(&self, expression: &str) -> Result<EvaluationOutcome> {
        let frame_id = self.active_frame().await?;

        match self.client.evaluate(expression, Some(frame_id)).await {
            Ok(value) => Ok(EvaluationOutcome {
                success: true,
                result: Some(value.result),
                type_: value.type_,
                error: None,
            }),
            Err(Error::Dap(message)) => Ok(EvaluationOutcome {
                success: false,
                result: None,
                type_: None,
                error: Some(message),
            }),
            Err(other) => Err(other),
        }
    }

    /// Hard stop: close the DAP socket (rejecting everything in flight),
    /// then SIGTERM → grace → SIGKILL the debuggee if we own it.
    pub async fn terminate(&self) -> Result<()> {
        info!("terminating session {}", self.id);
        self.teardown("session terminated").await;
        self.mark_stopped("terminate requested").await;
        Ok(())
    }

    async fn teardown(&self, context: &str) {
        // Protocol-level goodbye first, then the socket goes away and
        // everything still in flight is rejected.
        if let Err(e) = self.client.disconnect().await {
            warn!("adapter did not acknowledge disconnect: {}", e);
        }
        self.client.shutdown(context).await;
        if let Some(supervisor) = &self.supervisor {
            if let Err(e) = supervisor.terminate().await {
                warn!("failed to terminate debuggee: {}", e);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(client: DapClient, bus: Arc<EventBus>) -> Arc<Self> {
        Self::from_parts(
            "test-session".to_string(),
            "/t/a.py".to_string(),
            5679,
            client,
            None,
            bus,
        )
    }

    #[cfg(test)]
    pub(crate) async fn wire_for_tests(self: &Arc<Self>) {
        self.wire_events().await;
    }

    #[cfg(test)]
    pub(crate) async fn force_state(
        &self,
        state: SessionState,
        thread_id: Option<i32>,
        frame_id: Option<i32>,
    ) {
        let mut ctx = self.context.write().await;
        ctx.state = state;
        ctx.current_thread_id = thread_id;
        ctx.current_frame_id = frame_id;
    }
}
