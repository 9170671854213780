//! Typed DAP client.
//!
//! Owns one socket: a reader task that dispatches responses to the
//! [`RequestCorrelator`] and events to the [`EventRouter`], and a writer
//! task fed by an unbounded channel so callers never contend on the
//! socket. All typed operations go through the correlator and inherit its
//! per-request timeout.

use super::correlator::RequestCorrelator;
use super::router::{AdapterEvent, EventRouter};
use super::socket_helper;
use super::transport_trait::{DapReader, DapWriter};
use super::types::*;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

pub struct DapClient {
    correlator: Arc<RequestCorrelator>,
    router: Arc<EventRouter>,
    disconnect_handlers: Arc<RwLock<Vec<DisconnectHandler>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl DapClient {
    /// Attach-only mode: single connect attempt against an adapter the
    /// user already started.
    pub async fn connect(port: u16, deadline: Duration) -> Result<Self> {
        let stream = socket_helper::connect_once(port, deadline).await?;
        let (reader, writer) = super::transport::from_tcp(stream);
        Ok(Self::new(Box::new(reader), Box::new(writer)))
    }

    /// Owned mode: poll the port while the freshly spawned adapter boots.
    pub async fn connect_with_retry(port: u16, budget: Duration) -> Result<Self> {
        let stream = socket_helper::connect_with_retry(port, budget).await?;
        let (reader, writer) = super::transport::from_tcp(stream);
        Ok(Self::new(Box::new(reader), Box::new(writer)))
    }

    /// Build a client over arbitrary framed halves (used by tests to
    /// substitute scripted transports).
    pub fn new(mut reader: Box<dyn DapReader>, mut writer: Box<dyn DapWriter>) -> Self {
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Message>();
        let correlator = Arc::new(RequestCorrelator::new(write_tx));
        let router = Arc::new(EventRouter::new());
        let disconnect_handlers: Arc<RwLock<Vec<DisconnectHandler>>> =
            Arc::new(RwLock::new(Vec::new()));

        let reader_correlator = correlator.clone();
        let reader_router = router.clone();
        let reader_handlers = disconnect_handlers.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match reader.read_message().await {
                    Ok(Message::Response(response)) => {
                        reader_correlator.dispatch(response).await;
                    }
                    Ok(Message::Event(event)) => {
                        reader_router.dispatch(event).await;
                    }
                    Ok(Message::Request(request)) => {
                        // Reverse requests are not part of this protocol surface.
                        debug!("dropping adapter-initiated request '{}'", request.command);
                    }
                    Err(e) => {
                        info!("DAP read loop ended: {}", e);
                        reader_correlator.fail_all("adapter socket closed").await;
                        let handlers = reader_handlers.read().await;
                        for handler in handlers.iter() {
                            handler();
                        }
                        break;
                    }
                }
            }
        });

        let writer_task = tokio::spawn(async move {
            while let Some(message) = write_rx.recv().await {
                if let Err(e) = writer.write_message(&message).await {
                    warn!("DAP write failed: {}", e);
                    break;
                }
            }
        });

        Self {
            correlator,
            router,
            disconnect_handlers,
            reader_task: Mutex::new(Some(reader_task)),
            writer_task: Mutex::new(Some(writer_task)),
        }
    }

    /// Register a persistent callback for a named adapter event.
    pub async fn on_event<F>(&self, event_name: &str, callback: F)
    where
        F: Fn(AdapterEvent) + Send + Sync + 'static,
    {
        self.router.on_event(event_name, callback).await;
    }

    /// One-shot rendezvous with the next occurrence of a named event.
    pub async fn listen_once(&self, event_name: &str) -> oneshot::Receiver<AdapterEvent> {
        self.router.listen_once(event_name).await
    }

    /// Invoked once when the socket closes underneath us.
    pub async fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.disconnect_handlers.write().await.push(Arc::new(handler));
    }

    /// Tear down both I/O tasks and reject everything in flight. Dropping
    /// the tasks drops the socket halves, which closes the connection.
    pub async fn shutdown(&self, context: &str) {
        self.correlator.fail_all(context).await;
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.lock().await.take() {
            task.abort();
        }
    }

    pub async fn pending_requests(&self) -> usize {
        self.correlator.pending_count().await
    }

    // === Typed request surface ===

    pub async fn initialize(&self) -> Result<Capabilities> {
        let args = InitializeRequestArguments {
            client_id: Some("debugpy_mcp".to_string()),
            client_name: Some("debugpy_mcp".to_string()),
            adapter_id: "debugpy".to_string(),
            locale: Some("en-US".to_string()),
            lines_start_at_1: Some(true),
            columns_start_at_1: Some(true),
            path_format: Some("path".to_string()),
            supports_variable_type: Some(true),
            supports_variable_paging: Some(true),
        };

        let body = self
            .correlator
            .send("initialize", Some(serde_json::to_value(args)?))
            .await?;

        match body {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| Error::Dap(format!("failed to parse capabilities: {e}"))),
            None => Ok(Capabilities::default()),
        }
    }

    /// Attach to the adapter. Local and remote roots are both the given
    /// working directory; `justMyCode` is off so library frames are
    /// steppable.
    pub async fn attach(&self, workspace_root: &str) -> Result<()> {
        let args = AttachRequestArguments {
            path_mappings: vec![PathMapping {
                local_root: workspace_root.to_string(),
                remote_root: workspace_root.to_string(),
            }],
            just_my_code: false,
        };

        self.correlator
            .send("attach", Some(serde_json::to_value(args)?))
            .await?;
        Ok(())
    }

    pub async fn configuration_done(&self) -> Result<()> {
        self.correlator.send("configurationDone", None).await?;
        Ok(())
    }

    /// Absolute replacement of all breakpoints for one source file. The
    /// response array corresponds positionally to the request lines.
    pub async fn set_breakpoints(&self, path: &str, lines: &[i32]) -> Result<Vec<Breakpoint>> {
        let args = SetBreakpointsArguments {
            source: Source {
                name: std::path::Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned()),
                path: Some(path.to_string()),
            },
            breakpoints: lines.iter().map(|&line| SourceBreakpoint { line }).collect(),
            source_modified: Some(false),
        };

        #[derive(serde::Deserialize)]
        struct SetBreakpointsResponse {
            breakpoints: Vec<Breakpoint>,
        }

        let body = self
            .correlator
            .send("setBreakpoints", Some(serde_json::to_value(args)?))
            .await?;
        let parsed: SetBreakpointsResponse = required_body("setBreakpoints", body)?;
        Ok(parsed.breakpoints)
    }

    pub async fn threads(&self) -> Result<Vec<Thread>> {
        #[derive(serde::Deserialize)]
        struct ThreadsResponse {
            threads: Vec<Thread>,
        }

        let body = self.correlator.send("threads", None).await?;
        let parsed: ThreadsResponse = required_body("threads", body)?;
        Ok(parsed.threads)
    }

    pub async fn stack_trace(&self, thread_id: i32) -> Result<Vec<StackFrame>> {
        let args = StackTraceArguments {
            thread_id,
            start_frame: None,
            levels: None,
        };

        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct StackTraceResponse {
            stack_frames: Vec<StackFrame>,
        }

        let body = self
            .correlator
            .send("stackTrace", Some(serde_json::to_value(args)?))
            .await?;
        let parsed: StackTraceResponse = required_body("stackTrace", body)?;
        Ok(parsed.stack_frames)
    }

    pub async fn scopes(&self, frame_id: i32) -> Result<Vec<Scope>> {
        let args = ScopesArguments { frame_id };

        #[derive(serde::Deserialize)]
        struct ScopesResponse {
            scopes: Vec<Scope>,
        }

        let body = self
            .correlator
            .send("scopes", Some(serde_json::to_value(args)?))
            .await?;
        let parsed: ScopesResponse = required_body("scopes", body)?;
        Ok(parsed.scopes)
    }

    pub async fn variables(&self, variables_reference: i32) -> Result<Vec<Variable>> {
        let args = VariablesArguments {
            variables_reference,
        };

        #[derive(serde::Deserialize)]
        struct VariablesResponse {
            variables: Vec<Variable>,
        }

        let body = self
            .correlator
            .send("variables", Some(serde_json::to_value(args)?))
            .await?;
        let parsed: VariablesResponse = required_body("variables", body)?;
        Ok(parsed.variables)
    }

    pub async fn evaluate(&self, expression: &str, frame_id: Option<i32>) -> Result<EvaluateResult> {
        let args = EvaluateArguments {
            expression: expression.to_string(),
            frame_id,
            context: Some("repl".to_string()),
        };

        let body = self
            .correlator
            .send("evaluate", Some(serde_json::to_value(args)?))
            .await?;
        required_body("evaluate", body)
    }

    pub async fn continue_execution(&self, thread_id: i32) -> Result<()> {
        self.thread_command("continue", thread_id).await
    }

    pub async fn next(&self, thread_id: i32) -> Result<()> {
        self.thread_command("next", thread_id).await
    }

    pub async fn step_in(&self, thread_id: i32) -> Result<()> {
        self.thread_command("stepIn", thread_id).await
    }

    pub async fn step_out(&self, thread_id: i32) -> Result<()> {
        self.thread_command("stepOut", thread_id).await
    }

    pub async fn pause(&self, thread_id: i32) -> Result<()> {
        self.thread_command("pause", thread_id).await
    }

    async fn thread_command(&self, command: &str, thread_id: i32) -> Result<()> {
        let args = ThreadArguments { thread_id };
        self.correlator
            .send(command, Some(serde_json::to_value(args)?))
            .await?;
        Ok(())
    }

    /// Protocol-level goodbye. A dying adapter frequently never answers,
    /// so the wait is short; the caller decides whether failure matters.
    pub async fn disconnect(&self) -> Result<()> {
        self.correlator
            .send_with_timeout("disconnect", None, Duration::from_secs(2))
            .await?;
        Ok(())
    }
}

fn required_body<T: DeserializeOwned>(command: &str, body: Option<Value>) -> Result<T> {
    let value = body.ok_or_else(|| Error::Dap(format!("'{command}' response has no body")))?;
    serde_json::from_value(value)
        .map_err(|e| Error::Dap(format!("failed to parse '{command}' response: {e}")))
}
