#![allow(dead_code)]
//! In-process fake DAP adapter for integration tests.
//!
//! Listens on a loopback TCP port, speaks `Content-Length` framing, and
//! answers the request surface the way debugpy does: capabilities for
//! `initialize`, an `initialized` event after `attach`, verified
//! breakpoints, one MainThread, a small stack, Locals/Globals scopes.
//! Tests can inject asynchronous events (stopped, continued, ...) and
//! inspect every request the adapter received.

use anyhow::Context;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Clone, Default)]
pub struct FakeAdapterConfig {
    /// When false the adapter never answers `attach`, only emitting the
    /// `initialized` event — the behavior some adapter versions exhibit.
    pub ignore_attach: bool,
    /// Commands to swallow without a response (for pending-request tests).
    pub silent_commands: HashSet<String>,
}

pub struct FakeAdapter {
    pub port: u16,
    requests: Arc<Mutex<Vec<(String, Option<Value>)>>>,
    outgoing: mpsc::UnboundedSender<Value>,
    seq: Arc<AtomicI64>,
    stopped: Arc<AtomicBool>,
}

impl FakeAdapter {
    pub async fn spawn(config: FakeAdapterConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("binding fake adapter listener")?;
        let port = listener
            .local_addr()
            .context("reading fake adapter address")?
            .port();

        let requests: Arc<Mutex<Vec<(String, Option<Value>)>>> = Arc::new(Mutex::new(Vec::new()));
        let seq = Arc::new(AtomicI64::new(1));
        let stopped = Arc::new(AtomicBool::new(false));
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel::<Value>();

        let adapter = Self {
            port,
            requests: requests.clone(),
            outgoing: outgoing.clone(),
            seq: seq.clone(),
            stopped: stopped.clone(),
        };

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (read_half, write_half) = stream.into_split();

            tokio::spawn(write_loop(write_half, outgoing_rx));
            read_loop(read_half, config, requests, outgoing, seq, stopped).await;
        });

        Ok(adapter)
    }

    pub fn emit_event(&self, event: &str, body: Value) {
        if event == "stopped" {
            self.stopped.store(true, Ordering::SeqCst);
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let _ = self.outgoing.send(json!({
            "seq": seq,
            "type": "event",
            "event": event,
            "body": body,
        }));
    }

    /// Commands received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(command, _)| command.clone())
            .collect()
    }

    /// Arguments of every received request for one command, in order.
    pub fn arguments_for(&self, command: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == command)
            .map(|(_, args)| args.clone().unwrap_or(Value::Null))
            .collect()
    }

    /// The line lists of every `setBreakpoints` request, in order.
    pub fn breakpoint_line_history(&self) -> Vec<Vec<i64>> {
        self.arguments_for("setBreakpoints")
            .iter()
            .map(|args| {
                args["breakpoints"]
                    .as_array()
                    .map(|bps| bps.iter().filter_map(|bp| bp["line"].as_i64()).collect())
                    .unwrap_or_default()
            })
            .collect()
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Value>) {
    while let Some(msg) = rx.recv().await {
        let body = serde_json::to_string(&msg).unwrap();
        let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        if writer.write_all(frame.as_bytes()).await.is_err() {
            break;
        }
        let _ = writer.flush().await;
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    config: FakeAdapterConfig,
    requests: Arc<Mutex<Vec<(String, Option<Value>)>>>,
    outgoing: mpsc::UnboundedSender<Value>,
    seq: Arc<AtomicI64>,
    stopped: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(read_half);

    loop {
        // Header block: lines until a blank one.
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => return,
                Ok(_) => {}
                Err(_) => return,
            }
            if line == "\r\n" || line == "\n" {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                content_length = value.trim().parse().ok();
            }
        }

        let Some(length) = content_length else { return };
        let mut body = vec![0u8; length];
        if reader.read_exact(&mut body).await.is_err() {
            return;
        }

        let Ok(request) = serde_json::from_slice::<Value>(&body) else {
            continue;
        };
        if request["type"] != "request" {
            continue;
        }

        let command = request["command"].as_str().unwrap_or_default().to_string();
        let request_seq = request["seq"].as_i64().unwrap_or(0);
        let arguments = request.get("arguments").cloned();

        requests
            .lock()
            .unwrap()
            .push((command.clone(), arguments.clone()));

        if config.silent_commands.contains(&command) {
            continue;
        }

        for msg in respond(&command, arguments.as_ref(), request_seq, &config, &seq, &stopped) {
            let _ = outgoing.send(msg);
        }
    }
}

fn next_seq(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::SeqCst)
}

fn success(seq: &AtomicI64, request_seq: i64, command: &str, body: Value) -> Value {
    json!({
        "seq": next_seq(seq),
        "type": "response",
        "request_seq": request_seq,
        "command": command,
        "success": true,
        "body": body,
    })
}

fn event(seq: &AtomicI64, name: &str, body: Value) -> Value {
    json!({
        "seq": next_seq(seq),
        "type": "event",
        "event": name,
        "body": body,
    })
}

fn respond(
    command: &str,
    arguments: Option<&Value>,
    request_seq: i64,
    config: &FakeAdapterConfig,
    seq: &AtomicI64,
    stopped: &AtomicBool,
) -> Vec<Value> {
    match command {
        "initialize" => vec![success(
            seq,
            request_seq,
            command,
            json!({
                "supportsConfigurationDoneRequest": true,
                "supportsEvaluateForHovers": true,
                "supportsSetVariable": true,
            }),
        )],
        "attach" => {
            let initialized = event(seq, "initialized", json!({}));
            if config.ignore_attach {
                vec![initialized]
            } else {
                vec![success(seq, request_seq, command, json!({})), initialized]
            }
        }
        "setBreakpoints" => {
            let breakpoints: Vec<Value> = arguments
                .and_then(|args| args["breakpoints"].as_array().cloned())
                .unwrap_or_default()
                .iter()
                .enumerate()
                .map(|(idx, bp)| {
                    json!({
                        "id": idx as i64 + 1,
                        "verified": true,
                        "line": bp["line"],
                    })
                })
                .collect();
            vec![success(
                seq,
                request_seq,
                command,
                json!({"breakpoints": breakpoints}),
            )]
        }
        "configurationDone" => vec![success(seq, request_seq, command, json!({}))],
        "threads" => vec![success(
            seq,
            request_seq,
            command,
            json!({"threads": [{"id": 1, "name": "MainThread"}]}),
        )],
        "stackTrace" => {
            // No frames before the program has hit a stop, like debugpy.
            let frames = if stopped.load(Ordering::SeqCst) {
                json!([
                    {"id": 10, "name": "f", "source": {"path": "/t/a.py"}, "line": 25, "column": 1}
                ])
            } else {
                json!([])
            };
            vec![success(
                seq,
                request_seq,
                command,
                json!({"stackFrames": frames}),
            )]
        }
        "scopes" => vec![success(
            seq,
            request_seq,
            command,
            json!({"scopes": [
                {"name": "Locals", "variablesReference": 100, "expensive": false},
                {"name": "Globals", "variablesReference": 101, "expensive": false},
            ]}),
        )],
        "variables" => {
            let reference = arguments
                .and_then(|args| args["variablesReference"].as_i64())
                .unwrap_or(0);
            let variables = if reference == 100 {
                json!([
                    {"name": "x", "value": "1", "type": "int", "variablesReference": 0},
                    {"name": "word", "value": "'hi'", "type": "str", "variablesReference": 0},
                ])
            } else {
                json!([
                    {"name": "GREETING", "value": "'hello'", "type": "str", "variablesReference": 0},
                ])
            };
            vec![success(
                seq,
                request_seq,
                command,
                json!({"variables": variables}),
            )]
        }
        "continue" => vec![
            success(seq, request_seq, command, json!({"allThreadsContinued": true})),
            event(seq, "continued", json!({"threadId": 1})),
        ],
        "next" | "stepIn" | "stepOut" | "pause" => {
            vec![success(seq, request_seq, command, json!({}))]
        }
        "evaluate" => {
            let expression = arguments
                .and_then(|args| args["expression"].as_str())
                .unwrap_or_default();
            if expression == "boom" {
                vec![json!({
                    "seq": next_seq(seq),
                    "type": "response",
                    "request_seq": request_seq,
                    "command": command,
                    "success": false,
                    "message": "NameError: name 'boom' is not defined",
                })]
            } else {
                vec![success(
                    seq,
                    request_seq,
                    command,
                    json!({"result": "3", "type": "int"}),
                )]
            }
        }
        "disconnect" => vec![success(seq, request_seq, command, json!({}))],
        _ => vec![json!({
            "seq": next_seq(seq),
            "type": "response",
            "request_seq": request_seq,
            "command": command,
            "success": false,
            "message": format!("unsupported command: {command}"),
        })],
    }
}
