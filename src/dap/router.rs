//! Fan-out of adapter-initiated events.
//!
//! Raw `event` messages are normalized at the boundary into one tagged
//! variant per handled event name, with a catch-all that carries unknown
//! events through untouched. Subscribers are either persistent callbacks
//! (session state tracking) or one-shot rendezvous listeners (the
//! handshake's wait for `initialized`).

use super::types::Event;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, trace};

/// Normalized adapter event.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    Initialized,
    Stopped {
        reason: String,
        thread_id: Option<i32>,
        hit_breakpoint_ids: Vec<i32>,
    },
    Continued {
        thread_id: Option<i32>,
    },
    Terminated,
    Exited {
        exit_code: i32,
    },
    Output {
        category: String,
        output: String,
    },
    Thread {
        body: Option<Value>,
    },
    Module {
        body: Option<Value>,
    },
    Breakpoint {
        body: Option<Value>,
    },
    Unknown {
        event: String,
        body: Option<Value>,
    },
}

impl AdapterEvent {
    pub fn from_wire(event: &Event) -> Self {
        let body = event.body.as_ref();
        match event.event.as_str() {
            "initialized" => AdapterEvent::Initialized,
            "stopped" => AdapterEvent::Stopped {
                reason: body
                    .and_then(|b| b.get("reason"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                thread_id: body
                    .and_then(|b| b.get("threadId"))
                    .and_then(|v| v.as_i64())
                    .map(|v| v as i32),
                hit_breakpoint_ids: body
                    .and_then(|b| b.get("hitBreakpointIds"))
                    .and_then(|v| v.as_array())
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|v| v.as_i64())
                            .map(|v| v as i32)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            "continued" => AdapterEvent::Continued {
                thread_id: body
                    .and_then(|b| b.get("threadId"))
                    .and_then(|v| v.as_i64())
                    .map(|v| v as i32),
            },
            "terminated" => AdapterEvent::Terminated,
            "exited" => AdapterEvent::Exited {
                exit_code: body
                    .and_then(|b| b.get("exitCode"))
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0) as i32,
            },
            "output" => AdapterEvent::Output {
                category: body
                    .and_then(|b| b.get("category"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("console")
                    .to_string(),
                output: body
                    .and_then(|b| b.get("output"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            },
            "thread" => AdapterEvent::Thread {
                body: event.body.clone(),
            },
            "module" => AdapterEvent::Module {
                body: event.body.clone(),
            },
            "breakpoint" => AdapterEvent::Breakpoint {
                body: event.body.clone(),
            },
            other => AdapterEvent::Unknown {
                event: other.to_string(),
                body: event.body.clone(),
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AdapterEvent::Initialized => "initialized",
            AdapterEvent::Stopped { .. } => "stopped",
            AdapterEvent::Continued { .. } => "continued",
            AdapterEvent::Terminated => "terminated",
            AdapterEvent::Exited { .. } => "exited",
            AdapterEvent::Output { .. } => "output",
            AdapterEvent::Thread { .. } => "thread",
            AdapterEvent::Module { .. } => "module",
            AdapterEvent::Breakpoint { .. } => "breakpoint",
            AdapterEvent::Unknown { event, .. } => event,
        }
    }
}

type EventCallback = Arc<dyn Fn(AdapterEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventRouter {
    callbacks: RwLock<HashMap<String, Vec<EventCallback>>>,
    once_listeners: RwLock<HashMap<String, Vec<oneshot::Sender<AdapterEvent>>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent callback, invoked every time `event_name` fires.
    pub async fn on_event<F>(&self, event_name: &str, callback: F)
    where
        F: Fn(AdapterEvent) + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.write().await;
        callbacks
            .entry(event_name.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Register a one-shot listener resolved by the next `event_name`.
    pub async fn listen_once(&self, event_name: &str) -> oneshot::Receiver<AdapterEvent> {
        let (tx, rx) = oneshot::channel();
        let mut listeners = self.once_listeners.write().await;
        listeners.entry(event_name.to_string()).or_default().push(tx);
        rx
    }

    /// Normalize and deliver an event to every subscriber, in order of
    /// arrival on the socket.
    pub async fn dispatch(&self, wire_event: Event) {
        let event = AdapterEvent::from_wire(&wire_event);
        let name = event.name().to_string();
        trace!("routing '{}' event", name);

        {
            let mut listeners = self.once_listeners.write().await;
            if let Some(waiting) = listeners.remove(&name) {
                debug!("resolving {} one-shot listener(s) for '{}'", waiting.len(), name);
                for tx in waiting {
                    let _ = tx.send(event.clone());
                }
            }
        }

        let callbacks = self.callbacks.read().await;
        if let Some(handlers) = callbacks.get(&name) {
            for callback in handlers {
                callback(event.clone());
            }
        }
        // Wildcard subscribers see every event, named or not.
        if let Some(handlers) = callbacks.get("*") {
            for callback in handlers {
                callback(event.clone());
            }
        }
    }
}
