//! In-process publish/subscribe hub for structured debug events.
//!
//! Every component that needs to surface something to the outside world
//! (pauses, program output, process lifecycle) publishes a [`DebugEvent`]
//! here. Consumers such as the log formatter or a UI broadcaster subscribe
//! and receive their own copy of every event. The bus is passed into
//! components explicitly; there is no global sink.

use serde::Serialize;
use std::sync::Mutex;
use tracing::trace;

/// Source position of the top stack frame when a session pauses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceLocation {
    pub name: String,
    pub path: Option<String>,
    pub line: i32,
}

/// Which stream a program output line belongs to after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    Normal,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DebugEvent {
    SessionStarted {
        session_id: String,
        script: String,
        port: u16,
    },
    StateChanged {
        session_id: String,
        state: String,
    },
    Paused {
        session_id: String,
        reason: String,
        thread_id: i32,
        location: Option<SourceLocation>,
        hit_breakpoint_ids: Vec<i32>,
    },
    Resumed {
        session_id: String,
    },
    ProgramOutput {
        session_id: String,
        channel: OutputChannel,
        line: String,
    },
    ProcessSpawned {
        session_id: String,
        pid: u32,
    },
    ProcessExited {
        session_id: String,
        exit_code: Option<i32>,
        normal: bool,
    },
    BreakpointsChanged {
        session_id: String,
        path: String,
    },
    SessionRemoved {
        session_id: String,
    },
    /// Informational adapter events (thread, module, breakpoint) and anything
    /// we do not handle, forwarded raw.
    Adapter {
        session_id: String,
        event: String,
        body: Option<serde_json::Value>,
    },
}

/// Fan-out hub: each subscriber gets its own unbounded channel and a clone
/// of every published event. Disconnected subscribers are pruned on the
/// next publish.
pub struct EventBus {
    subscribers: Mutex<Vec<flume::Sender<DebugEvent>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> flume::Receiver<DebugEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .push(tx);
        rx
    }

    pub fn publish(&self, event: DebugEvent) {
        trace!("bus publish: {:?}", event);
        let mut subscribers = self.subscribers.lock().expect("event bus lock poisoned");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .len()
    }
}
