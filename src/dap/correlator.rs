//! Request/response correlation for the multiplexed DAP socket.
//!
//! Requests carry a strictly increasing local sequence number; responses
//! come back in any order and are matched by `request_seq`. Each in-flight
//! request has its own timeout, and a disconnect rejects everything still
//! pending.

use super::types::{Message, Request, Response};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, warn};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type PendingSender = oneshot::Sender<Result<Response>>;

pub struct RequestCorrelator {
    seq_counter: AtomicI32,
    pending: RwLock<HashMap<i32, PendingSender>>,
    write_tx: mpsc::UnboundedSender<Message>,
}

impl RequestCorrelator {
    pub fn new(write_tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            seq_counter: AtomicI32::new(1),
            pending: RwLock::new(HashMap::new()),
            write_tx,
        }
    }

    /// Send `command` and resolve with the response body once the adapter
    /// answers. `success == false` rejects with the adapter's message.
    pub async fn send(&self, command: &str, arguments: Option<Value>) -> Result<Option<Value>> {
        self.send_with_timeout(command, arguments, REQUEST_TIMEOUT)
            .await
    }

    pub async fn send_with_timeout(
        &self,
        command: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        debug!("send '{}' (seq {})", command, seq);

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.write().await;
            pending.insert(seq, tx);
        }

        let request = Request {
            seq,
            command: command.to_string(),
            arguments,
        };

        if self.write_tx.send(Message::Request(request)).is_err() {
            self.pending.write().await.remove(&seq);
            return Err(Error::disconnected("write channel closed"));
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(Error::disconnected("request abandoned")),
            Err(_) => {
                self.pending.write().await.remove(&seq);
                return Err(Error::Timeout(format!(
                    "request '{command}' (seq {seq}) timed out after {timeout:?}"
                )));
            }
        };

        if response.success {
            Ok(response.body)
        } else {
            Err(Error::Dap(format!(
                "'{}' failed: {}",
                command,
                response.message.as_deref().unwrap_or("(no message)")
            )))
        }
    }

    /// Route an incoming response to whoever is waiting on its seq.
    pub async fn dispatch(&self, response: Response) {
        let mut pending = self.pending.write().await;
        match pending.remove(&response.request_seq) {
            Some(tx) => {
                if tx.send(Ok(response)).is_err() {
                    debug!("response arrived after its request gave up");
                }
            }
            None => warn!(
                "response for unknown request_seq {} ({})",
                response.request_seq, response.command
            ),
        }
    }

    /// Reject every in-flight request, e.g. on socket close or terminate.
    pub async fn fail_all(&self, context: &str) {
        let mut pending = self.pending.write().await;
        for (seq, tx) in pending.drain() {
            debug!("failing pending request seq {}: {}", seq, context);
            let _ = tx.send(Err(Error::disconnected(context)));
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}
