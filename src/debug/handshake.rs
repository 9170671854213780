//! Initialization handshake with the debug adapter.
//!
//! Deterministic sequence once the socket is connectable:
//! initialize (retried) → attach with `initialized` rendezvous → validation
//! probe → configurationDone (retried) → prime the thread/frame context.
//!
//! The attach step deliberately does NOT require the attach response:
//! some adapter versions never answer `attach` and only emit the
//! `initialized` event. The request is fired, and whichever of
//! response/event arrives first is acted on; a rejected response while the
//! event is still possible is logged and the wait continues.

use crate::bus::SourceLocation;
use crate::dap::client::DapClient;
use crate::dap::types::Capabilities;
use crate::{Error, Result};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub initialize_attempts: u32,
    pub attach_attempts: u32,
    pub configuration_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub initialized_deadline: Duration,
    pub attach_retry_pause: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            initialize_attempts: 3,
            attach_attempts: 3,
            configuration_attempts: 2,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(5),
            initialized_deadline: Duration::from_secs(15),
            attach_retry_pause: Duration::from_secs(2),
        }
    }
}

impl HandshakeConfig {
    /// Delay before retry number `retry` (1-based): 1s, 2s, 4s, capped.
    fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 1u32 << (retry.saturating_sub(1)).min(16);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }
}

#[derive(Debug)]
pub struct HandshakeOutcome {
    pub capabilities: Capabilities,
    pub thread_id: Option<i32>,
    pub frame_id: Option<i32>,
    pub location: Option<SourceLocation>,
}

pub async fn run(
    client: &DapClient,
    workspace_root: &str,
    config: &HandshakeConfig,
) -> Result<HandshakeOutcome> {
    let capabilities = initialize_with_retry(client, config).await?;
    attach_rendezvous(client, workspace_root, config).await?;

    // Validation probe: any response proves the channel is usable.
    client
        .threads()
        .await
        .map_err(|e| Error::Dap(format!("post-attach validation probe failed: {e}")))?;

    configuration_done_with_retry(client, config).await?;

    let (thread_id, frame_id, location) = prime_thread_context(client).await;

    info!(
        "handshake complete (thread: {:?}, frame: {:?})",
        thread_id, frame_id
    );

    Ok(HandshakeOutcome {
        capabilities,
        thread_id,
        frame_id,
        location,
    })
}

async fn initialize_with_retry(
    client: &DapClient,
    config: &HandshakeConfig,
) -> Result<Capabilities> {
    let mut last_err = None;
    for attempt in 1..=config.initialize_attempts {
        if attempt > 1 {
            tokio::time::sleep(config.backoff_delay(attempt - 1)).await;
        }
        match client.initialize().await {
            Ok(caps) => return Ok(caps),
            Err(e) => {
                warn!(
                    "initialize attempt {}/{} failed: {}",
                    attempt, config.initialize_attempts, e
                );
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Internal("initialize never attempted".to_string())))
}

/// Fire `attach`, then wait for whichever of the response and the
/// `initialized` event comes first. Only the event completes the attempt.
async fn attach_rendezvous(
    client: &DapClient,
    workspace_root: &str,
    config: &HandshakeConfig,
) -> Result<()> {
    let mut last_err = None;

    for attempt in 1..=config.attach_attempts {
        if attempt > 1 {
            tokio::time::sleep(config.attach_retry_pause).await;
        }

        let mut init_rx = client.listen_once("initialized").await;
        let mut attach_fut = Box::pin(client.attach(workspace_root));

        let rendezvous = async {
            tokio::select! {
                event = &mut init_rx => {
                    event
                        .map(|_| ())
                        .map_err(|_| Error::disconnected("event router went away"))
                }
                response = &mut attach_fut => {
                    if let Err(e) = response {
                        // The adapter may still emit the event; keep waiting.
                        warn!("attach rejected before 'initialized': {}", e);
                    }
                    (&mut init_rx)
                        .await
                        .map(|_| ())
                        .map_err(|_| Error::disconnected("event router went away"))
                }
            }
        };

        match timeout(config.initialized_deadline, rendezvous).await {
            Ok(Ok(())) => {
                debug!("'initialized' received on attach attempt {}", attempt);
                return Ok(());
            }
            Ok(Err(e)) => {
                warn!(
                    "attach attempt {}/{} failed: {}",
                    attempt, config.attach_attempts, e
                );
                last_err = Some(e);
            }
            Err(_) => {
                warn!(
                    "attach attempt {}/{}: no 'initialized' within {:?}",
                    attempt, config.attach_attempts, config.initialized_deadline
                );
                last_err = Some(Error::Timeout(format!(
                    "'initialized' event not received within {:?}",
                    config.initialized_deadline
                )));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Internal("attach never attempted".to_string())))
}

async fn configuration_done_with_retry(
    client: &DapClient,
    config: &HandshakeConfig,
) -> Result<()> {
    let mut last_err = None;
    for attempt in 1..=config.configuration_attempts {
        if attempt > 1 {
            tokio::time::sleep(config.backoff_delay(attempt - 1)).await;
        }
        match client.configuration_done().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(
                    "configurationDone attempt {}/{} failed: {}",
                    attempt, config.configuration_attempts, e
                );
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Internal("configurationDone never attempted".to_string())))
}

/// Best-effort initial thread/frame cache. The program usually has not hit
/// a stop yet, so an empty stack is normal.
async fn prime_thread_context(
    client: &DapClient,
) -> (Option<i32>, Option<i32>, Option<SourceLocation>) {
    let threads = match client.threads().await {
        Ok(threads) => threads,
        Err(e) => {
            debug!("thread priming skipped: {}", e);
            return (None, None, None);
        }
    };

    let Some(first) = threads.first() else {
        return (None, None, None);
    };
    let thread_id = first.id;

    match client.stack_trace(thread_id).await {
        Ok(frames) if !frames.is_empty() => {
            let top = &frames[0];
            let location = SourceLocation {
                name: top.name.clone(),
                path: top.source.as_ref().and_then(|s| s.path.clone()),
                line: top.line,
            };
            (Some(thread_id), Some(top.id), Some(location))
        }
        Ok(_) => (Some(thread_id), None, None),
        Err(e) => {
            debug!("no stack available while priming: {}", e);
            (Some(thread_id), None, None)
        }
    }
}
