//! Multi-session registry: session map, port allocator, aggregate stats,
//! bulk shutdown.

use super::session::{DebugSession, SessionSummary};
use crate::bus::{DebugEvent, EventBus};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Default port a user-started `debugpy --listen` process sits on; owned
/// sessions are allocated ports above it so the two never collide.
pub const USER_ATTACH_PORT: u16 = 5678;
const FIRST_ALLOCATED_PORT: u16 = 5679;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<DebugSession>>>,
    next_port: AtomicU16,
    bus: Arc<EventBus>,
}

impl SessionRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_port: AtomicU16::new(FIRST_ALLOCATED_PORT),
            bus,
        }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Strictly increasing; ports are never reused within a process
    /// lifetime.
    pub fn allocate_port(&self) -> u16 {
        self.next_port.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn insert(&self, session: Arc<DebugSession>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session);
    }

    pub async fn get(&self, session_id: &str) -> Result<Arc<DebugSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// Terminate and evict. Further events can no longer reach callers
    /// through the registry, and a removal event goes out on the bus.
    pub async fn remove(&self, session_id: &str) -> Result<()> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(session_id)
                .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?
        };

        session.terminate().await?;
        self.bus.publish(DebugEvent::SessionRemoved {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<DebugSession>> =
            self.sessions.read().await.values().cloned().collect();

        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions {
            summaries.push(session.summary().await);
        }
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Aggregate session counts keyed by lifecycle state.
    pub async fn stats(&self) -> HashMap<String, usize> {
        let sessions: Vec<Arc<DebugSession>> =
            self.sessions.read().await.values().cloned().collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for session in sessions {
            let state = session.state().await;
            *counts.entry(state.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Terminate every session concurrently and wait for all of them.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<DebugSession>> = {
            let mut map = self.sessions.write().await;
            map.drain().map(|(_, session)| session).collect()
        };

        if sessions.is_empty() {
            return;
        }
        info!("shutting down {} session(s)", sessions.len());

        let mut tasks = JoinSet::new();
        for session in sessions {
            let bus = self.bus.clone();
            tasks.spawn(async move {
                let id = session.id.clone();
                if let Err(e) = session.terminate().await {
                    warn!("failed to terminate session {}: {}", id, e);
                }
                bus.publish(DebugEvent::SessionRemoved { session_id: id });
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}
