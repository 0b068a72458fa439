//! Client registry: the authoritative map of live sessions
//!
//! Three indexes are kept consistent under one lock: connection-id →
//! session, remote address → connection-id, username → connection-id.
//! The registry also owns the bounded shared CHAT history and resolves
//! username conflicts.

use super::limiter::ConnectionLimiter;
use super::types::{MAX_MESSAGE_HISTORY, USERNAME_CONFLICT_PROBES};
use crate::error::AdmissionError;
use crate::types::{ClientId, Message, MessageType, User};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::info;
use uuid::Uuid;

/// Server-side state for one connected peer. The session's reader task
/// is the only reader of the socket; writes go through `outbox`, which
/// a dedicated writer task drains. `shutdown` lets the reaper and the
/// server unwind the reader from outside.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub id: ClientId,
    pub addr: SocketAddr,
    pub user: User,
    pub outbox: mpsc::Sender<String>,
    pub shutdown: Arc<Notify>,
}

/// Minimal per-recipient view used by the broker's fan-out. Taken as a
/// snapshot under the registry lock; sends happen after release.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub id: ClientId,
    pub username: String,
    pub outbox: mpsc::Sender<String>,
}

#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub current_clients: usize,
    pub total_connected: u64,
    pub total_disconnected: u64,
    pub history_len: usize,
}

struct RegistryInner {
    clients: HashMap<ClientId, ClientSession>,
    by_addr: HashMap<SocketAddr, ClientId>,
    by_username: HashMap<String, ClientId>,
    history: VecDeque<Message>,
}

pub struct ClientRegistry {
    limiter: Arc<ConnectionLimiter>,
    max_history: usize,
    inner: Mutex<RegistryInner>,
    total_connected: AtomicU64,
    total_disconnected: AtomicU64,
}

impl ClientRegistry {
    pub fn new(limiter: Arc<ConnectionLimiter>, max_history: usize) -> Self {
        Self {
            limiter,
            max_history: max_history.min(MAX_MESSAGE_HISTORY),
            inner: Mutex::new(RegistryInner {
                clients: HashMap::new(),
                by_addr: HashMap::new(),
                by_username: HashMap::new(),
                history: VecDeque::new(),
            }),
            total_connected: AtomicU64::new(0),
            total_disconnected: AtomicU64::new(0),
        }
    }

    /// Admit a new connection: consult the limiter, allocate an id,
    /// resolve the username, insert into all three maps. The default
    /// username is derived from the remote address.
    pub async fn add(
        &self,
        addr: SocketAddr,
        outbox: mpsc::Sender<String>,
        shutdown: Arc<Notify>,
        desired_username: Option<&str>,
    ) -> Result<ClientId, AdmissionError> {
        let mut inner = self.inner.lock().await;

        if inner.by_addr.contains_key(&addr) {
            return Err(AdmissionError::Duplicate);
        }

        let id = Uuid::new_v4();
        self.limiter.register(addr.ip(), id).await?;

        let desired = match desired_username {
            Some(name) => name.to_string(),
            None => format!("User_{addr}"),
        };
        let username = resolve_username_conflict(&inner.by_username, &desired, None);

        let session = ClientSession {
            id,
            addr,
            user: User::new(username.clone(), addr.to_string()),
            outbox,
            shutdown,
        };

        inner.by_addr.insert(addr, id);
        inner.by_username.insert(username.clone(), id);
        inner.clients.insert(id, session);
        self.total_connected.fetch_add(1, Ordering::SeqCst);

        info!(
            "client added: {} ({}) [{} online]",
            username,
            addr,
            inner.clients.len()
        );
        Ok(id)
    }

    /// Remove a session from all three maps and notify the limiter.
    /// Idempotent: removing an absent id returns `None` with no side
    /// effects, which makes it the gate for exactly-once teardown.
    pub async fn remove(&self, id: ClientId) -> Option<ClientSession> {
        let mut inner = self.inner.lock().await;
        let session = inner.clients.remove(&id)?;
        inner.by_addr.remove(&session.addr);
        inner.by_username.remove(&session.user.username);
        drop(inner);

        self.limiter.release(session.addr.ip(), id).await;
        self.total_disconnected.fetch_add(1, Ordering::SeqCst);

        info!(
            "client removed: {} ({})",
            session.user.username, session.addr
        );
        Some(session)
    }

    pub async fn get(&self, id: ClientId) -> Option<ClientSession> {
        let inner = self.inner.lock().await;
        inner.clients.get(&id).cloned()
    }

    pub async fn get_by_addr(&self, addr: SocketAddr) -> Option<ClientSession> {
        let inner = self.inner.lock().await;
        let id = inner.by_addr.get(&addr)?;
        inner.clients.get(id).cloned()
    }

    pub async fn get_by_username(&self, username: &str) -> Option<ClientSession> {
        let inner = self.inner.lock().await;
        let id = inner.by_username.get(username)?;
        inner.clients.get(id).cloned()
    }

    pub async fn username_of(&self, id: ClientId) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.clients.get(&id).map(|s| s.user.username.clone())
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.clients.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.clients.is_empty()
    }

    /// Rename a session, resolving conflicts with the current owner
    /// excluded so re-requesting one's own name is a no-op. Returns
    /// `(old_username, effective_new_username)`.
    pub async fn update_username(
        &self,
        id: ClientId,
        new_username: &str,
    ) -> Option<(String, String)> {
        let mut inner = self.inner.lock().await;
        if !inner.clients.contains_key(&id) {
            return None;
        }

        let resolved = resolve_username_conflict(&inner.by_username, new_username, Some(id));
        let session = inner.clients.get_mut(&id)?;
        let old = std::mem::replace(&mut session.user.username, resolved.clone());
        session.user.touch();

        inner.by_username.remove(&old);
        inner.by_username.insert(resolved.clone(), id);

        info!("username updated: {} -> {}", old, resolved);
        Some((old, resolved))
    }

    pub async fn update_activity(&self, id: ClientId) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.clients.get_mut(&id) {
            Some(session) => {
                session.user.touch();
                true
            }
            None => false,
        }
    }

    /// Bump the sender's message counter (also touches activity).
    pub async fn record_message(&self, id: ClientId) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.clients.get_mut(&id) {
            Some(session) => {
                session.user.record_message();
                true
            }
            None => false,
        }
    }

    /// Snapshot of `(username, address)` pairs.
    pub async fn user_list(&self) -> Vec<(String, String)> {
        let inner = self.inner.lock().await;
        inner
            .clients
            .values()
            .map(|s| (s.user.username.clone(), s.user.address.clone()))
            .collect()
    }

    /// Wire form of the user list: `u1(a1),u2(a2),…`
    pub async fn user_list_string(&self) -> String {
        self.user_list()
            .await
            .into_iter()
            .map(|(username, address)| format!("{username}({address})"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Fan-out snapshot. Holding only clones of the outbox senders
    /// keeps the lock out of the send path.
    pub async fn recipients(&self) -> Vec<Recipient> {
        let inner = self.inner.lock().await;
        inner
            .clients
            .values()
            .map(|s| Recipient {
                id: s.id,
                username: s.user.username.clone(),
                outbox: s.outbox.clone(),
            })
            .collect()
    }

    /// Only CHAT messages enter the shared history; oldest out first.
    pub async fn add_to_history(&self, message: &Message) {
        if message.message_type != MessageType::Chat {
            return;
        }
        let mut inner = self.inner.lock().await;
        if inner.history.len() >= self.max_history {
            inner.history.pop_front();
        }
        inner.history.push_back(message.clone());
    }

    /// Last `n` history messages, oldest first.
    pub async fn history_tail(&self, n: usize) -> Vec<Message> {
        let inner = self.inner.lock().await;
        let skip = inner.history.len().saturating_sub(n);
        inner.history.iter().skip(skip).cloned().collect()
    }

    pub async fn history_len(&self) -> usize {
        self.inner.lock().await.history.len()
    }

    /// Collect sessions idle past `threshold` so the caller can signal
    /// their reader tasks. Removal happens on each session's own
    /// teardown path, keeping the close exactly-once.
    pub async fn collect_idle(&self, threshold: Duration) -> Vec<ClientSession> {
        let inner = self.inner.lock().await;
        inner
            .clients
            .values()
            .filter(|s| s.user.idle_secs() > threshold.as_secs())
            .cloned()
            .collect()
    }

    /// Signal every session idle past `threshold` to close. Each one
    /// unwinds through its own teardown, which tolerates the session
    /// racing its own disconnect. Returns how many were signalled.
    pub async fn cleanup_inactive(&self, threshold: Duration) -> usize {
        let idle = self.collect_idle(threshold).await;
        for session in &idle {
            info!(
                "reaping idle session {} ({})",
                session.user.username, session.addr
            );
            session.shutdown.notify_one();
        }
        idle.len()
    }

    /// Every live session's shutdown handle, for server teardown.
    pub async fn shutdown_handles(&self) -> Vec<Arc<Notify>> {
        let inner = self.inner.lock().await;
        inner.clients.values().map(|s| s.shutdown.clone()).collect()
    }

    pub async fn statistics(&self) -> RegistryStats {
        let inner = self.inner.lock().await;
        RegistryStats {
            current_clients: inner.clients.len(),
            total_connected: self.total_connected.load(Ordering::SeqCst),
            total_disconnected: self.total_disconnected.load(Ordering::SeqCst),
            history_len: inner.history.len(),
        }
    }
}

/// Probe `base`, `base_2`, `base_3`, … until an unused name is found.
/// `exclude` removes the current owner from conflict checking so
/// idempotent renames resolve to the requested name. Falls back to a
/// clock-derived suffix if the probe ceiling is hit.
fn resolve_username_conflict(
    by_username: &HashMap<String, ClientId>,
    desired: &str,
    exclude: Option<ClientId>,
) -> String {
    let mut candidate = desired.to_string();
    let mut counter = 1u32;

    loop {
        match by_username.get(&candidate) {
            None => return candidate,
            Some(&owner) if Some(owner) == exclude => return candidate,
            Some(_) => {}
        }

        counter += 1;
        if counter > USERNAME_CONFLICT_PROBES {
            return format!("{}_{}", desired, Utc::now().timestamp_subsec_micros());
        }
        candidate = format!("{desired}_{counter}");
    }
}
