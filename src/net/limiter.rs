//! Connection admission control with per-IP limits and temporary blocks

use super::types::{CONNECTION_HISTORY_WINDOW_SECS, CONNECTION_RATE_WINDOW_SECS};
use crate::error::AdmissionError;
use crate::types::ClientId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Per-IP admission state, created lazily on first contact. Survives
/// the last disconnect so the rate window keeps its memory.
#[derive(Debug, Default)]
struct IpTracker {
    active: HashSet<ClientId>,
    history: VecDeque<Instant>,
    total_connections: u64,
    blocked_until: Option<Instant>,
}

impl IpTracker {
    fn is_blocked(&self) -> bool {
        self.blocked_until.is_some_and(|until| Instant::now() < until)
    }

    fn recent_connections(&self, window: Duration) -> usize {
        match Instant::now().checked_sub(window) {
            Some(cutoff) => self.history.iter().filter(|&&at| at >= cutoff).count(),
            None => self.history.len(),
        }
    }

    fn record_connection(&mut self, id: ClientId) {
        self.active.insert(id);
        self.history.push_back(Instant::now());
        self.total_connections += 1;
        self.prune_history();
    }

    fn prune_history(&mut self) {
        let window = Duration::from_secs(CONNECTION_HISTORY_WINDOW_SECS);
        if let Some(cutoff) = Instant::now().checked_sub(window) {
            while self.history.front().is_some_and(|&at| at < cutoff) {
                self.history.pop_front();
            }
        }
    }

    /// True when nothing about this IP is worth remembering.
    fn is_stale(&self) -> bool {
        self.active.is_empty() && self.history.is_empty() && !self.is_blocked()
    }
}

/// Enforces the four admission rules, in order: temporary block,
/// global cap, per-IP cap, per-minute rate (which installs a block at
/// the moment it trips).
pub struct ConnectionLimiter {
    max_connections_per_ip: usize,
    max_total_connections: usize,
    max_connections_per_minute: usize,
    block_duration: Duration,
    connection_timeout: Duration,
    trackers: Mutex<HashMap<IpAddr, IpTracker>>,
    active_total: AtomicUsize,
    total_created: AtomicU64,
    total_rejected: AtomicU64,
}

/// Snapshot of limiter state.
#[derive(Debug, Clone)]
pub struct ConnectionLimiterStats {
    pub active_connections: usize,
    pub tracked_ips: usize,
    pub blocked_ips: usize,
    pub total_created: u64,
    pub total_rejected: u64,
}

impl ConnectionLimiter {
    pub fn new(
        max_connections_per_ip: usize,
        max_total_connections: usize,
        max_connections_per_minute: usize,
        block_duration: Duration,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            max_connections_per_ip,
            max_total_connections,
            max_connections_per_minute,
            block_duration,
            connection_timeout,
            trackers: Mutex::new(HashMap::new()),
            active_total: AtomicUsize::new(0),
            total_created: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Admit or refuse a new connection from `ip`, registering it on
    /// success. The refusal reason stays coarse; peers only ever see
    /// their socket close.
    pub async fn register(&self, ip: IpAddr, id: ClientId) -> Result<(), AdmissionError> {
        let mut trackers = self.trackers.lock().await;
        let tracker = trackers.entry(ip).or_default();

        if tracker.is_blocked() {
            self.reject(ip, AdmissionError::Blocked)?;
        }
        if self.active_total.load(Ordering::SeqCst) >= self.max_total_connections {
            self.reject(ip, AdmissionError::ServerFull)?;
        }
        if tracker.active.len() >= self.max_connections_per_ip {
            self.reject(ip, AdmissionError::PerIpLimit)?;
        }
        let window = Duration::from_secs(CONNECTION_RATE_WINDOW_SECS);
        if tracker.recent_connections(window) >= self.max_connections_per_minute {
            // Block installed at the moment of detection, not before
            tracker.blocked_until = Some(Instant::now() + self.block_duration);
            warn!("temporarily blocking {} after connection flood", ip);
            self.reject(ip, AdmissionError::RateExceeded)?;
        }

        tracker.record_connection(id);
        self.active_total.fetch_add(1, Ordering::SeqCst);
        self.total_created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reject(&self, ip: IpAddr, reason: AdmissionError) -> Result<(), AdmissionError> {
        self.total_rejected.fetch_add(1, Ordering::SeqCst);
        debug!("connection from {} refused: {}", ip, reason);
        Err(reason)
    }

    /// Release a registered connection. The tracker keeps its history
    /// for rate-window accounting.
    pub async fn release(&self, ip: IpAddr, id: ClientId) {
        let mut trackers = self.trackers.lock().await;
        if let Some(tracker) = trackers.get_mut(&ip) {
            if tracker.active.remove(&id) {
                self.active_total.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    pub async fn active_from(&self, ip: IpAddr) -> usize {
        let trackers = self.trackers.lock().await;
        trackers.get(&ip).map_or(0, |t| t.active.len())
    }

    pub fn active_total(&self) -> usize {
        self.active_total.load(Ordering::SeqCst)
    }

    pub fn total_rejected(&self) -> u64 {
        self.total_rejected.load(Ordering::SeqCst)
    }

    pub async fn is_blocked(&self, ip: IpAddr) -> bool {
        let trackers = self.trackers.lock().await;
        trackers.get(&ip).is_some_and(|t| t.is_blocked())
    }

    /// Lift a temporary block early.
    pub async fn unblock(&self, ip: IpAddr) -> bool {
        let mut trackers = self.trackers.lock().await;
        match trackers.get_mut(&ip) {
            Some(tracker) if tracker.is_blocked() => {
                tracker.blocked_until = None;
                info!("manually unblocked {}", ip);
                true
            }
            _ => false,
        }
    }

    /// Expire finished blocks, prune stale history, drop trackers with
    /// nothing left to remember.
    pub async fn sweep(&self) {
        let mut trackers = self.trackers.lock().await;
        for tracker in trackers.values_mut() {
            if tracker.blocked_until.is_some_and(|until| until <= Instant::now()) {
                tracker.blocked_until = None;
            }
            tracker.prune_history();
        }
        trackers.retain(|_, tracker| !tracker.is_stale());
    }

    /// Configure an accepted socket: keep-alive on, so half-dead peers
    /// are eventually noticed by the kernel. Read deadlines are
    /// enforced by the session loop, not socket options.
    pub fn apply_secure_timeout(&self, stream: &TcpStream) -> std::io::Result<()> {
        let sock = socket2::SockRef::from(stream);
        sock.set_keepalive(true)
    }

    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    pub async fn statistics(&self) -> ConnectionLimiterStats {
        let trackers = self.trackers.lock().await;
        ConnectionLimiterStats {
            active_connections: self.active_total.load(Ordering::SeqCst),
            tracked_ips: trackers.len(),
            blocked_ips: trackers.values().filter(|t| t.is_blocked()).count(),
            total_created: self.total_created.load(Ordering::SeqCst),
            total_rejected: self.total_rejected.load(Ordering::SeqCst),
        }
    }
}
