//! Acceptor and server lifecycle
//!
//! Owns the composition root: limiter, rate limiter, registry, broker
//! and the background tasks (reaper, discovery beacon, status log).
//! The accept loop admits sockets through the registry; refused
//! sockets are dropped on the spot. Graceful shutdown stops accepting,
//! signals every session and waits for their tasks within a bounded
//! timeout.

use super::broker::MessageBroker;
use super::discovery;
use super::limiter::ConnectionLimiter;
use super::rate_limit::MessageRateLimiter;
use super::registry::ClientRegistry;
use super::session::{self, SessionContext};
use super::types::{IDLE_THRESHOLD_SECS, OUTBOX_CAPACITY, SHUTDOWN_TIMEOUT_SECS};
use super::validate::InputValidator;
use crate::config::ServerConfig;
use crate::error::ServerError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct ChatServer {
    config: ServerConfig,
    limiter: Arc<ConnectionLimiter>,
    rate_limiter: Arc<MessageRateLimiter>,
    registry: Arc<ClientRegistry>,
    broker: Arc<MessageBroker>,
    shutdown: Notify,
    shutting_down: AtomicBool,
    connections_rejected: AtomicU64,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ChatServer {
    /// Build the composition root. Fails fast on bad configuration.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, ServerError> {
        config.validate()?;

        let limiter = Arc::new(ConnectionLimiter::new(
            config.max_connections_per_ip,
            config.max_clients,
            config.max_connections_per_minute,
            Duration::from_secs(config.temporary_block_duration_minutes * 60),
            Duration::from_secs(config.connection_timeout_seconds),
        ));
        let rate_limiter = Arc::new(MessageRateLimiter::new(
            config.rate_limit_messages_per_minute,
            config.burst_allowance,
        ));
        let registry = Arc::new(ClientRegistry::new(
            limiter.clone(),
            config.message_history_size,
        ));
        let validator = InputValidator::new(
            config.max_username_length,
            config.max_message_length,
            config.strict_validation,
        );
        let broker = Arc::new(MessageBroker::new(
            registry.clone(),
            rate_limiter.clone(),
            validator,
        ));

        Ok(Arc::new(Self {
            config,
            limiter,
            rate_limiter,
            registry,
            broker,
            shutdown: Notify::new(),
            shutting_down: AtomicBool::new(false),
            connections_rejected: AtomicU64::new(0),
            local_addr: Mutex::new(None),
        }))
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }

    pub fn limiter(&self) -> &Arc<ConnectionLimiter> {
        &self.limiter
    }

    /// The bound address, once `bind` has run. Useful when listening
    /// on port 0.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        let bound = listener.local_addr()?;
        *self.local_addr.lock().await = Some(bound);
        info!("listening on {}", bound);
        Ok(listener)
    }

    /// Bind and serve until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept loop plus background tasks. Returns after a graceful
    /// shutdown has drained the sessions.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        let reaper = tokio::spawn(Self::reaper_loop(
            self.registry.clone(),
            self.rate_limiter.clone(),
            self.limiter.clone(),
            Duration::from_secs(self.config.cleanup_interval_seconds),
        ));
        let beacon = tokio::spawn(discovery::run_beacon(
            self.config.discovery_port,
            Duration::from_secs(self.config.discovery_broadcast_interval_seconds),
        ));
        let status = tokio::spawn(Self::status_loop(
            self.registry.clone(),
            self.broker.clone(),
        ));

        let mut sessions: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.admit(&mut sessions, stream, addr).await,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        error!("session task panicked: {}", e);
                    }
                }
            }
        }

        // Stop accepting before unwinding the sessions
        drop(listener);
        info!("shutting down, closing {} sessions", sessions.len());

        for handle in self.registry.shutdown_handles().await {
            handle.notify_one();
        }

        let deadline = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
        let drained = tokio::time::timeout(deadline, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("shutdown timeout reached, aborting remaining sessions");
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }

        reaper.abort();
        beacon.abort();
        status.abort();

        info!("shutdown complete");
        Ok(())
    }

    /// Idempotent shutdown trigger. The first call wins; later calls
    /// are no-ops.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutdown requested");
        self.shutdown.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn connections_rejected(&self) -> u64 {
        self.connections_rejected.load(Ordering::SeqCst)
    }

    /// Admission: register with the registry (which consults the
    /// limiter) and spawn the session's reader and writer tasks. Any
    /// failure closes the socket immediately by dropping it.
    async fn admit(&self, sessions: &mut JoinSet<()>, stream: TcpStream, addr: SocketAddr) {
        if self.is_shutting_down() {
            self.connections_rejected.fetch_add(1, Ordering::SeqCst);
            return;
        }
        if let Err(e) = self.limiter.apply_secure_timeout(&stream) {
            debug!("socket option setup failed for {}: {}", addr, e);
        }

        let (outbox_tx, outbox_rx) = mpsc::channel::<String>(OUTBOX_CAPACITY);
        let shutdown = Arc::new(Notify::new());

        let id = match self
            .registry
            .add(addr, outbox_tx, shutdown.clone(), None)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.connections_rejected.fetch_add(1, Ordering::SeqCst);
                debug!("admission refused for {}: {}", addr, e);
                return;
            }
        };

        let (read_half, write_half) = stream.into_split();
        tokio::spawn(session::write_loop(write_half, outbox_rx));

        let ctx = SessionContext {
            id,
            registry: self.registry.clone(),
            broker: self.broker.clone(),
            shutdown,
            read_timeout: self.limiter.connection_timeout(),
            strict_validation: self.config.strict_validation,
        };
        sessions.spawn(session::run(ctx, read_half));
    }

    /// Periodic maintenance: reap idle sessions, sweep both limiters.
    async fn reaper_loop(
        registry: Arc<ClientRegistry>,
        rate_limiter: Arc<MessageRateLimiter>,
        limiter: Arc<ConnectionLimiter>,
        interval: Duration,
    ) {
        let idle_threshold = Duration::from_secs(IDLE_THRESHOLD_SECS);
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;

            let reaped = registry.cleanup_inactive(idle_threshold).await;
            if reaped > 0 {
                debug!("reaper signalled {} idle sessions", reaped);
            }

            rate_limiter.cleanup().await;
            limiter.sweep().await;
        }
    }

    async fn status_loop(registry: Arc<ClientRegistry>, broker: Arc<MessageBroker>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let stats = registry.statistics().await;
            let broker_stats = broker.statistics();
            info!(
                "status: {} clients | {} processed | {} dropped by validation | {} rate violations",
                stats.current_clients,
                broker_stats.messages_processed,
                broker_stats.validation_failures,
                broker_stats.rate_limit_violations,
            );
        }
    }
}
