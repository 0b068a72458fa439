//! Error taxonomy for the server core

use thiserror::Error;

/// Startup configuration problems. Terminal for the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid port {0}: must be in 1024..=65535")]
    InvalidPort(u16),

    #[error("invalid max_clients {0}: must be at least 1")]
    InvalidMaxClients(usize),

    #[error("invalid rate limit {0}: must be at least 1 message per minute")]
    InvalidRateLimit(u32),
}

/// Why a new connection was refused. Variants are coarse by design —
/// the peer only ever observes an immediate close, and log lines must
/// not leak limiter internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("address is temporarily blocked")]
    Blocked,

    #[error("server is at capacity")]
    ServerFull,

    #[error("too many connections from this address")]
    PerIpLimit,

    #[error("connection rate limit exceeded")]
    RateExceeded,

    #[error("connection already registered")]
    Duplicate,
}

/// Message processing failures surfaced to the session handler.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("unknown sender")]
    SenderNotFound,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("message rejected: {0}")]
    Validation(String),
}

/// Top-level server failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
