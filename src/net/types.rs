//! Protocol constants for the chat wire format and server limits.
//!
//! # Design Goals
//!
//! 1. **Bounded memory usage** — receive buffers, per-peer outboxes and
//!    the shared history all have explicit caps. A peer cannot exhaust
//!    memory by withholding newlines or by flooding frames.
//!
//! 2. **DoS resistance** — message rate limits, per-IP connection caps
//!    and temporary blocks keep any single peer or address from
//!    starving the rest of the room.
//!
//! 3. **No unbounded queues** — broadcasts enqueue onto bounded
//!    per-session outboxes; a slow peer loses frames instead of
//!    buffering without limit.

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Record separator between tag and payload. A record splits on the
/// FIRST occurrence; payloads may contain further separators.
pub const PROTOCOL_SEPARATOR: char = '|';

/// Record delimiter. Records are newline-terminated UTF-8.
pub const RECORD_DELIMITER: u8 = b'\n';

/// Maximum bytes a record may accumulate without a terminator.
/// A peer that exceeds this is speaking a different protocol (or
/// stalling on purpose) and its session is terminated.
pub const MAX_RECORD_SIZE: usize = 64 * 1024;

// =============================================================================
// DEFAULT ENDPOINTS
// =============================================================================

/// Default TCP listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Lowest acceptable listen port. The server never runs privileged.
pub const MIN_PORT: u16 = 1024;

/// Default UDP port the discovery beacon broadcasts to.
pub const DEFAULT_DISCOVERY_PORT: u16 = 8889;

/// Fixed sentinel payload for LAN discovery. Clients learn the
/// server's address from the UDP source tuple; any other traffic on
/// the discovery port is ignored.
pub const DISCOVERY_SENTINEL: &[u8] = b"LANCHAT_SERVER_DISCOVERY_V1";

// =============================================================================
// HISTORY
// =============================================================================

/// Hard cap on the shared message history, regardless of configuration.
/// 200 messages × 1 KB max content ≈ 200 KB worst case.
pub const MAX_MESSAGE_HISTORY: usize = 200;

/// Default configured history size.
pub const DEFAULT_MESSAGE_HISTORY: usize = 50;

/// How many history messages a new client gets replayed after the
/// welcome message.
pub const WELCOME_HISTORY_REPLAY: usize = 20;

// =============================================================================
// PER-SESSION DELIVERY
// =============================================================================

/// Bounded outbox depth per session. A full outbox means the peer is
/// not draining its socket; further broadcasts to it count as failed
/// deliveries rather than queueing.
/// Memory: 64 records × 64 KB worst case ≈ 4 MB per stuck peer.
pub const OUTBOX_CAPACITY: usize = 64;

// =============================================================================
// TIMEOUTS AND SWEEPS
// =============================================================================

/// Sessions idle longer than this are reaped.
pub const IDLE_THRESHOLD_SECS: u64 = 30 * 60;

/// Bound on waiting for session tasks to unwind during graceful
/// shutdown.
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Sliding window of per-IP connection history kept for rate
/// decisions.
pub const CONNECTION_HISTORY_WINDOW_SECS: u64 = 60 * 60;

/// Window for the per-IP new-connection rate rule.
pub const CONNECTION_RATE_WINDOW_SECS: u64 = 60;

/// Rate-limiter entries idle past this (measured from their last
/// violation) are dropped by the cleanup sweep.
pub const RATE_ENTRY_EXPIRY_SECS: u64 = 60 * 60;

// =============================================================================
// USERNAMES
// =============================================================================

/// Probe ceiling for `name`, `name_2`, `name_3`, … conflict
/// resolution before falling back to a clock-derived suffix.
pub const USERNAME_CONFLICT_PROBES: u32 = 1000;
