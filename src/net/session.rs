//! Per-client session: reader loop, frame dispatch, teardown
//!
//! Each session runs two tasks. The reader owns the read half of the
//! socket and is the only place frames are parsed; the writer drains
//! the session's bounded outbox and owns the write half, so every
//! record reaches the wire whole regardless of which task initiated
//! it. The reader unwinds on peer FIN, transport error, oversized
//! records, a reap/shutdown signal, or (in strict mode) validation
//! failure, then runs the teardown exactly once.

use super::broker::MessageBroker;
use super::codec::LineCodec;
use super::registry::ClientRegistry;
use crate::error::BrokerError;
use crate::types::{ClientId, MessageType};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Notify, mpsc};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Session lifecycle states. The enum exists for tracing; transitions
/// are enforced by control flow, not by runtime checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Active,
    Closing,
    Closed,
}

pub struct SessionContext {
    pub id: ClientId,
    pub registry: Arc<ClientRegistry>,
    pub broker: Arc<MessageBroker>,
    pub shutdown: Arc<Notify>,
    pub read_timeout: Duration,
    pub strict_validation: bool,
}

/// Drain the outbox onto the socket. Ends when the last sender is
/// dropped (registry removal) or the peer stops accepting writes;
/// dropping the write half sends FIN, which closes the socket exactly
/// once on this side.
pub async fn write_loop(mut write_half: OwnedWriteHalf, mut outbox: mpsc::Receiver<String>) {
    while let Some(record) = outbox.recv().await {
        if write_half.write_all(record.as_bytes()).await.is_err() {
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

/// The reader task: NEW → ACTIVE → CLOSING → CLOSED.
pub async fn run(ctx: SessionContext, mut read_half: OwnedReadHalf) {
    let mut state = SessionState::New;
    trace!(id = %ctx.id, ?state, "session starting");

    // NEW → ACTIVE: welcome the client, announce it, refresh the list
    if let Some(username) = ctx.registry.username_of(ctx.id).await {
        ctx.broker.send_welcome(ctx.id).await;
        ctx.broker
            .broadcast_server_message(
                &format!("{username} has joined the chat"),
                Some(&[ctx.id]),
                None,
            )
            .await;
        let listed = ctx.registry.user_list_string().await;
        ctx.broker.broadcast_user_list(&listed).await;
    }
    state = SessionState::Active;
    trace!(id = %ctx.id, ?state, "session active");

    let mut codec = LineCodec::new();
    let mut buf = [0u8; 4096];

    'active: loop {
        tokio::select! {
            _ = ctx.shutdown.notified() => {
                debug!(id = %ctx.id, "session signalled to close");
                break 'active;
            }
            read = timeout(ctx.read_timeout, read_half.read(&mut buf)) => {
                match read {
                    // A read timeout is not a disconnect; the reaper
                    // decides when idleness becomes terminal
                    Err(_elapsed) => continue,
                    Ok(Ok(0)) => {
                        debug!(id = %ctx.id, "peer closed connection");
                        break 'active;
                    }
                    Ok(Ok(n)) => {
                        let frames = match codec.push(&buf[..n]) {
                            Ok(frames) => frames,
                            Err(e) => {
                                warn!(id = %ctx.id, "framing error: {}", e);
                                break 'active;
                            }
                        };
                        for frame in frames {
                            ctx.registry.update_activity(ctx.id).await;
                            if !dispatch(&ctx, frame.tag.as_deref(), &frame.payload).await {
                                break 'active;
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        debug!(id = %ctx.id, "read error: {}", e);
                        break 'active;
                    }
                }
            }
        }
    }

    state = SessionState::Closing;
    trace!(id = %ctx.id, ?state, "session closing");
    if codec.invalid_utf8_dropped() > 0 {
        debug!(
            id = %ctx.id,
            "dropped {} records with invalid utf-8",
            codec.invalid_utf8_dropped()
        );
    }
    close(&ctx).await;
    drop(read_half);

    state = SessionState::Closed;
    trace!(id = %ctx.id, ?state, "session finished");
}

/// Handle one frame. Returns false when the session must close.
async fn dispatch(ctx: &SessionContext, tag: Option<&str>, payload: &str) -> bool {
    match tag {
        None | Some("MSG") => handle_chat(ctx, payload).await,
        Some("CMD_USER") => handle_rename(ctx, payload).await,
        Some(other) => {
            debug!(id = %ctx.id, "unknown tag {:?} dropped", other);
            true
        }
    }
}

/// Chat frames carry a cosmetic `<sender>: ` prefix added by clients;
/// the broker re-asserts the registry username, so the prefix is
/// stripped here and never trusted.
async fn handle_chat(ctx: &SessionContext, payload: &str) -> bool {
    let text = payload
        .split_once(": ")
        .map(|(_, rest)| rest)
        .unwrap_or(payload);

    match ctx
        .broker
        .process_message(ctx.id, text, MessageType::Chat, None)
        .await
    {
        Ok(_) => true,
        // Dropped frame, session stays up; the counter already moved
        Err(BrokerError::RateLimited) => true,
        Err(BrokerError::Validation(_)) => !ctx.strict_validation,
        Err(BrokerError::SenderNotFound) => false,
    }
}

async fn handle_rename(ctx: &SessionContext, payload: &str) -> bool {
    if !ctx.broker.check_rate(ctx.id).await {
        warn!(id = %ctx.id, "rename refused by rate limiter");
        return false;
    }

    let validation = ctx.broker.validator().validate_username(payload);
    if !validation.is_valid {
        debug!(
            id = %ctx.id,
            "rename rejected: {}",
            validation.errors.join("; ")
        );
        return false;
    }
    let requested = validation
        .sanitized_value
        .unwrap_or_else(|| payload.to_string());

    let Some((old, new)) = ctx.registry.update_username(ctx.id, &requested).await else {
        return false;
    };

    ctx.broker
        .broadcast_server_message(&format!("{old} is now known as {new}"), None, None)
        .await;
    let listed = ctx.registry.user_list_string().await;
    ctx.broker.broadcast_user_list(&listed).await;
    true
}

/// Teardown, exactly once: whichever caller wins the registry removal
/// announces the departure. Dropping the registry entry drops the last
/// outbox sender, which ends the writer task and closes the socket.
async fn close(ctx: &SessionContext) {
    let Some(session) = ctx.registry.remove(ctx.id).await else {
        return;
    };

    ctx.broker
        .broadcast_server_message(
            &format!("{} has left the chat", session.user.username),
            None,
            None,
        )
        .await;
    let listed = ctx.registry.user_list_string().await;
    ctx.broker.broadcast_user_list(&listed).await;
}
