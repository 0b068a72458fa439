//! Message routing and broadcast
//!
//! The broker validates, rate-limits and fans out messages. It never
//! holds the registry lock while sending: recipients are snapshotted
//! first, then each delivery is a non-blocking push onto that
//! session's bounded outbox. A full outbox is a failed delivery, not
//! a reason to buffer.

use super::codec;
use super::rate_limit::MessageRateLimiter;
use super::registry::{ClientRegistry, Recipient};
use super::types::WELCOME_HISTORY_REPLAY;
use super::validate::InputValidator;
use crate::error::BrokerError;
use crate::types::{ClientId, Message, MessageType};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Outcome of one delivery attempt. `success` means no send failed;
/// rate-limited recipients are reported separately and do not count as
/// failures.
#[derive(Debug, Clone, Default)]
pub struct DeliveryResult {
    pub success: bool,
    pub delivered_count: usize,
    pub failed_count: usize,
    pub errors: Vec<String>,
    pub rate_limited_clients: Vec<ClientId>,
}

#[derive(Debug, Clone)]
pub struct BrokerStats {
    pub messages_processed: u64,
    pub messages_broadcast: u64,
    pub validation_failures: u64,
    pub rate_limit_violations: u64,
}

pub struct MessageBroker {
    registry: Arc<ClientRegistry>,
    rate_limiter: Arc<MessageRateLimiter>,
    validator: InputValidator,
    messages_processed: AtomicU64,
    messages_broadcast: AtomicU64,
    validation_failures: AtomicU64,
    rate_limit_violations: AtomicU64,
}

impl MessageBroker {
    pub fn new(
        registry: Arc<ClientRegistry>,
        rate_limiter: Arc<MessageRateLimiter>,
        validator: InputValidator,
    ) -> Self {
        Self {
            registry,
            rate_limiter,
            validator,
            messages_processed: AtomicU64::new(0),
            messages_broadcast: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            rate_limit_violations: AtomicU64::new(0),
        }
    }

    pub fn validator(&self) -> &InputValidator {
        &self.validator
    }

    /// Spend one token for a non-chat operation (renames). Refusals
    /// count against the sender like any other violation.
    pub async fn check_rate(&self, client: ClientId) -> bool {
        if self.rate_limiter.check(client, 1.0).await {
            true
        } else {
            self.rate_limit_violations.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    /// Validate, rate-limit and route one message from `sender`.
    /// Without a recipient the message is broadcast to everyone except
    /// the sender.
    pub async fn process_message(
        &self,
        sender: ClientId,
        content: &str,
        message_type: MessageType,
        recipient: Option<ClientId>,
    ) -> Result<DeliveryResult, BrokerError> {
        self.messages_processed.fetch_add(1, Ordering::SeqCst);

        let sender_name = self
            .registry
            .username_of(sender)
            .await
            .ok_or(BrokerError::SenderNotFound)?;

        if !self.rate_limiter.check(sender, 1.0).await {
            self.rate_limit_violations.fetch_add(1, Ordering::SeqCst);
            warn!("rate limit exceeded for {}", sender_name);
            return Err(BrokerError::RateLimited);
        }

        let validation = self.validator.validate_message(content);
        if !validation.is_valid {
            self.validation_failures.fetch_add(1, Ordering::SeqCst);
            let reason = validation.errors.join("; ");
            debug!("message from {} rejected: {}", sender_name, reason);
            return Err(BrokerError::Validation(reason));
        }
        let sanitized = validation
            .sanitized_value
            .unwrap_or_else(|| content.to_string());

        let message = Message {
            content: sanitized,
            sender: sender_name,
            timestamp: chrono::Utc::now(),
            message_type,
            recipient,
        };

        self.registry.add_to_history(&message).await;

        let result = match recipient {
            Some(target) => self.send_direct(&message, target).await,
            None => self.broadcast(&message, Some(sender)).await,
        };

        self.registry.record_message(sender).await;
        Ok(result)
    }

    /// Server announcement: skips validation, rate limiting and
    /// history.
    pub async fn broadcast_server_message(
        &self,
        content: &str,
        exclude: Option<&[ClientId]>,
        include_only: Option<&[ClientId]>,
    ) -> DeliveryResult {
        let message = Message::server(content);
        self.broadcast_filtered(&message, exclude, include_only).await
    }

    /// Authoritative user-list snapshot push.
    pub async fn broadcast_user_list(&self, csv: &str) -> DeliveryResult {
        let message = Message::user_list(csv);
        self.broadcast_filtered(&message, None, None).await
    }

    /// Welcome a new client, then replay recent chat history to it.
    pub async fn send_welcome(&self, id: ClientId) -> bool {
        let Some(session) = self.registry.get(id).await else {
            return false;
        };

        let welcome = Message::server(format!(
            "Welcome to the chat, {}!",
            session.user.username
        ));
        let recipient = Recipient {
            id,
            username: session.user.username.clone(),
            outbox: session.outbox.clone(),
        };
        if !self.deliver(&welcome, &recipient) {
            return false;
        }

        for message in self.registry.history_tail(WELCOME_HISTORY_REPLAY).await {
            self.deliver(&message, &recipient);
        }
        debug!("welcome sent to {}", session.user.username);
        true
    }

    async fn broadcast(&self, message: &Message, sender: Option<ClientId>) -> DeliveryResult {
        let exclude = sender.map(|id| vec![id]);
        self.broadcast_filtered(message, exclude.as_deref(), None)
            .await
    }

    async fn broadcast_filtered(
        &self,
        message: &Message,
        exclude: Option<&[ClientId]>,
        include_only: Option<&[ClientId]>,
    ) -> DeliveryResult {
        let mut result = DeliveryResult::default();
        let recipients = self.registry.recipients().await;

        for recipient in recipients {
            if exclude.is_some_and(|ids| ids.contains(&recipient.id)) {
                continue;
            }
            if include_only.is_some_and(|ids| !ids.contains(&recipient.id)) {
                continue;
            }
            // Broadcasts consult the recipient's bucket without
            // consuming from it
            if !self.rate_limiter.check(recipient.id, 0.0).await {
                result.rate_limited_clients.push(recipient.id);
                continue;
            }
            if self.deliver(message, &recipient) {
                result.delivered_count += 1;
            } else {
                result.failed_count += 1;
                result
                    .errors
                    .push(format!("failed to send to {}", recipient.username));
            }
        }

        self.messages_broadcast.fetch_add(1, Ordering::SeqCst);
        result.success = result.failed_count == 0;
        result
    }

    async fn send_direct(&self, message: &Message, target: ClientId) -> DeliveryResult {
        let mut result = DeliveryResult::default();

        let Some(session) = self.registry.get(target).await else {
            result.failed_count = 1;
            result.errors.push("recipient not found".to_string());
            return result;
        };

        if !self.rate_limiter.check(target, 0.0).await {
            result.rate_limited_clients.push(target);
            result.success = true;
            return result;
        }

        let recipient = Recipient {
            id: target,
            username: session.user.username.clone(),
            outbox: session.outbox.clone(),
        };
        if self.deliver(message, &recipient) {
            result.delivered_count = 1;
            result.success = true;
        } else {
            result.failed_count = 1;
            result
                .errors
                .push(format!("failed to send to {}", recipient.username));
        }
        result
    }

    /// Push one encoded record onto a recipient's outbox. Non-blocking
    /// by design: a peer that is not draining its socket loses the
    /// frame and the failure is counted. The peer's own reader will
    /// notice a dead connection; the broker never tears sessions down.
    fn deliver(&self, message: &Message, recipient: &Recipient) -> bool {
        let payload = match message.message_type {
            MessageType::Chat => format!("{}: {}", message.sender, message.content),
            _ => message.content.clone(),
        };
        let record = codec::encode(message.message_type.wire_tag(), &payload);
        recipient.outbox.try_send(record).is_ok()
    }

    pub fn statistics(&self) -> BrokerStats {
        BrokerStats {
            messages_processed: self.messages_processed.load(Ordering::SeqCst),
            messages_broadcast: self.messages_broadcast.load(Ordering::SeqCst),
            validation_failures: self.validation_failures.load(Ordering::SeqCst),
            rate_limit_violations: self.rate_limit_violations.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::limiter::ConnectionLimiter;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::sync::{Notify, mpsc};

    fn harness(rate: u32, burst: u32) -> (Arc<ClientRegistry>, MessageBroker) {
        let limiter = Arc::new(ConnectionLimiter::new(
            100,
            100,
            1000,
            Duration::from_secs(300),
            Duration::from_secs(30),
        ));
        let registry = Arc::new(ClientRegistry::new(limiter, 50));
        let broker = MessageBroker::new(
            registry.clone(),
            Arc::new(MessageRateLimiter::new(rate, burst)),
            InputValidator::new(50, 1000, false),
        );
        (registry, broker)
    }

    async fn join(
        registry: &ClientRegistry,
        port: u16,
        name: &str,
    ) -> (ClientId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(64);
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let id = registry
            .add(addr, tx, Arc::new(Notify::new()), Some(name))
            .await
            .unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn test_chat_broadcast_excludes_sender() {
        let (registry, broker) = harness(60, 10);
        let (alice, mut alice_rx) = join(&registry, 5001, "alice").await;
        let (_bob, mut bob_rx) = join(&registry, 5002, "bob").await;

        let result = broker
            .process_message(alice, "hi", MessageType::Chat, None)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.delivered_count, 1);
        assert_eq!(bob_rx.recv().await.unwrap(), "MSG|alice: hi\n");
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sender_username_reasserted() {
        let (registry, broker) = harness(60, 10);
        let (alice, _alice_rx) = join(&registry, 5001, "alice").await;
        let (_bob, mut bob_rx) = join(&registry, 5002, "bob").await;

        // Content already stripped of the cosmetic prefix by the
        // session layer; the broker stamps the registry username
        broker
            .process_message(alice, "hello", MessageType::Chat, None)
            .await
            .unwrap();
        assert_eq!(bob_rx.recv().await.unwrap(), "MSG|alice: hello\n");
    }

    #[tokio::test]
    async fn test_unknown_sender_is_fatal() {
        let (_registry, broker) = harness(60, 10);
        let result = broker
            .process_message(uuid::Uuid::new_v4(), "hi", MessageType::Chat, None)
            .await;
        assert!(matches!(result, Err(BrokerError::SenderNotFound)));
    }

    #[tokio::test]
    async fn test_validation_failure_counted() {
        let (registry, broker) = harness(60, 10);
        let (alice, _rx) = join(&registry, 5001, "alice").await;

        let result = broker
            .process_message(
                alice,
                "<script>alert(1)</script>",
                MessageType::Chat,
                None,
            )
            .await;
        assert!(matches!(result, Err(BrokerError::Validation(_))));
        assert_eq!(broker.statistics().validation_failures, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_refusal() {
        let (registry, broker) = harness(60, 0);
        let (alice, _a) = join(&registry, 5001, "alice").await;
        let (_bob, _b) = join(&registry, 5002, "bob").await;

        let mut refused = 0;
        for _ in 0..65 {
            if matches!(
                broker
                    .process_message(alice, "x", MessageType::Chat, None)
                    .await,
                Err(BrokerError::RateLimited)
            ) {
                refused += 1;
            }
        }
        assert!(refused >= 4);
        assert_eq!(broker.statistics().rate_limit_violations as usize, refused);
    }

    #[tokio::test]
    async fn test_direct_message_only_reaches_target() {
        let (registry, broker) = harness(60, 10);
        let (alice, _a) = join(&registry, 5001, "alice").await;
        let (bob, mut bob_rx) = join(&registry, 5002, "bob").await;
        let (_carol, mut carol_rx) = join(&registry, 5003, "carol").await;

        let result = broker
            .process_message(alice, "psst", MessageType::Chat, Some(bob))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.delivered_count, 1);
        assert_eq!(bob_rx.recv().await.unwrap(), "MSG|alice: psst\n");
        assert!(carol_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_outbox_counts_as_failure() {
        let (registry, broker) = harness(60, 10);
        let (alice, _a) = join(&registry, 5001, "alice").await;

        let (tx, _rx) = mpsc::channel(1);
        let addr: SocketAddr = "127.0.0.1:5002".parse().unwrap();
        registry
            .add(addr, tx, Arc::new(Notify::new()), Some("stuck"))
            .await
            .unwrap();

        // First delivery fills the 1-slot outbox, second fails
        broker
            .process_message(alice, "one", MessageType::Chat, None)
            .await
            .unwrap();
        let result = broker
            .process_message(alice, "two", MessageType::Chat, None)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_count, 1);
    }

    #[tokio::test]
    async fn test_welcome_replays_chat_history() {
        let (registry, broker) = harness(60, 10);
        let (alice, _a) = join(&registry, 5001, "alice").await;
        let (_bob, _b) = join(&registry, 5002, "bob").await;

        for i in 0..3 {
            broker
                .process_message(alice, &format!("m{i}"), MessageType::Chat, None)
                .await
                .unwrap();
        }

        let (carol, mut carol_rx) = join(&registry, 5003, "carol").await;
        assert!(broker.send_welcome(carol).await);

        assert_eq!(
            carol_rx.recv().await.unwrap(),
            "SRV|Welcome to the chat, carol!\n"
        );
        for i in 0..3 {
            assert_eq!(
                carol_rx.recv().await.unwrap(),
                format!("MSG|alice: m{i}\n")
            );
        }
    }

    #[tokio::test]
    async fn test_server_broadcast_skips_history_and_limits() {
        let (registry, broker) = harness(60, 0);
        let (alice, mut alice_rx) = join(&registry, 5001, "alice").await;

        // Exhaust alice's bucket; server messages must still arrive
        while broker
            .process_message(alice, "x", MessageType::Chat, None)
            .await
            .is_ok()
        {}

        let result = broker
            .broadcast_server_message("maintenance soon", None, None)
            .await;
        assert!(result.success);
        assert_eq!(result.delivered_count, 1);
        // 60 chats were accepted but the history is capped at 50
        assert_eq!(registry.history_len().await, 50);

        let mut saw_server_message = false;
        while let Ok(record) = alice_rx.try_recv() {
            if record == "SRV|maintenance soon\n" {
                saw_server_message = true;
            }
        }
        assert!(saw_server_message);
    }
}
