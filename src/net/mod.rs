//! Server networking layer

pub mod broker;
pub mod codec;
pub mod discovery;
pub mod limiter;
pub mod rate_limit;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;
pub mod validate;

// Re-exports
pub use broker::{BrokerStats, DeliveryResult, MessageBroker};
pub use codec::{CodecError, Frame, LineCodec, encode};
pub use limiter::{ConnectionLimiter, ConnectionLimiterStats};
pub use rate_limit::{MessageRateLimiter, RateLimitStatus, RateLimiterStats, TokenBucket};
pub use registry::{ClientRegistry, ClientSession, Recipient, RegistryStats};
pub use server::ChatServer;
pub use session::SessionState;
pub use types::*;
pub use validate::{Command, InputValidator, ValidationResult, contains_injection, sanitize};
