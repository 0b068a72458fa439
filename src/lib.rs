pub mod config;
pub mod error;
pub mod net;
pub mod types;

pub use config::ServerConfig;
pub use error::{AdmissionError, BrokerError, ConfigError, ServerError};
pub use net::{
    ChatServer, ClientRegistry, ConnectionLimiter, InputValidator, LineCodec, MessageBroker,
    MessageRateLimiter, TokenBucket,
};
pub use types::*;
