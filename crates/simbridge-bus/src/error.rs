//! Error types for the message bus.

use thiserror::Error;

/// Errors raised by the bus and the TCP gateway.
#[derive(Error, Debug)]
pub enum BusError {
    /// A topic was opened with a different message type than it carries.
    #[error("Topic {topic} carries {found}, not {expected}")]
    TypeMismatch {
        /// Topic name.
        topic: String,
        /// Type requested by the caller.
        expected: &'static str,
        /// Type the topic was created with.
        found: &'static str,
    },

    /// No handler is registered under the service name.
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// A service with this name is already registered.
    #[error("Service already advertised: {0}")]
    DuplicateService(String),

    /// A service handler reported failure.
    #[error("Service {service} failed: {message}")]
    Service {
        /// Service name.
        service: String,
        /// Handler message.
        message: String,
    },

    /// The topic's publishing side is gone.
    #[error("Topic closed: {0}")]
    Closed(String),

    /// Frame larger than the protocol allows.
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Announced or actual size.
        size: usize,
        /// Limit.
        max: usize,
    },

    /// Socket error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
