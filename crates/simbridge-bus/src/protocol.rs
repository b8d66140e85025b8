//! Gateway message protocol.
//!
//! A client sends [`Request`] frames; the gateway answers each with one
//! [`Response`], and additionally streams [`Response::JointState`] frames for
//! every subscription the client opened.

use serde::{Deserialize, Serialize};

use crate::msg::{JointCommand, JointState};

/// Topic the simulation publishes joint state on.
pub const JOINT_STATES_TOPIC: &str = "joint_states";

/// Topic the gateway forwards joint commands to.
pub const JOINT_COMMANDS_TOPIC: &str = "joint_commands";

/// A request from a gateway client.
///
/// # Example
///
/// ```
/// use simbridge_bus::protocol::Request;
///
/// let json = r#"{"type":"call","service":"/simbridge/pause_physics"}"#;
/// let req: Request = serde_json::from_str(json).unwrap();
/// assert!(matches!(req, Request::Call { .. }));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Call an argument-less service.
    Call {
        /// Fully qualified service name.
        service: String,
    },
    /// Stream a topic to this connection.
    Subscribe {
        /// Topic name.
        topic: String,
    },
    /// Publish a joint command.
    PublishCommand(JointCommand),
    /// List registered services.
    ListServices,
}

/// A frame sent by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// The request succeeded.
    Ack,
    /// The request failed.
    Error {
        /// Human-readable reason.
        message: String,
    },
    /// Registered service names.
    Services {
        /// Sorted names.
        names: Vec<String>,
    },
    /// One joint state sample from a subscription.
    JointState(JointState),
}

impl Response {
    /// Error response from anything displayable.
    pub fn error(err: impl std::fmt::Display) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }
}
