#![warn(missing_docs)]

//! Messaging facade for simbridge.
//!
//! A [`Bus`] carries typed topics and argument-less services inside one
//! process. The optional [`Gateway`] exposes it over TCP with
//! length-prefixed JSON frames so other processes can watch joint state,
//! send joint commands and call services.

mod bus;
mod error;
pub mod framing;
mod gateway;
pub mod msg;
pub mod protocol;

pub use bus::{Bus, Publish, Publisher, ServiceHandler, Subscriber};
pub use error::BusError;
pub use gateway::Gateway;
pub use msg::{CommandMode, Empty, Header, JointCommand, JointState, Message, Time};
pub use protocol::{JOINT_COMMANDS_TOPIC, JOINT_STATES_TOPIC};
