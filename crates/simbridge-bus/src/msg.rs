//! Message types carried on the bus.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A value that can travel on a topic or through a service.
pub trait Message: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Fully qualified type name, checked when a topic is reused.
    const TYPE_NAME: &'static str;
}

/// Wall-clock timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Time {
    /// Whole seconds since the Unix epoch.
    pub sec: i64,
    /// Nanoseconds past `sec`.
    pub nanosec: u32,
}

impl Time {
    /// The current wall-clock time.
    pub fn now() -> Self {
        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
            nanosec: since.subsec_nanos(),
        }
    }

    /// Seconds as a float.
    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + f64::from(self.nanosec) * 1e-9
    }
}

/// Metadata common to stamped messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// When the data was sampled.
    pub stamp: Time,
    /// Coordinate frame the data refers to.
    #[serde(default)]
    pub frame_id: String,
}

impl Header {
    /// Header stamped with the current time and no frame.
    pub fn now() -> Self {
        Self {
            stamp: Time::now(),
            frame_id: String::new(),
        }
    }
}

/// State of a set of joints. The vectors are parallel to `name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    /// Sampling time.
    pub header: Header,
    /// Joint names.
    pub name: Vec<String>,
    /// Positions (rad or m).
    pub position: Vec<f64>,
    /// Velocities (rad/s or m/s).
    pub velocity: Vec<f64>,
    /// Applied efforts (Nm or N).
    pub effort: Vec<f64>,
}

impl JointState {
    /// Empty message with room for `n` joints.
    pub fn with_capacity(header: Header, n: usize) -> Self {
        Self {
            header,
            name: Vec::with_capacity(n),
            position: Vec::with_capacity(n),
            velocity: Vec::with_capacity(n),
            effort: Vec::with_capacity(n),
        }
    }

    /// Append one joint.
    pub fn push(&mut self, name: impl Into<String>, position: f64, velocity: f64, effort: f64) {
        self.name.push(name.into());
        self.position.push(position);
        self.velocity.push(velocity);
        self.effort.push(effort);
    }

    /// Number of joints.
    pub fn len(&self) -> usize {
        self.name.len()
    }

    /// Whether the message carries no joints.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl Message for JointState {
    const TYPE_NAME: &'static str = "sensor_msgs/JointState";
}

/// Request and response of argument-less services.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

impl Message for Empty {
    const TYPE_NAME: &'static str = "std_srvs/Empty";
}

/// Control mode of a [`JointCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandMode {
    /// Values are position targets.
    Position,
    /// Values are velocity targets.
    Velocity,
    /// Values are raw efforts.
    Effort,
}

/// Setpoints for named joints. `values` is parallel to `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointCommand {
    /// How `values` is interpreted.
    pub mode: CommandMode,
    /// Joint names.
    pub name: Vec<String>,
    /// One setpoint per name.
    pub values: Vec<f64>,
}

impl Message for JointCommand {
    const TYPE_NAME: &'static str = "simbridge/JointCommand";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_now_is_recent() {
        let t = Time::now();
        assert!(t.sec > 1_600_000_000);
        assert!(t.nanosec < 1_000_000_000);
    }

    #[test]
    fn test_joint_state_push() {
        let mut msg = JointState::with_capacity(Header::default(), 2);
        assert!(msg.is_empty());
        msg.push("a", 1.0, 2.0, 3.0);
        msg.push("b", 4.0, 5.0, 6.0);
        assert_eq!(msg.len(), 2);
        assert_eq!(msg.name, ["a", "b"]);
        assert_eq!(msg.effort, [3.0, 6.0]);
    }

    #[test]
    fn test_command_json_shape() {
        let json = r#"{"mode":"velocity","name":["elbow"],"values":[0.5]}"#;
        let cmd: JointCommand = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.mode, CommandMode::Velocity);
        assert_eq!(cmd.values, [0.5]);
        assert_eq!(serde_json::to_string(&Empty {}).unwrap(), "{}");
    }
}
