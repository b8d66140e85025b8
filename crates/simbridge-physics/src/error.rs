//! Error types for physics backends.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while driving a physics backend.
#[derive(Error, Debug)]
pub enum PhysicsError {
    /// An operation was attempted before `connect` or after `disconnect`.
    #[error("Not connected to the physics server")]
    NotConnected,

    /// `connect` was called twice.
    #[error("Already connected to the physics server")]
    AlreadyConnected,

    /// The robot handle does not name a loaded robot.
    #[error("Unknown robot handle: {0}")]
    UnknownRobot(usize),

    /// Joint index out of range for the robot.
    #[error("Joint index {index} out of range (robot has {count} joints)")]
    JointIndex {
        /// Requested index.
        index: usize,
        /// Number of joints on the robot.
        count: usize,
    },

    /// The robot description file could not be found or read.
    #[error("Cannot read robot description {path}: {source}")]
    Io {
        /// Path that was looked up.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The robot description could not be parsed.
    #[error("URDF parse error: {0}")]
    Parse(String),

    /// The robot description is structurally invalid.
    #[error("Invalid robot description: {0}")]
    InvalidModel(String),

    /// The joint type does not accept the requested motor command.
    #[error("Joint {0} is not actuated")]
    NotActuated(usize),

    /// The backend does not implement the requested feature.
    #[error("Unsupported by this backend: {0}")]
    Unsupported(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = PhysicsError::JointIndex { index: 7, count: 3 };
        assert_eq!(
            e.to_string(),
            "Joint index 7 out of range (robot has 3 joints)"
        );

        let e = PhysicsError::Io {
            path: PathBuf::from("/tmp/robot.urdf"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(e.to_string().contains("/tmp/robot.urdf"));
    }
}
