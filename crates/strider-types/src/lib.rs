use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Exclusive write-authority token for commanding the robot.
///
/// At most one lease is held per session. A non-empty lease handle always
/// has a matching running keepalive task; the two are toggled together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub id: Uuid,
    /// Resource the lease covers, e.g. "body".
    pub resource: String,
    /// Monotonic sequence number assigned by the lease service.
    pub sequence: u64,
}

/// Motor power state as reported by the latest telemetry snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    Unknown,
    Off,
    On,
}

/// Which authority a reported estop check belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstopSource {
    Hardware,
    Software,
}

/// Whether an estop authority is currently halting the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstopLevel {
    NotStopped,
    Stopped,
    Unknown,
}

/// One estop authority's state inside a [`RobotState`] snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstopCheck {
    pub source: EstopSource,
    pub level: EstopLevel,
}

/// Battery charge as reported by the robot, if known.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub charge_percent: Option<f32>,
    pub estimated_runtime_secs: Option<u64>,
}

/// Latest polled robot telemetry. Replaced wholesale on every successful
/// state query; consumers read whatever snapshot is cached, stale or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub timestamp: DateTime<Utc>,
    pub power: PowerState,
    pub battery: Option<BatteryStatus>,
    pub estop_checks: Vec<EstopCheck>,
}

impl RobotState {
    /// Snapshot with nothing known yet.
    pub fn unknown() -> Self {
        Self {
            timestamp: Utc::now(),
            power: PowerState::Unknown,
            battery: None,
            estop_checks: Vec::new(),
        }
    }

    /// State of the software estop authority, if the snapshot carries one.
    pub fn software_estop(&self) -> Option<EstopLevel> {
        self.estop_checks
            .iter()
            .find(|c| c.source == EstopSource::Software)
            .map(|c| c.level)
    }
}

/// A raw image captured from one of the robot's cameras.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFrame {
    /// Camera source name, e.g. `"frontright_fisheye_image"`.
    pub source: String,
    pub width: u32,
    pub height: u32,
    /// Raw pixel data as delivered by the image service.
    pub data: Vec<u8>,
}

/// Strict definition of the motion and posture commands the dispatcher is
/// allowed to submit to the robot-command channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload")]
pub enum MotionCommand {
    Sit,
    Stand,
    SelfRight,
    BatteryChangePose,
    /// Planar velocity command. `v_x` forward, `v_y` left, `v_rot`
    /// counter-clockwise. Always submitted with a bounded expiry so a stray
    /// token cannot cause indefinite motion.
    Velocity { v_x: f32, v_y: f32, v_rot: f32 },
    StowArm,
    UnstowArm,
    SafePowerOff,
}

impl MotionCommand {
    /// Short human-readable label used in log and session messages,
    /// e.g. `"Failed stand: ..."`.
    pub fn label(&self) -> &'static str {
        match self {
            MotionCommand::Sit => "sit",
            MotionCommand::Stand => "stand",
            MotionCommand::SelfRight => "self_right",
            MotionCommand::BatteryChangePose => "battery_change_pose",
            MotionCommand::Velocity { .. } => "velocity",
            MotionCommand::StowArm => "stow",
            MotionCommand::UnstowArm => "unstow",
            MotionCommand::SafePowerOff => "safe_power_off",
        }
    }
}

/// Global error type spanning transport failures, authority rejections,
/// configuration problems, and malformed operator input.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum StriderError {
    /// RPC/transport failure talking to a robot service. Logged and
    /// swallowed; triggers a safe power-off only when raised from command
    /// dispatch.
    #[error("communication failure with {service}: {details}")]
    Comm { service: String, details: String },

    /// Lease conflict or estop rejection. Surfaced to the operator as a
    /// session message; never fatal.
    #[error("authority rejected: {0}")]
    Authority(String),

    /// Startup configuration problem, e.g. the robot is not set up for a
    /// software estop. Downgrades the affected machine instead of aborting.
    #[error("configuration: {0}")]
    Config(String),

    /// Unrecognized or malformed command token.
    #[error("unrecognized command token {0:?}")]
    UnknownToken(char),
}

impl StriderError {
    /// Convenience constructor for transport failures.
    pub fn comm(service: impl Into<String>, details: impl std::fmt::Display) -> Self {
        StriderError::Comm {
            service: service.into(),
            details: details.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_serialization_roundtrip() {
        let lease = Lease {
            id: Uuid::new_v4(),
            resource: "body".to_string(),
            sequence: 7,
        };
        let json = serde_json::to_string(&lease).unwrap();
        let back: Lease = serde_json::from_str(&json).unwrap();
        assert_eq!(lease, back);
    }

    #[test]
    fn motion_command_velocity_roundtrip() {
        let cmd = MotionCommand::Velocity {
            v_x: 0.5,
            v_y: 0.0,
            v_rot: -0.8,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let back: MotionCommand = serde_json::from_str(&json).unwrap();
        match back {
            MotionCommand::Velocity { v_x, v_y, v_rot } => {
                assert!((v_x - 0.5).abs() < f32::EPSILON);
                assert!(v_y.abs() < f32::EPSILON);
                assert!((v_rot - (-0.8)).abs() < f32::EPSILON);
            }
            _ => panic!("unexpected variant"),
        }
    }

    #[test]
    fn motion_command_labels_are_stable() {
        assert_eq!(MotionCommand::Stand.label(), "stand");
        assert_eq!(MotionCommand::SafePowerOff.label(), "safe_power_off");
        assert_eq!(
            MotionCommand::Velocity {
                v_x: 0.0,
                v_y: 0.0,
                v_rot: 0.0
            }
            .label(),
            "velocity"
        );
    }

    #[test]
    fn software_estop_lookup() {
        let mut state = RobotState::unknown();
        assert_eq!(state.software_estop(), None);

        state.estop_checks = vec![
            EstopCheck {
                source: EstopSource::Hardware,
                level: EstopLevel::NotStopped,
            },
            EstopCheck {
                source: EstopSource::Software,
                level: EstopLevel::Stopped,
            },
        ];
        assert_eq!(state.software_estop(), Some(EstopLevel::Stopped));
    }

    #[test]
    fn unknown_state_has_no_battery() {
        let state = RobotState::unknown();
        assert_eq!(state.power, PowerState::Unknown);
        assert!(state.battery.is_none());
    }

    #[test]
    fn error_display() {
        let err = StriderError::comm("robot-command", "connection reset");
        assert!(err.to_string().contains("robot-command"));
        assert!(err.to_string().contains("connection reset"));

        let err2 = StriderError::Authority("lease is owned by another client".to_string());
        assert!(err2.to_string().contains("authority rejected"));

        let err3 = StriderError::UnknownToken('x');
        assert!(err3.to_string().contains('x'));
    }
}
