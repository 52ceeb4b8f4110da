//! In-process simulated robot for headless tests and the demo binary.
//!
//! [`SimRobot`] implements all six service traits against a shared
//! in-memory state: it records every submitted command together with its
//! expiry, counts every lease/estop/power interaction, and lets tests
//! inject failures per service. This is what lets the full Strider stack
//! run in CI without a robot on the network.
//!
//! # Example
//!
//! ```rust
//! use strider_link::{CommandChannel, SimRobot};
//! use strider_types::MotionCommand;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let robot = SimRobot::new();
//! let services = robot.services();
//!
//! services
//!     .commands
//!     .submit(MotionCommand::Stand, None)
//!     .await
//!     .expect("sim stand must succeed");
//!
//! assert_eq!(robot.submitted()[0].command, MotionCommand::Stand);
//! # }
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use strider_types::{
    BatteryStatus, EstopCheck, EstopLevel, EstopSource, ImageFrame, Lease, MotionCommand,
    PowerState, RobotState, StriderError,
};
use uuid::Uuid;

use crate::services::{
    CommandChannel, EstopService, ImageService, LeaseService, PowerService, RobotServices,
    StateService,
};

// ────────────────────────────────────────────────────────────────────────────
// Recorded calls
// ────────────────────────────────────────────────────────────────────────────

/// One command as it arrived on the simulated command channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedCommand {
    pub command: MotionCommand,
    pub expires_in: Option<Duration>,
}

/// Counters for every interaction the session had with the simulated robot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub lease_acquires: u32,
    pub lease_retains: u32,
    pub lease_returns: u32,
    pub estop_setups: u32,
    pub estop_checkins: u32,
    pub estop_deregisters: u32,
    pub power_on_requests: u32,
    pub state_queries: u32,
    pub image_captures: u32,
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FailureInjection {
    lease: bool,
    estop: bool,
    power: bool,
    commands: bool,
    state: bool,
    images: bool,
}

struct SimInner {
    power: PowerState,
    battery_percent: f32,
    lease_sequence: u64,
    active_lease: Option<Lease>,
    commands: Vec<SubmittedCommand>,
    stats: SimStats,
    fail: FailureInjection,
    state_query_delay: Duration,
}

impl Default for SimInner {
    fn default() -> Self {
        Self {
            power: PowerState::Off,
            battery_percent: 87.0,
            lease_sequence: 0,
            active_lease: None,
            commands: Vec::new(),
            stats: SimStats::default(),
            fail: FailureInjection::default(),
            state_query_delay: Duration::ZERO,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRobot
// ────────────────────────────────────────────────────────────────────────────

/// A simulated robot backing all six service traits.
///
/// Clones share the same underlying state, so a test can hold one handle
/// for assertions while the session controller drives another.
#[derive(Clone, Default)]
pub struct SimRobot {
    inner: Arc<Mutex<SimInner>>,
}

impl SimRobot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle this robot into a [`RobotServices`] with software estop
    /// available.
    pub fn services(&self) -> RobotServices {
        RobotServices {
            lease: Arc::new(self.clone()),
            estop: Some(Arc::new(self.clone())),
            power: Arc::new(self.clone()),
            commands: Arc::new(self.clone()),
            state: Arc::new(self.clone()),
            images: Arc::new(self.clone()),
        }
    }

    /// Bundle without an estop service, modelling a robot that is not
    /// configured for software estop.
    pub fn services_without_estop(&self) -> RobotServices {
        RobotServices {
            estop: None,
            ..self.services()
        }
    }

    // ── Test controls ───────────────────────────────────────────────────────

    pub fn set_power(&self, power: PowerState) {
        self.lock().power = power;
    }

    pub fn set_battery_percent(&self, percent: f32) {
        self.lock().battery_percent = percent;
    }

    /// Make every command-channel submit fail with a transport error.
    pub fn fail_commands(&self, fail: bool) {
        self.lock().fail.commands = fail;
    }

    /// Make lease retain/return calls fail with a transport error.
    /// Acquire keeps working so sessions can still start.
    pub fn fail_lease(&self, fail: bool) {
        self.lock().fail.lease = fail;
    }

    pub fn fail_estop(&self, fail: bool) {
        self.lock().fail.estop = fail;
    }

    pub fn fail_power(&self, fail: bool) {
        self.lock().fail.power = fail;
    }

    pub fn fail_state_queries(&self, fail: bool) {
        self.lock().fail.state = fail;
    }

    pub fn fail_image_captures(&self, fail: bool) {
        self.lock().fail.images = fail;
    }

    /// Delay every state query by `delay`. Used to keep a query
    /// outstanding across poller ticks.
    pub fn set_state_query_delay(&self, delay: Duration) {
        self.lock().state_query_delay = delay;
    }

    // ── Assertions ──────────────────────────────────────────────────────────

    /// Every command submitted so far, oldest first.
    pub fn submitted(&self) -> Vec<SubmittedCommand> {
        self.lock().commands.clone()
    }

    pub fn stats(&self) -> SimStats {
        self.lock().stats
    }

    pub fn power(&self) -> PowerState {
        self.lock().power
    }

    pub fn lease_held(&self) -> bool {
        self.lock().active_lease.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Service trait implementations
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl LeaseService for SimRobot {
    async fn acquire(&self) -> Result<Lease, StriderError> {
        let mut inner = self.lock();
        inner.stats.lease_acquires += 1;
        if inner.active_lease.is_some() {
            return Err(StriderError::Authority(
                "lease is owned by another client".to_string(),
            ));
        }
        inner.lease_sequence += 1;
        let lease = Lease {
            id: Uuid::new_v4(),
            resource: "body".to_string(),
            sequence: inner.lease_sequence,
        };
        inner.active_lease = Some(lease.clone());
        Ok(lease)
    }

    async fn retain(&self, lease: &Lease) -> Result<(), StriderError> {
        let mut inner = self.lock();
        inner.stats.lease_retains += 1;
        if inner.fail.lease {
            return Err(StriderError::comm("lease", "retain RPC failed"));
        }
        match &inner.active_lease {
            Some(held) if held.id == lease.id => Ok(()),
            _ => Err(StriderError::Authority("no such lease held".to_string())),
        }
    }

    async fn return_lease(&self, lease: &Lease) -> Result<(), StriderError> {
        let mut inner = self.lock();
        inner.stats.lease_returns += 1;
        if inner.fail.lease {
            return Err(StriderError::comm("lease", "return RPC failed"));
        }
        match &inner.active_lease {
            Some(held) if held.id == lease.id => {
                inner.active_lease = None;
                Ok(())
            }
            _ => Err(StriderError::Authority("no such lease held".to_string())),
        }
    }
}

#[async_trait]
impl EstopService for SimRobot {
    async fn force_simple_setup(&self) -> Result<(), StriderError> {
        let mut inner = self.lock();
        inner.stats.estop_setups += 1;
        if inner.fail.estop {
            return Err(StriderError::comm("estop", "endpoint setup RPC failed"));
        }
        Ok(())
    }

    async fn check_in(&self) -> Result<(), StriderError> {
        let mut inner = self.lock();
        inner.stats.estop_checkins += 1;
        if inner.fail.estop {
            return Err(StriderError::comm("estop", "check-in RPC failed"));
        }
        Ok(())
    }

    async fn deregister(&self) -> Result<(), StriderError> {
        let mut inner = self.lock();
        inner.stats.estop_deregisters += 1;
        if inner.fail.estop {
            return Err(StriderError::comm("estop", "deregister RPC failed"));
        }
        Ok(())
    }
}

#[async_trait]
impl PowerService for SimRobot {
    async fn power_on(&self) -> Result<(), StriderError> {
        let mut inner = self.lock();
        inner.stats.power_on_requests += 1;
        if inner.fail.power {
            return Err(StriderError::comm("power", "power-on RPC failed"));
        }
        inner.power = PowerState::On;
        Ok(())
    }
}

#[async_trait]
impl CommandChannel for SimRobot {
    async fn submit(
        &self,
        command: MotionCommand,
        expires_in: Option<Duration>,
    ) -> Result<(), StriderError> {
        let mut inner = self.lock();
        if inner.fail.commands {
            return Err(StriderError::comm("robot-command", "submit RPC failed"));
        }
        if matches!(command, MotionCommand::SafePowerOff) {
            inner.power = PowerState::Off;
        }
        inner.commands.push(SubmittedCommand {
            command,
            expires_in,
        });
        Ok(())
    }
}

#[async_trait]
impl StateService for SimRobot {
    async fn query_state(&self) -> Result<RobotState, StriderError> {
        // Read the delay without holding the lock across the sleep.
        let delay = self.lock().state_query_delay;
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        inner.stats.state_queries += 1;
        if inner.fail.state {
            return Err(StriderError::comm("robot-state", "state query RPC failed"));
        }
        Ok(RobotState {
            timestamp: Utc::now(),
            power: inner.power,
            battery: Some(BatteryStatus {
                charge_percent: Some(inner.battery_percent),
                estimated_runtime_secs: Some(5400),
            }),
            estop_checks: vec![
                EstopCheck {
                    source: EstopSource::Hardware,
                    level: EstopLevel::NotStopped,
                },
                EstopCheck {
                    source: EstopSource::Software,
                    level: EstopLevel::NotStopped,
                },
            ],
        })
    }
}

#[async_trait]
impl ImageService for SimRobot {
    async fn capture(&self, source: &str) -> Result<ImageFrame, StriderError> {
        let mut inner = self.lock();
        inner.stats.image_captures += 1;
        if inner.fail.images {
            return Err(StriderError::comm("image", "capture RPC failed"));
        }
        // Blank 4×4 greyscale frame, enough for callers to assert on.
        Ok(ImageFrame {
            source: source.to_string(),
            width: 4,
            height: 4,
            data: vec![0u8; 16],
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_then_return_releases_the_lease() {
        let robot = SimRobot::new();
        let lease = robot.acquire().await.unwrap();
        assert!(robot.lease_held());

        robot.return_lease(&lease).await.unwrap();
        assert!(!robot.lease_held());
    }

    #[tokio::test]
    async fn second_acquire_while_held_is_an_authority_error() {
        let robot = SimRobot::new();
        let _lease = robot.acquire().await.unwrap();
        let err = robot.acquire().await.unwrap_err();
        assert!(matches!(err, StriderError::Authority(_)));
    }

    #[tokio::test]
    async fn retain_with_stale_lease_is_rejected() {
        let robot = SimRobot::new();
        let lease = robot.acquire().await.unwrap();
        robot.return_lease(&lease).await.unwrap();

        let err = robot.retain(&lease).await.unwrap_err();
        assert!(matches!(err, StriderError::Authority(_)));
    }

    #[tokio::test]
    async fn submit_records_command_and_expiry() {
        let robot = SimRobot::new();
        robot
            .submit(
                MotionCommand::Velocity {
                    v_x: 0.5,
                    v_y: 0.0,
                    v_rot: 0.0,
                },
                Some(Duration::from_millis(600)),
            )
            .await
            .unwrap();

        let submitted = robot.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].expires_in, Some(Duration::from_millis(600)));
    }

    #[tokio::test]
    async fn safe_power_off_turns_motors_off() {
        let robot = SimRobot::new();
        robot.set_power(PowerState::On);
        robot.submit(MotionCommand::SafePowerOff, None).await.unwrap();
        assert_eq!(robot.power(), PowerState::Off);
    }

    #[tokio::test]
    async fn injected_command_failure_is_a_comm_error() {
        let robot = SimRobot::new();
        robot.fail_commands(true);
        let err = robot.submit(MotionCommand::Stand, None).await.unwrap_err();
        assert!(matches!(err, StriderError::Comm { .. }));
        assert!(robot.submitted().is_empty());
    }

    #[tokio::test]
    async fn state_query_reports_power_and_battery() {
        let robot = SimRobot::new();
        robot.set_power(PowerState::On);
        let state = robot.query_state().await.unwrap();
        assert_eq!(state.power, PowerState::On);
        assert!(state.battery.unwrap().charge_percent.is_some());
        assert_eq!(state.software_estop(), Some(EstopLevel::NotStopped));
    }

    #[tokio::test]
    async fn image_capture_returns_blank_frame() {
        let robot = SimRobot::new();
        let frame = robot.capture("frontright_fisheye_image").await.unwrap();
        assert_eq!(frame.source, "frontright_fisheye_image");
        assert_eq!(frame.data.len(), 16);
        assert!(frame.data.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn services_without_estop_has_no_estop_handle() {
        let robot = SimRobot::new();
        assert!(robot.services_without_estop().estop.is_none());
        assert!(robot.services().estop.is_some());
    }
}
