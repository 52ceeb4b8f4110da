//! Service traits covering everything the session controller asks of the
//! robot.
//!
//! Each trait maps to one vendor service. The contracts are deliberately
//! minimal: the session controller owns retry/backoff policy (there is
//! none; the next keepalive or poll tick is the retry), so implementations
//! should perform exactly one attempt per call and report failure as a
//! [`StriderError`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strider_types::{ImageFrame, Lease, MotionCommand, RobotState, StriderError};

/// Exclusive-ownership lease service.
#[async_trait]
pub trait LeaseService: Send + Sync {
    /// Acquire the robot lease.
    ///
    /// # Errors
    ///
    /// [`StriderError::Authority`] when another client owns the lease,
    /// [`StriderError::Comm`] on transport failure.
    async fn acquire(&self) -> Result<Lease, StriderError>;

    /// Re-assert ownership of `lease` before it expires.
    async fn retain(&self, lease: &Lease) -> Result<(), StriderError>;

    /// Return `lease` to the robot. Best-effort on shutdown paths; callers
    /// log and continue on failure.
    async fn return_lease(&self, lease: &Lease) -> Result<(), StriderError>;
}

/// Software-estop authority registration and check-in.
///
/// A session that is not configured for software estop simply has no
/// `EstopService` (see [`RobotServices::estop`]); the keepalive machine is
/// then permanently disabled.
#[async_trait]
pub trait EstopService: Send + Sync {
    /// Register this endpoint as the robot's sole estop authority.
    async fn force_simple_setup(&self) -> Result<(), StriderError>;

    /// Renew the estop authority. Must be called well within the endpoint
    /// timeout or the robot halts.
    async fn check_in(&self) -> Result<(), StriderError>;

    /// Drop this endpoint's estop registration. Does not stop the robot.
    async fn deregister(&self) -> Result<(), StriderError>;
}

/// Motor power service.
#[async_trait]
pub trait PowerService: Send + Sync {
    /// Request motor power-on. Slow on real hardware; the dispatcher runs
    /// it as a spawned future and harvests the result later.
    async fn power_on(&self) -> Result<(), StriderError>;
}

/// The robot-command channel: posture, velocity, and safe power-off
/// commands.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Submit one command. `expires_in` bounds how long the command stays
    /// in effect; velocity commands always carry one so a stalled or
    /// duplicated token cannot cause indefinite motion.
    ///
    /// # Errors
    ///
    /// [`StriderError::Comm`] on transport failure,
    /// [`StriderError::Authority`] when the session's lease is rejected.
    async fn submit(
        &self,
        command: MotionCommand,
        expires_in: Option<Duration>,
    ) -> Result<(), StriderError>;
}

/// Robot telemetry query service.
#[async_trait]
pub trait StateService: Send + Sync {
    /// Fetch a fresh [`RobotState`] snapshot.
    async fn query_state(&self) -> Result<RobotState, StriderError>;
}

/// Camera image query service.
#[async_trait]
pub trait ImageService: Send + Sync {
    /// Capture one frame from the named camera source.
    async fn capture(&self, source: &str) -> Result<ImageFrame, StriderError>;
}

/// Bundle of service handles handed to the session controller.
///
/// `estop` is `None` when the robot is not configured for software estop;
/// the estop keepalive machine is then constructed in its terminal
/// disabled state and the estop toggle token is a no-op forever.
#[derive(Clone)]
pub struct RobotServices {
    pub lease: Arc<dyn LeaseService>,
    pub estop: Option<Arc<dyn EstopService>>,
    pub power: Arc<dyn PowerService>,
    pub commands: Arc<dyn CommandChannel>,
    pub state: Arc<dyn StateService>,
    pub images: Arc<dyn ImageService>,
}
