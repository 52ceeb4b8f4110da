//! `strider-core` – Command Dispatch & Safety Keepalive
//!
//! The control loop at the heart of Strider. Everything else is plumbing:
//! the console forwards one token per HTTP request into the
//! [`Session`][session::Session] serve loop, which dispatches it through a
//! static command table while background tasks keep the lease and estop
//! authorities renewed and the telemetry snapshot fresh.
//!
//! # Modules
//!
//! - [`messages`] – [`MessageLog`][messages::MessageLog]: bounded
//!   newest-first log of the last three operator-visible messages.
//! - [`state`] – [`SessionState`][state::SessionState]: the one mutex in
//!   the system, guarding the message log and the lease handle together.
//! - [`keepalive`] – [`Keepalive`][keepalive::Keepalive]: the
//!   INACTIVE/ACTIVE/disabled state machine behind the lease and estop
//!   toggles, with a supervised renewal task per active machine.
//! - [`poller`] – [`Poller`][poller::Poller]: fixed-cadence telemetry
//!   refresh with at most one outstanding query per task.
//! - [`dispatch`] – the static token → [`Action`][dispatch::Action] table
//!   and the motion-command constants.
//! - [`session`] – [`Session`][session::Session]: startup, the serve
//!   loop, dispatch execution, the global failure path, and shutdown.
//! - [`status`] – operator-facing status lines rendered from cached
//!   telemetry and machine state.

pub mod dispatch;
pub mod keepalive;
pub mod messages;
pub mod poller;
pub mod session;
pub mod state;
pub mod status;

pub use dispatch::{
    Action, CommandRequest, DispatchOutcome, COMMAND_INPUT_RATE, VELOCITY_BASE_ANGULAR,
    VELOCITY_BASE_SPEED, VELOCITY_CMD_DURATION,
};
pub use keepalive::{Authority, EstopAuthority, Keepalive, LeaseAuthority};
pub use messages::MessageLog;
pub use poller::{Poller, TelemetryCache, VideoControls, POLL_TICK_PERIOD, STATE_QUERY_PERIOD};
pub use session::{Session, COMMAND_FAILURE_COOLDOWN};
pub use state::SessionState;
