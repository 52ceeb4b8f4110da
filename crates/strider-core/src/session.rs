//! [`Session`] – startup, the serve loop, dispatch execution, shutdown.
//!
//! One session exists per process run. `start` acquires the lease and
//! configures the estop endpoint, `serve` runs the event loop that owns
//! all dispatch (tokens arrive over an mpsc channel from the console and
//! are answered through a oneshot), and `shutdown` tears everything down
//! idempotently. Dispatch is serialized by construction: the serve loop is
//! the only consumer of the command channel, so keepalive toggles can
//! never interleave.
//!
//! The global failure path prefers "stop the robot" over "keep trying":
//! any failed motion or power command logs, attempts one safe power-off,
//! waits out a short cooldown, and reports `failed` to the HTTP caller.

use std::sync::Arc;
use std::time::Duration;

use strider_link::{CommandChannel as _, EstopService as _, PowerService as _, RobotServices};
use strider_types::{MotionCommand, PowerState, StriderError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::dispatch::{action_for, Action, CommandRequest, DispatchOutcome};
use crate::keepalive::{
    EstopAuthority, Keepalive, LeaseAuthority, ESTOP_CHECKIN_PERIOD, LEASE_RETAIN_PERIOD,
};
use crate::poller::{Poller, TelemetryCache, VideoControls};
use crate::state::SessionState;
use crate::status;

/// Pause after a failed command's safe power-off before answering the
/// caller.
pub const COMMAND_FAILURE_COOLDOWN: Duration = Duration::from_secs(2);

/// Cadence of the serve loop's housekeeping tick (pending power-on
/// harvesting).
const HOUSEKEEPING_PERIOD: Duration = Duration::from_millis(100);

/// The single operator session: owns the keepalive machines, the shared
/// session state, and the telemetry cache.
pub struct Session {
    services: RobotServices,
    state: SessionState,
    cache: TelemetryCache,
    controls: VideoControls,
    lease_machine: Keepalive,
    estop_machine: Keepalive,
    pending_power_on: Option<JoinHandle<Result<(), StriderError>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    image_source: String,
    shut_down: bool,
}

impl Session {
    /// Build a session over the given services. The estop machine is
    /// constructed permanently disabled when no estop service exists.
    pub fn new(
        services: RobotServices,
        image_source: impl Into<String>,
        shutdown_tx: Arc<watch::Sender<bool>>,
    ) -> Self {
        let state = SessionState::new();
        let lease_machine = Keepalive::new(
            Arc::new(LeaseAuthority::new(
                Arc::clone(&services.lease),
                state.clone(),
            )),
            LEASE_RETAIN_PERIOD,
            state.clone(),
        );
        let estop_machine = match &services.estop {
            Some(estop) => Keepalive::new(
                Arc::new(EstopAuthority::new(Arc::clone(estop))),
                ESTOP_CHECKIN_PERIOD,
                state.clone(),
            ),
            None => Keepalive::disabled("estop", state.clone()),
        };
        let shutdown_rx = shutdown_tx.subscribe();
        Self {
            services,
            state,
            cache: TelemetryCache::new(),
            controls: VideoControls::new(),
            lease_machine,
            estop_machine,
            pending_power_on: None,
            shutdown_tx,
            shutdown_rx,
            image_source: image_source.into(),
            shut_down: false,
        }
    }

    /// Shared session state handle (message log + lease slot).
    pub fn state(&self) -> SessionState {
        self.state.clone()
    }

    /// Shared telemetry cache handle.
    pub fn cache(&self) -> TelemetryCache {
        self.cache.clone()
    }

    /// Begin communication with the robot: acquire the lease, start its
    /// keepalive, and register this endpoint as the sole estop authority.
    ///
    /// # Errors
    ///
    /// A failed lease acquisition is fatal and propagated; a failed estop
    /// endpoint setup only downgrades the estop machine to its disabled
    /// state.
    pub async fn start(&mut self) -> Result<(), StriderError> {
        self.lease_machine.toggle().await?;

        if let Some(estop) = self.services.estop.clone() {
            if let Err(err) = estop.force_simple_setup().await {
                warn!(%err, "estop endpoint setup failed; software estop disabled");
                self.state.push_message(format!("Estop unavailable: {err}"));
                self.estop_machine.disable();
            }
        }
        info!("session started");
        Ok(())
    }

    /// Run the serve loop until the shutdown flag flips or the command
    /// channel closes, then tear down.
    ///
    /// The poller runs as its own task for the lifetime of the loop, so
    /// slow robot commands dispatched here never stall telemetry.
    pub async fn serve(&mut self, mut commands: mpsc::Receiver<CommandRequest>) {
        let poller = Poller::new(
            self.services.clone(),
            self.cache.clone(),
            self.controls.clone(),
            self.state.clone(),
            self.image_source.clone(),
        );
        let poller_handle = tokio::spawn(poller.run(self.shutdown_rx.clone()));

        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_PERIOD);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                request = commands.recv() => match request {
                    Some(CommandRequest { token, reply }) => {
                        let outcome = self.handle_token(token).await;
                        let _ = reply.send(outcome);
                    }
                    None => break,
                },
                _ = housekeeping.tick() => self.harvest_power_on().await,
            }
        }

        // Make sure the poller observes the stop even when the loop ended
        // because the channel closed.
        let _ = self.shutdown_tx.send(true);
        if poller_handle.await.is_err() {
            warn!("poller task panicked");
        }
        self.shutdown().await;
    }

    /// Dispatch one token. Exactly one action fires per registered token;
    /// unregistered tokens produce exactly one "Unrecognized command"
    /// session message and nothing else.
    pub async fn handle_token(&mut self, token: char) -> DispatchOutcome {
        let Some(action) = action_for(token) else {
            self.state.push_message(format!(
                "Unrecognized command: '{}'",
                token.escape_default()
            ));
            return DispatchOutcome::Accepted;
        };
        self.run_action(action).await
    }

    async fn run_action(&mut self, action: Action) -> DispatchOutcome {
        match action {
            Action::Quit => {
                self.quit().await;
                DispatchOutcome::Accepted
            }
            Action::ToggleEstop => {
                if let Err(err) = self.estop_machine.toggle().await {
                    self.state.push_message(format!("Failed toggling estop: {err}"));
                }
                DispatchOutcome::Accepted
            }
            Action::ToggleLease => {
                if let Err(err) = self.lease_machine.toggle().await {
                    self.state.push_message(format!("Failed toggling lease: {err}"));
                }
                DispatchOutcome::Accepted
            }
            Action::TogglePower => self.toggle_power().await,
            Action::ToggleVideo => {
                let enabled = self.controls.toggle_video();
                self.state.push_message(if enabled {
                    "Video mode on"
                } else {
                    "Video mode off"
                });
                DispatchOutcome::Accepted
            }
            Action::TakeImage => {
                self.controls.request_one_shot();
                DispatchOutcome::Accepted
            }
            Action::SelfRight
            | Action::Sit
            | Action::Stand
            | Action::BatteryChangePose
            | Action::MoveForward
            | Action::MoveBackward
            | Action::StrafeLeft
            | Action::StrafeRight
            | Action::TurnLeft
            | Action::TurnRight
            | Action::UnstowArm
            | Action::StowArm => match action.motion() {
                Some((command, expires_in)) => self.submit_command(command, expires_in).await,
                None => DispatchOutcome::Accepted,
            },
        }
    }

    /// Fire-and-wait submit. A failure routes through the global failure
    /// path and reports `failed` to the caller.
    async fn submit_command(
        &mut self,
        command: MotionCommand,
        expires_in: Option<Duration>,
    ) -> DispatchOutcome {
        let label = command.label();
        match self.services.commands.submit(command, expires_in).await {
            Ok(()) => DispatchOutcome::Accepted,
            Err(err) => self.command_failure(label, err).await,
        }
    }

    /// Global failure path: log, one safe power-off attempt, cooldown,
    /// report failure.
    async fn command_failure(&mut self, label: &str, err: StriderError) -> DispatchOutcome {
        error!(command = label, %err, "dispatched command failed");
        self.state.push_message(format!("Failed {label}: {err}"));

        if let Err(off_err) = self
            .services
            .commands
            .submit(MotionCommand::SafePowerOff, None)
            .await
        {
            self.state
                .push_message(format!("Failed safe_power_off: {off_err}"));
        }
        tokio::time::sleep(COMMAND_FAILURE_COOLDOWN).await;
        DispatchOutcome::Failed
    }

    /// Power toggle: off → asynchronous power-on (harvested later); on →
    /// synchronous safe power-off; unknown → message only.
    async fn toggle_power(&mut self) -> DispatchOutcome {
        self.harvest_power_on().await;
        match self.cache.power() {
            PowerState::Unknown => {
                self.state
                    .push_message("Could not toggle power because power state is unknown");
                DispatchOutcome::Accepted
            }
            PowerState::Off => {
                if self.pending_power_on.is_some() {
                    self.state.push_message("Power-on already in progress");
                    return DispatchOutcome::Accepted;
                }
                let power = Arc::clone(&self.services.power);
                self.pending_power_on =
                    Some(tokio::spawn(async move { power.power_on().await }));
                DispatchOutcome::Accepted
            }
            PowerState::On => {
                self.submit_command(MotionCommand::SafePowerOff, None).await
            }
        }
    }

    /// Fold a completed power-on future into the session log. Leaves an
    /// unfinished request in place.
    async fn harvest_power_on(&mut self) {
        let Some(handle) = self.pending_power_on.take_if(|h| h.is_finished()) else {
            return;
        };
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.state.push_message(format!("Failed powering-on: {err}")),
            Err(_) => self
                .state
                .push_message("Failed powering-on: request task panicked"),
        }
    }

    /// Quit token: best-effort sit, then flip the shutdown flag.
    async fn quit(&mut self) {
        if let Err(err) = self.services.commands.submit(MotionCommand::Sit, None).await {
            self.state.push_message(format!("Failed sit: {err}"));
        }
        let _ = self.shutdown_tx.send(true);
    }

    /// Release control of the robot as gracefully as possible. Idempotent
    /// and safe on a session that never started. Stopping the estop
    /// keepalive does not stop the robot.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!("shutting down session");
        self.estop_machine.stop().await;
        // Best-effort lease return; a failure is logged by the machine.
        self.lease_machine.stop().await;
    }

    /// Operator-facing status lines (lease, power, estop, battery).
    pub fn status_lines(&self) -> Vec<String> {
        vec![
            status::lease_line(&self.state, &self.lease_machine),
            status::power_line(&self.cache),
            status::estop_line(&self.cache, &self.estop_machine),
            status::battery_line(&self.cache),
        ]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use strider_link::SimRobot;
    use strider_types::{EstopCheck, EstopLevel, EstopSource, RobotState};
    use tokio::sync::oneshot;

    fn session(robot: &SimRobot) -> Session {
        let (shutdown_tx, _) = watch::channel(false);
        Session::new(
            robot.services(),
            "frontright_fisheye_image",
            Arc::new(shutdown_tx),
        )
    }

    fn session_without_estop(robot: &SimRobot) -> Session {
        let (shutdown_tx, _) = watch::channel(false);
        Session::new(
            robot.services_without_estop(),
            "frontright_fisheye_image",
            Arc::new(shutdown_tx),
        )
    }

    /// Prime the telemetry cache the way a poller harvest would.
    fn prime_power(session: &Session, robot: &SimRobot, power: PowerState) {
        robot.set_power(power);
        session.cache().store_state(RobotState {
            power,
            estop_checks: vec![EstopCheck {
                source: EstopSource::Software,
                level: EstopLevel::NotStopped,
            }],
            ..RobotState::unknown()
        });
    }

    #[tokio::test]
    async fn start_acquires_lease_and_runs_keepalive() {
        let robot = SimRobot::new();
        let mut session = session(&robot);

        session.start().await.unwrap();
        assert!(robot.lease_held());
        assert!(session.state().lease().is_some());
        assert_eq!(robot.stats().lease_acquires, 1);
        assert_eq!(robot.stats().estop_setups, 1);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn stand_token_submits_exactly_one_command() {
        let robot = SimRobot::new();
        let mut session = session(&robot);
        session.start().await.unwrap();

        let outcome = session.handle_token('f').await;
        assert_eq!(outcome, DispatchOutcome::Accepted);

        let submitted = robot.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].command, MotionCommand::Stand);
        assert!(
            !session
                .state()
                .recent_messages()
                .iter()
                .any(|m| m.contains("Failed")),
            "no failure message expected"
        );

        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_stand_runs_the_global_failure_path() {
        let robot = SimRobot::new();
        let mut session = session(&robot);
        session.start().await.unwrap();

        robot.fail_commands(true);
        let outcome = session.handle_token('f').await;
        assert_eq!(outcome, DispatchOutcome::Failed);

        let messages = session.state().recent_messages();
        let stand_failures = messages
            .iter()
            .filter(|m| m.contains("Failed stand"))
            .count();
        assert_eq!(stand_failures, 1, "messages: {messages:?}");
        // The safe power-off attempt was issued (and failed on the same
        // broken channel).
        assert!(
            messages.iter().any(|m| m.contains("Failed safe_power_off")),
            "messages: {messages:?}"
        );

        robot.fail_commands(false);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_token_logs_once_and_fires_nothing() {
        let robot = SimRobot::new();
        let mut session = session(&robot);
        session.start().await.unwrap();

        let outcome = session.handle_token('x').await;
        assert_eq!(outcome, DispatchOutcome::Accepted);
        assert!(robot.submitted().is_empty());

        let messages = session.state().recent_messages();
        let unrecognized = messages
            .iter()
            .filter(|m| m.contains("Unrecognized command"))
            .count();
        assert_eq!(unrecognized, 1, "messages: {messages:?}");

        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn velocity_command_carries_expiry_and_is_never_reissued() {
        let robot = SimRobot::new();
        let mut session = session(&robot);
        session.start().await.unwrap();

        session.handle_token('w').await;
        let submitted = robot.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(
            submitted[0].expires_in,
            Some(crate::dispatch::VELOCITY_CMD_DURATION)
        );

        // Well past the expiry: nothing re-issues the motion.
        tokio::time::sleep(crate::dispatch::VELOCITY_CMD_DURATION * 4).await;
        assert_eq!(robot.submitted().len(), 1);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn estop_toggle_without_estop_service_is_a_permanent_noop() {
        let robot = SimRobot::new();
        let mut session = session_without_estop(&robot);
        session.start().await.unwrap();

        session.handle_token(' ').await;
        session.handle_token(' ').await;
        assert_eq!(robot.stats().estop_checkins, 0);
        assert_eq!(robot.stats().estop_setups, 0);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn estop_setup_failure_downgrades_the_machine() {
        let robot = SimRobot::new();
        robot.fail_estop(true);
        let mut session = session(&robot);
        session.start().await.unwrap();
        robot.fail_estop(false);

        // The machine is now terminally disabled; toggles stay no-ops.
        session.handle_token(' ').await;
        assert_eq!(robot.stats().estop_checkins, 0);
        assert!(
            session
                .state()
                .recent_messages()
                .iter()
                .any(|m| m.contains("Estop unavailable")),
        );

        session.shutdown().await;
    }

    #[tokio::test]
    async fn lease_toggle_pair_returns_and_reacquires() {
        let robot = SimRobot::new();
        let mut session = session(&robot);
        session.start().await.unwrap();

        session.handle_token('l').await;
        assert!(!robot.lease_held());

        session.handle_token('l').await;
        assert!(robot.lease_held());
        assert_eq!(robot.stats().lease_acquires, 2);
        assert_eq!(robot.stats().lease_returns, 1);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn power_toggle_with_unknown_state_only_messages() {
        let robot = SimRobot::new();
        let mut session = session(&robot);
        session.start().await.unwrap();

        session.handle_token('P').await;
        assert_eq!(robot.stats().power_on_requests, 0);
        assert!(
            session
                .state()
                .latest_message()
                .is_some_and(|m| m.contains("power state is unknown")),
        );

        session.shutdown().await;
    }

    #[tokio::test]
    async fn power_toggle_from_off_requests_power_on_async() {
        let robot = SimRobot::new();
        let mut session = session(&robot);
        session.start().await.unwrap();
        prime_power(&session, &robot, PowerState::Off);

        let outcome = session.handle_token('P').await;
        assert_eq!(outcome, DispatchOutcome::Accepted);

        // Let the spawned request complete, then harvest it.
        tokio::task::yield_now().await;
        session.harvest_power_on().await;
        assert_eq!(robot.stats().power_on_requests, 1);
        assert_eq!(robot.power(), PowerState::On);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn power_toggle_from_on_issues_safe_power_off() {
        let robot = SimRobot::new();
        let mut session = session(&robot);
        session.start().await.unwrap();
        prime_power(&session, &robot, PowerState::On);

        let outcome = session.handle_token('P').await;
        assert_eq!(outcome, DispatchOutcome::Accepted);
        assert_eq!(
            robot.submitted().last().map(|s| s.command.clone()),
            Some(MotionCommand::SafePowerOff)
        );
        assert_eq!(robot.power(), PowerState::Off);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_safe_without_start() {
        let robot = SimRobot::new();
        let mut unstarted = session(&robot);

        // Never started: nothing to release.
        unstarted.shutdown().await;
        unstarted.shutdown().await;
        assert_eq!(robot.stats().lease_returns, 0);
        assert_eq!(robot.stats().estop_deregisters, 0);

        let mut started = session(&robot);
        started.start().await.unwrap();
        started.shutdown().await;
        started.shutdown().await;
        assert_eq!(robot.stats().lease_returns, 1);
    }

    #[tokio::test]
    async fn lease_return_failure_does_not_block_shutdown() {
        let robot = SimRobot::new();
        let mut session = session(&robot);
        session.start().await.unwrap();

        robot.fail_lease(true);
        session.shutdown().await;

        assert!(session.state().lease().is_none());
        assert!(
            session
                .state()
                .recent_messages()
                .iter()
                .any(|m| m.contains("Failed stopping lease")),
        );
    }

    #[tokio::test]
    async fn serve_answers_requests_and_stops_on_quit_token() {
        let robot = SimRobot::new();
        let mut session = session(&robot);
        session.start().await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        let serve = tokio::spawn(async move {
            session.serve(rx).await;
            session
        });

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(CommandRequest {
            token: 'f',
            reply: reply_tx,
        })
        .await
        .unwrap();
        assert_eq!(reply_rx.await.unwrap(), DispatchOutcome::Accepted);

        // Quit token sits the robot and flips the shutdown flag.
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(CommandRequest {
            token: '\t',
            reply: reply_tx,
        })
        .await
        .unwrap();
        assert_eq!(reply_rx.await.unwrap(), DispatchOutcome::Accepted);

        let session = serve.await.unwrap();
        assert!(!robot.lease_held());
        assert!(
            robot
                .submitted()
                .iter()
                .any(|s| s.command == MotionCommand::Sit),
            "quit should sit the robot"
        );
        drop(session);
    }
}
