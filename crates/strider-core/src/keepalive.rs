//! [`Keepalive`] – the lease/estop renewal state machine.
//!
//! Both the lease and the software estop follow the same shape: an
//! authority that must be acquired once and then re-asserted on a fixed
//! cadence, well inside its timeout, or the robot revokes it. The machine
//! has three observable states:
//!
//! * **inactive** – no authority held, no renewal task running;
//! * **active** – authority held and a supervised tokio task renews it;
//! * **disabled** – terminal; the underlying client is unavailable (e.g.
//!   the robot is not configured for software estop) and `toggle` is a
//!   permanent no-op.
//!
//! Toggling an active machine stops the renewal task first (signal, then
//! join), then issues one best-effort release; a failed release is pushed
//! to the session log and the machine still ends up inactive. Renewal
//! failures inside the task are likewise pushed to the session log and
//! never unwound — the next tick is the retry.
//!
//! Toggles take `&mut self` and all dispatch runs on the session's single
//! serve loop, so two overlapping HTTP requests can never double-acquire
//! or double-release an authority.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strider_link::{EstopService, LeaseService};
use strider_types::StriderError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::state::SessionState;

/// Lease retain cadence.
pub const LEASE_RETAIN_PERIOD: Duration = Duration::from_secs(2);

/// Estop check-in cadence; must stay comfortably under
/// [`ESTOP_ENDPOINT_TIMEOUT`].
pub const ESTOP_CHECKIN_PERIOD: Duration = Duration::from_secs(3);

/// Authority timeout configured on the estop endpoint. Missing check-ins
/// for this long halts the robot.
pub const ESTOP_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(9);

// ────────────────────────────────────────────────────────────────────────────
// Authority
// ────────────────────────────────────────────────────────────────────────────

/// A renewable authority over the robot.
///
/// Implementations perform exactly one service call per method; the
/// [`Keepalive`] machine owns cadence and failure surfacing.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Short name used in log and session messages, e.g. `"lease"`.
    fn name(&self) -> &'static str;

    /// Take the authority. Called once per toggle-on.
    async fn acquire(&self) -> Result<(), StriderError>;

    /// Re-assert the authority before it times out.
    async fn renew(&self) -> Result<(), StriderError>;

    /// Give the authority back. Called once per toggle-off; best-effort.
    async fn release(&self) -> Result<(), StriderError>;
}

/// Lease authority: acquire stores the lease in the shared
/// [`SessionState`] slot so the handle and the renewal task always toggle
/// together.
pub struct LeaseAuthority {
    service: Arc<dyn LeaseService>,
    state: SessionState,
}

impl LeaseAuthority {
    pub fn new(service: Arc<dyn LeaseService>, state: SessionState) -> Self {
        Self { service, state }
    }
}

#[async_trait]
impl Authority for LeaseAuthority {
    fn name(&self) -> &'static str {
        "lease"
    }

    async fn acquire(&self) -> Result<(), StriderError> {
        let lease = self.service.acquire().await?;
        debug!(resource = %lease.resource, sequence = lease.sequence, "lease acquired");
        self.state.store_lease(lease);
        Ok(())
    }

    async fn renew(&self) -> Result<(), StriderError> {
        match self.state.lease() {
            Some(lease) => self.service.retain(&lease).await,
            None => Err(StriderError::Authority("no lease held".to_string())),
        }
    }

    async fn release(&self) -> Result<(), StriderError> {
        // Clear the handle first: even when the return call fails the
        // session no longer owns the lease.
        match self.state.take_lease() {
            Some(lease) => self.service.return_lease(&lease).await,
            None => Ok(()),
        }
    }
}

/// Software-estop authority: check-ins renew it, deregistering drops it.
/// Neither stops the robot by itself.
pub struct EstopAuthority {
    service: Arc<dyn EstopService>,
}

impl EstopAuthority {
    pub fn new(service: Arc<dyn EstopService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Authority for EstopAuthority {
    fn name(&self) -> &'static str {
        "estop"
    }

    async fn acquire(&self) -> Result<(), StriderError> {
        // Assert the authority immediately; the renewal task keeps it.
        self.service.check_in().await
    }

    async fn renew(&self) -> Result<(), StriderError> {
        self.service.check_in().await
    }

    async fn release(&self) -> Result<(), StriderError> {
        self.service.deregister().await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Keepalive machine
// ────────────────────────────────────────────────────────────────────────────

struct ActiveTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// One keepalive state machine (lease or estop).
pub struct Keepalive {
    name: &'static str,
    authority: Option<Arc<dyn Authority>>,
    period: Duration,
    log: SessionState,
    active: Option<ActiveTask>,
}

impl Keepalive {
    pub fn new(authority: Arc<dyn Authority>, period: Duration, log: SessionState) -> Self {
        Self {
            name: authority.name(),
            authority: Some(authority),
            period,
            log,
            active: None,
        }
    }

    /// A machine whose underlying client is unavailable. Permanently
    /// inactive; [`toggle`][Self::toggle] is a no-op.
    pub fn disabled(name: &'static str, log: SessionState) -> Self {
        Self {
            name,
            authority: None,
            period: Duration::ZERO,
            log,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_disabled(&self) -> bool {
        self.authority.is_none()
    }

    /// Downgrade the machine to the terminal disabled state. Only valid
    /// while inactive (used when endpoint setup fails at startup).
    pub fn disable(&mut self) {
        debug_assert!(self.active.is_none(), "cannot disable an active machine");
        self.authority = None;
    }

    /// Flip the machine: acquire-and-renew when inactive, stop-and-release
    /// when active. No-op when disabled.
    ///
    /// # Errors
    ///
    /// Propagates the acquire failure on toggle-on; toggle-off never
    /// fails (release errors are logged to the session).
    pub async fn toggle(&mut self) -> Result<(), StriderError> {
        let Some(authority) = self.authority.clone() else {
            debug!(machine = self.name, "toggle ignored: machine is disabled");
            return Ok(());
        };

        if self.active.is_some() {
            self.deactivate().await;
            return Ok(());
        }

        authority.acquire().await?;
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(renewal_loop(
            authority,
            self.period,
            self.log.clone(),
            stop_rx,
        ));
        self.active = Some(ActiveTask { stop, handle });
        debug!(machine = self.name, "keepalive started");
        Ok(())
    }

    /// Stop the renewal task and release the authority if active.
    /// Idempotent; used by toggle-off and by session shutdown.
    pub async fn stop(&mut self) {
        self.deactivate().await;
    }

    async fn deactivate(&mut self) {
        let Some(task) = self.active.take() else {
            return;
        };
        let _ = task.stop.send(true);
        if task.handle.await.is_err() {
            warn!(machine = self.name, "keepalive task panicked");
        }
        if let Some(authority) = &self.authority {
            if let Err(err) = authority.release().await {
                self.log
                    .push_message(format!("Failed stopping {}: {}", self.name, err));
            }
        }
        debug!(machine = self.name, "keepalive stopped");
    }
}

/// Supervised renewal task: renew on a fixed cadence until told to stop.
/// Failures are surfaced through the session log; the next tick retries.
async fn renewal_loop(
    authority: Arc<dyn Authority>,
    period: Duration,
    log: SessionState,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(err) = authority.renew().await {
                    warn!(machine = authority.name(), %err, "keepalive renewal failed");
                    log.push_message(format!("Failed {} keepalive: {}", authority.name(), err));
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use strider_link::SimRobot;

    fn lease_machine(robot: &SimRobot, state: &SessionState) -> Keepalive {
        let services = robot.services();
        Keepalive::new(
            Arc::new(LeaseAuthority::new(services.lease, state.clone())),
            LEASE_RETAIN_PERIOD,
            state.clone(),
        )
    }

    fn estop_machine(robot: &SimRobot, state: &SessionState) -> Keepalive {
        let services = robot.services();
        let estop = services.estop.expect("sim provides estop");
        Keepalive::new(
            Arc::new(EstopAuthority::new(estop)),
            ESTOP_CHECKIN_PERIOD,
            state.clone(),
        )
    }

    #[tokio::test]
    async fn toggle_pair_returns_to_inactive() {
        let robot = SimRobot::new();
        let state = SessionState::new();
        let mut machine = lease_machine(&robot, &state);

        machine.toggle().await.unwrap();
        assert!(machine.is_active());
        assert!(robot.lease_held());
        assert!(state.lease().is_some());

        machine.toggle().await.unwrap();
        assert!(!machine.is_active());
        assert!(!robot.lease_held());
        assert!(state.lease().is_none());

        let stats = robot.stats();
        assert_eq!(stats.lease_acquires, 1);
        assert_eq!(stats.lease_returns, 1);
    }

    #[tokio::test]
    async fn second_toggle_pair_reacquires() {
        let robot = SimRobot::new();
        let state = SessionState::new();
        let mut machine = lease_machine(&robot, &state);

        machine.toggle().await.unwrap();
        machine.toggle().await.unwrap();
        machine.toggle().await.unwrap();
        assert!(machine.is_active());
        assert_eq!(robot.stats().lease_acquires, 2);
    }

    #[tokio::test]
    async fn disabled_machine_ignores_toggles() {
        let state = SessionState::new();
        let mut machine = Keepalive::disabled("estop", state.clone());

        machine.toggle().await.unwrap();
        machine.toggle().await.unwrap();
        assert!(machine.is_disabled());
        assert!(!machine.is_active());
        assert!(state.recent_messages().is_empty());
    }

    #[tokio::test]
    async fn acquire_failure_leaves_machine_inactive() {
        let robot = SimRobot::new();
        let state = SessionState::new();
        let mut machine = lease_machine(&robot, &state);

        // Someone else owns the lease.
        let services = robot.services();
        let _held = services.lease.acquire().await.unwrap();

        let err = machine.toggle().await.unwrap_err();
        assert!(matches!(err, StriderError::Authority(_)));
        assert!(!machine.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_failures_land_in_the_session_log() {
        let robot = SimRobot::new();
        let state = SessionState::new();
        let mut machine = lease_machine(&robot, &state);

        machine.toggle().await.unwrap();
        robot.fail_lease(true);

        // Let at least one renewal tick fire.
        tokio::time::sleep(LEASE_RETAIN_PERIOD * 2).await;

        let messages = state.recent_messages();
        assert!(
            messages.iter().any(|m| m.contains("Failed lease keepalive")),
            "expected a keepalive failure message, got {messages:?}"
        );
        // The machine is still active; the next tick is the retry.
        assert!(machine.is_active());

        robot.fail_lease(false);
        machine.stop().await;
    }

    #[tokio::test]
    async fn release_failure_is_logged_not_fatal() {
        let robot = SimRobot::new();
        let state = SessionState::new();
        let mut machine = lease_machine(&robot, &state);

        machine.toggle().await.unwrap();
        robot.fail_lease(true);
        machine.toggle().await.unwrap();

        assert!(!machine.is_active());
        assert!(state.lease().is_none());
        let messages = state.recent_messages();
        assert!(
            messages.iter().any(|m| m.contains("Failed stopping lease")),
            "expected a release failure message, got {messages:?}"
        );
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let robot = SimRobot::new();
        let state = SessionState::new();
        let mut machine = estop_machine(&robot, &state);

        machine.stop().await; // never started
        machine.toggle().await.unwrap();
        machine.stop().await;
        machine.stop().await;
        assert!(!machine.is_active());
        assert_eq!(robot.stats().estop_deregisters, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn estop_checkins_run_well_inside_the_endpoint_timeout() {
        let robot = SimRobot::new();
        let state = SessionState::new();
        let mut machine = estop_machine(&robot, &state);

        machine.toggle().await.unwrap();
        tokio::time::sleep(ESTOP_ENDPOINT_TIMEOUT).await;
        machine.stop().await;

        // One check-in at acquire plus at least timeout/period renewals.
        assert!(robot.stats().estop_checkins >= 3);
    }
}
