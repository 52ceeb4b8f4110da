//! [`Poller`] – fixed-cadence telemetry refresh.
//!
//! Runs as its own supervised task so a slow robot command issued from the
//! dispatch path can never stall telemetry. Each [`tick`][Poller::tick]
//! walks a fixed set of query tasks; per task it first harvests a finished
//! in-flight query (success replaces the cached slot wholesale, failure
//! logs and keeps the prior value), then issues at most one new query when
//! none is outstanding, the task's minimum period has elapsed, and its
//! should-run predicate holds.
//!
//! Two tasks exist: the mandatory robot-state query and the optional image
//! capture, which only runs while continuous video mode is on or a
//! one-shot capture was requested.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use strider_link::{ImageService as _, RobotServices, StateService as _};
use strider_types::{ImageFrame, PowerState, RobotState, StriderError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::warn;

use crate::state::SessionState;

/// Outer scheduler cadence.
pub const POLL_TICK_PERIOD: Duration = Duration::from_millis(100);

/// Minimum period between robot-state queries.
pub const STATE_QUERY_PERIOD: Duration = Duration::from_millis(200);

// ────────────────────────────────────────────────────────────────────────────
// Telemetry cache
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CacheInner {
    state: Option<RobotState>,
    image: Option<ImageFrame>,
}

/// Latest successfully polled telemetry. Stale values are served between
/// polls; nothing ever blocks waiting for freshness.
#[derive(Clone, Default)]
pub struct TelemetryCache {
    inner: Arc<Mutex<CacheInner>>,
}

impl TelemetryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest_state(&self) -> Option<RobotState> {
        self.lock().state.clone()
    }

    pub fn latest_image(&self) -> Option<ImageFrame> {
        self.lock().image.clone()
    }

    /// Cached motor power state; `Unknown` until the first successful poll.
    pub fn power(&self) -> PowerState {
        self.lock()
            .state
            .as_ref()
            .map_or(PowerState::Unknown, |s| s.power)
    }

    /// Replace the cached snapshot wholesale. Called on every successful
    /// state-query harvest.
    pub fn store_state(&self, state: RobotState) {
        self.lock().state = Some(state);
    }

    /// Replace the cached image. Called on every successful capture
    /// harvest.
    pub fn store_image(&self, image: ImageFrame) {
        self.lock().image = Some(image);
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Video controls
// ────────────────────────────────────────────────────────────────────────────

/// Shared flags gating the image query: continuous video mode and a
/// pending one-shot capture request. Toggled from dispatch, read by the
/// poller task.
#[derive(Clone, Default)]
pub struct VideoControls {
    video_mode: Arc<AtomicBool>,
    one_shot: Arc<AtomicBool>,
}

impl VideoControls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip continuous video mode; returns the new value.
    pub fn toggle_video(&self) -> bool {
        // fetch_xor flips and returns the previous value.
        !self.video_mode.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn video_enabled(&self) -> bool {
        self.video_mode.load(Ordering::SeqCst)
    }

    /// Ask for a single image capture on the next eligible tick.
    pub fn request_one_shot(&self) {
        self.one_shot.store(true, Ordering::SeqCst);
    }

    pub fn one_shot_pending(&self) -> bool {
        self.one_shot.load(Ordering::SeqCst)
    }

    fn clear_one_shot(&self) {
        self.one_shot.store(false, Ordering::SeqCst);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Query task bookkeeping
// ────────────────────────────────────────────────────────────────────────────

/// One periodic query slot: at most one outstanding request at a time.
struct QueryTask<T> {
    name: &'static str,
    min_period: Duration,
    last_issued: Option<Instant>,
    in_flight: Option<JoinHandle<Result<T, StriderError>>>,
}

impl<T: Send + 'static> QueryTask<T> {
    fn new(name: &'static str, min_period: Duration) -> Self {
        Self {
            name,
            min_period,
            last_issued: None,
            in_flight: None,
        }
    }

    /// Take the result of a finished in-flight query, if one completed.
    async fn harvest(&mut self) -> Option<Result<T, StriderError>> {
        let handle = self.in_flight.take_if(|h| h.is_finished())?;
        match handle.await {
            Ok(result) => Some(result),
            Err(join_err) => Some(Err(StriderError::comm(self.name, join_err))),
        }
    }

    /// Whether a new query may be issued this tick.
    fn ready(&self, now: Instant) -> bool {
        self.in_flight.is_none()
            && self
                .last_issued
                .is_none_or(|at| now.duration_since(at) >= self.min_period)
    }

    fn issue(&mut self, now: Instant, handle: JoinHandle<Result<T, StriderError>>) {
        self.last_issued = Some(now);
        self.in_flight = Some(handle);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Poller
// ────────────────────────────────────────────────────────────────────────────

/// The telemetry scheduler. Owned by its task; the rest of the system
/// reads results through the shared [`TelemetryCache`].
pub struct Poller {
    services: RobotServices,
    cache: TelemetryCache,
    controls: VideoControls,
    log: SessionState,
    image_source: String,
    state_task: QueryTask<RobotState>,
    image_task: QueryTask<ImageFrame>,
}

impl Poller {
    pub fn new(
        services: RobotServices,
        cache: TelemetryCache,
        controls: VideoControls,
        log: SessionState,
        image_source: impl Into<String>,
    ) -> Self {
        Self {
            services,
            cache,
            controls,
            log,
            image_source: image_source.into(),
            state_task: QueryTask::new("robot_state", STATE_QUERY_PERIOD),
            image_task: QueryTask::new("image", POLL_TICK_PERIOD),
        }
    }

    /// One scheduler step: harvest finished queries, then issue new ones.
    pub async fn tick(&mut self) {
        let now = Instant::now();

        if let Some(result) = self.state_task.harvest().await {
            match result {
                Ok(state) => self.cache.store_state(state),
                Err(err) => {
                    warn!(%err, "robot state query failed");
                    self.log.push_message(format!("Failed robot_state query: {err}"));
                }
            }
        }
        if self.state_task.ready(now) {
            let state = Arc::clone(&self.services.state);
            self.state_task
                .issue(now, tokio::spawn(async move { state.query_state().await }));
        }

        if let Some(result) = self.image_task.harvest().await {
            match result {
                Ok(frame) => self.cache.store_image(frame),
                Err(err) => {
                    warn!(%err, "image capture failed");
                    self.log.push_message(format!("Failure getting image: {err}"));
                }
            }
        }
        let wants_image = self.controls.video_enabled() || self.controls.one_shot_pending();
        if wants_image && self.image_task.ready(now) {
            self.controls.clear_one_shot();
            let images = Arc::clone(&self.services.images);
            let source = self.image_source.clone();
            self.image_task
                .issue(now, tokio::spawn(async move { images.capture(&source).await }));
        }
    }

    /// Tick at [`POLL_TICK_PERIOD`] until the shutdown flag flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(POLL_TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
