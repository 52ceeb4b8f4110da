//! [`SessionState`] – the shared mutable core of a session.
//!
//! The message log and the lease handle are the only state touched by more
//! than one concurrency source (request dispatch plus the keepalive
//! renewal tasks), so they live together behind a single `std::sync`
//! mutex. The lock is held only for the read or append itself, never
//! across an `.await` or a robot call.

use std::sync::{Arc, Mutex, MutexGuard};

use strider_types::Lease;
use tracing::info;

use crate::messages::MessageLog;

#[derive(Default)]
struct Shared {
    log: MessageLog,
    lease: Option<Lease>,
}

/// Cloneable handle to the session's message log and lease slot.
///
/// All clones share the same underlying state.
#[derive(Clone, Default)]
pub struct SessionState {
    inner: Arc<Mutex<Shared>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operator-visible message. Also mirrored to the tracing
    /// log so the operational log file carries the full history.
    pub fn push_message(&self, msg: impl Into<String>) {
        let msg = msg.into();
        info!("{msg}");
        self.lock().log.push(msg);
    }

    /// Retained messages, newest first.
    pub fn recent_messages(&self) -> Vec<String> {
        self.lock().log.recent()
    }

    pub fn latest_message(&self) -> Option<String> {
        self.lock().log.latest().map(str::to_string)
    }

    /// The currently held lease, if any.
    pub fn lease(&self) -> Option<Lease> {
        self.lock().lease.clone()
    }

    pub fn store_lease(&self, lease: Lease) {
        self.lock().lease = Some(lease);
    }

    /// Remove and return the held lease.
    pub fn take_lease(&self) -> Option<Lease> {
        self.lock().lease.take()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // A poisoned lock only means a writer panicked mid-append; the
        // log itself is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
