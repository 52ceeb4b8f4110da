//! Operator status lines rendered from cached telemetry and machine
//! state. Everything reads the latest snapshot; nothing here talks to the
//! robot.

use strider_types::{EstopLevel, PowerState};

use crate::keepalive::Keepalive;
use crate::poller::TelemetryCache;
use crate::state::SessionState;

/// `Lease body:7 THREAD:RUNNING` / `Lease RETURNED THREAD:STOPPED`
pub fn lease_line(state: &SessionState, machine: &Keepalive) -> String {
    if !machine.is_active() {
        return "Lease RETURNED THREAD:STOPPED".to_string();
    }
    match state.lease() {
        Some(lease) => format!(
            "Lease {}:{} THREAD:RUNNING",
            lease.resource, lease.sequence
        ),
        None => "Lease ... THREAD:RUNNING".to_string(),
    }
}

/// `Power: ON` / `Power: OFF` / `Power: UNKNOWN`
pub fn power_line(cache: &TelemetryCache) -> String {
    let state = match cache.power() {
        PowerState::On => "ON",
        PowerState::Off => "OFF",
        PowerState::Unknown => "UNKNOWN",
    };
    format!("Power: {state}")
}

/// `Estop NOT_STOPPED (thread: RUNNING)`; a disabled machine reports
/// `NOT ESTOP` as its terminal thread status.
pub fn estop_line(cache: &TelemetryCache, machine: &Keepalive) -> String {
    let thread = if machine.is_disabled() {
        "NOT ESTOP"
    } else if machine.is_active() {
        "RUNNING"
    } else {
        "STOPPED"
    };
    let status = cache
        .latest_state()
        .and_then(|s| s.software_estop())
        .map_or("??", |level| match level {
            EstopLevel::NotStopped => "NOT_STOPPED",
            EstopLevel::Stopped => "STOPPED",
            EstopLevel::Unknown => "UNKNOWN",
        });
    format!("Estop {status} (thread: {thread})")
}

/// `Battery: 87% |========  | (01:30:00)`; empty before the first
/// successful poll.
pub fn battery_line(cache: &TelemetryCache) -> String {
    let Some(state) = cache.latest_state() else {
        return String::new();
    };
    let Some(battery) = state.battery else {
        return String::new();
    };

    let bar = battery.charge_percent.map_or(String::new(), |percent| {
        let filled = (percent as usize / 10).min(10);
        format!(" |{}{}|", "=".repeat(filled), " ".repeat(10 - filled))
    });
    let time_left = battery
        .estimated_runtime_secs
        .map_or(String::new(), |secs| format!(" ({})", secs_to_hms(secs)));
    let percent = battery
        .charge_percent
        .map_or("??".to_string(), |p| format!("{p:.0}%"));

    format!("Battery: {percent}{bar}{time_left}")
}

fn secs_to_hms(secs: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}
