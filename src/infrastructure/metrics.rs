//! Metric names and recording helpers
//!
//! Recording is a no-op until a recorder is installed (see
//! `interface::api::metrics_handler::init_metrics`).

use metrics::{counter, describe_counter, describe_gauge, gauge};

pub const ACTIVE_CALLS: &str = "callrelay_active_calls";
pub const REGISTERED_LINES: &str = "callrelay_registered_lines";
pub const CALLS_TOTAL: &str = "callrelay_calls_total";
pub const REGISTRATIONS_TOTAL: &str = "callrelay_registrations_total";
pub const RELAY_PACKETS_TOTAL: &str = "callrelay_relay_packets_total";

/// Relay direction label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDirection {
    BrowserToCall,
    CallToBrowser,
}

impl RelayDirection {
    fn label(&self) -> &'static str {
        match self {
            RelayDirection::BrowserToCall => "browser_to_call",
            RelayDirection::CallToBrowser => "call_to_browser",
        }
    }
}

pub fn describe() {
    describe_gauge!(ACTIVE_CALLS, "Number of calls currently tracked by the orchestrator");
    describe_gauge!(REGISTERED_LINES, "Number of lines currently registered");
    describe_counter!(CALLS_TOTAL, "Total number of calls created, by direction");
    describe_counter!(REGISTRATIONS_TOTAL, "Total number of line registration attempts");
    describe_counter!(RELAY_PACKETS_TOTAL, "Total number of RTP packets relayed by the bridge");
}

/// Set active calls count
pub fn set_active_calls(count: usize) {
    gauge!(ACTIVE_CALLS).set(count as f64);
}

pub fn line_registered() {
    gauge!(REGISTERED_LINES).increment(1.0);
}

pub fn line_unregistered() {
    gauge!(REGISTERED_LINES).decrement(1.0);
}

/// Record a registration outcome
pub fn record_registration(success: bool) {
    counter!(REGISTRATIONS_TOTAL, "success" => success.to_string()).increment(1);
}

pub fn record_call(direction: &'static str) {
    counter!(CALLS_TOTAL, "direction" => direction).increment(1);
}

pub fn record_relayed_packet(direction: RelayDirection) {
    counter!(RELAY_PACKETS_TOTAL, "direction" => direction.label()).increment(1);
}
