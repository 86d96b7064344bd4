//! Relay admission and failure accounting
//!
//! Browser audio is only forwarded towards a call once that call exposes a
//! target track and its media session has reported connected. Packets that
//! arrive before then are dropped rather than buffered, so the browser's own
//! pacing is preserved when forwarding starts.

/// What the relay should do with the packet in hand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// No call attached to the bridge
    NoCall,
    /// Call attached but its local track does not exist yet
    NoTarget,
    /// Target known, media session not connected yet
    AwaitingConnect,
    /// Call muted; packet dropped
    Muted,
    Forward,
}

/// Snapshot of the attached call as seen by the relay
#[derive(Debug, Clone, Copy)]
pub struct CallView<'a> {
    pub key: &'a str,
    pub has_target: bool,
    pub connected: bool,
    pub muted: bool,
}

/// Per-direction gate. Opens once per attached call and stays open until a
/// different call is attached.
#[derive(Debug, Default)]
pub struct RelayGate {
    call_key: Option<String>,
    open: bool,
}

impl RelayGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn evaluate(&mut self, call: Option<CallView<'_>>) -> GateDecision {
        let Some(call) = call else {
            self.reset();
            return GateDecision::NoCall;
        };

        if self.call_key.as_deref() != Some(call.key) {
            self.call_key = Some(call.key.to_string());
            self.open = false;
        }

        if !call.has_target {
            return GateDecision::NoTarget;
        }

        if !self.open {
            if !call.connected {
                return GateDecision::AwaitingConnect;
            }
            self.open = true;
        }

        if call.muted {
            return GateDecision::Muted;
        }

        GateDecision::Forward
    }

    fn reset(&mut self) {
        self.call_key = None;
        self.open = false;
    }
}

/// Logs the first failure and then every `every`th one
#[derive(Debug)]
pub struct ThrottledLog {
    count: u64,
    every: u64,
}

impl ThrottledLog {
    pub const DEFAULT_EVERY: u64 = 500;

    pub fn new(every: u64) -> Self {
        Self {
            count: 0,
            every: every.max(1),
        }
    }

    /// Count a failure; returns the running total when it should be logged
    pub fn record(&mut self) -> Option<u64> {
        self.count += 1;
        if self.count == 1 || self.count % self.every == 0 {
            Some(self.count)
        } else {
            None
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Default for ThrottledLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_EVERY)
    }
}
