//! Media plumbing shared by the relay paths

pub mod relay;
pub mod silence;
pub mod sink;

pub use relay::{CallView, GateDecision, RelayGate, ThrottledLog};
pub use silence::{SilenceFrames, SilenceGenerator, DEFAULT_FRAME_PERIOD, OPUS_SILENCE_FRAME};
pub use sink::{RtpSink, RtpSource};
