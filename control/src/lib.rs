//! Motion control runtime
//!
//! Drives a relative-motion actuator from a stream of detection frames using
//! the `locktrack` lock/smoothing/shaping core. Provides the boundaries the
//! core needs (detection source, configuration source, activation gate,
//! actuator), a rate-limited output with failure self-disable, and a
//! threaded control loop with cooperative cancellation.

pub mod actuator;
pub mod actuator_stub;
pub mod config;
pub mod control_loop;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod quick_move;
pub mod source;
pub mod worker;

pub use actuator::{Actuator, MouseButton, RateLimitedOutput, SendOutcome, SharedActuator};
pub use actuator_stub::StubActuator;
pub use config::{ConfigSource, ConfigStore, ControlConfig};
pub use control_loop::{Controller, ControllerStatus, LoopOptions};
pub use error::{ControlError, Result};
pub use gate::{ActivationGate, AlwaysActive, AtomicGate};
pub use pipeline::{FramePipeline, FrameReport, TrackingState};
pub use quick_move::{QuickMove, QuickMoveReport};
pub use source::{frame_channel, ChannelSource, DetectionSource, Frame, FrameSender};
pub use worker::Worker;

/// Get library version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
