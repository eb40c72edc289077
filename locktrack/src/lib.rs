//! Single-target lock, motion prediction and output shaping
//!
//! Turns per-frame box detections inside a square FOV into integer movement
//! deltas for a relative-motion actuator. There is no object tracker: boxes
//! are re-identified frame to frame by grid quantization, and a lock state
//! machine with hysteresis decides which identity to follow.
//!
//! ```rust,ignore
//! use locktrack::{Bbox, Detection, LockConfig, LockStateMachine, MotionHistory, TargetSelector};
//!
//! let selector = TargetSelector::new(320.0, 50.0);
//! let mut history = MotionHistory::default();
//! let mut lock = LockStateMachine::new(LockConfig::default());
//!
//! let detections = vec![Detection::new(Bbox::new(150.0, 120.0, 190.0, 220.0), 0.9, "target")];
//! let candidates = selector.candidates(&detections);
//! for c in &candidates {
//!     history.update(c.id, c.aim_point, now);
//! }
//! if let Some(out) = lock.update(&candidates, &selector, &history, now) {
//!     // shape out.aim_point
//! }
//! ```

pub mod bbox;
pub mod curves;
pub mod history;
pub mod identity;
pub mod kalman;
pub mod lock;
pub mod selector;
pub mod shaper;
pub mod smoother;

pub use bbox::{Bbox, Detection, Point};
pub use curves::CurveType;
pub use history::MotionHistory;
pub use identity::{IdentityGrid, TargetId};
pub use lock::{LockConfig, LockOutput, LockState, LockStateMachine, TrackStatus};
pub use selector::{Candidate, Preference, TargetSelector};
pub use shaper::{AngularSpan, DeadZone, MotionShaper, ShapedMove, ShaperParams};
pub use smoother::{SmootherConfig, StatisticalSmoother};
