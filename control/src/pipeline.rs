//! Single-frame orchestration: candidates, lock, smoothing, shaping, output
//!
//! Stage order per frame:
//! 1. build candidates from the frame's detections
//! 2. under the tracking mutex: append history, prune it, advance the lock
//! 3. shape the lock's aim point (blend, device units, smoother, dead-zone)
//! 4. send through the rate-limited output if the gate is open
//!
//! History and the lock are updated on every frame regardless of the gate,
//! so opening the gate never starts from stale state.

use crate::actuator::{RateLimitedOutput, SendOutcome, SharedActuator};
use crate::config::ControlConfig;
use crate::error::Result;
use crate::source::Frame;
use locktrack::history::DEFAULT_TIMEOUT;
use locktrack::{
    LockOutput, LockStateMachine, MotionHistory, MotionShaper, ShapedMove, StatisticalSmoother,
    TargetSelector,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Lock and history, written only by the control loop
#[derive(Debug, Default)]
pub struct TrackingState {
    pub history: MotionHistory,
    pub lock: LockStateMachine,
}

pub type SharedTracking = Arc<Mutex<TrackingState>>;

/// What happened during one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub candidates: usize,
    pub lock: Option<LockOutput>,
    /// Whether the locked target is classified as moving
    pub moving: bool,
    /// `None` when nothing was shaped (no lock, gate closed, output off)
    pub shaped: Option<ShapedMove>,
    /// `None` when the actuator was not called
    pub output: Option<SendOutcome>,
    pub elapsed: Duration,
}

impl FrameReport {
    pub fn sent(&self) -> bool {
        self.output == Some(SendOutcome::Sent)
    }

    pub fn suppressed(&self) -> bool {
        self.shaped.map_or(false, |s| s.suppressed)
    }
}

pub struct FramePipeline {
    tracking: SharedTracking,
    selector: TargetSelector,
    smoother: StatisticalSmoother,
    shaper: MotionShaper,
    output: RateLimitedOutput,
    origin: Instant,
}

impl FramePipeline {
    pub fn new(actuator: SharedActuator, config: &ControlConfig) -> Self {
        Self {
            tracking: Arc::new(Mutex::new(TrackingState {
                history: MotionHistory::default(),
                lock: LockStateMachine::new(config.lock_config()),
            })),
            selector: TargetSelector::new(config.fov, config.aim_height),
            smoother: StatisticalSmoother::new(config.smoother_config()),
            shaper: MotionShaper::new(),
            output: RateLimitedOutput::new(actuator, &config.actuator),
            origin: Instant::now(),
        }
    }

    /// Handle for readers on other threads
    pub fn tracking(&self) -> SharedTracking {
        Arc::clone(&self.tracking)
    }

    pub fn output(&self) -> &RateLimitedOutput {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut RateLimitedOutput {
        &mut self.output
    }

    pub fn smoother(&self) -> &StatisticalSmoother {
        &self.smoother
    }

    /// Re-derive cached stage parameters from a new configuration
    pub fn apply_config(&mut self, config: &ControlConfig) {
        self.lock_tracking().lock.set_config(config.lock_config());
        self.selector.set_geometry(config.fov, config.aim_height);
        self.smoother.reconfigure(config.smoother_config());
        self.output.configure(&config.actuator);
        log::debug!("Pipeline reconfigured");
    }

    /// Drop the lock, motion history and blend state
    pub fn reset(&mut self) {
        {
            let mut tracking = self.lock_tracking();
            tracking.lock.unlock();
            tracking.history.clear();
        }
        self.shaper.reset();
    }

    fn lock_tracking(&self) -> MutexGuard<'_, TrackingState> {
        self.tracking.lock().unwrap_or_else(|poisoned| {
            log::warn!("Tracking state lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn seconds(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.origin).as_secs_f64()
    }

    /// Process one frame.
    ///
    /// Fails only for a malformed frame, in which case no state is touched.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        config: &ControlConfig,
        gate_active: bool,
        now: Instant,
    ) -> Result<FrameReport> {
        frame.validate()?;
        let started = Instant::now();
        let t = self.seconds(now);

        self.selector.set_geometry(frame.fov, config.aim_height);
        let candidates = self.selector.candidates(&frame.detections);

        let (lock, moving) = {
            let mut tracking = self.lock_tracking();
            let TrackingState { history, lock } = &mut *tracking;
            for c in &candidates {
                history.update(c.id, c.aim_point, t);
            }
            history.cleanup(t, DEFAULT_TIMEOUT);

            let output = lock.update(&candidates, &self.selector, history, t);
            let moving = output
                .as_ref()
                .and_then(|o| history.velocity(&o.id))
                .map_or(false, |v| v.norm() > config.movement.moving_speed_threshold);
            (output, moving)
        };

        let mut report = FrameReport {
            candidates: candidates.len(),
            lock,
            moving,
            shaped: None,
            output: None,
            elapsed: Duration::ZERO,
        };

        let Some(target) = report.lock.as_ref() else {
            self.shaper.reset();
            report.elapsed = started.elapsed();
            return Ok(report);
        };

        if !config.enabled || !gate_active {
            report.elapsed = started.elapsed();
            return Ok(report);
        }
        if self.output.is_disabled() {
            report.output = Some(SendOutcome::Disabled);
            report.elapsed = started.elapsed();
            return Ok(report);
        }

        let mut params = config.shaper_params();
        params.fov = frame.fov;
        let smoother = if config.kalman.use_kalman {
            Some(&mut self.smoother)
        } else {
            None
        };
        let shaped = self.shaper.shape(target.aim_point, &params, smoother, moving);
        report.shaped = Some(shaped);

        if !shaped.suppressed && !shaped.is_zero() {
            report.output = Some(self.output.try_send(shaped.dx, shaped.dy, now));
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }
}
