//! Control loop lifecycle and status
//!
//! One worker thread pulls frames from the detection source and runs them
//! through a [`FramePipeline`]. Configuration is read as a snapshot at the
//! start of every frame; cached stage parameters are re-derived only after the
//! configuration source signalled a change.

use crate::actuator::SharedActuator;
use crate::config::ConfigSource;
use crate::error::Result;
use crate::gate::ActivationGate;
use crate::pipeline::{FramePipeline, FrameReport, SharedTracking};
use crate::source::DetectionSource;
use crate::worker::{Worker, DEFAULT_JOIN_TIMEOUT};
use locktrack::TargetId;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Loop timing
#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Longest wait for a frame before re-checking the running flag
    pub frame_timeout: Duration,
    pub join_timeout: Duration,
    /// Log a statistics line every this many frames; 0 disables it
    pub stats_interval: u64,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_millis(5),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            stats_interval: 500,
        }
    }
}

/// Observable controller state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerStatus {
    pub running: bool,
    /// Output turned itself off after repeated actuator failures
    pub output_disabled: bool,
    pub frames_processed: u64,
    /// Frames dropped because they were malformed or processing panicked
    pub frames_skipped: u64,
    pub commands_sent: u64,
    /// Moves dropped by the dead-zone
    pub commands_suppressed: u64,
    pub rate_limited: u64,
    pub actuator_failures: u64,
    pub locked_target: Option<TargetId>,
    pub last_frame_time: Duration,
}

type SharedStatus = Arc<Mutex<ControllerStatus>>;

fn lock_status(status: &SharedStatus) -> MutexGuard<'_, ControllerStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Starts and stops the control loop
pub struct Controller {
    config: Arc<dyn ConfigSource>,
    actuator: SharedActuator,
    gate: Arc<dyn ActivationGate>,
    options: LoopOptions,
    dirty: Arc<AtomicBool>,
    status: SharedStatus,
    tracking: Option<SharedTracking>,
    worker: Option<Worker>,
}

impl Controller {
    pub fn new(
        config: Arc<dyn ConfigSource>,
        actuator: SharedActuator,
        gate: Arc<dyn ActivationGate>,
    ) -> Self {
        Self::with_options(config, actuator, gate, LoopOptions::default())
    }

    pub fn with_options(
        config: Arc<dyn ConfigSource>,
        actuator: SharedActuator,
        gate: Arc<dyn ActivationGate>,
        options: LoopOptions,
    ) -> Self {
        let dirty = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dirty);
        config.register_callback(Box::new(move |_| flag.store(true, Ordering::Release)));

        Self {
            config,
            actuator,
            gate,
            options,
            dirty,
            status: Arc::new(Mutex::new(ControllerStatus::default())),
            tracking: None,
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map_or(false, |w| w.is_running() && !w.is_finished())
    }

    pub fn status(&self) -> ControllerStatus {
        let mut status = lock_status(&self.status).clone();
        status.running = self.is_running();
        status
    }

    /// Lock and history of the current (or last) run
    pub fn tracking(&self) -> Option<SharedTracking> {
        self.tracking.clone()
    }

    /// Start the loop on `source`. Does nothing if already running.
    pub fn start(&mut self, source: Box<dyn DetectionSource>) -> Result<()> {
        if self.is_running() {
            log::warn!("Control loop already running");
            return Ok(());
        }
        self.stop();

        let snapshot = self.config.snapshot();
        let pipeline = FramePipeline::new(self.actuator.clone(), &snapshot);
        self.tracking = Some(pipeline.tracking());
        self.dirty.store(false, Ordering::Release);
        *lock_status(&self.status) = ControllerStatus::default();

        let ctx = LoopContext {
            config: Arc::clone(&self.config),
            gate: Arc::clone(&self.gate),
            dirty: Arc::clone(&self.dirty),
            status: Arc::clone(&self.status),
            options: self.options.clone(),
        };
        let worker = Worker::spawn("control-loop", move |running| {
            run_loop(ctx, pipeline, source, &running)
        })?;
        self.worker = Some(worker);

        log::info!("Control loop started (actuator: {})", self.actuator.name());
        Ok(())
    }

    /// Stop the loop and wait a bounded time for it to exit. Idempotent.
    pub fn stop(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        if worker.stop(self.options.join_timeout) {
            log::info!("Control loop stopped");
        }
        if let Some(tracking) = &self.tracking {
            let mut state = tracking.lock().unwrap_or_else(|p| p.into_inner());
            state.lock.unlock();
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LoopContext {
    config: Arc<dyn ConfigSource>,
    gate: Arc<dyn ActivationGate>,
    dirty: Arc<AtomicBool>,
    status: SharedStatus,
    options: LoopOptions,
}

fn run_loop(
    ctx: LoopContext,
    mut pipeline: FramePipeline,
    mut source: Box<dyn DetectionSource>,
    running: &AtomicBool,
) {
    let mut output_was_disabled = false;
    let mut frames: u64 = 0;
    let mut window_start = Instant::now();

    while running.load(Ordering::Acquire) {
        let Some(frame) = source.next_frame(ctx.options.frame_timeout) else {
            continue;
        };
        if !running.load(Ordering::Acquire) {
            break;
        }

        let config = ctx.config.snapshot();
        if ctx.dirty.swap(false, Ordering::AcqRel) {
            pipeline.apply_config(&config);
        }
        if output_was_disabled && config.enabled {
            pipeline.output_mut().enable();
            output_was_disabled = false;
        }

        let gate_active = ctx.gate.is_active();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pipeline.process_frame(&frame, &config, gate_active, Instant::now())
        }));

        match result {
            Ok(Ok(report)) => record(&ctx.status, &report),
            Ok(Err(e)) => {
                log::warn!("Skipping frame: {}", e);
                lock_status(&ctx.status).frames_skipped += 1;
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("Frame processing panicked: {}", message);
                lock_status(&ctx.status).frames_skipped += 1;
            }
        }

        let disabled = pipeline.output().is_disabled();
        {
            let mut status = lock_status(&ctx.status);
            status.output_disabled = disabled;
            let stats = pipeline.output().stats();
            status.commands_sent = stats.sent;
            status.rate_limited = stats.rate_limited;
            status.actuator_failures = stats.failures;
        }
        if disabled && !output_was_disabled {
            log::error!("Output disabled after repeated actuator failures, reporting");
            output_was_disabled = true;
            ctx.config.set_enabled(false);
        }

        frames += 1;
        if ctx.options.stats_interval > 0 && frames % ctx.options.stats_interval == 0 {
            let elapsed = window_start.elapsed().as_secs_f32();
            let status = lock_status(&ctx.status).clone();
            log::info!(
                "Control loop: {:.1} FPS, {} sent, {} suppressed, {} rate-limited, last frame {:.2}ms",
                ctx.options.stats_interval as f32 / elapsed.max(f32::EPSILON),
                status.commands_sent,
                status.commands_suppressed,
                status.rate_limited,
                status.last_frame_time.as_secs_f32() * 1000.0
            );
            window_start = Instant::now();
        }
    }
}

fn record(status: &SharedStatus, report: &FrameReport) {
    let mut status = lock_status(status);
    status.frames_processed += 1;
    status.locked_target = report.lock.as_ref().map(|l| l.id);
    status.last_frame_time = report.elapsed;
    if report.suppressed() {
        status.commands_suppressed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator_stub::StubActuator;
    use crate::config::{ConfigStore, ControlConfig};
    use crate::gate::AtomicGate;
    use crate::source::{frame_channel, Frame, FrameSender};
    use locktrack::{Bbox, Detection};
    use std::thread;

    fn target_frame(x: f32, y: f32) -> Frame {
        Frame::new(
            vec![Detection::new(
                Bbox::new(x - 15.0, y - 30.0, x + 15.0, y + 30.0),
                0.9,
                "target",
            )],
            320.0,
        )
    }

    struct Fixture {
        controller: Controller,
        store: Arc<ConfigStore>,
        stub: StubActuator,
        gate: Arc<AtomicGate>,
        frames: FrameSender,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(ConfigStore::new(ControlConfig::default()));
        let stub = StubActuator::new();
        let gate = Arc::new(AtomicGate::new(true));
        let mut controller = Controller::with_options(
            store.clone(),
            SharedActuator::new(stub.clone()),
            gate.clone(),
            LoopOptions {
                frame_timeout: Duration::from_millis(2),
                join_timeout: Duration::from_secs(1),
                stats_interval: 0,
            },
        );
        let (frames, source) = frame_channel(4);
        controller.start(Box::new(source)).unwrap();
        Fixture {
            controller,
            store,
            stub,
            gate,
            frames,
        }
    }

    fn feed(frames: &FrameSender, n: usize, x: f32) {
        for _ in 0..n {
            frames.send(target_frame(x, 160.0));
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_start_stop_idempotent() {
        let mut f = fixture();
        assert!(f.controller.is_running());
        f.controller.stop();
        assert!(!f.controller.is_running());
        f.controller.stop();
        assert!(!f.controller.status().running);
    }

    #[test]
    fn test_loop_moves_toward_target() {
        let mut f = fixture();
        feed(&f.frames, 20, 260.0);
        f.controller.stop();

        let status = f.controller.status();
        assert!(status.frames_processed > 0);
        assert!(status.commands_sent > 0);
        assert!(f.stub.total_motion().0 > 0);
    }

    #[test]
    fn test_closed_gate_tracks_without_output() {
        let mut f = fixture();
        f.gate.set(false);
        feed(&f.frames, 10, 260.0);
        f.controller.stop();

        assert!(f.stub.moves().is_empty());
        let status = f.controller.status();
        assert!(status.frames_processed > 0);
        let tracking = f.controller.tracking().unwrap();
        assert!(!tracking.lock().unwrap().history.is_empty());
    }

    #[test]
    fn test_repeated_failures_disable_and_report() {
        let mut f = fixture();
        f.stub.set_failing(true);
        feed(&f.frames, 20, 300.0);
        f.controller.stop();

        let status = f.controller.status();
        assert!(status.output_disabled);
        assert!(status.actuator_failures >= 6);
        assert!(!f.store.snapshot().enabled);
    }

    #[test]
    fn test_output_resumes_when_re_enabled() {
        let mut f = fixture();
        f.stub.set_failing(true);
        feed(&f.frames, 20, 300.0);
        assert!(f.controller.status().output_disabled);
        assert!(!f.store.snapshot().enabled);
        assert!(f.stub.moves().is_empty());

        f.stub.set_failing(false);
        f.store.set_enabled(true);
        feed(&f.frames, 20, 300.0);
        f.controller.stop();

        let status = f.controller.status();
        assert!(!status.output_disabled);
        assert!(status.commands_sent > 0);
        assert!(!f.stub.moves().is_empty());
        assert!(f.store.snapshot().enabled);
    }

    #[test]
    fn test_config_change_is_picked_up() {
        let mut f = fixture();
        feed(&f.frames, 5, 200.0);
        let mut kalman = f.store.snapshot().kalman;
        kalman.use_coupled_xy = true;
        f.store.update_kalman(kalman);
        feed(&f.frames, 5, 200.0);
        f.controller.stop();

        assert!(f.controller.status().frames_processed >= 2);
        assert!(f.controller.status().frames_skipped == 0);
    }

    #[test]
    fn test_malformed_frames_are_skipped() {
        let mut f = fixture();
        f.frames.send(Frame::new(Vec::new(), -1.0));
        thread::sleep(Duration::from_millis(20));
        feed(&f.frames, 3, 200.0);
        f.controller.stop();

        let status = f.controller.status();
        assert_eq!(status.frames_skipped, 1);
        assert!(status.frames_processed > 0);
    }
}
