//! Short curved moves executed as a sequence of small actuator deltas

use crate::actuator::{RateLimitedOutput, SendOutcome, SharedActuator};
use crate::config::ControlConfig;
use locktrack::curves::{generate_path, smooth_path, step_lengths};
use locktrack::shaper::clamp_to_range;
use locktrack::{CurveType, Point};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Upper bound on the whole move's pacing budget
const MAX_MOVE_TIME: f32 = 0.05;

/// Longest pause between two steps, whatever the configured speed
const MAX_STEP_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuickMoveReport {
    pub steps_planned: usize,
    pub steps_sent: usize,
    pub failures: usize,
    /// Stopped early because the running flag was cleared
    pub cancelled: bool,
    /// Sum of the deltas actually sent
    pub moved: (i32, i32),
}

pub struct QuickMove {
    output: RateLimitedOutput,
    curve: CurveType,
    max_steps: usize,
    speed: f32,
    range: i32,
    smoothing: Option<f32>,
}

impl QuickMove {
    pub fn new(actuator: SharedActuator, config: &ControlConfig) -> Self {
        let movement = &config.movement;
        Self {
            output: RateLimitedOutput::new(actuator, &config.actuator),
            curve: config.curve_type(),
            max_steps: movement.curve_steps,
            speed: movement.movement_speed,
            range: config.actuator.range,
            smoothing: movement
                .smoothing_enabled
                .then_some(movement.smoothing_factor),
        }
    }

    pub fn with_curve(mut self, curve: CurveType) -> Self {
        self.curve = curve;
        self
    }

    pub fn curve(&self) -> CurveType {
        self.curve
    }

    pub fn output(&self) -> &RateLimitedOutput {
        &self.output
    }

    /// Waypoints from `start` to `end` in device units
    pub fn plan(&self, start: Point, end: Point) -> Vec<Point> {
        let path = generate_path(self.curve, start, end, self.max_steps);
        match self.smoothing {
            Some(factor) => smooth_path(&path, factor),
            None => path,
        }
    }

    /// Pause after each step: the move's time budget spread over its points
    pub fn step_delay(&self, path: &[Point]) -> Duration {
        if path.len() < 2 || self.speed.is_nan() || self.speed <= 0.0 {
            return Duration::ZERO;
        }
        let lengths = step_lengths(path);
        let total: f32 = lengths[..lengths.len() - 1].iter().sum();
        let budget = (total / 1000.0).min(MAX_MOVE_TIME);
        let secs = budget / path.len() as f32 / self.speed;
        if !secs.is_finite() {
            return MAX_STEP_DELAY;
        }
        Duration::try_from_secs_f32(secs.max(0.0))
            .unwrap_or(MAX_STEP_DELAY)
            .min(MAX_STEP_DELAY)
    }

    /// Plan and execute a relative move of (dx, dy)
    pub fn move_by(&mut self, dx: f32, dy: f32, running: &AtomicBool) -> QuickMoveReport {
        let path = self.plan(Point::origin(), Point::new(dx, dy));
        self.execute(&path, running)
    }

    /// Send the path as per-step deltas.
    ///
    /// Rounding error is carried into the next step so the sent deltas sum to
    /// the rounded path end. The running flag is checked before every step.
    pub fn execute(&mut self, path: &[Point], running: &AtomicBool) -> QuickMoveReport {
        let mut report = QuickMoveReport {
            steps_planned: path.len().saturating_sub(1),
            ..QuickMoveReport::default()
        };
        if path.len() < 2 {
            return report;
        }

        let delay = self.step_delay(path);
        let origin = path[0];
        let (mut sent_x, mut sent_y) = (0i32, 0i32);

        for point in &path[1..] {
            if !running.load(Ordering::Acquire) {
                log::debug!("Quick move cancelled after {} steps", report.steps_sent);
                report.cancelled = true;
                break;
            }

            let dx = clamp_to_range(point.x - origin.x - sent_x as f32, self.range);
            let dy = clamp_to_range(point.y - origin.y - sent_y as f32, self.range);

            if dx != 0 || dy != 0 {
                match self.output.send_blocking(dx, dy) {
                    SendOutcome::Sent => {
                        sent_x += dx;
                        sent_y += dy;
                        report.steps_sent += 1;
                    }
                    SendOutcome::Disabled => {
                        log::warn!("Quick move aborted: output disabled");
                        break;
                    }
                    SendOutcome::Failed | SendOutcome::RateLimited => report.failures += 1,
                }
            }

            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }

        report.moved = (sent_x, sent_y);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator_stub::StubActuator;

    fn quick_move(curve: CurveType) -> (QuickMove, StubActuator) {
        let stub = StubActuator::new();
        let mut config = ControlConfig::default();
        config.movement.smoothing_enabled = false;
        config.actuator.min_interval_ms = 1;
        let mover = QuickMove::new(SharedActuator::new(stub.clone()), &config).with_curve(curve);
        (mover, stub)
    }

    #[test]
    fn test_deltas_sum_to_target() {
        let (mut mover, stub) = quick_move(CurveType::Bezier);
        let running = AtomicBool::new(true);
        let report = mover.move_by(100.0, -37.0, &running);

        assert_eq!(report.moved, (100, -37));
        assert_eq!(stub.total_motion(), (100, -37));
        assert!(!report.cancelled);
        assert_eq!(report.steps_planned, 3);
    }

    #[test]
    fn test_large_steps_are_clamped() {
        let (mut mover, stub) = quick_move(CurveType::Hermite);
        let running = AtomicBool::new(true);
        mover.move_by(900.0, 0.0, &running);
        assert!(stub.moves().iter().all(|(dx, _)| *dx <= 127));
    }

    #[test]
    fn test_cleared_flag_stops_before_first_step() {
        let (mut mover, stub) = quick_move(CurveType::Sine);
        let running = AtomicBool::new(false);
        let report = mover.move_by(100.0, 0.0, &running);
        assert!(report.cancelled);
        assert_eq!(report.steps_sent, 0);
        assert!(stub.moves().is_empty());
    }

    #[test]
    fn test_step_delay() {
        let (mover, _stub) = quick_move(CurveType::Bezier);
        let path = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(20.0, 0.0),
            Point::new(40.0, 0.0),
        ];
        // 40px -> 0.04s budget over 4 points at speed 3
        let delay = mover.step_delay(&path);
        assert!((delay.as_secs_f32() - 0.04 / 4.0 / 3.0).abs() < 1e-5);

        let long = vec![Point::new(0.0, 0.0), Point::new(500.0, 0.0)];
        assert!((mover.step_delay(&long).as_secs_f32() - 0.05 / 2.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_step_delay_bounded_for_tiny_speed() {
        let stub = StubActuator::new();
        let mut config = ControlConfig::default();
        config.movement.movement_speed = 1e-30;
        let mover = QuickMove::new(SharedActuator::new(stub), &config);
        let path = vec![Point::new(0.0, 0.0), Point::new(40.0, 0.0)];
        assert_eq!(mover.step_delay(&path), MAX_STEP_DELAY);
    }
}
