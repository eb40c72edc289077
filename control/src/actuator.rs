//! Actuator boundary, shared handle and rate-limited output
//!
//! Every writer holds a [`SharedActuator`] clone. The handle's mutex is the
//! output mutex: one command at a time, never interleaved across threads.

use crate::config::ActuatorConfig;
use crate::error::{ControlError, Result};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MouseButton::Left => write!(f, "left"),
            MouseButton::Right => write!(f, "right"),
        }
    }
}

/// Relative-motion output device
pub trait Actuator: Send {
    /// Move by a signed delta in device units
    fn move_by(&mut self, dx: i32, dy: i32) -> Result<()>;

    /// Connection check; implementations may try to reconnect here
    fn is_connected(&mut self) -> bool;

    /// Press and release a button
    fn click(&mut self, button: MouseButton, hold: Duration) -> Result<()>;

    /// Device name (for logging)
    fn name(&self) -> &str;
}

/// Cloneable handle to a single actuator
#[derive(Clone)]
pub struct SharedActuator {
    inner: Arc<Mutex<Box<dyn Actuator>>>,
}

impl SharedActuator {
    pub fn new<A: Actuator + 'static>(actuator: A) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(actuator))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Actuator>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            log::warn!("Actuator lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Connection check followed by the move, both under the output mutex
    pub fn move_by(&self, dx: i32, dy: i32) -> Result<()> {
        let mut actuator = self.lock();
        if !actuator.is_connected() {
            return Err(ControlError::ActuatorDisconnected);
        }
        actuator.move_by(dx, dy)
    }

    pub fn click(&self, button: MouseButton, hold: Duration) -> Result<()> {
        let mut actuator = self.lock();
        if !actuator.is_connected() {
            return Err(ControlError::ActuatorDisconnected);
        }
        actuator.click(button, hold)
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_connected()
    }

    pub fn name(&self) -> String {
        self.lock().name().to_string()
    }
}

impl fmt::Debug for SharedActuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedActuator").finish_non_exhaustive()
    }
}

/// Minimum spacing between commands
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn set_min_interval(&mut self, min_interval: Duration) {
        self.min_interval = min_interval;
    }

    /// Time left before the next command is allowed; zero when ready
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => (last + self.min_interval).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.remaining(now).is_zero()
    }

    /// Claim the slot at `now` if it is free
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if self.is_ready(now) {
            self.last = Some(now);
            true
        } else {
            false
        }
    }
}

/// Result of one send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Too soon after the previous command; nothing was sent
    RateLimited,
    /// The actuator rejected the command
    Failed,
    /// Output is disabled after repeated failures; nothing was sent
    Disabled,
}

/// Counters kept by [`RateLimitedOutput`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStats {
    pub sent: u64,
    pub rate_limited: u64,
    pub failures: u64,
}

/// Rate limiting and failure accounting in front of a shared actuator.
///
/// After more than `max_consecutive_failures` failures in a row the output
/// disables itself and refuses further commands until re-enabled.
#[derive(Debug)]
pub struct RateLimitedOutput {
    actuator: SharedActuator,
    limiter: RateLimiter,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    disabled: bool,
    stats: OutputStats,
}

impl RateLimitedOutput {
    pub fn new(actuator: SharedActuator, config: &ActuatorConfig) -> Self {
        Self {
            actuator,
            limiter: RateLimiter::new(config.min_interval()),
            max_consecutive_failures: config.max_consecutive_failures,
            consecutive_failures: 0,
            disabled: false,
            stats: OutputStats::default(),
        }
    }

    pub fn actuator(&self) -> &SharedActuator {
        &self.actuator
    }

    /// Pick up changed limits; failure state is kept
    pub fn configure(&mut self, config: &ActuatorConfig) {
        self.limiter.set_min_interval(config.min_interval());
        self.max_consecutive_failures = config.max_consecutive_failures;
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn stats(&self) -> OutputStats {
        self.stats
    }

    /// Clear the failure state and accept commands again
    pub fn enable(&mut self) {
        if self.disabled {
            log::info!("Output to {} re-enabled", self.actuator.name());
        }
        self.disabled = false;
        self.consecutive_failures = 0;
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.limiter.remaining(now)
    }

    /// Send if the rate limiter allows it at `now`
    pub fn try_send(&mut self, dx: i32, dy: i32, now: Instant) -> SendOutcome {
        if self.disabled {
            return SendOutcome::Disabled;
        }
        if !self.limiter.try_acquire(now) {
            self.stats.rate_limited += 1;
            return SendOutcome::RateLimited;
        }

        match self.actuator.move_by(dx, dy) {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.stats.sent += 1;
                SendOutcome::Sent
            }
            Err(e) => {
                self.record_failure(&e);
                SendOutcome::Failed
            }
        }
    }

    /// Sleep out the remaining interval, then send
    pub fn send_blocking(&mut self, dx: i32, dy: i32) -> SendOutcome {
        if self.disabled {
            return SendOutcome::Disabled;
        }
        let wait = self.limiter.remaining(Instant::now());
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        self.try_send(dx, dy, Instant::now())
    }

    fn record_failure(&mut self, error: &ControlError) {
        self.consecutive_failures += 1;
        self.stats.failures += 1;
        log::warn!(
            "Actuator command failed ({} in a row): {}",
            self.consecutive_failures,
            error
        );
        if self.consecutive_failures > self.max_consecutive_failures {
            log::error!(
                "Disabling output to {} after {} consecutive failures",
                self.actuator.name(),
                self.consecutive_failures
            );
            self.disabled = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator_stub::StubActuator;

    fn output(stub: &StubActuator) -> RateLimitedOutput {
        RateLimitedOutput::new(SharedActuator::new(stub.clone()), &ActuatorConfig::default())
    }

    #[test]
    fn test_rate_limiter_spacing() {
        let base = Instant::now();
        let mut limiter = RateLimiter::new(Duration::from_millis(8));
        assert!(limiter.try_acquire(base));
        assert!(!limiter.try_acquire(base + Duration::from_millis(7)));
        assert_eq!(
            limiter.remaining(base + Duration::from_millis(5)),
            Duration::from_millis(3)
        );
        assert!(limiter.try_acquire(base + Duration::from_millis(8)));
    }

    #[test]
    fn test_calls_per_second_bounded() {
        let stub = StubActuator::new();
        let mut out = output(&stub);
        let base = Instant::now();

        // Attempt a command every millisecond for one second
        for ms in 0..1000 {
            out.try_send(3, 0, base + Duration::from_millis(ms));
        }
        let sent = stub.moves().len();
        assert!(sent <= 125, "sent {} commands in one second", sent);
        assert_eq!(sent, 125);
        assert_eq!(out.stats().sent, 125);
        assert_eq!(out.stats().rate_limited, 875);
    }

    #[test]
    fn test_disables_after_repeated_failures() {
        let stub = StubActuator::new();
        stub.set_failing(true);
        let mut out = output(&stub);
        let base = Instant::now();

        for i in 0..6 {
            let outcome = out.try_send(1, 1, base + Duration::from_millis(10 * i));
            assert_eq!(outcome, SendOutcome::Failed);
        }
        assert!(out.is_disabled());
        assert_eq!(
            out.try_send(1, 1, base + Duration::from_secs(1)),
            SendOutcome::Disabled
        );

        stub.set_failing(false);
        out.enable();
        assert_eq!(
            out.try_send(1, 1, base + Duration::from_secs(2)),
            SendOutcome::Sent
        );
    }

    #[test]
    fn test_success_resets_failure_count() {
        let stub = StubActuator::new();
        let mut out = output(&stub);
        let base = Instant::now();

        stub.fail_next(5);
        for i in 0..5 {
            out.try_send(1, 0, base + Duration::from_millis(10 * i));
        }
        assert_eq!(out.consecutive_failures(), 5);
        assert!(!out.is_disabled());

        out.try_send(1, 0, base + Duration::from_millis(100));
        assert_eq!(out.consecutive_failures(), 0);
    }

    #[test]
    fn test_disconnected_counts_as_failure() {
        let stub = StubActuator::new();
        stub.set_connected(false);
        let shared = SharedActuator::new(stub.clone());
        assert!(matches!(
            shared.move_by(1, 1),
            Err(ControlError::ActuatorDisconnected)
        ));
        assert!(stub.moves().is_empty());
    }
}
