//! Per-identity motion history with linear velocity extrapolation

use crate::bbox::Point;
use crate::identity::TargetId;
use nalgebra::Vector2;
use std::collections::{HashMap, VecDeque};

/// Default number of samples kept per identity
pub const DEFAULT_CAPACITY: usize = 10;
/// Default inactivity window after which an identity is forgotten (seconds)
pub const DEFAULT_TIMEOUT: f64 = 2.0;

/// One observed position of an identity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub position: Point,
    /// Seconds on the caller's monotonic clock
    pub timestamp: f64,
}

/// Ring buffer of recent samples for every identity seen lately.
///
/// Invariant: each buffer is ordered by ascending timestamp and holds at most
/// `capacity` samples.
#[derive(Debug, Clone)]
pub struct MotionHistory {
    tracks: HashMap<TargetId, VecDeque<MotionSample>>,
    capacity: usize,
}

impl Default for MotionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MotionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            tracks: HashMap::new(),
            capacity: capacity.max(2),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample, evicting the oldest one once the buffer is full.
    ///
    /// Samples older than the newest stored one are ignored to keep the buffer
    /// time-ordered.
    pub fn update(&mut self, id: TargetId, position: Point, timestamp: f64) {
        let capacity = self.capacity;
        let samples = self
            .tracks
            .entry(id)
            .or_insert_with(|| VecDeque::with_capacity(capacity));

        if let Some(last) = samples.back() {
            if timestamp < last.timestamp {
                log::debug!(
                    "Dropping out-of-order sample for {}: {:.4} < {:.4}",
                    id,
                    timestamp,
                    last.timestamp
                );
                return;
            }
        }

        samples.push_back(MotionSample {
            position,
            timestamp,
        });
        while samples.len() > capacity {
            samples.pop_front();
        }
    }

    /// Velocity (pixels/second) from the two most recent samples
    pub fn velocity(&self, id: &TargetId) -> Option<Vector2<f32>> {
        let (prev, last) = self.last_two(id)?;
        let dt = last.timestamp - prev.timestamp;
        if dt <= 0.0 {
            return None;
        }
        Some((last.position - prev.position) / dt as f32)
    }

    /// Linear extrapolation of the identity's position to `at_time`.
    ///
    /// Returns `None` with fewer than two samples. When the two newest samples
    /// share a timestamp the last known position is returned unchanged.
    pub fn predict(&self, id: &TargetId, at_time: f64) -> Option<Point> {
        let (prev, last) = self.last_two(id)?;
        let dt = last.timestamp - prev.timestamp;
        if dt <= 0.0 {
            return Some(last.position);
        }

        let velocity = (last.position - prev.position) / dt as f32;
        let lead = (at_time - last.timestamp) as f32;
        Some(last.position + velocity * lead)
    }

    /// Forget every identity whose newest sample is older than `timeout`
    pub fn cleanup(&mut self, now: f64, timeout: f64) {
        let before = self.tracks.len();
        self.tracks.retain(|_, samples| {
            samples
                .back()
                .map_or(false, |last| now - last.timestamp <= timeout)
        });
        let removed = before - self.tracks.len();
        if removed > 0 {
            log::debug!("Motion history evicted {} stale identities", removed);
        }
    }

    /// Most recent sample of an identity
    pub fn latest(&self, id: &TargetId) -> Option<&MotionSample> {
        self.tracks.get(id).and_then(|samples| samples.back())
    }

    pub fn samples(&self, id: &TargetId) -> Option<&VecDeque<MotionSample>> {
        self.tracks.get(id)
    }

    pub fn contains(&self, id: &TargetId) -> bool {
        self.tracks.contains_key(id)
    }

    /// Number of identities currently tracked
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    fn last_two(&self, id: &TargetId) -> Option<(&MotionSample, &MotionSample)> {
        let samples = self.tracks.get(id)?;
        let n = samples.len();
        if n < 2 {
            return None;
        }
        Some((&samples[n - 2], &samples[n - 1]))
    }
}
