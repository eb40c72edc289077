//! Single-target lock with hysteresis, duration floors and occlusion tolerance

use crate::bbox::Point;
use crate::history::MotionHistory;
use crate::identity::TargetId;
use crate::selector::{Candidate, Preference, TargetSelector};

/// Lock tuning. Durations are in seconds, distances in detection-space pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct LockConfig {
    /// A lock younger than this is never replaced
    pub min_lock_duration: f64,
    /// A lock older than this may be replaced by a much closer target
    pub max_lock_duration: f64,
    /// Maximum jump between frames for a candidate to count as the locked target
    pub distance_threshold: f32,
    /// How long a lost lock keeps reporting its last position before clearing
    pub reacquire_timeout: f64,
    /// An alternative must be closer than `switch_threshold * current distance`
    pub switch_threshold: f32,
    /// Report the extrapolated position instead of the measured one
    pub prediction_enabled: bool,
    /// How far ahead (seconds) the extrapolation looks
    pub prediction_lead: f64,
    pub preference: Preference,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            min_lock_duration: 0.8,
            max_lock_duration: 5.0,
            distance_threshold: 150.0,
            reacquire_timeout: 0.5,
            switch_threshold: 0.7,
            prediction_enabled: true,
            prediction_lead: 0.016,
            preference: Preference::Closest,
        }
    }
}

/// An active lock
#[derive(Debug, Clone, PartialEq)]
pub struct Lock {
    pub id: TargetId,
    pub started_at: f64,
    pub last_known_position: Point,
    pub last_confidence: f32,
    pub last_distance: f32,
    /// Set while the target is not matched; cleared on every match
    pub lost_since: Option<f64>,
}

/// Lock state owned by [`LockStateMachine`]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LockState {
    #[default]
    Unlocked,
    Locked(Lock),
}

impl LockState {
    pub fn lock(&self) -> Option<&Lock> {
        match self {
            Self::Locked(lock) => Some(lock),
            Self::Unlocked => None,
        }
    }

    pub fn locked_id(&self) -> Option<TargetId> {
        self.lock().map(|lock| lock.id)
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked(_))
    }
}

/// How the reported aim point was obtained this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    /// A new lock was taken this frame
    Acquired,
    /// The locked target was matched this frame
    Tracking,
    /// The lock moved to a significantly closer target
    Switched,
    /// The locked target is missing; last known position is reported
    Coasting,
}

/// Per-frame output of the lock state machine
#[derive(Debug, Clone, PartialEq)]
pub struct LockOutput {
    pub id: TargetId,
    pub aim_point: Point,
    pub status: TrackStatus,
    /// True when `aim_point` came from motion extrapolation
    pub predicted: bool,
}

/// Decides each frame whether to keep, switch, or drop the lock
#[derive(Debug, Clone, Default)]
pub struct LockStateMachine {
    config: LockConfig,
    state: LockState,
}

impl LockStateMachine {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            state: LockState::Unlocked,
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Apply new tuning; the current lock is kept
    pub fn set_config(&mut self, config: LockConfig) {
        self.config = config;
    }

    pub fn state(&self) -> &LockState {
        &self.state
    }

    /// Drop the lock explicitly
    pub fn unlock(&mut self) {
        if let LockState::Locked(lock) = &self.state {
            log::debug!("Lock on {} released", lock.id);
        }
        self.state = LockState::Unlocked;
    }

    /// Advance the lock by one frame.
    ///
    /// `candidates` must already be filtered by the selector; `history` must
    /// already contain this frame's samples.
    pub fn update(
        &mut self,
        candidates: &[Candidate],
        selector: &TargetSelector,
        history: &MotionHistory,
        now: f64,
    ) -> Option<LockOutput> {
        let lock = match &self.state {
            LockState::Locked(lock) => lock.clone(),
            LockState::Unlocked => return self.acquire(candidates, selector, now),
        };

        match self.find_match(&lock, candidates) {
            Some(matched) => {
                let switch_to = self.switch_candidate(&lock, matched, selector, candidates, now);
                if let Some(alternative) = switch_to {
                    log::debug!(
                        "Switching lock {} -> {} ({:.1}px vs {:.1}px)",
                        lock.id,
                        alternative.id,
                        alternative.distance_to_center,
                        matched.distance_to_center
                    );
                    self.lock_onto(alternative, now);
                    return Some(LockOutput {
                        id: alternative.id,
                        aim_point: alternative.aim_point,
                        status: TrackStatus::Switched,
                        predicted: false,
                    });
                }

                self.state = LockState::Locked(Lock {
                    id: matched.id,
                    started_at: lock.started_at,
                    last_known_position: matched.aim_point,
                    last_confidence: matched.confidence,
                    last_distance: matched.distance_to_center,
                    lost_since: None,
                });

                let predicted = if self.config.prediction_enabled {
                    history.predict(&matched.id, now + self.config.prediction_lead)
                } else {
                    None
                };

                Some(LockOutput {
                    id: matched.id,
                    aim_point: predicted.unwrap_or(matched.aim_point),
                    status: TrackStatus::Tracking,
                    predicted: predicted.is_some(),
                })
            }
            None => {
                let lost_since = lock.lost_since.unwrap_or(now);
                if now - lost_since > self.config.reacquire_timeout {
                    log::debug!(
                        "Lock on {} expired after {:.3}s without a match",
                        lock.id,
                        now - lost_since
                    );
                    self.state = LockState::Unlocked;
                    return self.acquire(candidates, selector, now);
                }

                let output = LockOutput {
                    id: lock.id,
                    aim_point: lock.last_known_position,
                    status: TrackStatus::Coasting,
                    predicted: false,
                };
                self.state = LockState::Locked(Lock {
                    lost_since: Some(lost_since),
                    ..lock
                });
                Some(output)
            }
        }
    }

    fn acquire(
        &mut self,
        candidates: &[Candidate],
        selector: &TargetSelector,
        now: f64,
    ) -> Option<LockOutput> {
        let selected = selector.select(candidates, self.config.preference)?;
        log::debug!(
            "Locked onto {} at ({:.1}, {:.1})",
            selected.id,
            selected.aim_point.x,
            selected.aim_point.y
        );
        self.lock_onto(selected, now);
        Some(LockOutput {
            id: selected.id,
            aim_point: selected.aim_point,
            status: TrackStatus::Acquired,
            predicted: false,
        })
    }

    fn lock_onto(&mut self, candidate: &Candidate, now: f64) {
        self.state = LockState::Locked(Lock {
            id: candidate.id,
            started_at: now,
            last_known_position: candidate.aim_point,
            last_confidence: candidate.confidence,
            last_distance: candidate.distance_to_center,
            lost_since: None,
        });
    }

    /// Exact identity first, otherwise the nearest candidate inside the
    /// distance gate around the last known position.
    fn find_match<'a>(&self, lock: &Lock, candidates: &'a [Candidate]) -> Option<&'a Candidate> {
        if let Some(exact) = candidates.iter().find(|c| c.id == lock.id) {
            return Some(exact);
        }

        let mut best: Option<(&Candidate, f32)> = None;
        for candidate in candidates {
            let d = nalgebra::distance(&candidate.aim_point, &lock.last_known_position);
            if d >= self.config.distance_threshold {
                continue;
            }
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((candidate, d)),
            }
        }
        best.map(|(candidate, _)| candidate)
    }

    /// Closest alternative that is allowed to replace the current lock, if any
    fn switch_candidate<'a>(
        &self,
        lock: &Lock,
        current: &Candidate,
        selector: &TargetSelector,
        candidates: &'a [Candidate],
        now: f64,
    ) -> Option<&'a Candidate> {
        let age = now - lock.started_at;
        if age < self.config.min_lock_duration || age <= self.config.max_lock_duration {
            return None;
        }

        let best = selector.closest(candidates)?;
        if best.id != current.id
            && best.distance_to_center < current.distance_to_center * self.config.switch_threshold
        {
            Some(best)
        } else {
            None
        }
    }
}
