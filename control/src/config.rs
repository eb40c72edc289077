//! Typed runtime configuration and the in-memory configuration store
//!
//! The control loop never reads fields from the shared store directly; it
//! takes a [`ControlConfig`] snapshot at the start of each frame and derives
//! the per-frame parameters of every stage from it.

use crate::error::Result;
use locktrack::{
    AngularSpan, CurveType, DeadZone, LockConfig, Preference, ShaperParams, SmootherConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Slowest quick-move pacing accepted from configuration
pub const MIN_MOVEMENT_SPEED: f32 = 0.01;

/// Angular span mapped onto the detection FOV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AngularFovConfig {
    pub width: f32,
    pub height: f32,
    pub use_separate: bool,
}

impl Default for AngularFovConfig {
    fn default() -> Self {
        Self {
            width: 40.0,
            height: 40.0,
            use_separate: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetLockConfig {
    pub min_lock_duration: f64,
    pub max_lock_duration: f64,
    pub distance_threshold: f32,
    pub reacquire_timeout: f64,
    pub switch_threshold: f32,
    /// closest | centered | confidence | largest | weighted
    pub preference: String,
    pub prediction_enabled: bool,
    pub prediction_lead: f64,
}

impl Default for TargetLockConfig {
    fn default() -> Self {
        let lock = LockConfig::default();
        Self {
            min_lock_duration: lock.min_lock_duration,
            max_lock_duration: lock.max_lock_duration,
            distance_threshold: lock.distance_threshold,
            reacquire_timeout: lock.reacquire_timeout,
            switch_threshold: lock.switch_threshold,
            preference: lock.preference.to_string(),
            prediction_enabled: lock.prediction_enabled,
            prediction_lead: lock.prediction_lead,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    pub use_kalman: bool,
    /// Initial covariance
    pub kf_p: f64,
    /// Measurement noise
    pub kf_r: f64,
    /// Process noise
    pub kf_q: f64,
    pub use_coupled_xy: bool,
    pub xy_correlation: f64,
    pub process_correlation: f64,
    pub measurement_correlation: f64,
    pub frames_to_predict: f64,
    /// Blend gain used while the smoother is active
    pub alpha_with_kalman: f32,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        let smoother = SmootherConfig::default();
        Self {
            use_kalman: true,
            kf_p: smoother.initial_covariance,
            kf_r: smoother.measurement_noise,
            kf_q: smoother.process_noise,
            use_coupled_xy: smoother.coupled,
            xy_correlation: smoother.xy_correlation,
            process_correlation: smoother.process_correlation,
            measurement_correlation: smoother.measurement_correlation,
            frames_to_predict: smoother.frames_to_predict,
            alpha_with_kalman: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Blend gain used while the smoother is off
    pub alpha_without_kalman: f32,
    pub stationary_threshold_low: f32,
    pub stationary_threshold_high: f32,
    pub stationary_magnitude: f32,
    pub moving_threshold_low: f32,
    pub moving_threshold_high: f32,
    pub moving_magnitude: f32,
    /// Target speed (px/s) above which the moving dead-zone applies
    pub moving_speed_threshold: f32,
    pub curve_type: String,
    pub movement_speed: f32,
    pub curve_steps: usize,
    pub smoothing_enabled: bool,
    pub smoothing_factor: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        let dz = DeadZone::default();
        Self {
            alpha_without_kalman: 0.3,
            stationary_threshold_low: dz.stationary_low,
            stationary_threshold_high: dz.stationary_high,
            stationary_magnitude: dz.stationary_magnitude,
            moving_threshold_low: dz.moving_low,
            moving_threshold_high: dz.moving_high,
            moving_magnitude: dz.moving_magnitude,
            moving_speed_threshold: 120.0,
            curve_type: CurveType::Exponential.to_string(),
            movement_speed: 3.0,
            curve_steps: 5,
            smoothing_enabled: true,
            smoothing_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub min_interval_ms: u64,
    /// Output disables itself once consecutive failures exceed this
    pub max_consecutive_failures: u32,
    pub range: i32,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 8,
            max_consecutive_failures: 5,
            range: 127,
        }
    }
}

impl ActuatorConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub enabled: bool,
    /// Side of the square detection region (pixels)
    pub fov: f32,
    /// Aim point height within a box, percent from the bottom
    pub aim_height: f32,
    pub sensitivity: f32,
    pub dpi: f32,
    pub mouse_sensitivity: f32,
    pub angular_fov: AngularFovConfig,
    pub target_lock: TargetLockConfig,
    pub kalman: KalmanConfig,
    pub movement: MovementConfig,
    pub actuator: ActuatorConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fov: 320.0,
            aim_height: 50.0,
            sensitivity: 1.0,
            dpi: 800.0,
            mouse_sensitivity: 1.0,
            angular_fov: AngularFovConfig::default(),
            target_lock: TargetLockConfig::default(),
            kalman: KalmanConfig::default(),
            movement: MovementConfig::default(),
            actuator: ActuatorConfig::default(),
        }
    }
}

impl ControlConfig {
    /// Replace out-of-range values with their defaults, logging each one
    pub fn sanitized(mut self) -> Self {
        let d = ControlConfig::default();

        self.fov = positive_or(self.fov, d.fov, "fov");
        if !(0.0..=100.0).contains(&self.aim_height) {
            log::warn!("aim_height {} out of [0, 100], clamping", self.aim_height);
            self.aim_height = if self.aim_height.is_nan() {
                d.aim_height
            } else {
                self.aim_height.clamp(0.0, 100.0)
            };
        }
        self.sensitivity = positive_or(self.sensitivity, d.sensitivity, "sensitivity");
        self.dpi = positive_or(self.dpi, d.dpi, "dpi");
        self.mouse_sensitivity =
            positive_or(self.mouse_sensitivity, d.mouse_sensitivity, "mouse_sensitivity");

        let fov = &mut self.angular_fov;
        fov.width = positive_or(fov.width, d.angular_fov.width, "angular_fov.width");
        fov.height = positive_or(fov.height, d.angular_fov.height, "angular_fov.height");

        self.target_lock = self.target_lock.sanitized();
        self.kalman = self.kalman.sanitized();
        self.movement = self.movement.sanitized();

        let actuator = &mut self.actuator;
        if actuator.min_interval_ms == 0 {
            log::warn!("actuator.min_interval_ms must be at least 1, using default");
            actuator.min_interval_ms = d.actuator.min_interval_ms;
        }
        if actuator.max_consecutive_failures == 0 {
            log::warn!("actuator.max_consecutive_failures must be at least 1, using default");
            actuator.max_consecutive_failures = d.actuator.max_consecutive_failures;
        }
        if actuator.range <= 0 || actuator.range > d.actuator.range {
            log::warn!("actuator.range {} out of (0, 127], using default", actuator.range);
            actuator.range = d.actuator.range;
        }
        self
    }

    pub fn lock_config(&self) -> LockConfig {
        let lock = &self.target_lock;
        LockConfig {
            min_lock_duration: lock.min_lock_duration,
            max_lock_duration: lock.max_lock_duration,
            distance_threshold: lock.distance_threshold,
            reacquire_timeout: lock.reacquire_timeout,
            switch_threshold: lock.switch_threshold,
            prediction_enabled: lock.prediction_enabled,
            prediction_lead: lock.prediction_lead,
            preference: Preference::parse_or_default(&lock.preference),
        }
    }

    pub fn smoother_config(&self) -> SmootherConfig {
        let k = &self.kalman;
        SmootherConfig {
            enabled: k.use_kalman,
            initial_covariance: k.kf_p,
            measurement_noise: k.kf_r,
            process_noise: k.kf_q,
            coupled: k.use_coupled_xy,
            xy_correlation: k.xy_correlation,
            process_correlation: k.process_correlation,
            measurement_correlation: k.measurement_correlation,
            frames_to_predict: k.frames_to_predict,
        }
    }

    /// Blend gain for the current smoothing mode, before clamping
    pub fn alpha(&self) -> f32 {
        if self.kalman.use_kalman {
            self.kalman.alpha_with_kalman
        } else {
            self.movement.alpha_without_kalman
        }
    }

    pub fn dead_zone(&self) -> DeadZone {
        let m = &self.movement;
        DeadZone {
            stationary_low: m.stationary_threshold_low,
            stationary_high: m.stationary_threshold_high,
            stationary_magnitude: m.stationary_magnitude,
            moving_low: m.moving_threshold_low,
            moving_high: m.moving_threshold_high,
            moving_magnitude: m.moving_magnitude,
        }
    }

    pub fn shaper_params(&self) -> ShaperParams {
        ShaperParams {
            fov: self.fov,
            angular: AngularSpan {
                width: self.angular_fov.width,
                height: self.angular_fov.height,
                use_separate: self.angular_fov.use_separate,
            },
            dpi: self.dpi,
            mouse_sensitivity: self.mouse_sensitivity,
            sensitivity: self.sensitivity,
            alpha: self.alpha(),
            range: self.actuator.range,
            dead_zone: self.dead_zone(),
        }
    }

    pub fn curve_type(&self) -> CurveType {
        CurveType::parse_or_default(&self.movement.curve_type)
    }
}

impl TargetLockConfig {
    fn sanitized(mut self) -> Self {
        let d = TargetLockConfig::default();
        self.min_lock_duration =
            non_negative_or(self.min_lock_duration, d.min_lock_duration, "min_lock_duration");
        self.max_lock_duration =
            non_negative_or(self.max_lock_duration, d.max_lock_duration, "max_lock_duration");
        self.reacquire_timeout =
            non_negative_or(self.reacquire_timeout, d.reacquire_timeout, "reacquire_timeout");
        self.prediction_lead =
            non_negative_or(self.prediction_lead, d.prediction_lead, "prediction_lead");
        self.distance_threshold =
            positive_or(self.distance_threshold, d.distance_threshold, "distance_threshold");
        if !(self.switch_threshold > 0.0 && self.switch_threshold <= 1.0) {
            log::warn!(
                "switch_threshold {} out of (0, 1], using default",
                self.switch_threshold
            );
            self.switch_threshold = d.switch_threshold;
        }
        if self.preference.parse::<Preference>().is_err() {
            log::warn!("Unknown target preference '{}', using 'closest'", self.preference);
            self.preference = d.preference;
        }
        self
    }
}

impl KalmanConfig {
    fn sanitized(mut self) -> Self {
        let d = KalmanConfig::default();
        self.kf_p = positive_or(self.kf_p, d.kf_p, "kf_p");
        self.kf_r = positive_or(self.kf_r, d.kf_r, "kf_r");
        self.kf_q = positive_or(self.kf_q, d.kf_q, "kf_q");
        for (value, name) in [
            (&mut self.xy_correlation, "xy_correlation"),
            (&mut self.process_correlation, "process_correlation"),
            (&mut self.measurement_correlation, "measurement_correlation"),
        ] {
            if !(value.abs() < 1.0) {
                log::warn!("{} {} out of (-1, 1), using 0", name, value);
                *value = 0.0;
            }
        }
        if !(self.frames_to_predict >= 1.0) {
            self.frames_to_predict = d.frames_to_predict;
        }
        if self.alpha_with_kalman.is_nan() {
            self.alpha_with_kalman = d.alpha_with_kalman;
        }
        self
    }
}

impl MovementConfig {
    fn sanitized(mut self) -> Self {
        let d = MovementConfig::default();
        if self.alpha_without_kalman.is_nan() {
            self.alpha_without_kalman = d.alpha_without_kalman;
        }
        for (value, default, name) in [
            (&mut self.stationary_threshold_low, d.stationary_threshold_low, "stationary_threshold_low"),
            (&mut self.stationary_threshold_high, d.stationary_threshold_high, "stationary_threshold_high"),
            (&mut self.moving_threshold_low, d.moving_threshold_low, "moving_threshold_low"),
            (&mut self.moving_threshold_high, d.moving_threshold_high, "moving_threshold_high"),
            (&mut self.moving_speed_threshold, d.moving_speed_threshold, "moving_speed_threshold"),
        ] {
            *value = non_negative_or(*value, default, name);
        }
        self.movement_speed = positive_or(self.movement_speed, d.movement_speed, "movement_speed");
        if !self.movement_speed.is_finite() {
            log::warn!("movement_speed must be finite, using {}", d.movement_speed);
            self.movement_speed = d.movement_speed;
        } else if self.movement_speed < MIN_MOVEMENT_SPEED {
            log::warn!(
                "movement_speed {} below {}, raising it",
                self.movement_speed,
                MIN_MOVEMENT_SPEED
            );
            self.movement_speed = MIN_MOVEMENT_SPEED;
        }
        if self.curve_type.parse::<CurveType>().is_err() {
            log::warn!("Unknown curve type '{}', using Bezier", self.curve_type);
            self.curve_type = CurveType::Bezier.to_string();
        }
        if self.curve_steps < 2 {
            self.curve_steps = 2;
        }
        if !(0.0..=1.0).contains(&self.smoothing_factor) {
            self.smoothing_factor = d.smoothing_factor;
        }
        self
    }
}

fn positive_or<T>(value: T, default: T, name: &str) -> T
where
    T: PartialOrd + Default + Copy + std::fmt::Display,
{
    if value > T::default() {
        value
    } else {
        log::warn!("{} must be positive (got {}), using {}", name, value, default);
        default
    }
}

fn non_negative_or<T>(value: T, default: T, name: &str) -> T
where
    T: PartialOrd + Default + Copy + std::fmt::Display,
{
    if value >= T::default() {
        value
    } else {
        log::warn!("{} must not be negative (got {}), using {}", name, value, default);
        default
    }
}

/// Callback invoked with the new snapshot after every change
pub type ConfigCallback = Box<dyn Fn(&ControlConfig) + Send + Sync>;

/// Boundary to whatever owns the configuration
pub trait ConfigSource: Send + Sync {
    /// Current configuration as an owned snapshot
    fn snapshot(&self) -> ControlConfig;

    /// Register a change callback
    fn register_callback(&self, callback: ConfigCallback);

    /// Turn the control output on or off, notifying callbacks
    fn set_enabled(&self, enabled: bool);
}

/// In-memory [`ConfigSource`] with per-section updates
#[derive(Default)]
pub struct ConfigStore {
    config: RwLock<ControlConfig>,
    callbacks: Mutex<Vec<ConfigCallback>>,
}

impl ConfigStore {
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config: RwLock::new(config.sanitized()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: ControlConfig = serde_json::from_str(json)?;
        Ok(Self::new(config))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&*self.read())?)
    }

    pub fn update_target_lock(&self, section: TargetLockConfig) {
        self.modify(|c| c.target_lock = section);
    }

    pub fn update_kalman(&self, section: KalmanConfig) {
        self.modify(|c| c.kalman = section);
    }

    pub fn update_movement(&self, section: MovementConfig) {
        self.modify(|c| c.movement = section);
    }

    pub fn update_actuator(&self, section: ActuatorConfig) {
        self.modify(|c| c.actuator = section);
    }

    /// Replace the whole configuration
    pub fn replace(&self, config: ControlConfig) {
        self.modify(|c| *c = config);
    }

    /// Apply a change under the write lock, then notify callbacks with the
    /// resulting snapshot after the lock is released
    pub fn modify<F>(&self, change: F)
    where
        F: FnOnce(&mut ControlConfig),
    {
        let snapshot = {
            let mut config = self.write();
            let mut updated = config.clone();
            change(&mut updated);
            *config = updated.sanitized();
            config.clone()
        };

        for callback in self.callbacks().iter() {
            callback(&snapshot);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ControlConfig> {
        self.config.read().unwrap_or_else(|poisoned| {
            log::warn!("Config lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, ControlConfig> {
        self.config.write().unwrap_or_else(|poisoned| {
            log::warn!("Config lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn callbacks(&self) -> MutexGuard<'_, Vec<ConfigCallback>> {
        self.callbacks.lock().unwrap_or_else(|poisoned| {
            log::warn!("Config callback list poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl ConfigSource for ConfigStore {
    fn snapshot(&self) -> ControlConfig {
        self.read().clone()
    }

    fn register_callback(&self, callback: ConfigCallback) {
        self.callbacks().push(callback);
    }

    fn set_enabled(&self, enabled: bool) {
        self.modify(|c| c.enabled = enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_defaults_map_to_stage_configs() {
        let config = ControlConfig::default();
        let lock = config.lock_config();
        assert_eq!(lock, LockConfig::default());

        let smoother = config.smoother_config();
        assert!(smoother.enabled);
        assert_eq!(smoother.initial_covariance, 38.17);

        assert_eq!(config.alpha(), 0.5);
        assert_eq!(config.shaper_params().range, 127);
        assert_eq!(config.actuator.min_interval(), Duration::from_millis(8));
    }

    #[test]
    fn test_alpha_follows_smoothing_mode() {
        let mut config = ControlConfig::default();
        config.kalman.use_kalman = false;
        assert_eq!(config.alpha(), 0.3);
    }

    #[test]
    fn test_sanitize_replaces_bad_values() {
        let mut config = ControlConfig::default();
        config.fov = -10.0;
        config.aim_height = 140.0;
        config.dpi = f32::NAN;
        config.target_lock.preference = "sideways".to_string();
        config.target_lock.switch_threshold = 1.7;
        config.kalman.kf_r = 0.0;
        config.kalman.xy_correlation = 1.0;
        config.movement.curve_type = "zigzag".to_string();
        config.actuator.range = 1000;
        config.actuator.max_consecutive_failures = 0;
        config.actuator.min_interval_ms = 0;
        config.movement.movement_speed = 1e-30;

        let clean = config.sanitized();
        assert_eq!(clean.fov, 320.0);
        assert_eq!(clean.aim_height, 100.0);
        assert_eq!(clean.dpi, 800.0);
        assert_eq!(clean.target_lock.preference, "closest");
        assert_eq!(clean.target_lock.switch_threshold, 0.7);
        assert_eq!(clean.kalman.kf_r, 2.8);
        assert_eq!(clean.kalman.xy_correlation, 0.0);
        assert_eq!(clean.movement.curve_type, "Bezier");
        assert_eq!(clean.actuator.range, 127);
        assert_eq!(clean.actuator.max_consecutive_failures, 5);
        assert_eq!(clean.actuator.min_interval_ms, 8);
        assert_eq!(clean.movement.movement_speed, MIN_MOVEMENT_SPEED);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let store = ConfigStore::from_json(
            r#"{"fov": 416, "target_lock": {"preference": "weighted"}, "kalman": {"use_coupled_xy": true}}"#,
        )
        .unwrap();
        let config = store.snapshot();
        assert_eq!(config.fov, 416.0);
        assert_eq!(config.lock_config().preference, Preference::Weighted);
        assert_eq!(config.target_lock.min_lock_duration, 0.8);
        assert!(config.smoother_config().coupled);
        assert_eq!(config.actuator.min_interval_ms, 8);

        let json = store.to_json().unwrap();
        let reparsed = ConfigStore::from_json(&json).unwrap();
        assert_eq!(reparsed.snapshot(), config);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(ConfigStore::from_json("{ not json").is_err());
    }

    #[test]
    fn test_updates_notify_callbacks() {
        let store = ConfigStore::new(ControlConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));

        let (c, s) = (Arc::clone(&calls), Arc::clone(&seen));
        store.register_callback(Box::new(move |config| {
            c.fetch_add(1, Ordering::SeqCst);
            *s.lock().unwrap() = Some(config.kalman.kf_q);
        }));

        store.update_kalman(KalmanConfig {
            kf_q: 12.0,
            ..KalmanConfig::default()
        });
        store.set_enabled(false);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock().unwrap(), Some(12.0));
        let snapshot = store.snapshot();
        assert!(!snapshot.enabled);
        assert_eq!(snapshot.kalman.kf_q, 12.0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = ConfigStore::new(ControlConfig::default());
        let before = store.snapshot();
        store.update_movement(MovementConfig {
            moving_speed_threshold: 50.0,
            ..MovementConfig::default()
        });
        assert_eq!(before.movement.moving_speed_threshold, 120.0);
        assert_eq!(store.snapshot().movement.moving_speed_threshold, 50.0);
    }
}
