//! Conversion of an aim point into integer actuator deltas

use crate::bbox::Point;
use crate::smoother::StatisticalSmoother;
use nalgebra::Vector2;

pub const MIN_ALPHA: f32 = 0.05;
pub const MAX_ALPHA: f32 = 1.0;
/// Default signed range accepted by the actuator per axis
pub const DEFAULT_RANGE: i32 = 127;

/// Angular span mapped onto the FOV
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngularSpan {
    pub width: f32,
    pub height: f32,
    /// When false the width span is used for both axes
    pub use_separate: bool,
}

impl Default for AngularSpan {
    fn default() -> Self {
        Self {
            width: 90.0,
            height: 60.0,
            use_separate: false,
        }
    }
}

impl AngularSpan {
    /// Degrees per detection-space pixel on (x, y)
    pub fn degrees_per_pixel(&self, fov: f32) -> (f32, f32) {
        if fov <= 0.0 {
            return (0.0, 0.0);
        }
        let height = if self.use_separate {
            self.height
        } else {
            self.width
        };
        (self.width / fov, height / fov)
    }
}

/// Minimum-magnitude thresholds below which a move is dropped.
///
/// The threshold is picked from the pre-rounding magnitude of the move: large
/// moves get the higher threshold, small ones the lower.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeadZone {
    pub stationary_low: f32,
    pub stationary_high: f32,
    pub stationary_magnitude: f32,
    pub moving_low: f32,
    pub moving_high: f32,
    pub moving_magnitude: f32,
}

impl Default for DeadZone {
    fn default() -> Self {
        Self {
            stationary_low: 1.0,
            stationary_high: 1.5,
            stationary_magnitude: 3.0,
            moving_low: 0.5,
            moving_high: 1.0,
            moving_magnitude: 8.0,
        }
    }
}

impl DeadZone {
    pub fn threshold(&self, magnitude: f32, moving: bool) -> f32 {
        if moving {
            if magnitude > self.moving_magnitude {
                self.moving_high
            } else {
                self.moving_low
            }
        } else if magnitude > self.stationary_magnitude {
            self.stationary_high
        } else {
            self.stationary_low
        }
    }

    /// True when neither axis exceeds the threshold
    pub fn suppresses(&self, dx: i32, dy: i32, magnitude: f32, moving: bool) -> bool {
        let t = self.threshold(magnitude, moving);
        !(dx.abs() as f32 > t || dy.abs() as f32 > t)
    }
}

/// Per-frame shaping parameters, derived from the configuration snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShaperParams {
    pub fov: f32,
    pub angular: AngularSpan,
    pub dpi: f32,
    pub mouse_sensitivity: f32,
    pub sensitivity: f32,
    /// Blend gain, clamped to `[MIN_ALPHA, MAX_ALPHA]` at use
    pub alpha: f32,
    pub range: i32,
    pub dead_zone: DeadZone,
}

impl Default for ShaperParams {
    fn default() -> Self {
        Self {
            fov: 320.0,
            angular: AngularSpan::default(),
            dpi: 800.0,
            mouse_sensitivity: 1.0,
            sensitivity: 1.0,
            alpha: 0.3,
            range: DEFAULT_RANGE,
            dead_zone: DeadZone::default(),
        }
    }
}

impl ShaperParams {
    pub fn clamped_alpha(&self) -> f32 {
        if self.alpha.is_nan() {
            return MIN_ALPHA;
        }
        self.alpha.clamp(MIN_ALPHA, MAX_ALPHA)
    }

    /// Degrees to device units
    pub fn to_device_units(&self, degrees: f32) -> f32 {
        if self.mouse_sensitivity <= 0.0 {
            return 0.0;
        }
        (degrees / 360.0) * (self.dpi / self.mouse_sensitivity) * self.sensitivity
    }
}

/// Result of shaping one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedMove {
    pub dx: i32,
    pub dy: i32,
    /// Device-unit magnitude before smoothing and rounding
    pub magnitude: f32,
    /// Dead-zone dropped the move; `dx`/`dy` are zero
    pub suppressed: bool,
}

impl ShapedMove {
    pub fn is_zero(&self) -> bool {
        self.dx == 0 && self.dy == 0
    }
}

/// Round and clamp a device-unit delta to the signed actuator range
pub fn clamp_to_range(v: f32, range: i32) -> i32 {
    let range = range.max(0);
    if !v.is_finite() {
        return 0;
    }
    (v.round() as i64).clamp(-(range as i64), range as i64) as i32
}

/// Stateful shaper; keeps the previous blended angular offset
#[derive(Debug, Clone, Default)]
pub struct MotionShaper {
    previous: Vector2<f32>,
}

impl MotionShaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blended angular offset of the last shaped frame
    pub fn previous(&self) -> Vector2<f32> {
        self.previous
    }

    pub fn reset(&mut self) {
        self.previous = Vector2::zeros();
    }

    /// Angular offset of `aim_point` from the FOV center, blended with the
    /// previous output
    pub fn blend(&mut self, aim_point: Point, params: &ShaperParams) -> Vector2<f32> {
        let center = params.fov / 2.0;
        let (dpp_x, dpp_y) = params.angular.degrees_per_pixel(params.fov);
        let degrees = Vector2::new((aim_point.x - center) * dpp_x, (aim_point.y - center) * dpp_y);

        let alpha = params.clamped_alpha();
        let mut blended = degrees * alpha + self.previous * (1.0 - alpha);
        if !blended.iter().all(|v| v.is_finite()) {
            log::warn!("Non-finite blended offset for aim point {}, resetting", aim_point);
            blended = Vector2::zeros();
        }
        self.previous = blended;
        blended
    }

    /// Full per-frame shaping.
    ///
    /// `moving` selects the dead-zone thresholds for a moving target.
    pub fn shape(
        &mut self,
        aim_point: Point,
        params: &ShaperParams,
        smoother: Option<&mut StatisticalSmoother>,
        moving: bool,
    ) -> ShapedMove {
        let blended = self.blend(aim_point, params);
        let raw_x = params.to_device_units(blended.x);
        let raw_y = params.to_device_units(blended.y);
        let magnitude = (raw_x * raw_x + raw_y * raw_y).sqrt();

        let (sx, sy) = match smoother {
            Some(smoother) => smoother.update(raw_x, raw_y),
            None => (raw_x, raw_y),
        };

        finalize(sx, sy, magnitude, params, moving)
    }
}

/// Round, clamp and dead-zone a device-unit delta
pub fn finalize(x: f32, y: f32, magnitude: f32, params: &ShaperParams, moving: bool) -> ShapedMove {
    let dx = clamp_to_range(x, params.range);
    let dy = clamp_to_range(y, params.range);

    if params.dead_zone.suppresses(dx, dy, magnitude, moving) {
        return ShapedMove {
            dx: 0,
            dy: 0,
            magnitude,
            suppressed: true,
        };
    }

    ShapedMove {
        dx,
        dy,
        magnitude,
        suppressed: false,
    }
}
