//! Parametric paths for short, non-linear moves

use crate::bbox::Point;
use std::f32::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Upper bound on interpolation steps for a quick move
pub const MAX_PATH_STEPS: usize = 5;
/// Pixels of travel per interpolation step
const PIXELS_PER_STEP: f32 = 30.0;
const BEZIER_CONTROL_OFFSET: f32 = 0.1;
const SINE_INFLUENCE: f32 = 0.05;
const EXPONENTIAL_DECAY: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CurveType {
    #[default]
    Bezier,
    BSpline,
    Catmull,
    Exponential,
    Hermite,
    Sine,
}

impl CurveType {
    pub const ALL: [CurveType; 6] = [
        CurveType::Bezier,
        CurveType::BSpline,
        CurveType::Catmull,
        CurveType::Exponential,
        CurveType::Hermite,
        CurveType::Sine,
    ];

    /// Parse a curve name, falling back to [`CurveType::Bezier`]
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            log::warn!("Unknown curve type '{}', using Bezier", name);
            Self::Bezier
        })
    }

    /// Eased progress along the path for `t` in [0, 1]
    fn ease(self, t: f32) -> f32 {
        match self {
            // Quadratic with the control point pushed slightly past the midpoint;
            // the resulting weight on (end - start) is 2(1-t)t * 0.55 + t^2
            CurveType::Bezier => {
                let ctrl = 0.5 + BEZIER_CONTROL_OFFSET * 0.5;
                2.0 * (1.0 - t) * t * ctrl + t * t
            }
            CurveType::Sine => t + SINE_INFLUENCE * (t * PI).sin(),
            CurveType::Exponential => 1.0 - (-EXPONENTIAL_DECAY * t).exp(),
            _ => t * 0.95 + 0.05 * t * t,
        }
    }

    /// Distance-dependent gain applied to a single move vector.
    /// `None` for curves that only shape full paths.
    fn gain(self, t: f32) -> Option<f32> {
        match self {
            CurveType::Bezier => Some(if t < 0.5 {
                2.0 * t * t
            } else {
                -1.0 + (4.0 - 2.0 * t) * t
            }),
            CurveType::Sine => Some((((t - 0.5) * PI).sin() + 1.0) / 2.0),
            CurveType::Exponential => Some(if t < 0.5 {
                (2.0 * t).powf(EXPONENTIAL_DECAY) / 2.0
            } else {
                1.0 - (2.0 * (1.0 - t)).powf(EXPONENTIAL_DECAY) / 2.0
            }),
            _ => None,
        }
    }
}

impl FromStr for CurveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bezier" => Ok(Self::Bezier),
            "b-spline" | "bspline" => Ok(Self::BSpline),
            "catmull" => Ok(Self::Catmull),
            "exponential" => Ok(Self::Exponential),
            "hermite" => Ok(Self::Hermite),
            "sine" => Ok(Self::Sine),
            other => Err(format!("unknown curve type: {}", other)),
        }
    }
}

impl fmt::Display for CurveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bezier => "Bezier",
            Self::BSpline => "B-Spline",
            Self::Catmull => "Catmull",
            Self::Exponential => "Exponential",
            Self::Hermite => "Hermite",
            Self::Sine => "Sine",
        };
        f.write_str(name)
    }
}

/// Path from `start` to `end` with `clamp(distance / 30, 2, max_steps)`
/// steps, i.e. `steps + 1` points including both endpoints.
pub fn generate_path(curve: CurveType, start: Point, end: Point, max_steps: usize) -> Vec<Point> {
    let delta = end - start;
    let distance = delta.norm();
    let max_steps = max_steps.clamp(2, MAX_PATH_STEPS);
    let steps = ((distance / PIXELS_PER_STEP) as usize).clamp(2, max_steps);

    (0..=steps)
        .map(|i| {
            let t = i as f32 / steps as f32;
            start + delta * curve.ease(t)
        })
        .collect()
}

/// Scale a single move by a gain derived from `distance / max_distance`.
/// Curves without a gain function pass the move through.
pub fn modulate(curve: CurveType, dx: f32, dy: f32, distance: f32, max_distance: f32) -> (f32, f32) {
    if distance == 0.0 || max_distance <= 0.0 {
        return (dx, dy);
    }
    let t = (distance / max_distance).min(1.0);
    match curve.gain(t) {
        Some(g) => (dx * g, dy * g),
        None => (dx, dy),
    }
}

/// Pull interior points toward the midpoint of their neighbours.
/// Endpoints are kept.
pub fn smooth_path(path: &[Point], factor: f32) -> Vec<Point> {
    if path.len() < 3 {
        return path.to_vec();
    }
    let mut smoothed = Vec::with_capacity(path.len());
    smoothed.push(path[0]);
    for w in path.windows(3) {
        let mid = nalgebra::center(&w[0], &w[2]);
        smoothed.push(w[1] + (mid - w[1]) * factor);
    }
    smoothed.push(path[path.len() - 1]);
    smoothed
}

/// Length of every step; the last length is repeated so the result has one
/// entry per point.
pub fn step_lengths(path: &[Point]) -> Vec<f32> {
    if path.len() < 2 {
        return vec![0.0];
    }
    let mut lengths: Vec<f32> = path
        .windows(2)
        .map(|w| nalgebra::distance(&w[0], &w[1]))
        .collect();
    let last = lengths[lengths.len() - 1];
    lengths.push(last);
    lengths
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_step_count() {
        let origin = Point::origin();
        // 40px -> floor(1.33) -> raised to 2 steps
        assert_eq!(generate_path(CurveType::Sine, origin, Point::new(40.0, 0.0), 5).len(), 3);
        // 100px -> 3 steps
        assert_eq!(generate_path(CurveType::Sine, origin, Point::new(100.0, 0.0), 5).len(), 4);
        // 1000px -> capped at 5
        assert_eq!(generate_path(CurveType::Sine, origin, Point::new(1000.0, 0.0), 5).len(), 6);
        // max_steps above the cap is ignored
        assert_eq!(generate_path(CurveType::Sine, origin, Point::new(1000.0, 0.0), 40).len(), 6);
    }

    #[test]
    fn test_paths_hit_both_endpoints() {
        let start = Point::new(10.0, -20.0);
        let end = Point::new(130.0, 70.0);
        for curve in CurveType::ALL {
            let path = generate_path(curve, start, end, 5);
            assert_abs_diff_eq!(path[0].x, start.x, epsilon = 1e-4);
            assert_abs_diff_eq!(path[0].y, start.y, epsilon = 1e-4);
            let last = path[path.len() - 1];
            if curve == CurveType::Exponential {
                // 1 - e^-3 never quite reaches the end
                assert_abs_diff_eq!(last.x, 10.0 + 120.0 * (1.0 - (-3.0f32).exp()), epsilon = 1e-3);
            } else {
                assert_abs_diff_eq!(last.x, end.x, epsilon = 1e-3);
                assert_abs_diff_eq!(last.y, end.y, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_bezier_midpoint() {
        let path = generate_path(CurveType::Bezier, Point::origin(), Point::new(60.0, 0.0), 2);
        // t = 0.5: 2 * 0.25 * 0.55 + 0.25 = 0.525
        assert_abs_diff_eq!(path[1].x, 31.5, epsilon = 1e-4);
    }

    #[test]
    fn test_modulate() {
        let (x, y) = modulate(CurveType::Bezier, 10.0, 4.0, 25.0, 100.0);
        assert_abs_diff_eq!(x, 1.25, epsilon = 1e-5);
        assert_abs_diff_eq!(y, 0.5, epsilon = 1e-5);

        let (x, _) = modulate(CurveType::Sine, 10.0, 0.0, 50.0, 100.0);
        assert_abs_diff_eq!(x, 5.0, epsilon = 1e-5);

        let (x, _) = modulate(CurveType::Exponential, 10.0, 0.0, 500.0, 100.0);
        assert_abs_diff_eq!(x, 10.0, epsilon = 1e-5);

        assert_eq!(modulate(CurveType::Hermite, 3.0, 4.0, 50.0, 100.0), (3.0, 4.0));
        assert_eq!(modulate(CurveType::Bezier, 3.0, 4.0, 0.0, 100.0), (3.0, 4.0));
    }

    #[test]
    fn test_smooth_path_keeps_endpoints() {
        let path = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(20.0, 0.0),
        ];
        let smoothed = smooth_path(&path, 0.5);
        assert_eq!(smoothed[0], path[0]);
        assert_eq!(smoothed[2], path[2]);
        assert_abs_diff_eq!(smoothed[1].y, 5.0, epsilon = 1e-5);
        assert_eq!(smooth_path(&path[..2], 0.5), path[..2].to_vec());
    }

    #[test]
    fn test_step_lengths() {
        let path = vec![Point::new(0.0, 0.0), Point::new(3.0, 4.0), Point::new(3.0, 10.0)];
        assert_eq!(step_lengths(&path), vec![5.0, 6.0, 6.0]);
        assert_eq!(step_lengths(&path[..1]), vec![0.0]);
    }

    #[test]
    fn test_curve_names() {
        assert_eq!(CurveType::parse_or_default("B-Spline"), CurveType::BSpline);
        assert_eq!(CurveType::parse_or_default("sine"), CurveType::Sine);
        assert_eq!(CurveType::parse_or_default("zigzag"), CurveType::Bezier);
        for curve in CurveType::ALL {
            assert_eq!(curve.to_string().parse::<CurveType>(), Ok(curve));
        }
    }
}
