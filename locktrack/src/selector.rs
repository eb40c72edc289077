//! Candidate construction and ranking against the aim point

use crate::bbox::{Bbox, Detection, Point};
use crate::identity::{IdentityGrid, TargetId};
use std::fmt;
use std::str::FromStr;

/// Detections narrower or shorter than this (pixels) are treated as noise
pub const DEFAULT_MIN_SIZE: f32 = 5.0;

/// Weights of the combined score used by [`Preference::Weighted`]
const DISTANCE_WEIGHT: f32 = 0.5;
const CONFIDENCE_WEIGHT: f32 = 0.3;
const AREA_WEIGHT: f32 = 0.2;

/// Strategy for choosing a target when no lock exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preference {
    /// Smallest distance to the FOV center
    #[default]
    Closest,
    /// Highest detector confidence
    Confidence,
    /// Largest box area
    Largest,
    /// Combined distance, confidence and area score
    Weighted,
}

impl Preference {
    /// Parse a preference name, falling back to [`Preference::Closest`] for
    /// unknown names.
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            log::warn!("Unknown target preference '{}', using 'closest'", name);
            Self::Closest
        })
    }
}

impl FromStr for Preference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "closest" | "centered" => Ok(Self::Closest),
            "confidence" => Ok(Self::Confidence),
            "largest" => Ok(Self::Largest),
            "weighted" => Ok(Self::Weighted),
            other => Err(format!("unknown preference: {}", other)),
        }
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closest => write!(f, "closest"),
            Self::Confidence => write!(f, "confidence"),
            Self::Largest => write!(f, "largest"),
            Self::Weighted => write!(f, "weighted"),
        }
    }
}

/// A detection prepared for selection and locking. Rebuilt every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: TargetId,
    pub bbox: Bbox,
    pub aim_point: Point,
    pub distance_to_center: f32,
    pub area: f32,
    pub confidence: f32,
}

impl Candidate {
    pub fn width(&self) -> f32 {
        self.bbox.width()
    }

    pub fn height(&self) -> f32 {
        self.bbox.height()
    }
}

/// Builds candidates from raw detections and picks one by preference
#[derive(Debug, Clone)]
pub struct TargetSelector {
    fov: f32,
    aim_height: f32,
    min_size: f32,
    grid: IdentityGrid,
}

impl TargetSelector {
    pub fn new(fov: f32, aim_height: f32) -> Self {
        Self {
            fov,
            aim_height,
            min_size: DEFAULT_MIN_SIZE,
            grid: IdentityGrid::default(),
        }
    }

    pub fn with_min_size(mut self, min_size: f32) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn with_grid(mut self, grid: IdentityGrid) -> Self {
        self.grid = grid;
        self
    }

    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn min_size(&self) -> f32 {
        self.min_size
    }

    /// Center of the square FOV, the point every distance is measured from
    pub fn fov_center(&self) -> Point {
        Point::new(self.fov / 2.0, self.fov / 2.0)
    }

    /// Apply a new FOV size and aim height without touching the other settings
    pub fn set_geometry(&mut self, fov: f32, aim_height: f32) {
        self.fov = fov;
        self.aim_height = aim_height;
    }

    /// Build a candidate from one detection
    pub fn candidate(&self, detection: &Detection) -> Candidate {
        let aim_point = detection.bbox.aim_point(self.aim_height);
        Candidate {
            id: self.grid.derive(&detection.bbox),
            bbox: detection.bbox,
            aim_point,
            distance_to_center: nalgebra::distance(&aim_point, &self.fov_center()),
            area: detection.bbox.area(),
            confidence: detection.confidence,
        }
    }

    /// Build candidates for every usable detection in the frame.
    ///
    /// Malformed boxes, boxes below the minimum size and aim points outside
    /// the FOV are dropped.
    pub fn candidates(&self, detections: &[Detection]) -> Vec<Candidate> {
        detections
            .iter()
            .filter(|det| {
                if det.is_valid() {
                    true
                } else {
                    log::debug!("Skipping malformed detection {}", det.bbox);
                    false
                }
            })
            .map(|det| self.candidate(det))
            .filter(|c| self.is_eligible(c) && self.in_fov(&c.aim_point))
            .collect()
    }

    /// Size filter applied before any scoring
    pub fn is_eligible(&self, candidate: &Candidate) -> bool {
        candidate.width() >= self.min_size && candidate.height() >= self.min_size
    }

    fn in_fov(&self, p: &Point) -> bool {
        (0.0..=self.fov).contains(&p.x) && (0.0..=self.fov).contains(&p.y)
    }

    /// Combined score in roughly [0, 1]; higher is better
    pub fn score(&self, candidate: &Candidate) -> f32 {
        let max_distance = std::f32::consts::SQRT_2 * self.fov;
        let max_area = self.fov * self.fov;
        let distance_score = if max_distance > 0.0 {
            1.0 - candidate.distance_to_center / max_distance
        } else {
            0.0
        };
        let area_score = if max_area > 0.0 {
            candidate.area / max_area
        } else {
            0.0
        };

        DISTANCE_WEIGHT * distance_score
            + CONFIDENCE_WEIGHT * candidate.confidence
            + AREA_WEIGHT * area_score
    }

    /// Pick a candidate by preference. Ties go to the earliest candidate.
    pub fn select<'a>(
        &self,
        candidates: &'a [Candidate],
        preference: Preference,
    ) -> Option<&'a Candidate> {
        let eligible = candidates.iter().filter(|c| self.is_eligible(c));
        match preference {
            Preference::Closest => first_best(eligible, |c| -c.distance_to_center),
            Preference::Confidence => first_best(eligible, |c| c.confidence),
            Preference::Largest => first_best(eligible, |c| c.area),
            Preference::Weighted => first_best(eligible, |c| self.score(c)),
        }
    }

    /// Candidate nearest to the FOV center, regardless of preference
    pub fn closest<'a>(&self, candidates: &'a [Candidate]) -> Option<&'a Candidate> {
        self.select(candidates, Preference::Closest)
    }
}

/// Highest-keyed item; on equal keys the earlier item wins
fn first_best<'a, I, F>(items: I, key: F) -> Option<&'a Candidate>
where
    I: Iterator<Item = &'a Candidate>,
    F: Fn(&Candidate) -> f32,
{
    let mut best: Option<(&Candidate, f32)> = None;
    for item in items {
        let k = key(item);
        match best {
            Some((_, best_key)) if k <= best_key || k.is_nan() => {}
            _ => best = Some((item, k)),
        }
    }
    best.map(|(item, _)| item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const FOV: f32 = 640.0;

    /// Detection whose aim point (at 50% height) is exactly (x, y)
    fn det_at(x: f32, y: f32, half_w: f32, half_h: f32, conf: f32) -> Detection {
        Detection::new(
            Bbox::new(x - half_w, y - half_h, x + half_w, y + half_h),
            conf,
            "target",
        )
    }

    fn selector() -> TargetSelector {
        TargetSelector::new(FOV, 50.0)
    }

    #[test]
    fn test_candidate_geometry() {
        let sel = selector();
        let c = sel.candidate(&det_at(420.0, 320.0, 10.0, 20.0, 0.8));
        assert_abs_diff_eq!(c.aim_point.x, 420.0, epsilon = 1e-4);
        assert_abs_diff_eq!(c.aim_point.y, 320.0, epsilon = 1e-4);
        assert_abs_diff_eq!(c.distance_to_center, 100.0, epsilon = 1e-4);
        assert_abs_diff_eq!(c.area, 800.0, epsilon = 1e-4);
    }

    #[test]
    fn test_small_and_malformed_detections_dropped() {
        let sel = selector();
        let detections = vec![
            det_at(300.0, 300.0, 2.0, 20.0, 0.9),
            det_at(300.0, 300.0, 20.0, 2.0, 0.9),
            Detection::new(Bbox::new(f32::NAN, 0.0, 10.0, 10.0), 0.9, "target"),
            det_at(800.0, 300.0, 20.0, 20.0, 0.9),
            det_at(310.0, 310.0, 10.0, 10.0, 0.4),
        ];
        let candidates = sel.candidates(&detections);
        assert_eq!(candidates.len(), 1);
        assert_abs_diff_eq!(candidates[0].confidence, 0.4);
    }

    #[test]
    fn test_preferences() {
        let sel = selector();
        let candidates = sel.candidates(&[
            det_at(330.0, 320.0, 10.0, 10.0, 0.3),
            det_at(500.0, 320.0, 60.0, 80.0, 0.5),
            det_at(100.0, 100.0, 10.0, 10.0, 0.95),
        ]);

        let closest = sel.select(&candidates, Preference::Closest).unwrap();
        assert_abs_diff_eq!(closest.aim_point.x, 330.0);

        let confident = sel.select(&candidates, Preference::Confidence).unwrap();
        assert_abs_diff_eq!(confident.confidence, 0.95);

        let largest = sel.select(&candidates, Preference::Largest).unwrap();
        assert_abs_diff_eq!(largest.aim_point.x, 500.0);
    }

    #[test]
    fn test_weighted_score() {
        let sel = selector();
        let c = sel.candidate(&det_at(320.0, 320.0, 16.0, 20.0, 0.5));
        // distance 0 -> 0.5, confidence 0.5 -> 0.15, area 1280/409600 -> 0.000625
        assert_abs_diff_eq!(sel.score(&c), 0.650625, epsilon = 1e-5);

        let candidates = sel.candidates(&[
            det_at(340.0, 320.0, 10.0, 10.0, 0.2),
            det_at(360.0, 320.0, 10.0, 10.0, 0.9),
        ]);
        let best = sel.select(&candidates, Preference::Weighted).unwrap();
        assert_abs_diff_eq!(best.confidence, 0.9);
    }

    #[test]
    fn test_ties_broken_by_input_order() {
        let sel = selector();
        let candidates = sel.candidates(&[
            det_at(420.0, 320.0, 10.0, 10.0, 0.7),
            det_at(220.0, 320.0, 10.0, 10.0, 0.7),
        ]);
        for pref in [
            Preference::Closest,
            Preference::Confidence,
            Preference::Largest,
            Preference::Weighted,
        ] {
            let chosen = sel.select(&candidates, pref).unwrap();
            assert_abs_diff_eq!(chosen.aim_point.x, 420.0);
        }
    }

    #[test]
    fn test_empty_selection() {
        let sel = selector();
        assert!(sel.select(&[], Preference::Closest).is_none());
    }

    #[test]
    fn test_preference_parsing() {
        assert_eq!(Preference::parse_or_default("Largest"), Preference::Largest);
        assert_eq!(Preference::parse_or_default("centered"), Preference::Closest);
        assert_eq!(Preference::parse_or_default("weighted"), Preference::Weighted);
        assert_eq!(Preference::parse_or_default("sideways"), Preference::Closest);
        assert!("sideways".parse::<Preference>().is_err());
    }
}
