//! Bounding boxes and per-frame detections in detection-space pixels

use nalgebra::Point2;
use std::fmt;

/// A position in detection space (pixels, origin at the FOV's top-left corner)
pub type Point = Point2<f32>;

/// Axis-aligned bounding box in corner format
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center_x(&self) -> f32 {
        (self.xmin + self.xmax) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.ymin + self.ymax) / 2.0
    }

    /// Convert to bounds array [xmin, ymin, xmax, ymax]
    pub fn to_bounds(&self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    /// True when every corner is finite and the box is not inverted
    pub fn is_valid(&self) -> bool {
        self.to_bounds().iter().all(|v| v.is_finite())
            && self.xmax >= self.xmin
            && self.ymax >= self.ymin
    }

    /// Point inside the box chosen as the tracking target.
    ///
    /// `aim_height` is a percentage of the box height measured from the bottom:
    /// 50 aims at the vertical center, 100 at the top edge, 0 at the bottom edge.
    pub fn aim_point(&self, aim_height: f32) -> Point {
        let aim_height = aim_height.clamp(0.0, 100.0);
        let y = self.ymin + self.height() * (100.0 - aim_height) / 100.0;
        Point::new(self.center_x(), y)
    }

    /// Shift the box by (dx, dy)
    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.xmin + dx, self.ymin + dy, self.xmax + dx, self.ymax + dy)
    }
}

impl fmt::Display for Bbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bbox({}, {}, {}, {})",
            self.xmin, self.ymin, self.xmax, self.ymax
        )
    }
}

/// One observed object in the current frame
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: Bbox,
    pub confidence: f32,
    pub class_label: String,
}

impl Detection {
    pub fn new(bbox: Bbox, confidence: f32, class_label: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            class_label: class_label.into(),
        }
    }

    /// Malformed detections (non-finite corners, inverted boxes, NaN scores)
    /// are dropped by the frame pipeline instead of failing the frame.
    pub fn is_valid(&self) -> bool {
        self.bbox.is_valid() && self.confidence.is_finite()
    }
}
