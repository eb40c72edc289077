//! Grid-quantized pseudo identities for frame-to-frame re-identification

use crate::bbox::Bbox;
use std::fmt;

/// Default grid cell size in detection-space pixels
pub const DEFAULT_CELL_SIZE: f32 = 10.0;

/// Approximately stable token derived from a box's quantized corners.
///
/// Two detections of the same object in consecutive frames usually drift by
/// less than one cell, so they map to the same token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId {
    corners: [i32; 4],
}

impl TargetId {
    /// Quantized corners [x1, y1, x2, y2], each a multiple of the cell size
    pub fn corners(&self) -> [i32; 4] {
        self.corners
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x1, y1, x2, y2] = self.corners;
        write!(f, "{}_{}_{}_{}", x1, y1, x2, y2)
    }
}

/// Quantization grid used to derive [`TargetId`]s
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentityGrid {
    cell_size: f32,
}

impl Default for IdentityGrid {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
        }
    }
}

impl IdentityGrid {
    /// Create a grid with the given cell size. Sizes below one pixel or
    /// non-finite sizes fall back to [`DEFAULT_CELL_SIZE`].
    pub fn new(cell_size: f32) -> Self {
        if cell_size.is_finite() && cell_size >= 1.0 {
            Self { cell_size }
        } else {
            log::warn!(
                "Invalid identity cell size {}, using {}",
                cell_size,
                DEFAULT_CELL_SIZE
            );
            Self::default()
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    #[inline]
    fn quantize(&self, v: f32) -> i32 {
        ((v / self.cell_size).floor() * self.cell_size) as i32
    }

    /// Derive the identity of a box
    pub fn derive(&self, bbox: &Bbox) -> TargetId {
        TargetId {
            corners: [
                self.quantize(bbox.xmin),
                self.quantize(bbox.ymin),
                self.quantize(bbox.xmax),
                self.quantize(bbox.ymax),
            ],
        }
    }
}
