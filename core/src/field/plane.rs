use serde::{Deserialize, Serialize};

use crate::geom::{Bounds3F, Vec3F};

/// An oblique cutting plane through volume space: an anchor corner plus the
/// two edge vectors spanning the patch that gets resampled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlicePlane {
    pub origin: Vec3F,
    pub u: Vec3F,
    pub v: Vec3F,
}

impl SlicePlane {
    pub fn new(origin: Vec3F, u: Vec3F, v: Vec3F) -> Self {
        Self { origin, u, v }
    }

    /// Builds the plane from its anchor corner and the two adjacent corners.
    pub fn from_corners(a: Vec3F, b: Vec3F, c: Vec3F) -> Self {
        Self::new(a, b - a, c - a)
    }

    pub fn corners(&self) -> [Vec3F; 3] {
        [self.origin, self.origin + self.u, self.origin + self.v]
    }

    /// Point on the patch at parameters `s`, `t` in `[0, 1]`.
    pub fn point_at(&self, s: f32, t: f32) -> Vec3F {
        self.origin + self.u * s + self.v * t
    }

    /// A plane with (near-)collinear edges spans no area and cannot be
    /// resampled.
    pub fn is_degenerate(&self) -> bool {
        self.u.cross(self.v).length() <= f32::EPSILON
    }

    /// Default selection for a dataset: the diagonal patch sweeping the x-y
    /// footprint through the z extent, falling back to the first z layer when
    /// the volume has no depth.
    pub fn diagonal(bounds: Bounds3F) -> Self {
        if bounds.max.z > bounds.min.z {
            Self::from_corners(
                bounds.min,
                Vec3F::new(bounds.max.x, bounds.max.y, bounds.min.z),
                Vec3F::new(bounds.min.x, bounds.min.y, bounds.max.z),
            )
        } else {
            Self::from_corners(
                bounds.min,
                Vec3F::new(bounds.max.x, bounds.min.y, bounds.min.z),
                Vec3F::new(bounds.min.x, bounds.max.y, bounds.min.z),
            )
        }
    }
}

impl Default for SlicePlane {
    fn default() -> Self {
        Self::diagonal(Bounds3F::new(Vec3F::ZERO, Vec3F::new(1.0, 1.0, 1.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Vec3;

    #[test]
    fn corners_round_trip() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(2.0, 0.0, 1.0);
        let c = Vec3::new(0.0, 3.0, 0.0);
        let plane = SlicePlane::from_corners(a, b, c);
        assert_eq!(plane.corners(), [a, b, c]);
    }

    #[test]
    fn point_at_interpolates_the_patch() {
        let plane = SlicePlane::from_corners(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(0.0, 2.0, 0.0),
        );
        assert_eq!(plane.point_at(0.5, 0.5), Vec3::new(2.0, 1.0, 0.0));
        assert_eq!(plane.point_at(1.0, 0.0), Vec3::new(4.0, 0.0, 0.0));
    }

    #[test]
    fn collinear_edges_are_degenerate() {
        let plane = SlicePlane::new(
            Vec3::ZERO,
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(2.0, 2.0, 0.0),
        );
        assert!(plane.is_degenerate());
        assert!(!SlicePlane::default().is_degenerate());
    }

    #[test]
    fn diagonal_of_flat_volume_is_not_degenerate() {
        let bounds = Bounds3F::new(Vec3::ZERO, Vec3::new(9.0, 9.0, 0.0));
        assert!(!SlicePlane::diagonal(bounds).is_degenerate());
    }
}
