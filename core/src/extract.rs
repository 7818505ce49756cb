use std::sync::Arc;

use ndarray::{Array3, ArrayView3};
use thiserror::Error;
use tracing::debug;

use crate::common::range::Range;
use crate::field::frame::{FrameId, VolumetricFrame};
use crate::field::plane::SlicePlane;
use crate::field::resample::{self, FlatVolume};
use crate::geom::Vec2U;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no dataset is loaded")]
    NoData,
    #[error("invalid target resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },
    #[error("invalid volume resolution {0}")]
    InvalidVolumeResolution(u32),
    #[error("plane geometry is degenerate")]
    DegeneratePlane,
}

/// A 2-D grid resampled from a frame along an oblique plane. Samples shaped
/// `(height, width, channel)`; missing samples are NaN.
#[derive(Debug)]
pub struct SliceField {
    data: Array3<f32>,
    plane: SlicePlane,
    resolution: Vec2U,
}

impl SliceField {
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    pub fn plane(&self) -> SlicePlane {
        self.plane
    }

    pub fn resolution(&self) -> Vec2U {
        self.resolution
    }

    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    /// Range of the finite sample values, `None` when the plane misses the
    /// volume entirely.
    pub fn value_range(&self) -> Option<Range<f32>> {
        Range::from_iter_val(self.data.iter().copied().filter(|v| !v.is_nan()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SliceKey {
    frame: FrameId,
    plane: SlicePlane,
    resolution: Vec2U,
}

/// Derives plane slices from frames, memoizing both the flattened 3-D grid
/// (per frame) and the extracted 2-D field (per frame + plane + resolution).
#[derive(Debug, Default)]
pub struct SliceExtractor {
    flat: Option<Arc<FlatVolume>>,
    slice: Option<(SliceKey, Arc<SliceField>)>,
    recomputes: u64,
}

impl SliceExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The frame's slice axis flattened into a true 3-D grid, reused until a
    /// different frame is requested.
    pub fn flatten(&mut self, frame: &VolumetricFrame) -> Arc<FlatVolume> {
        match &self.flat {
            Some(flat) if flat.frame() == frame.id() => flat.clone(),
            _ => {
                debug!(frame = ?frame.id(), "flattening frame");
                let flat = Arc::new(FlatVolume::from_frame(frame));
                self.flat = Some(flat.clone());
                flat
            }
        }
    }

    /// Resamples the frame onto the plane at the requested resolution. The
    /// result is cached until the frame, the plane, or the resolution
    /// changes; re-requesting with an unchanged key returns the cached
    /// instance.
    pub fn extract(
        &mut self,
        frame: &VolumetricFrame,
        plane: &SlicePlane,
        resolution: Vec2U,
    ) -> Result<Arc<SliceField>, ExtractError> {
        if resolution.x == 0 || resolution.y == 0 {
            return Err(ExtractError::InvalidResolution {
                width: resolution.x,
                height: resolution.y,
            });
        }
        if plane.is_degenerate() {
            return Err(ExtractError::DegeneratePlane);
        }
        let key = SliceKey {
            frame: frame.id(),
            plane: *plane,
            resolution,
        };
        if let Some((cached_key, field)) = &self.slice {
            if *cached_key == key {
                return Ok(field.clone());
            }
        }
        let flat = self.flatten(frame);
        let data = resample::extract_plane(&flat, plane, resolution);
        self.recomputes += 1;
        let field = Arc::new(SliceField {
            data,
            plane: *plane,
            resolution,
        });
        self.slice = Some((key, field.clone()));
        debug!(recomputes = self.recomputes, "extracted plane slice");
        Ok(field)
    }

    /// Drops both memoized products.
    pub fn invalidate(&mut self) {
        self.flat = None;
        self.slice = None;
    }

    /// How many times a slice field has actually been recomputed.
    pub fn recompute_count(&self) -> u64 {
        self.recomputes
    }
}
