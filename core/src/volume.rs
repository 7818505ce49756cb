use std::sync::Arc;

use tracing::debug;

use crate::extract::ExtractError;
use crate::field::frame::FrameId;
use crate::field::resample::{self, FlatVolume};

/// A fixed-resolution cubic resampling of the current frame, consumed by
/// volume-rendering display modes.
pub type VolumeGrid = FlatVolume;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VolumeKey {
    frame: FrameId,
    resolution: u32,
}

/// Produces the n-cubed volume grid for the active frame, memoized by frame
/// identity and target resolution. Only invoked while volume rendering is on.
#[derive(Debug, Default)]
pub struct VolumeDownsampler {
    cache: Option<(VolumeKey, Arc<VolumeGrid>)>,
}

impl VolumeDownsampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resamples the flattened grid to `resolution` per axis. When the grid
    /// already has exactly that shape it is reused as-is, with no resampling
    /// work.
    pub fn downsample(
        &mut self,
        flat: &Arc<FlatVolume>,
        resolution: u32,
    ) -> Result<Arc<VolumeGrid>, ExtractError> {
        if resolution == 0 {
            return Err(ExtractError::InvalidVolumeResolution(resolution));
        }
        let key = VolumeKey {
            frame: flat.frame(),
            resolution,
        };
        if let Some((cached_key, grid)) = &self.cache {
            if *cached_key == key {
                return Ok(grid.clone());
            }
        }
        let n = resolution as usize;
        let grid = if flat.resolution() == (n, n, n) {
            flat.clone()
        } else {
            debug!(resolution, "resampling volume grid");
            Arc::new(resample::resample_cube(flat, resolution))
        };
        self.cache = Some((key, grid.clone()));
        Ok(grid)
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::frame::{SliceImage, VolumetricFrame};
    use crate::geom::{Bounds2F, Vec2};

    fn flat(width: u32, height: u32, slices: usize) -> Arc<FlatVolume> {
        let bounds = Bounds2F::new(
            Vec2::new(0.0, 0.0),
            Vec2::new((width - 1) as f32, (height - 1) as f32),
        );
        let stack = (0..slices)
            .map(|_| {
                SliceImage::from_samples(
                    width,
                    height,
                    1,
                    vec![1.0; (width * height) as usize],
                    bounds,
                )
                .unwrap()
            })
            .collect();
        let frame = VolumetricFrame::from_slices(stack).unwrap();
        Arc::new(FlatVolume::from_frame(&frame))
    }

    #[test]
    fn matching_resolution_reuses_the_source() {
        let flat = flat(4, 4, 4);
        let mut downsampler = VolumeDownsampler::new();
        let grid = downsampler.downsample(&flat, 4).unwrap();
        assert!(Arc::ptr_eq(&grid, &flat));
    }

    #[test]
    fn mismatched_resolution_builds_a_cube() {
        let flat = flat(8, 6, 2);
        let mut downsampler = VolumeDownsampler::new();
        let grid = downsampler.downsample(&flat, 4).unwrap();
        assert!(!Arc::ptr_eq(&grid, &flat));
        assert_eq!(grid.resolution(), (4, 4, 4));
        assert_eq!(grid.bounds(), flat.bounds());
    }

    #[test]
    fn repeated_requests_hit_the_cache() {
        let flat = flat(8, 6, 2);
        let mut downsampler = VolumeDownsampler::new();
        let a = downsampler.downsample(&flat, 4).unwrap();
        let b = downsampler.downsample(&flat, 4).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn zero_resolution_is_rejected() {
        let flat = flat(4, 4, 1);
        let mut downsampler = VolumeDownsampler::new();
        assert!(matches!(
            downsampler.downsample(&flat, 0),
            Err(ExtractError::InvalidVolumeResolution(0))
        ));
    }
}
