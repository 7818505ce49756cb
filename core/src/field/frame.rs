use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use get_size::GetSize;
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::range::Range;
use crate::field::resample;
use crate::geom::{Bounds2F, Bounds3F, Vec2U, Vec3};

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("frame contains no slices")]
    EmptyFrame,
    #[error("image has a zero-sized axis")]
    EmptyImage,
    #[error("image has no range channels")]
    NoChannels,
    #[error("range arity mismatch between slices: {first} vs {got} channels")]
    ChannelMismatch { first: usize, got: usize },
    #[error("sample buffer shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Shape of a frame's range, fixed at ingestion: a single scalar channel or a
/// tuple of scalar channels (e.g. RGB). Anything else is rejected as a typed
/// error instead of being discovered downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeKind {
    Scalar,
    Tuple(usize),
}

impl RangeKind {
    pub fn from_channels(channels: usize) -> Result<Self, FieldError> {
        match channels {
            0 => Err(FieldError::NoChannels),
            1 => Ok(RangeKind::Scalar),
            n => Ok(RangeKind::Tuple(n)),
        }
    }

    pub fn channels(self) -> usize {
        match self {
            RangeKind::Scalar => 1,
            RangeKind::Tuple(n) => n,
        }
    }
}

/// Identity of one loaded frame, used to key derived-product caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

impl FrameId {
    fn next() -> FrameId {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        FrameId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// One 2-D layer of a volumetric frame: samples shaped
/// `(height, width, channels)` plus the x/y domain bounds they span.
#[derive(Debug, Clone)]
pub struct SliceImage {
    data: Array3<f32>,
    bounds: Bounds2F,
}

impl SliceImage {
    pub fn new(data: Array3<f32>, bounds: Bounds2F) -> Result<Self, FieldError> {
        let (height, width, channels) = data.dim();
        if channels == 0 {
            return Err(FieldError::NoChannels);
        }
        if height == 0 || width == 0 {
            return Err(FieldError::EmptyImage);
        }
        Ok(Self { data, bounds })
    }

    pub fn from_samples(
        width: u32,
        height: u32,
        channels: usize,
        samples: Vec<f32>,
        bounds: Bounds2F,
    ) -> Result<Self, FieldError> {
        let data = Array3::from_shape_vec((height as usize, width as usize, channels), samples)?;
        Self::new(data, bounds)
    }

    pub fn width(&self) -> u32 {
        self.data.dim().1 as u32
    }

    pub fn height(&self) -> u32 {
        self.data.dim().0 as u32
    }

    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    pub fn resolution(&self) -> Vec2U {
        Vec2U::new(self.width(), self.height())
    }

    pub fn bounds(&self) -> Bounds2F {
        self.bounds
    }

    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// Range of the finite sample values, `None` when every sample is missing.
    pub fn value_range(&self) -> Option<Range<f32>> {
        Range::from_iter_val(self.data.iter().copied().filter(|v| !v.is_nan()))
    }

    /// Weighted-average resample onto a grid of the given resolution spanning
    /// the same bounds.
    pub fn resample(&self, resolution: Vec2U) -> Result<SliceImage, FieldError> {
        resample::resample_image(self, resolution)
    }
}

impl GetSize for SliceImage {
    fn get_heap_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

/// One timestep of the dataset: a stack of slices with uniform resolution and
/// range arity.
///
/// Source slices that disagree in resolution are reconciled at construction by
/// resampling each one up to the elementwise maximum width/height observed
/// across the stack.
#[derive(Debug, Clone)]
pub struct VolumetricFrame {
    id: FrameId,
    slices: Vec<SliceImage>,
    range: RangeKind,
    bounds: Bounds3F,
}

impl VolumetricFrame {
    pub fn from_slices(slices: Vec<SliceImage>) -> Result<Self, FieldError> {
        let first = slices.first().ok_or(FieldError::EmptyFrame)?;
        let range = RangeKind::from_channels(first.channels())?;
        for slice in &slices {
            if slice.channels() != range.channels() {
                return Err(FieldError::ChannelMismatch {
                    first: range.channels(),
                    got: slice.channels(),
                });
            }
        }

        let max = slices.iter().fold(Vec2U::new(0, 0), |max, s| {
            Vec2U::new(max.x.max(s.width()), max.y.max(s.height()))
        });
        let slices = slices
            .into_iter()
            .map(|s| {
                if s.resolution() == max {
                    Ok(s)
                } else {
                    s.resample(max)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let footprint = slices
            .iter()
            .map(SliceImage::bounds)
            .reduce(Bounds2F::union)
            .unwrap_or_default();
        let depth = (slices.len() - 1) as f32;
        let bounds = Bounds3F::new(
            Vec3::new(footprint.min.x, footprint.min.y, 0.0),
            Vec3::new(footprint.max.x, footprint.max.y, depth),
        );

        Ok(Self {
            id: FrameId::next(),
            slices,
            range,
            bounds,
        })
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    pub fn slices(&self) -> &[SliceImage] {
        &self.slices
    }

    pub fn into_slices(self) -> Vec<SliceImage> {
        self.slices
    }

    pub fn range_kind(&self) -> RangeKind {
        self.range
    }

    pub fn channels(&self) -> usize {
        self.range.channels()
    }

    pub fn resolution(&self) -> Vec2U {
        self.slices[0].resolution()
    }

    pub fn bounds(&self) -> Bounds3F {
        self.bounds
    }

    pub fn value_range(&self) -> Option<Range<f32>> {
        Range::from_iter_range(self.slices.iter().filter_map(SliceImage::value_range))
    }

    /// Downsampled copy of the whole stack, e.g. for thumbnail generation.
    /// The result is a distinct frame with its own identity.
    pub fn downsample(&self, resolution: Vec2U) -> Result<VolumetricFrame, FieldError> {
        let slices = self
            .slices
            .iter()
            .map(|s| s.resample(resolution))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_slices(slices)
    }
}

impl GetSize for VolumetricFrame {
    fn get_heap_size(&self) -> usize {
        self.slices.iter().map(GetSize::get_size).sum()
    }
}

/// Time-indexed stack of downsampled frames, one per timestep. Coexists with
/// the full-resolution data, never replaces it.
#[derive(Debug, Clone)]
pub struct ThumbnailCache {
    frames: Vec<Arc<VolumetricFrame>>,
    resolution: Vec2U,
}

impl ThumbnailCache {
    pub fn new(frames: Vec<Arc<VolumetricFrame>>, resolution: Vec2U) -> Self {
        Self { frames, resolution }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, index: usize) -> Option<&Arc<VolumetricFrame>> {
        self.frames.get(index)
    }

    pub fn resolution(&self) -> Vec2U {
        self.resolution
    }
}

impl GetSize for ThumbnailCache {
    fn get_heap_size(&self) -> usize {
        self.frames.iter().map(|f| f.get_size()).sum()
    }
}
