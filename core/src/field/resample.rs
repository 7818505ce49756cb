//! Weighted-average resampling over regular grids.
//!
//! Every routine here shares the same error policy: source samples outside
//! the bounding box (or missing, i.e. NaN) are excluded from the weighted
//! average and the remaining weights are renormalized; an output sample with
//! no in-bounds contributor is missing, never zero-filled.

use get_size::GetSize;
use ndarray::{Array3, Array4, ArrayView4, Axis};

use crate::field::frame::{FieldError, FrameId, RangeKind, SliceImage, VolumetricFrame};
use crate::field::plane::SlicePlane;
use crate::geom::{Bounds3F, Vec2U, Vec3F};

/// A frame's slice axis flattened into a true 3-D grid: samples shaped
/// `(slice, height, width, channel)` spanning the frame's bounding box.
#[derive(Debug)]
pub struct FlatVolume {
    frame: FrameId,
    data: Array4<f32>,
    bounds: Bounds3F,
    range: RangeKind,
}

impl FlatVolume {
    pub fn from_frame(frame: &VolumetricFrame) -> FlatVolume {
        let resolution = frame.resolution();
        let mut data = Array4::zeros((
            frame.slice_count(),
            resolution.y as usize,
            resolution.x as usize,
            frame.channels(),
        ));
        for (z, slice) in frame.slices().iter().enumerate() {
            data.index_axis_mut(Axis(0), z).assign(&slice.data());
        }
        FlatVolume {
            frame: frame.id(),
            data,
            bounds: frame.bounds(),
            range: frame.range_kind(),
        }
    }

    /// Identity of the frame this grid was flattened from.
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    pub fn data(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    pub fn bounds(&self) -> Bounds3F {
        self.bounds
    }

    pub fn range_kind(&self) -> RangeKind {
        self.range
    }

    pub fn channels(&self) -> usize {
        self.data.dim().3
    }

    /// Axis lengths as `(slices, height, width)`.
    pub fn resolution(&self) -> (usize, usize, usize) {
        let (slices, height, width, _) = self.data.dim();
        (slices, height, width)
    }

    /// Trilinear weighted-average sample at a point in domain coordinates.
    /// Writes one value per channel into `out`; every channel is NaN when the
    /// point lies outside the bounding box.
    pub fn sample(&self, p: Vec3F, out: &mut [f32]) {
        out.fill(f32::NAN);
        let (nz, ny, nx, channels) = self.data.dim();
        let Some(fz) = axis_index(p.z, self.bounds.min.z, self.bounds.max.z, nz) else {
            return;
        };
        let Some(fy) = axis_index(p.y, self.bounds.min.y, self.bounds.max.y, ny) else {
            return;
        };
        let Some(fx) = axis_index(p.x, self.bounds.min.x, self.bounds.max.x, nx) else {
            return;
        };
        let (z0, z1, wz) = lerp_ends(fz, nz);
        let (y0, y1, wy) = lerp_ends(fy, ny);
        let (x0, x1, wx) = lerp_ends(fx, nx);
        let corners = [
            (z0, y0, x0, (1.0 - wz) * (1.0 - wy) * (1.0 - wx)),
            (z0, y0, x1, (1.0 - wz) * (1.0 - wy) * wx),
            (z0, y1, x0, (1.0 - wz) * wy * (1.0 - wx)),
            (z0, y1, x1, (1.0 - wz) * wy * wx),
            (z1, y0, x0, wz * (1.0 - wy) * (1.0 - wx)),
            (z1, y0, x1, wz * (1.0 - wy) * wx),
            (z1, y1, x0, wz * wy * (1.0 - wx)),
            (z1, y1, x1, wz * wy * wx),
        ];
        for (channel, out) in out.iter_mut().enumerate().take(channels) {
            let mut sum = 0.0;
            let mut weight = 0.0;
            for &(z, y, x, w) in &corners {
                if w <= 0.0 {
                    continue;
                }
                let value = self.data[(z, y, x, channel)];
                if value.is_nan() {
                    continue;
                }
                sum += w * value;
                weight += w;
            }
            *out = if weight > 0.0 { sum / weight } else { f32::NAN };
        }
    }
}

impl GetSize for FlatVolume {
    fn get_heap_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

/// Fractional grid index of a domain coordinate along one axis, or `None`
/// when the coordinate falls outside the axis bounds.
fn axis_index(coord: f32, min: f32, max: f32, len: usize) -> Option<f32> {
    if len == 0 || coord < min || coord > max {
        return None;
    }
    if len == 1 || max <= min {
        return Some(0.0);
    }
    Some((coord - min) / (max - min) * (len - 1) as f32)
}

/// Interpolation endpoints and upper-end weight for a fractional index.
fn lerp_ends(index: f32, len: usize) -> (usize, usize, f32) {
    if len <= 1 {
        return (0, 0, 0.0);
    }
    let clamped = index.clamp(0.0, (len - 1) as f32);
    let lo = (clamped.floor() as usize).min(len - 2);
    (lo, lo + 1, clamped - lo as f32)
}

/// Source grid index a destination sample maps to when both grids span the
/// same bounds.
fn map_index(dst: usize, dst_len: usize, src_len: usize) -> f32 {
    if dst_len <= 1 {
        (src_len - 1) as f32 * 0.5
    } else {
        dst as f32 * (src_len - 1) as f32 / (dst_len - 1) as f32
    }
}

/// Bilinear weighted-average resample of one slice onto a grid of the given
/// resolution spanning the same bounds.
pub(crate) fn resample_image(
    src: &SliceImage,
    resolution: Vec2U,
) -> Result<SliceImage, FieldError> {
    if resolution.x == 0 || resolution.y == 0 {
        return Err(FieldError::EmptyImage);
    }
    let data = src.data();
    let (src_h, src_w, channels) = data.dim();
    let (dst_w, dst_h) = (resolution.x as usize, resolution.y as usize);
    let mut out = Array3::zeros((dst_h, dst_w, channels));
    for j in 0..dst_h {
        let (y0, y1, wy) = lerp_ends(map_index(j, dst_h, src_h), src_h);
        for i in 0..dst_w {
            let (x0, x1, wx) = lerp_ends(map_index(i, dst_w, src_w), src_w);
            let corners = [
                (y0, x0, (1.0 - wy) * (1.0 - wx)),
                (y0, x1, (1.0 - wy) * wx),
                (y1, x0, wy * (1.0 - wx)),
                (y1, x1, wy * wx),
            ];
            for channel in 0..channels {
                let mut sum = 0.0;
                let mut weight = 0.0;
                for &(y, x, w) in &corners {
                    if w <= 0.0 {
                        continue;
                    }
                    let value = data[(y, x, channel)];
                    if value.is_nan() {
                        continue;
                    }
                    sum += w * value;
                    weight += w;
                }
                out[(j, i, channel)] = if weight > 0.0 {
                    sum / weight
                } else {
                    f32::NAN
                };
            }
        }
    }
    SliceImage::new(out, src.bounds())
}

/// Resamples the flattened grid onto the plane's basis at the requested
/// output resolution. Samples shaped `(height, width, channel)`.
pub(crate) fn extract_plane(
    flat: &FlatVolume,
    plane: &SlicePlane,
    resolution: Vec2U,
) -> Array3<f32> {
    let (width, height) = (resolution.x as usize, resolution.y as usize);
    let channels = flat.channels();
    let mut out = Array3::from_elem((height, width, channels), f32::NAN);
    let mut sample = vec![0.0; channels];
    for j in 0..height {
        let t = if height <= 1 {
            0.5
        } else {
            j as f32 / (height - 1) as f32
        };
        for i in 0..width {
            let s = if width <= 1 {
                0.5
            } else {
                i as f32 / (width - 1) as f32
            };
            flat.sample(plane.point_at(s, t), &mut sample);
            for (channel, &value) in sample.iter().enumerate() {
                out[(j, i, channel)] = value;
            }
        }
    }
    out
}

/// Builds a regular n-cubed grid spanning the same bounding box, populated by
/// weighted-average resampling.
pub(crate) fn resample_cube(flat: &FlatVolume, resolution: u32) -> FlatVolume {
    let n = resolution as usize;
    let channels = flat.channels();
    let bounds = flat.bounds();
    let mut data = Array4::from_elem((n, n, n, channels), f32::NAN);
    let mut sample = vec![0.0; channels];
    for z in 0..n {
        let pz = axis_coord(z, n, bounds.min.z, bounds.max.z);
        for y in 0..n {
            let py = axis_coord(y, n, bounds.min.y, bounds.max.y);
            for x in 0..n {
                let px = axis_coord(x, n, bounds.min.x, bounds.max.x);
                flat.sample(Vec3F::new(px, py, pz), &mut sample);
                for (channel, &value) in sample.iter().enumerate() {
                    data[(z, y, x, channel)] = value;
                }
            }
        }
    }
    FlatVolume {
        frame: flat.frame,
        data,
        bounds,
        range: flat.range,
    }
}

/// Domain coordinate of grid sample `i` on an axis of `len` samples spanning
/// `[min, max]`.
fn axis_coord(i: usize, len: usize, min: f32, max: f32) -> f32 {
    if len <= 1 {
        (min + max) * 0.5
    } else {
        min + (max - min) * i as f32 / (len - 1) as f32
    }
}
