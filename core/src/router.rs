use std::sync::Arc;

use tracing::warn;

use crate::extract::SliceField;
use crate::field::frame::{ThumbnailCache, VolumetricFrame};
use crate::resolution::ResolutionMode;
use crate::volume::VolumeGrid;

/// The six logical display consumers the pipeline fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerRole {
    Primary2d,
    Primary3d,
    LowRes2d,
    LowRes3d,
    PreviewPrev,
    PreviewNext,
}

impl ConsumerRole {
    pub fn iter() -> impl Iterator<Item = ConsumerRole> {
        [
            ConsumerRole::Primary2d,
            ConsumerRole::Primary3d,
            ConsumerRole::LowRes2d,
            ConsumerRole::LowRes3d,
            ConsumerRole::PreviewPrev,
            ConsumerRole::PreviewNext,
        ]
        .into_iter()
    }
}

/// A published derived product. Consumers receive shared read-only snapshots;
/// a state change replaces the product wholesale, never edits it in place.
#[derive(Debug, Clone)]
pub enum Product {
    Frame(Arc<VolumetricFrame>),
    Thumbnails(Arc<ThumbnailCache>),
    Slice(Arc<SliceField>),
    Volume(Arc<VolumeGrid>),
}

/// One display consumer. Pushes are fire-and-forget: a `false` return is
/// logged and never retried, and consumers exert no backpressure.
pub trait DisplayConsumer: Send {
    /// `None` hides this role's layer.
    fn publish(&mut self, product: Option<&Product>) -> bool;

    fn sync_time(&mut self, index: usize) -> bool;

    fn sync_slice(&mut self, _slice: usize) -> bool {
        true
    }
}

/// Everything the routing decision depends on, captured at one instant.
#[derive(Clone, Copy)]
pub struct RouteSnapshot<'a> {
    pub mode: ResolutionMode,
    pub index: usize,
    pub slice: usize,
    pub timesteps: usize,
    pub plane_select: bool,
    pub volume_render: bool,
    pub frame: Option<&'a Arc<VolumetricFrame>>,
    pub thumbs: Option<&'a Arc<ThumbnailCache>>,
    pub slice_field: Option<&'a Arc<SliceField>>,
    pub volume: Option<&'a Arc<VolumeGrid>>,
}

/// Decides which product a role displays for the given state. Pure function
/// of the snapshot; `None` hides the role.
pub fn product_for(role: ConsumerRole, view: &RouteSnapshot<'_>) -> Option<Product> {
    let full = view.mode == ResolutionMode::Full;
    match role {
        ConsumerRole::Primary2d => {
            if view.plane_select {
                view.slice_field.cloned().map(Product::Slice)
            } else if full {
                view.frame.cloned().map(Product::Frame)
            } else {
                None
            }
        }
        ConsumerRole::LowRes2d => {
            if !full && !view.plane_select {
                view.thumbs.cloned().map(Product::Thumbnails)
            } else {
                None
            }
        }
        ConsumerRole::Primary3d => {
            if view.volume_render {
                full.then(|| view.volume.cloned().map(Product::Volume))
                    .flatten()
            } else if full {
                view.frame.cloned().map(Product::Frame)
            } else {
                None
            }
        }
        ConsumerRole::LowRes3d => {
            if view.volume_render {
                (!full)
                    .then(|| view.volume.cloned().map(Product::Volume))
                    .flatten()
            } else if !full {
                view.thumbs.cloned().map(Product::Thumbnails)
            } else {
                None
            }
        }
        ConsumerRole::PreviewPrev | ConsumerRole::PreviewNext => {
            view.thumbs.cloned().map(Product::Thumbnails)
        }
    }
}

/// Time index a role's animation control is synchronized to: previews are
/// offset by one, clamped at the series bounds.
pub fn time_for(role: ConsumerRole, view: &RouteSnapshot<'_>) -> usize {
    match role {
        ConsumerRole::PreviewPrev => view.index.saturating_sub(1),
        ConsumerRole::PreviewNext => {
            (view.index + 1).min(view.timesteps.saturating_sub(1))
        }
        _ => view.index,
    }
}

/// Pushes the correct product and time/slice synchronization to every
/// attached consumer. Never polls; the pipeline calls [`ViewRouter::route`]
/// on each state change.
#[derive(Default)]
pub struct ViewRouter {
    consumers: Vec<(ConsumerRole, Box<dyn DisplayConsumer>)>,
}

impl ViewRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a consumer for a role. Multiple consumers may share a role.
    pub fn attach(&mut self, role: ConsumerRole, consumer: Box<dyn DisplayConsumer>) {
        self.consumers.push((role, consumer));
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn route(&mut self, view: &RouteSnapshot<'_>) {
        for (role, consumer) in &mut self.consumers {
            let role = *role;
            let product = product_for(role, view);
            if !consumer.publish(product.as_ref()) {
                warn!(?role, "consumer rejected published product");
            }
            if !consumer.sync_time(time_for(role, view)) {
                warn!(?role, "consumer rejected time sync");
            }
            if matches!(role, ConsumerRole::Primary2d | ConsumerRole::LowRes2d)
                && !consumer.sync_slice(view.slice)
            {
                warn!(?role, "consumer rejected slice sync");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::frame::{SliceImage, VolumetricFrame};
    use crate::field::resample::FlatVolume;
    use crate::geom::{Bounds2F, Vec2, Vec2U};

    fn frame() -> Arc<VolumetricFrame> {
        let bounds = Bounds2F::new(Vec2::new(0.0, 0.0), Vec2::new(3.0, 3.0));
        let stack = vec![SliceImage::from_samples(4, 4, 1, vec![0.0; 16], bounds).unwrap()];
        Arc::new(VolumetricFrame::from_slices(stack).unwrap())
    }

    fn thumbs(frame: &Arc<VolumetricFrame>) -> Arc<ThumbnailCache> {
        let thumb = Arc::new(frame.downsample(Vec2U::new(2, 2)).unwrap());
        Arc::new(ThumbnailCache::new(vec![thumb], Vec2U::new(2, 2)))
    }

    fn volume(frame: &Arc<VolumetricFrame>) -> Arc<VolumeGrid> {
        Arc::new(FlatVolume::from_frame(frame))
    }

    fn snapshot<'a>(
        mode: ResolutionMode,
        frame: &'a Arc<VolumetricFrame>,
        thumbs: &'a Arc<ThumbnailCache>,
        volume: &'a Arc<VolumeGrid>,
    ) -> RouteSnapshot<'a> {
        RouteSnapshot {
            mode,
            index: 0,
            slice: 0,
            timesteps: 5,
            plane_select: false,
            volume_render: false,
            frame: Some(frame),
            thumbs: Some(thumbs),
            slice_field: None,
            volume: Some(volume),
        }
    }

    #[test]
    fn full_mode_routes_frames_to_primaries() {
        let f = frame();
        let t = thumbs(&f);
        let v = volume(&f);
        let view = snapshot(ResolutionMode::Full, &f, &t, &v);
        assert!(matches!(
            product_for(ConsumerRole::Primary2d, &view),
            Some(Product::Frame(_))
        ));
        assert!(matches!(
            product_for(ConsumerRole::Primary3d, &view),
            Some(Product::Frame(_))
        ));
        assert!(product_for(ConsumerRole::LowRes2d, &view).is_none());
        assert!(product_for(ConsumerRole::LowRes3d, &view).is_none());
    }

    #[test]
    fn low_mode_routes_thumbnails_to_lowres_layers() {
        let f = frame();
        let t = thumbs(&f);
        let v = volume(&f);
        let view = snapshot(ResolutionMode::Low, &f, &t, &v);
        assert!(product_for(ConsumerRole::Primary2d, &view).is_none());
        assert!(matches!(
            product_for(ConsumerRole::LowRes2d, &view),
            Some(Product::Thumbnails(_))
        ));
        assert!(matches!(
            product_for(ConsumerRole::LowRes3d, &view),
            Some(Product::Thumbnails(_))
        ));
    }

    #[test]
    fn plane_select_replaces_the_primary_2d_product() {
        let f = frame();
        let t = thumbs(&f);
        let v = volume(&f);
        let mut view = snapshot(ResolutionMode::Low, &f, &t, &v);
        view.plane_select = true;
        // no slice field resident yet: the layer hides rather than falling back
        assert!(product_for(ConsumerRole::Primary2d, &view).is_none());
        assert!(product_for(ConsumerRole::LowRes2d, &view).is_none());
    }

    #[test]
    fn volume_mode_routes_the_grid_by_resolution() {
        let f = frame();
        let t = thumbs(&f);
        let v = volume(&f);
        let mut view = snapshot(ResolutionMode::Full, &f, &t, &v);
        view.volume_render = true;
        assert!(matches!(
            product_for(ConsumerRole::Primary3d, &view),
            Some(Product::Volume(_))
        ));
        assert!(product_for(ConsumerRole::LowRes3d, &view).is_none());

        view.mode = ResolutionMode::Low;
        assert!(product_for(ConsumerRole::Primary3d, &view).is_none());
        assert!(matches!(
            product_for(ConsumerRole::LowRes3d, &view),
            Some(Product::Volume(_))
        ));
    }

    #[test]
    fn preview_time_sync_is_clamped_at_the_bounds() {
        let f = frame();
        let t = thumbs(&f);
        let v = volume(&f);
        let mut view = snapshot(ResolutionMode::Full, &f, &t, &v);
        view.index = 0;
        assert_eq!(time_for(ConsumerRole::PreviewPrev, &view), 0);
        assert_eq!(time_for(ConsumerRole::PreviewNext, &view), 1);
        view.index = 4;
        assert_eq!(time_for(ConsumerRole::PreviewPrev, &view), 3);
        assert_eq!(time_for(ConsumerRole::PreviewNext, &view), 4);
        assert_eq!(time_for(ConsumerRole::Primary2d, &view), 4);
    }
}
