use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::field::frame::{FieldError, RangeKind, SliceImage, ThumbnailCache, VolumetricFrame};
use crate::geom::Vec2U;
use crate::series::{DataSeries, FrameSource};

/// Receives progress while a load runs and is polled for cooperative
/// cancellation between work units.
pub trait LoadMonitor: Send + Sync {
    fn progress(&self, percent: u8, label: &str);

    fn cancel_requested(&self) -> bool {
        false
    }
}

/// Monitor that swallows progress and never cancels.
pub struct NullMonitor;

impl LoadMonitor for NullMonitor {
    fn progress(&self, _percent: u8, _label: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Every source file is one slice of a single timestep.
    SliceCombining,
    /// Load every timestep once, downsample each into the thumbnail cache,
    /// retain only the active timestep's full frame.
    ThumbnailEager { thumb_size: Vec2U },
    /// Load only the active timestep; no thumbnails.
    LazyFull,
}

/// The complete result of one bulk load, published atomically by the control
/// thread.
#[derive(Debug)]
pub struct LoadOutput {
    pub timesteps: usize,
    pub slices: usize,
    pub active_index: usize,
    pub frame: Arc<VolumetricFrame>,
    pub thumbs: Option<Arc<ThumbnailCache>>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("data series contains no sources")]
    EmptySeries,
    #[error("load was cancelled")]
    Cancelled,
    #[error("active index {index} is out of range for {len} sources")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("invalid thumbnail resolution {width}x{height}")]
    InvalidThumbnailSize { width: u32, height: u32 },
    #[error("cannot load {path}: {source}")]
    Source {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("{path} does not contain an image stack: {source}")]
    NotAnImageStack {
        path: String,
        #[source]
        source: FieldError,
    },
    #[error("{path}: expected {expected} slices per timestep, found {got}")]
    SliceCountMismatch {
        path: String,
        expected: usize,
        got: usize,
    },
    #[error("{path}: expected {expected:?} range, found {got:?}")]
    RangeMismatch {
        path: String,
        expected: RangeKind,
        got: RangeKind,
    },
}

/// Runs one bulk load on the worker thread. Either the whole series loads and
/// a complete [`LoadOutput`] is returned, or a structured error names what
/// went wrong and nothing is published.
#[instrument(skip_all, fields(sources = series.len(), index = active_index, ?strategy))]
pub fn load<S: FrameSource>(
    source: &S,
    series: &DataSeries,
    active_index: usize,
    strategy: LoadStrategy,
    monitor: &dyn LoadMonitor,
) -> Result<LoadOutput, LoadError> {
    if series.is_empty() {
        return Err(LoadError::EmptySeries);
    }
    if active_index >= series.len() {
        return Err(LoadError::IndexOutOfRange {
            index: active_index,
            len: series.len(),
        });
    }

    match strategy {
        LoadStrategy::SliceCombining => combine_slices(source, series, monitor),
        LoadStrategy::ThumbnailEager { thumb_size } => {
            eager_thumbnails(source, series, active_index, thumb_size, monitor)
        }
        LoadStrategy::LazyFull => lazy_full(source, series, active_index, monitor),
    }
}

fn combine_slices<S: FrameSource>(
    source: &S,
    series: &DataSeries,
    monitor: &dyn LoadMonitor,
) -> Result<LoadOutput, LoadError> {
    let total = series.len();
    let mut slices: Vec<SliceImage> = Vec::with_capacity(total);
    let mut range: Option<RangeKind> = None;
    for (i, path) in series.sources().iter().enumerate() {
        check_cancel(monitor)?;
        monitor.progress(percent(i, total), &loading_label(path));
        let frame = load_one(source, path)?;
        check_range(path, &mut range, frame.range_kind())?;
        slices.extend(frame.into_slices());
        monitor.progress(percent(i + 1, total), &loading_label(path));
    }
    let frame = VolumetricFrame::from_slices(slices).map_err(|source| {
        // combine failures surface against the series' first file
        LoadError::NotAnImageStack {
            path: series.sources()[0].clone(),
            source,
        }
    })?;
    debug!(slices = frame.slice_count(), "combined slice series");
    Ok(LoadOutput {
        timesteps: 1,
        slices: frame.slice_count(),
        active_index: 0,
        frame: Arc::new(frame),
        thumbs: None,
    })
}

fn eager_thumbnails<S: FrameSource>(
    source: &S,
    series: &DataSeries,
    active_index: usize,
    thumb_size: Vec2U,
    monitor: &dyn LoadMonitor,
) -> Result<LoadOutput, LoadError> {
    if thumb_size.x == 0 || thumb_size.y == 0 {
        return Err(LoadError::InvalidThumbnailSize {
            width: thumb_size.x,
            height: thumb_size.y,
        });
    }
    let total = series.len();
    let mut thumbs: Vec<Option<Arc<VolumetricFrame>>> = (0..total).map(|_| None).collect();
    let mut active: Option<Arc<VolumetricFrame>> = None;
    let mut slices: Option<usize> = None;
    let mut range: Option<RangeKind> = None;
    // non-active timesteps first, each full frame dropped right after
    // downsampling; the active timestep loads last and is the only full
    // frame retained, so at most one is resident at any point
    let order = (0..total)
        .filter(|&i| i != active_index)
        .chain([active_index]);
    let mut done = 0;
    for i in order {
        let path = &series.sources()[i];
        check_cancel(monitor)?;
        monitor.progress(percent(done, total), &loading_label(path));
        let frame = load_one(source, path)?;
        check_slices(path, &mut slices, frame.slice_count())?;
        check_range(path, &mut range, frame.range_kind())?;
        let thumb = frame
            .downsample(thumb_size)
            .map_err(|source| LoadError::NotAnImageStack {
                path: path.clone(),
                source,
            })?;
        thumbs[i] = Some(Arc::new(thumb));
        if i == active_index {
            active = Some(Arc::new(frame));
        }
        done += 1;
        monitor.progress(percent(done, total), &loading_label(path));
    }
    let frame = active.ok_or(LoadError::IndexOutOfRange {
        index: active_index,
        len: total,
    })?;
    let thumbs: Vec<Arc<VolumetricFrame>> = thumbs.into_iter().flatten().collect();
    Ok(LoadOutput {
        timesteps: total,
        slices: frame.slice_count(),
        active_index,
        frame,
        thumbs: Some(Arc::new(ThumbnailCache::new(thumbs, thumb_size))),
    })
}

fn lazy_full<S: FrameSource>(
    source: &S,
    series: &DataSeries,
    active_index: usize,
    monitor: &dyn LoadMonitor,
) -> Result<LoadOutput, LoadError> {
    check_cancel(monitor)?;
    let path = &series.sources()[active_index];
    monitor.progress(0, &loading_label(path));
    let frame = load_one(source, path)?;
    monitor.progress(100, &loading_label(path));
    Ok(LoadOutput {
        timesteps: series.len(),
        slices: frame.slice_count(),
        active_index,
        frame: Arc::new(frame),
        thumbs: None,
    })
}

fn load_one<S: FrameSource>(source: &S, path: &str) -> Result<VolumetricFrame, LoadError> {
    source.load_frame(path).map_err(|err| LoadError::Source {
        path: path.to_string(),
        source: Box::new(err),
    })
}

fn check_cancel(monitor: &dyn LoadMonitor) -> Result<(), LoadError> {
    if monitor.cancel_requested() {
        debug!("load cancelled");
        Err(LoadError::Cancelled)
    } else {
        Ok(())
    }
}

fn check_slices(path: &str, expected: &mut Option<usize>, got: usize) -> Result<(), LoadError> {
    match *expected {
        Some(expected) if expected != got => Err(LoadError::SliceCountMismatch {
            path: path.to_string(),
            expected,
            got,
        }),
        Some(_) => Ok(()),
        None => {
            *expected = Some(got);
            Ok(())
        }
    }
}

fn check_range(
    path: &str,
    expected: &mut Option<RangeKind>,
    got: RangeKind,
) -> Result<(), LoadError> {
    match *expected {
        Some(expected) if expected != got => Err(LoadError::RangeMismatch {
            path: path.to_string(),
            expected,
            got,
        }),
        Some(_) => Ok(()),
        None => {
            *expected = Some(got);
            Ok(())
        }
    }
}

fn percent(done: usize, total: usize) -> u8 {
    (done * 100 / total.max(1)) as u8
}

fn loading_label(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    format!("Loading {name}")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::geom::{Bounds2F, Vec2};

    #[derive(Debug, Error)]
    #[error("no such source: {0}")]
    struct NoSuchSource(String);

    /// Serves `frame-<i>` handles; each frame is `slices` layers of
    /// `width`x`height` samples filled with the frame index.
    struct StubSource {
        width: u32,
        height: u32,
        channels: usize,
        slices: usize,
        loads: AtomicUsize,
    }

    impl StubSource {
        fn new(width: u32, height: u32, channels: usize, slices: usize) -> Self {
            Self {
                width,
                height,
                channels,
                slices,
                loads: AtomicUsize::new(0),
            }
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    impl FrameSource for StubSource {
        type Error = NoSuchSource;

        fn load_frame(&self, path: &str) -> Result<VolumetricFrame, NoSuchSource> {
            let index: usize = path
                .strip_prefix("frame-")
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| NoSuchSource(path.to_string()))?;
            self.loads.fetch_add(1, Ordering::SeqCst);
            let bounds = Bounds2F::new(
                Vec2::new(0.0, 0.0),
                Vec2::new((self.width - 1) as f32, (self.height - 1) as f32),
            );
            let samples = (self.width * self.height) as usize * self.channels;
            let slices = (0..self.slices)
                .map(|_| {
                    SliceImage::from_samples(
                        self.width,
                        self.height,
                        self.channels,
                        vec![index as f32; samples],
                        bounds,
                    )
                    .unwrap()
                })
                .collect();
            Ok(VolumetricFrame::from_slices(slices).unwrap())
        }
    }

    fn paths(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("frame-{i}")).collect()
    }

    #[test]
    fn eager_load_builds_one_thumbnail_per_timestep() {
        let source = StubSource::new(10, 10, 3, 1);
        let series = DataSeries::time_series(paths(5));
        let out = load(
            &source,
            &series,
            0,
            LoadStrategy::ThumbnailEager {
                thumb_size: Vec2U::new(5, 5),
            },
            &NullMonitor,
        )
        .unwrap();
        assert_eq!(out.timesteps, 5);
        assert_eq!(out.slices, 1);
        assert_eq!(source.loads(), 5);
        let thumbs = out.thumbs.unwrap();
        assert_eq!(thumbs.len(), 5);
        assert_eq!(thumbs.resolution(), Vec2U::new(5, 5));
        assert_eq!(thumbs.frame(2).unwrap().resolution(), Vec2U::new(5, 5));
    }

    #[test]
    fn eager_load_processes_the_active_timestep_last() {
        struct Recording {
            inner: StubSource,
            order: Mutex<Vec<String>>,
        }
        impl FrameSource for Recording {
            type Error = NoSuchSource;
            fn load_frame(&self, path: &str) -> Result<VolumetricFrame, NoSuchSource> {
                self.order.lock().push(path.to_string());
                self.inner.load_frame(path)
            }
        }
        let source = Recording {
            inner: StubSource::new(6, 6, 1, 1),
            order: Mutex::new(Vec::new()),
        };
        let series = DataSeries::time_series(paths(4));
        let out = load(
            &source,
            &series,
            1,
            LoadStrategy::ThumbnailEager {
                thumb_size: Vec2U::new(3, 3),
            },
            &NullMonitor,
        )
        .unwrap();
        assert_eq!(
            *source.order.lock(),
            ["frame-0", "frame-2", "frame-3", "frame-1"]
        );
        // thumbnails stay in timestep order regardless of load order
        let thumbs = out.thumbs.unwrap();
        for i in 0..4 {
            let value = thumbs.frame(i).unwrap().slices()[0].data()[(0, 0, 0)];
            assert!((value - i as f32).abs() < 1e-6);
        }
        assert!((out.frame.slices()[0].data()[(0, 0, 0)] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn slice_combining_builds_one_timestep() {
        let source = StubSource::new(6, 6, 1, 1);
        let series = DataSeries::slice_series(paths(4));
        let out = load(&source, &series, 0, LoadStrategy::SliceCombining, &NullMonitor).unwrap();
        assert_eq!(out.timesteps, 1);
        assert_eq!(out.slices, 4);
        assert!(out.thumbs.is_none());
    }

    #[test]
    fn lazy_full_loads_only_the_active_timestep() {
        let source = StubSource::new(4, 4, 1, 2);
        let series = DataSeries::time_series(paths(6));
        let out = load(&source, &series, 3, LoadStrategy::LazyFull, &NullMonitor).unwrap();
        assert_eq!(out.timesteps, 6);
        assert_eq!(out.active_index, 3);
        assert_eq!(source.loads(), 1);
        assert!((out.frame.slices()[0].data()[(0, 0, 0)] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn empty_series_is_rejected() {
        let source = StubSource::new(4, 4, 1, 1);
        let series = DataSeries::time_series(Vec::new());
        assert!(matches!(
            load(&source, &series, 0, LoadStrategy::LazyFull, &NullMonitor),
            Err(LoadError::EmptySeries)
        ));
    }

    #[test]
    fn failing_source_names_the_offending_file() {
        let source = StubSource::new(4, 4, 1, 1);
        let mut sources = paths(2);
        sources.push("bogus".to_string());
        let series = DataSeries::time_series(sources);
        let err = load(
            &source,
            &series,
            0,
            LoadStrategy::ThumbnailEager {
                thumb_size: Vec2U::new(2, 2),
            },
            &NullMonitor,
        )
        .unwrap_err();
        match err {
            LoadError::Source { path, .. } => assert_eq!(path, "bogus"),
            other => panic!("unexpected error: {other}"),
        }
    }

    struct CancellingMonitor;

    impl LoadMonitor for CancellingMonitor {
        fn progress(&self, _percent: u8, _label: &str) {}

        fn cancel_requested(&self) -> bool {
            true
        }
    }

    #[test]
    fn cancellation_aborts_before_any_source_is_read() {
        let source = StubSource::new(4, 4, 1, 1);
        let series = DataSeries::time_series(paths(3));
        let err = load(
            &source,
            &series,
            0,
            LoadStrategy::LazyFull,
            &CancellingMonitor,
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::Cancelled));
        assert_eq!(source.loads(), 0);
    }

    #[test]
    fn progress_reaches_completion() {
        struct Recording(Mutex<Vec<u8>>);
        impl LoadMonitor for Recording {
            fn progress(&self, percent: u8, _label: &str) {
                self.0.lock().push(percent);
            }
        }
        let monitor = Recording(Mutex::new(Vec::new()));
        let source = StubSource::new(4, 4, 1, 1);
        let series = DataSeries::time_series(paths(4));
        load(
            &source,
            &series,
            0,
            LoadStrategy::ThumbnailEager {
                thumb_size: Vec2U::new(2, 2),
            },
            &monitor,
        )
        .unwrap();
        let seen = monitor.0.lock();
        assert_eq!(*seen.last().unwrap(), 100);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn mismatched_slice_counts_abort_the_load() {
        struct Varying;
        impl FrameSource for Varying {
            type Error = NoSuchSource;
            fn load_frame(&self, path: &str) -> Result<VolumetricFrame, NoSuchSource> {
                let slices = if path.ends_with('0') { 2 } else { 3 };
                let bounds = Bounds2F::new(Vec2::new(0.0, 0.0), Vec2::new(3.0, 3.0));
                let stack = (0..slices)
                    .map(|_| {
                        SliceImage::from_samples(4, 4, 1, vec![0.0; 16], bounds).unwrap()
                    })
                    .collect();
                Ok(VolumetricFrame::from_slices(stack).unwrap())
            }
        }
        let series = DataSeries::time_series(paths(2));
        let err = load(
            &Varying,
            &series,
            0,
            LoadStrategy::ThumbnailEager {
                thumb_size: Vec2U::new(2, 2),
            },
            &NullMonitor,
        )
        .unwrap_err();
        // the non-active frame-1 is processed first and sets the baseline
        assert!(matches!(
            err,
            LoadError::SliceCountMismatch {
                expected: 3,
                got: 2,
                ..
            }
        ));
    }
}
