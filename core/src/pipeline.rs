//! The owning pipeline object.
//!
//! One control thread issues navigation and configuration requests; one
//! worker thread performs the bulk loading. The two exchange immutable
//! messages over channels — the worker posts "load completed" or "load
//! failed" events that the control thread drains via [`StackPipeline::pump`],
//! and a completed load is published atomically by swapping `Arc` snapshots.
//! The control thread never blocks (except in the explicit
//! [`StackPipeline::wait_idle`] convenience).

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use get_size::GetSize;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::extract::{ExtractError, SliceExtractor, SliceField};
use crate::field::frame::{ThumbnailCache, VolumetricFrame};
use crate::field::plane::SlicePlane;
use crate::geom::Vec2U;
use crate::loader::{self, LoadError, LoadMonitor, LoadOutput, LoadStrategy};
use crate::resolution::{ResolutionController, ResolutionMode};
use crate::router::{ConsumerRole, DisplayConsumer, RouteSnapshot, ViewRouter};
use crate::series::{DataSeries, FrameSource, SeriesKind};
use crate::session::SessionRecord;
use crate::volume::{VolumeDownsampler, VolumeGrid};

const DEFAULT_THUMB_SIZE: Vec2U = Vec2U { x: 32, y: 32 };
const DEFAULT_SLICE_RESOLUTION: Vec2U = Vec2U { x: 128, y: 128 };
const DEFAULT_VOLUME_RESOLUTION: u32 = 64;

/// Progress of the load currently in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProgress {
    pub percent: u8,
    pub label: String,
}

/// Notifications produced by [`StackPipeline::pump`]. Worker-thread failures
/// are replayed here instead of being thrown across the thread boundary.
#[derive(Debug)]
pub enum PipelineEvent {
    LoadCompleted { timesteps: usize, slices: usize },
    FrameLoaded { index: usize },
    LoadFailed(LoadError),
}

enum Job {
    Series {
        generation: u64,
        series: DataSeries,
        index: usize,
        strategy: LoadStrategy,
        monitor: WorkerMonitor,
    },
    Frame {
        generation: u64,
        series: DataSeries,
        index: usize,
        monitor: WorkerMonitor,
    },
}

enum WorkerEvent {
    Series {
        generation: u64,
        result: Result<LoadOutput, LoadError>,
    },
    Frame {
        generation: u64,
        index: usize,
        result: Result<Arc<VolumetricFrame>, LoadError>,
    },
}

/// Monitor handed to the worker for one job: records progress into the shared
/// cell, forwards it to the application's monitor, and merges the pipeline's
/// supersede-cancellation with the application's cancel poll.
#[derive(Clone)]
struct WorkerMonitor {
    cancel: Arc<AtomicBool>,
    progress: Arc<Mutex<Option<LoadProgress>>>,
    user: Option<Arc<dyn LoadMonitor>>,
}

impl LoadMonitor for WorkerMonitor {
    fn progress(&self, percent: u8, label: &str) {
        *self.progress.lock() = Some(LoadProgress {
            percent,
            label: label.to_string(),
        });
        if let Some(user) = &self.user {
            user.progress(percent, label);
        }
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
            || self.user.as_ref().map_or(false, |u| u.cancel_requested())
    }
}

fn worker_loop<S: FrameSource>(source: Arc<S>, jobs: Receiver<Job>, events: Sender<WorkerEvent>) {
    for job in jobs.iter() {
        match job {
            Job::Series {
                generation,
                series,
                index,
                strategy,
                monitor,
            } => {
                let result = loader::load(&*source, &series, index, strategy, &monitor);
                if events.send(WorkerEvent::Series { generation, result }).is_err() {
                    break;
                }
            }
            Job::Frame {
                generation,
                series,
                index,
                monitor,
            } => {
                let result =
                    loader::load(&*source, &series, index, LoadStrategy::LazyFull, &monitor)
                        .map(|output| output.frame);
                if events
                    .send(WorkerEvent::Frame {
                        generation,
                        index,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}

/// Fields from a restored state record that only apply once the triggered
/// reload has published.
struct RestoreFields {
    plane: SlicePlane,
    alignment: SlicePlane,
    slice_resolution: Vec2U,
}

/// The slice-management pipeline: owns the dataset and every derived cache,
/// and fans read-only snapshots out to the attached display consumers.
pub struct StackPipeline<S: FrameSource> {
    source: Arc<S>,

    series: Option<DataSeries>,
    timesteps: usize,
    slices: usize,
    index: usize,
    slice: usize,

    resolution: ResolutionController,
    do_thumbs: bool,
    thumb_size: Vec2U,
    has_thumbs: bool,

    plane_select: bool,
    volume_render: bool,
    slice_resolution: Vec2U,
    volume_resolution: u32,
    plane: SlicePlane,
    alignment: SlicePlane,

    full: Option<Arc<VolumetricFrame>>,
    loaded_index: usize,
    thumbs: Option<Arc<ThumbnailCache>>,

    extractor: SliceExtractor,
    downsampler: VolumeDownsampler,
    router: ViewRouter,

    jobs: Option<Sender<Job>>,
    events: Receiver<WorkerEvent>,
    worker: Option<JoinHandle<()>>,
    monitor: Option<Arc<dyn LoadMonitor>>,
    progress: Arc<Mutex<Option<LoadProgress>>>,
    cancel: Arc<AtomicBool>,

    generation: u64,
    applied_generation: u64,
    pending_index: Option<usize>,
    inflight_series: Option<(u64, DataSeries)>,
    pending_restore: Option<RestoreFields>,

    full_loads: u64,
    thumbnail_builds: u64,
}

impl<S: FrameSource> StackPipeline<S> {
    pub fn new(source: S) -> io::Result<Self> {
        Self::with_monitor(source, None)
    }

    /// Builds the pipeline and spawns its worker thread. The monitor, if any,
    /// receives load progress and is polled for cancellation.
    pub fn with_monitor(
        source: S,
        monitor: Option<Arc<dyn LoadMonitor>>,
    ) -> io::Result<Self> {
        let source = Arc::new(source);
        let (jobs, job_rx) = channel::unbounded::<Job>();
        let (event_tx, events) = channel::unbounded::<WorkerEvent>();
        let worker = std::thread::Builder::new()
            .name("bioscope-loader".to_string())
            .spawn({
                let source = Arc::clone(&source);
                move || worker_loop(source, job_rx, event_tx)
            })?;
        Ok(Self {
            source,
            series: None,
            timesteps: 0,
            slices: 0,
            index: 0,
            slice: 0,
            resolution: ResolutionController::new(),
            do_thumbs: true,
            thumb_size: DEFAULT_THUMB_SIZE,
            has_thumbs: false,
            plane_select: false,
            volume_render: false,
            slice_resolution: DEFAULT_SLICE_RESOLUTION,
            volume_resolution: DEFAULT_VOLUME_RESOLUTION,
            plane: SlicePlane::default(),
            alignment: SlicePlane::default(),
            full: None,
            loaded_index: 0,
            thumbs: None,
            extractor: SliceExtractor::new(),
            downsampler: VolumeDownsampler::new(),
            router: ViewRouter::new(),
            jobs: Some(jobs),
            events,
            worker: Some(worker),
            monitor,
            progress: Arc::new(Mutex::new(None)),
            cancel: Arc::new(AtomicBool::new(false)),
            generation: 0,
            applied_generation: 0,
            pending_index: None,
            inflight_series: None,
            pending_restore: None,
            full_loads: 0,
            thumbnail_builds: 0,
        })
    }

    // -- accessors --

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn slice(&self) -> usize {
        self.slice
    }

    pub fn number_of_indices(&self) -> usize {
        self.timesteps
    }

    pub fn number_of_slices(&self) -> usize {
        self.slices
    }

    pub fn has_thumbnails(&self) -> bool {
        self.has_thumbs
    }

    pub fn mode(&self) -> ResolutionMode {
        self.resolution.mode()
    }

    pub fn series(&self) -> Option<&DataSeries> {
        self.series.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn plane(&self) -> SlicePlane {
        self.plane
    }

    pub fn alignment_plane(&self) -> SlicePlane {
        self.alignment
    }

    pub fn slice_resolution(&self) -> Vec2U {
        self.slice_resolution
    }

    pub fn volume_resolution(&self) -> u32 {
        self.volume_resolution
    }

    pub fn full_frame(&self) -> Option<&Arc<VolumetricFrame>> {
        self.full.as_ref()
    }

    pub fn thumbnails(&self) -> Option<&Arc<ThumbnailCache>> {
        self.thumbs.as_ref()
    }

    /// Whether a load is in flight. While busy, navigation requests are
    /// coalesced into a pending index applied after the load completes.
    pub fn busy(&self) -> bool {
        self.generation != self.applied_generation
    }

    pub fn load_progress(&self) -> Option<LoadProgress> {
        self.progress.lock().clone()
    }

    /// Number of full-resolution loads issued (bulk series loads plus single
    /// frame reloads).
    pub fn full_load_count(&self) -> u64 {
        self.full_loads
    }

    /// Number of bulk loads that rebuilt the thumbnail cache.
    pub fn thumbnail_build_count(&self) -> u64 {
        self.thumbnail_builds
    }

    /// How many times the arbitrary slice field has been recomputed.
    pub fn slice_recompute_count(&self) -> u64 {
        self.extractor.recompute_count()
    }

    pub fn attach_consumer(&mut self, role: ConsumerRole, consumer: Box<dyn DisplayConsumer>) {
        self.router.attach(role, consumer);
    }

    // -- control-thread API --

    /// Links the data series to the given list of files, treating each file
    /// as a slice instead of a timestep if requested, and issues the bulk
    /// load. The current dataset stays published until the load completes.
    pub fn set_series(&mut self, files: Vec<String>, files_as_slices: bool) {
        if files_as_slices {
            self.do_thumbs = false;
        }
        let kind = if files_as_slices {
            SeriesKind::SliceSeries
        } else {
            SeriesKind::TimeSeries
        };
        self.pending_index = None;
        self.issue_series_load(DataSeries::new(files, kind), 0);
    }

    /// Sets the displayed timestep. Auto-switching drops to low resolution
    /// before the change applies and re-enters full resolution only at the
    /// last fully-loaded index; a full-frame load is issued only when full
    /// data for the new index is not resident.
    pub fn set_index(&mut self, index: usize) {
        if index == self.index {
            return;
        }
        if self.busy() {
            self.pending_index = Some(index);
            return;
        }
        if self.series.is_none() {
            return;
        }
        if index >= self.timesteps {
            warn!(index, timesteps = self.timesteps, "timestep out of range");
            return;
        }
        self.resolution.before_index_change(self.index, self.slice);
        self.index = index;
        self.resolution.after_index_change(self.index, self.slice);
        self.invalidate_derived();
        self.ensure_full_resident();
        self.route();
    }

    /// Sets the displayed image slice. Never changes the resolution mode.
    pub fn set_slice(&mut self, slice: usize) {
        if slice == self.slice {
            return;
        }
        if slice >= self.slices {
            warn!(slice, slices = self.slices, "slice out of range");
            return;
        }
        self.slice = slice;
        self.route();
    }

    /// Explicit resolution request. Requesting the current mode is a no-op.
    pub fn set_mode(&mut self, mode: ResolutionMode) {
        if mode == ResolutionMode::Low && !self.has_thumbs {
            warn!("no thumbnails resident, staying at full resolution");
            return;
        }
        if !self.resolution.request(mode, self.index, self.slice) {
            return;
        }
        self.invalidate_derived();
        self.ensure_full_resident();
        self.route();
    }

    pub fn set_auto_switch(&mut self, on: bool) {
        self.resolution.set_auto_switch(on);
    }

    /// Configures thumbnail generation for the next series load.
    pub fn set_thumbnails(&mut self, enabled: bool, width: u32, height: u32) {
        self.do_thumbs = enabled;
        self.thumb_size = Vec2U::new(width, height);
    }

    pub fn set_plane_select(&mut self, on: bool) {
        if self.plane_select == on {
            return;
        }
        self.plane_select = on;
        self.route();
    }

    pub fn set_volume_render(&mut self, on: bool) {
        if self.volume_render == on {
            return;
        }
        self.volume_render = on;
        self.route();
    }

    pub fn set_volume_resolution(&mut self, resolution: u32) -> Result<(), ExtractError> {
        if resolution == 0 {
            return Err(ExtractError::InvalidVolumeResolution(resolution));
        }
        if resolution == self.volume_resolution {
            return Ok(());
        }
        self.volume_resolution = resolution;
        if self.volume_render {
            self.route();
        }
        Ok(())
    }

    pub fn set_slice_resolution(&mut self, width: u32, height: u32) -> Result<(), ExtractError> {
        if width == 0 || height == 0 {
            return Err(ExtractError::InvalidResolution { width, height });
        }
        let resolution = Vec2U::new(width, height);
        if resolution == self.slice_resolution {
            return Ok(());
        }
        self.slice_resolution = resolution;
        if self.plane_select {
            self.route();
        } else {
            self.extractor.invalidate();
        }
        Ok(())
    }

    /// Moves the arbitrary slicing plane. Degenerate geometry is rejected
    /// without touching cached products.
    pub fn set_plane(&mut self, plane: SlicePlane) -> Result<(), ExtractError> {
        if plane.is_degenerate() {
            return Err(ExtractError::DegeneratePlane);
        }
        if self.plane == plane {
            return Ok(());
        }
        self.plane = plane;
        if self.plane_select {
            self.route();
        }
        Ok(())
    }

    pub fn set_alignment_plane(&mut self, plane: SlicePlane) -> Result<(), ExtractError> {
        if plane.is_degenerate() {
            return Err(ExtractError::DegeneratePlane);
        }
        self.alignment = plane;
        Ok(())
    }

    /// Requests cooperative cancellation of the in-flight load. The
    /// previously published dataset stays untouched.
    pub fn cancel_load(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// The arbitrary slice for the current frame, plane, and resolution,
    /// served from the memo cache when nothing changed.
    pub fn extract_slice(&mut self) -> Result<Arc<SliceField>, ExtractError> {
        let frame = self.active_frame().ok_or(ExtractError::NoData)?;
        self.extractor
            .extract(&frame, &self.plane, self.slice_resolution)
    }

    /// The cubic volume grid for the current frame and volume resolution.
    pub fn volume_grid(&mut self) -> Result<Arc<VolumeGrid>, ExtractError> {
        let frame = self.active_frame().ok_or(ExtractError::NoData)?;
        let flat = self.extractor.flatten(&frame);
        self.downsampler.downsample(&flat, self.volume_resolution)
    }

    // -- session state --

    pub fn save_state(&self) -> SessionRecord {
        SessionRecord {
            files: self
                .series
                .as_ref()
                .map(|s| s.sources().to_vec())
                .unwrap_or_default(),
            files_as_slices: self
                .series
                .as_ref()
                .map_or(false, |s| s.kind() == SeriesKind::SliceSeries),
            has_thumbnails: self.has_thumbs,
            thumb_size: self.thumb_size,
            slice_resolution: self.slice_resolution,
            plane: self.plane,
            alignment: self.alignment,
        }
    }

    /// Applies a restored record. When the stored file list or thumbnail
    /// configuration differs from the loaded dataset a full reload is
    /// triggered first and the in-memory fields apply after it publishes;
    /// otherwise only the in-memory fields are reapplied, without reloading.
    pub fn restore_state(&mut self, record: &SessionRecord) {
        let unchanged = self
            .series
            .as_ref()
            .map_or(record.files.is_empty(), |series| {
                series.sources() == record.files.as_slice()
                    && (series.kind() == SeriesKind::SliceSeries) == record.files_as_slices
                    && self.do_thumbs == record.has_thumbnails
                    && self.thumb_size == record.thumb_size
            });
        if unchanged {
            self.apply_restored_fields(
                record.plane,
                record.alignment,
                record.slice_resolution,
            );
        } else {
            self.set_thumbnails(
                record.has_thumbnails,
                record.thumb_size.x,
                record.thumb_size.y,
            );
            self.pending_restore = Some(RestoreFields {
                plane: record.plane,
                alignment: record.alignment,
                slice_resolution: record.slice_resolution,
            });
            self.set_series(record.files.clone(), record.files_as_slices);
        }
    }

    fn apply_restored_fields(
        &mut self,
        plane: SlicePlane,
        alignment: SlicePlane,
        slice_resolution: Vec2U,
    ) {
        if let Err(err) = self.set_slice_resolution(slice_resolution.x, slice_resolution.y) {
            warn!(%err, "restored slice resolution rejected");
        }
        if let Err(err) = self.set_plane(plane) {
            warn!(%err, "restored plane rejected");
        }
        if let Err(err) = self.set_alignment_plane(alignment) {
            warn!(%err, "restored alignment plane rejected");
        }
    }

    // -- event pump --

    /// Drains completed worker events, applies them, and returns the
    /// notifications. Non-blocking; call from the control thread.
    pub fn pump(&mut self) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            self.apply_event(event, &mut out);
        }
        self.apply_pending_index();
        out
    }

    /// Blocks until no load is in flight, applying events as they arrive.
    pub fn wait_idle(&mut self) -> Vec<PipelineEvent> {
        let mut out = self.pump();
        while self.busy() {
            match self.events.recv() {
                Ok(event) => {
                    self.apply_event(event, &mut out);
                    self.apply_pending_index();
                }
                Err(_) => break,
            }
        }
        out
    }

    fn apply_pending_index(&mut self) {
        if !self.busy() {
            if let Some(index) = self.pending_index.take() {
                self.set_index(index);
            }
        }
    }

    fn apply_event(&mut self, event: WorkerEvent, out: &mut Vec<PipelineEvent>) {
        match event {
            WorkerEvent::Series { generation, result } => {
                self.applied_generation = self.applied_generation.max(generation);
                if generation != self.generation {
                    debug!(generation, "discarding superseded series load");
                    return;
                }
                *self.progress.lock() = None;
                match result {
                    Ok(output) => {
                        self.apply_series_load(generation, output);
                        out.push(PipelineEvent::LoadCompleted {
                            timesteps: self.timesteps,
                            slices: self.slices,
                        });
                    }
                    Err(err) => {
                        self.inflight_series = None;
                        self.pending_restore = None;
                        warn!(%err, "series load failed, previous dataset left intact");
                        out.push(PipelineEvent::LoadFailed(err));
                    }
                }
            }
            WorkerEvent::Frame {
                generation,
                index,
                result,
            } => {
                self.applied_generation = self.applied_generation.max(generation);
                if generation != self.generation {
                    debug!(generation, "discarding superseded frame load");
                    return;
                }
                *self.progress.lock() = None;
                match result {
                    Ok(frame) => {
                        self.apply_frame_load(index, frame);
                        out.push(PipelineEvent::FrameLoaded { index });
                    }
                    Err(err) => {
                        warn!(%err, "frame load failed, previous frame left intact");
                        out.push(PipelineEvent::LoadFailed(err));
                    }
                }
            }
        }
    }

    fn apply_series_load(&mut self, generation: u64, output: LoadOutput) {
        let series = match self.inflight_series.take() {
            Some((g, series)) if g == generation => series,
            _ => {
                warn!("series load completed without a matching request");
                return;
            }
        };
        // atomic publish: every field swaps before anything is routed
        self.timesteps = output.timesteps;
        self.slices = output.slices;
        self.index = output.active_index;
        self.slice = self.slice.min(self.slices.saturating_sub(1));
        self.full = Some(output.frame);
        self.loaded_index = output.active_index;
        self.thumbs = output.thumbs;
        self.has_thumbs = self.thumbs.is_some();
        self.series = Some(series);
        self.resolution.reset(self.has_thumbs);
        self.invalidate_derived();

        let bounds = self
            .full
            .as_ref()
            .map(|f| f.bounds())
            .unwrap_or_default();
        match self.pending_restore.take() {
            Some(restore) => {
                self.slice_resolution = restore.slice_resolution;
                self.plane = if restore.plane.is_degenerate() {
                    SlicePlane::diagonal(bounds)
                } else {
                    restore.plane
                };
                self.alignment = if restore.alignment.is_degenerate() {
                    SlicePlane::diagonal(bounds)
                } else {
                    restore.alignment
                };
            }
            None => {
                self.plane = SlicePlane::diagonal(bounds);
                self.alignment = SlicePlane::diagonal(bounds);
            }
        }

        debug!(
            timesteps = self.timesteps,
            slices = self.slices,
            resident_bytes = self.resident_bytes(),
            "published dataset"
        );
        self.route();
    }

    fn apply_frame_load(&mut self, index: usize, frame: Arc<VolumetricFrame>) {
        self.full = Some(frame);
        self.loaded_index = index;
        self.invalidate_derived();
        debug!(
            index,
            resident_bytes = self.resident_bytes(),
            "published full frame"
        );
        self.route();
    }

    // -- internals --

    fn issue_series_load(&mut self, series: DataSeries, index: usize) {
        let strategy = match series.kind() {
            SeriesKind::SliceSeries => LoadStrategy::SliceCombining,
            SeriesKind::TimeSeries if self.do_thumbs => LoadStrategy::ThumbnailEager {
                thumb_size: self.thumb_size,
            },
            SeriesKind::TimeSeries => LoadStrategy::LazyFull,
        };
        let generation = self.next_generation();
        self.inflight_series = Some((generation, series.clone()));
        self.full_loads += 1;
        if matches!(strategy, LoadStrategy::ThumbnailEager { .. }) {
            self.thumbnail_builds += 1;
        }
        let monitor = self.worker_monitor();
        self.send_job(Job::Series {
            generation,
            series,
            index,
            strategy,
            monitor,
        });
    }

    fn issue_frame_load(&mut self, series: DataSeries, index: usize) {
        let generation = self.next_generation();
        self.full_loads += 1;
        let monitor = self.worker_monitor();
        self.send_job(Job::Frame {
            generation,
            series,
            index,
            monitor,
        });
    }

    fn next_generation(&mut self) -> u64 {
        if self.busy() {
            debug!("superseding in-flight load");
            self.cancel.store(true, Ordering::Relaxed);
        }
        self.cancel = Arc::new(AtomicBool::new(false));
        self.generation += 1;
        self.generation
    }

    fn worker_monitor(&self) -> WorkerMonitor {
        WorkerMonitor {
            cancel: Arc::clone(&self.cancel),
            progress: Arc::clone(&self.progress),
            user: self.monitor.clone(),
        }
    }

    fn send_job(&mut self, job: Job) {
        match &self.jobs {
            Some(jobs) if jobs.send(job).is_ok() => {}
            _ => warn!("loader worker is gone, dropping load request"),
        }
    }

    /// Issues a full-frame load when full-resolution data for the current
    /// index is not resident. At most one load is in flight at a time.
    fn ensure_full_resident(&mut self) {
        if self.resolution.mode() != ResolutionMode::Full || self.loaded_index == self.index {
            return;
        }
        if let Some(series) = self.series.clone() {
            self.issue_frame_load(series, self.index);
        }
    }

    fn invalidate_derived(&mut self) {
        self.extractor.invalidate();
        self.downsampler.invalidate();
    }

    /// The frame feeding derived products under the current resolution mode.
    fn active_frame(&self) -> Option<Arc<VolumetricFrame>> {
        match self.resolution.mode() {
            ResolutionMode::Full => {
                if self.loaded_index == self.index {
                    self.full.clone()
                } else {
                    None
                }
            }
            ResolutionMode::Low => self
                .thumbs
                .as_ref()
                .and_then(|t| t.frame(self.index))
                .cloned(),
        }
    }

    fn resident_bytes(&self) -> usize {
        self.full.as_ref().map_or(0, |f| f.get_size())
            + self.thumbs.as_ref().map_or(0, |t| t.get_size())
    }

    fn route(&mut self) {
        if self.series.is_none() || self.router.is_empty() {
            return;
        }
        let active = self.active_frame();
        let slice_field = match (&active, self.plane_select) {
            (Some(frame), true) => {
                match self
                    .extractor
                    .extract(frame, &self.plane, self.slice_resolution)
                {
                    Ok(field) => Some(field),
                    Err(err) => {
                        warn!(%err, "slice extraction failed");
                        None
                    }
                }
            }
            _ => None,
        };
        let volume = match (&active, self.volume_render) {
            (Some(frame), true) => {
                let flat = self.extractor.flatten(frame);
                match self.downsampler.downsample(&flat, self.volume_resolution) {
                    Ok(grid) => Some(grid),
                    Err(err) => {
                        warn!(%err, "volume resampling failed");
                        None
                    }
                }
            }
            _ => None,
        };
        let frame_ref = if self.loaded_index == self.index {
            self.full.as_ref()
        } else {
            None
        };
        let view = RouteSnapshot {
            mode: self.resolution.mode(),
            index: self.index,
            slice: self.slice,
            timesteps: self.timesteps,
            plane_select: self.plane_select,
            volume_render: self.volume_render,
            frame: frame_ref,
            thumbs: self.thumbs.as_ref(),
            slice_field: slice_field.as_ref(),
            volume: volume.as_ref(),
        };
        self.router.route(&view);
    }
}

impl<S: FrameSource> Drop for StackPipeline<S> {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        drop(self.jobs.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
