use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::info;

use bioscope_core::field::frame::{FieldError, SliceImage, VolumetricFrame};
use bioscope_core::geom::{Bounds2F, Vec2};
use bioscope_core::loader::LoadMonitor;
use bioscope_core::pipeline::{PipelineEvent, StackPipeline};
use bioscope_core::series::FrameSource;
use bioscope_core::session::SessionRecord;

/// Inspect a time series of image stacks with the bioscope pipeline.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Image files, one per timestep (or one per slice with --as-slices)
    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Treat each file as one slice of a single timestep
    #[arg(long)]
    as_slices: bool,

    /// Build low-resolution thumbnails at this size
    #[arg(long, value_name = "WxH")]
    thumbs: Option<Size>,

    /// Extract the default oblique plane at this output resolution
    #[arg(long, value_name = "WxH")]
    slice: Option<Size>,

    /// Build the volume-rendering grid at this cubic resolution
    #[arg(long, value_name = "N")]
    volume: Option<u32>,

    /// Restore a previously saved session state record before reporting
    #[arg(long, value_name = "FILE")]
    restore_state: Option<PathBuf>,

    /// Write the session state record to this file
    #[arg(long, value_name = "FILE")]
    save_state: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
struct Size {
    width: u32,
    height: u32,
}

#[derive(Debug, Error)]
#[error("expected WIDTHxHEIGHT, got {0:?}")]
struct SizeParseError(String);

impl FromStr for Size {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| SizeParseError(s.to_string()))?;
        Ok(Size {
            width: width
                .parse()
                .map_err(|_| SizeParseError(s.to_string()))?,
            height: height
                .parse()
                .map_err(|_| SizeParseError(s.to_string()))?,
        })
    }
}

#[derive(Debug, Error)]
enum ImageSourceError {
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Frame-source collaborator over ordinary image files: grayscale files decode
/// to a scalar range, everything else to RGB tuples.
struct ImageSource;

impl FrameSource for ImageSource {
    type Error = ImageSourceError;

    fn load_frame(&self, path: &str) -> Result<VolumetricFrame, ImageSourceError> {
        let image = image::open(path)?;
        let slice = match image {
            image::DynamicImage::ImageLuma8(gray) => {
                let (width, height) = gray.dimensions();
                let samples = gray.pixels().map(|p| p.0[0] as f32).collect();
                SliceImage::from_samples(width, height, 1, samples, pixel_bounds(width, height))?
            }
            other => {
                let rgb = other.to_rgb8();
                let (width, height) = rgb.dimensions();
                let samples = rgb
                    .pixels()
                    .flat_map(|p| p.0.into_iter().map(|v| v as f32))
                    .collect();
                SliceImage::from_samples(width, height, 3, samples, pixel_bounds(width, height))?
            }
        };
        Ok(VolumetricFrame::from_slices(vec![slice])?)
    }
}

fn pixel_bounds(width: u32, height: u32) -> Bounds2F {
    Bounds2F::new(
        Vec2::new(0.0, 0.0),
        Vec2::new((width - 1) as f32, (height - 1) as f32),
    )
}

struct ConsoleMonitor;

impl LoadMonitor for ConsoleMonitor {
    fn progress(&self, percent: u8, label: &str) {
        info!(percent, label, "loading");
    }
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::init();
    let args = Cli::parse();

    let mut pipeline = StackPipeline::with_monitor(ImageSource, Some(Arc::new(ConsoleMonitor)))?;
    match args.thumbs {
        Some(size) => pipeline.set_thumbnails(true, size.width, size.height),
        None => pipeline.set_thumbnails(false, 32, 32),
    }
    let files = args.files.iter().map(|p| p.display().to_string()).collect();
    pipeline.set_series(files, args.as_slices);
    drain(pipeline.wait_idle())?;

    if let Some(path) = &args.restore_state {
        let text = std::fs::read_to_string(path)?;
        let record = SessionRecord::parse(&text)?;
        pipeline.restore_state(&record);
        drain(pipeline.wait_idle())?;
    }

    println!("timesteps:  {}", pipeline.number_of_indices());
    println!("slices:     {}", pipeline.number_of_slices());
    if let Some(frame) = pipeline.full_frame() {
        let resolution = frame.resolution();
        println!(
            "resolution: {}x{} ({} channels)",
            resolution.x,
            resolution.y,
            frame.channels()
        );
    }
    println!("thumbnails: {}", pipeline.has_thumbnails());

    if let Some(size) = args.slice {
        pipeline.set_slice_resolution(size.width, size.height)?;
        let field = pipeline.extract_slice()?;
        match field.value_range() {
            Some(range) => println!(
                "slice {}x{}: values {} .. {}",
                size.width, size.height, range.min, range.max
            ),
            None => println!(
                "slice {}x{}: no samples inside the volume",
                size.width, size.height
            ),
        }
    }

    if let Some(resolution) = args.volume {
        pipeline.set_volume_resolution(resolution)?;
        let grid = pipeline.volume_grid()?;
        let (slices, height, width) = grid.resolution();
        println!("volume grid: {width}x{height}x{slices}");
    }

    if let Some(path) = &args.save_state {
        std::fs::write(path, pipeline.save_state().save())?;
        println!("state written to {}", path.display());
    }

    Ok(())
}

fn drain(events: Vec<PipelineEvent>) -> color_eyre::Result<()> {
    for event in events {
        match event {
            PipelineEvent::LoadCompleted { timesteps, slices } => {
                info!(timesteps, slices, "load completed");
            }
            PipelineEvent::FrameLoaded { index } => info!(index, "frame loaded"),
            PipelineEvent::LoadFailed(err) => return Err(err.into()),
        }
    }
    Ok(())
}
