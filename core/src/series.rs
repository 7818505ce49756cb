use get_size::GetSize;
use serde::{Deserialize, Serialize};

use crate::field::frame::VolumetricFrame;

/// How the ordered source files of a series are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, GetSize, Serialize, Deserialize)]
pub enum SeriesKind {
    /// One file per timestep.
    TimeSeries,
    /// One file per slice of a single timestep.
    SliceSeries,
}

/// The ordered sequence of frame sources backing the dataset. Immutable once
/// loaded except by a full reload.
#[derive(Debug, Clone, PartialEq, Eq, GetSize, Serialize, Deserialize)]
pub struct DataSeries {
    sources: Vec<String>,
    kind: SeriesKind,
}

impl DataSeries {
    pub fn new(sources: Vec<String>, kind: SeriesKind) -> Self {
        Self { sources, kind }
    }

    pub fn time_series(sources: Vec<String>) -> Self {
        Self::new(sources, SeriesKind::TimeSeries)
    }

    pub fn slice_series(sources: Vec<String>) -> Self {
        Self::new(sources, SeriesKind::SliceSeries)
    }

    pub fn kind(&self) -> SeriesKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn source(&self, index: usize) -> Option<&str> {
        self.sources.get(index).map(String::as_str)
    }
}

/// Decodes one source handle into a frame. The pipeline never interprets file
/// bytes itself; implementations live at the application boundary.
pub trait FrameSource: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn load_frame(&self, path: &str) -> Result<VolumetricFrame, Self::Error>;
}
