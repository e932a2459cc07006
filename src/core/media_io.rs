// src/core/media_io.rs - Codec and container collaborators
//
// The pipeline never touches a codec library directly. Decoders, scalers and
// encoder+muxer pairs are reached through the traits below, so the same stage
// threads drive FFmpeg, raw files or in-memory test doubles.

use crate::core::context::{AudioRepresentation, InputSource, VideoRepresentation};
use crate::core::frame::{AudioFrame, EncodedUnit, Resolution, VideoFrame};
use crate::core::manifest::ManifestWriter;
use crate::core::segment::SegmentPlan;
use crate::error::Result;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The frame argument now holds the next unit.
    Frame,
    EndOfStream,
}

/// An opened input producing raw frames of type `F`.
pub trait FrameSource<F>: Send {
    /// Decodes the next unit into `frame`, reusing its storage.
    fn read_next(&mut self, frame: &mut F) -> Result<ReadOutcome>;

    /// Nominal frame rate in frames per second, if known.
    fn framerate(&self) -> Option<u32> {
        None
    }

    fn close(&mut self) {}
}

pub trait SourceOpener: Send + Sync {
    fn open_video(&self, source: &InputSource) -> Result<Box<dyn FrameSource<VideoFrame>>>;
    fn open_audio(&self, source: &InputSource) -> Result<Box<dyn FrameSource<AudioFrame>>>;
}

/// Converts pictures to one fixed output resolution.
pub trait FrameScaler: Send {
    fn scale(&mut self, input: &VideoFrame, output: &mut VideoFrame) -> Result<()>;
}

pub trait ScalerFactory: Send + Sync {
    fn create(&self, target: Resolution) -> Result<Box<dyn FrameScaler>>;
}

/// Encoder and segment muxer of one representation.
pub trait EncoderMux<F>: Send {
    /// Encodes one frame. `None` means the encoder needs more input.
    fn encode(&mut self, frame: &F) -> Result<Option<EncodedUnit>>;

    /// Drains units held back by the encoder at end of stream.
    fn flush(&mut self) -> Result<Vec<EncodedUnit>>;

    fn open_segment(&mut self, path: &Path, segment_number: u64) -> Result<()>;

    /// Appends a unit to the open segment. Returns `true` once the segment
    /// holds its planned duration and should be closed.
    fn write_to_container(&mut self, unit: &EncodedUnit, frame_index: u32) -> Result<bool>;

    fn close_segment(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

pub trait OutputOpener: Send + Sync {
    fn open_video(
        &self,
        representation: &VideoRepresentation,
        plan: &SegmentPlan,
        out_dir: &Path,
    ) -> Result<Box<dyn EncoderMux<VideoFrame>>>;

    fn open_audio(
        &self,
        representation: &AudioRepresentation,
        plan: &SegmentPlan,
        out_dir: &Path,
    ) -> Result<Box<dyn EncoderMux<AudioFrame>>>;
}

/// Wall-clock / network-time source in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// The collaborators a pipeline is wired with.
pub struct MediaBackend {
    pub sources: Arc<dyn SourceOpener>,
    pub scalers: Arc<dyn ScalerFactory>,
    pub outputs: Arc<dyn OutputOpener>,
    pub manifest: Box<dyn ManifestWriter>,
    pub clock: Arc<dyn Clock>,
}
