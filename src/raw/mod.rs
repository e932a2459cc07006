//! Uncompressed file-based collaborators.
//!
//! Inputs are raw YUV 4:2:0 video and interleaved s16le PCM files; outputs are
//! length-prefixed raw records in the same segment layout an MP4 muxer would
//! produce. Useful for testing a pipeline end to end without a codec library.

pub mod audio_source;
pub mod scaler;
pub mod segment_output;
pub mod video_source;

pub use audio_source::RawAudioSource;
pub use scaler::{NearestScaler, NearestScalerFactory};
pub use segment_output::{RawOutputOpener, RawSegmentOutput};
pub use video_source::RawVideoSource;

use crate::core::context::{DashcastConfig, InputSource};
use crate::core::frame::{AudioFrame, VideoFrame};
use crate::core::manifest::MpdWriter;
use crate::core::media_io::{FrameSource, MediaBackend, SourceOpener, SystemClock};
use crate::error::Result;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct RawSourceOpener;

impl SourceOpener for RawSourceOpener {
    fn open_video(&self, source: &InputSource) -> Result<Box<dyn FrameSource<VideoFrame>>> {
        Ok(Box::new(RawVideoSource::open(source)?))
    }

    fn open_audio(&self, source: &InputSource) -> Result<Box<dyn FrameSource<AudioFrame>>> {
        Ok(Box::new(RawAudioSource::open(source)?))
    }
}

/// Raw inputs and outputs, nearest-neighbour scaling, an MPD manifest and the
/// system clock.
pub fn backend(config: &DashcastConfig) -> MediaBackend {
    MediaBackend {
        sources: Arc::new(RawSourceOpener),
        scalers: Arc::new(NearestScalerFactory),
        outputs: Arc::new(RawOutputOpener {
            gop_size: config.gop_size,
        }),
        manifest: Box::new(MpdWriter::new(Arc::new(config.clone()))),
        clock: Arc::new(SystemClock),
    }
}
