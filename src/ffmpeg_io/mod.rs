//! FFmpeg-backed decoders and scaler, enabled by the `ffmpeg` feature.
//!
//! Inputs can be anything libavformat opens: files, network streams or
//! capture devices. Segments are still written by the raw segment output.

mod audio_decoder;
mod sws_scaler;
mod video_decoder;

pub use audio_decoder::FfmpegAudioSource;
pub use sws_scaler::{SwsScaler, SwsScalerFactory};
pub use video_decoder::FfmpegVideoSource;

use crate::core::context::{DashcastConfig, InputSource};
use crate::core::frame::{AudioFrame, VideoFrame};
use crate::core::manifest::MpdWriter;
use crate::core::media_io::{FrameSource, MediaBackend, SourceOpener, SystemClock};
use crate::error::{OpenError, Result};
use crate::raw::RawOutputOpener;
use ffmpeg_next as ffmpeg;
use std::ffi::CString;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegSourceOpener;

impl SourceOpener for FfmpegSourceOpener {
    fn open_video(&self, source: &InputSource) -> Result<Box<dyn FrameSource<VideoFrame>>> {
        Ok(Box::new(FfmpegVideoSource::open(source)?))
    }

    fn open_audio(&self, source: &InputSource) -> Result<Box<dyn FrameSource<AudioFrame>>> {
        Ok(Box::new(FfmpegAudioSource::open(source)?))
    }
}

/// FFmpeg decoding and scaling, raw segments, an MPD manifest and the system
/// clock.
pub fn backend(config: &DashcastConfig) -> MediaBackend {
    MediaBackend {
        sources: Arc::new(FfmpegSourceOpener),
        scalers: Arc::new(SwsScalerFactory),
        outputs: Arc::new(RawOutputOpener {
            gop_size: config.gop_size,
        }),
        manifest: Box::new(MpdWriter::new(Arc::new(config.clone()))),
        clock: Arc::new(SystemClock),
    }
}

/// Opens `source` with its format and parsing hints applied.
pub(crate) fn open_input(source: &InputSource) -> Result<ffmpeg::format::context::Input> {
    let open_error = |reason: String| OpenError::Input {
        url: source.url.clone(),
        reason,
    };
    ffmpeg::init().map_err(|e| open_error(e.to_string()))?;

    let mut options = ffmpeg::Dictionary::new();
    if let Some(resolution) = source.resolution {
        options.set("video_size", &resolution.to_string());
    }
    if let Some(framerate) = source.framerate {
        options.set("framerate", &framerate.to_string());
    }
    if let Some(sample_rate) = source.sample_rate {
        options.set("sample_rate", &sample_rate.to_string());
    }
    if let Some(channels) = source.channels {
        options.set("ch_layout", &ffmpeg_channel_layout(channels));
    }

    let Some(format_name) = source.format.as_deref() else {
        return ffmpeg::format::input_with_dictionary(&source.url, options).map_err(|e| open_error(e.to_string()).into());
    };

    let name = CString::new(format_name).map_err(|e| open_error(e.to_string()))?;
    // SAFETY: name is a valid NUL-terminated string; the returned format is a
    // static registered by libavformat or null.
    let format = unsafe { ffmpeg::ffi::av_find_input_format(name.as_ptr()) };
    if format.is_null() {
        return Err(open_error(format!("unknown input format '{format_name}'")).into());
    }
    // SAFETY: format is non-null and points to a static AVInputFormat.
    let format = unsafe { ffmpeg::format::Input::wrap(format as *mut _) };
    match ffmpeg::format::open_with(&source.url, &ffmpeg::format::Format::Input(format), options) {
        Ok(ffmpeg::format::context::Context::Input(input)) => Ok(input),
        Ok(_) => Err(open_error("not an input".to_string()).into()),
        Err(e) => Err(open_error(e.to_string()).into()),
    }
}

fn ffmpeg_channel_layout(channels: u16) -> String {
    match channels {
        1 => "mono".to_string(),
        2 => "stereo".to_string(),
        n => format!("{n}c"),
    }
}

/// Copies a YUV 4:2:0 picture into the tightly packed planes of `frame`.
/// `frame` must already have the picture's resolution.
pub(crate) fn copy_planes_out(picture: &ffmpeg::frame::Video, frame: &mut VideoFrame) {
    let (cw, ch) = frame.resolution.chroma();
    let luma = (frame.resolution.width as usize, frame.resolution.height as usize);
    let (y, u, v) = frame.planes_mut();
    for (index, (plane, (width, height))) in [(y, luma), (u, (cw, ch)), (v, (cw, ch))].into_iter().enumerate() {
        let stride = picture.stride(index);
        let data = picture.data(index);
        for (row, line) in plane.chunks_exact_mut(width.max(1)).take(height).enumerate() {
            let start = row * stride;
            line.copy_from_slice(&data[start..start + width]);
        }
    }
}

/// Copies the planes of `frame` into an allocated YUV 4:2:0 `picture` of the
/// same size.
pub(crate) fn copy_planes_in(frame: &VideoFrame, picture: &mut ffmpeg::frame::Video) {
    let (cw, ch) = frame.resolution.chroma();
    let luma = (frame.resolution.width as usize, frame.resolution.height as usize);
    let (y, u, v) = frame.planes();
    for (index, (plane, (width, height))) in [(y, luma), (u, (cw, ch)), (v, (cw, ch))].into_iter().enumerate() {
        let stride = picture.stride(index);
        let data = picture.data_mut(index);
        for (row, line) in plane.chunks_exact(width.max(1)).take(height).enumerate() {
            let start = row * stride;
            data[start..start + width].copy_from_slice(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::Resolution;
    use ffmpeg_next::format::Pixel;

    #[test]
    fn test_plane_copies_respect_stride() {
        let resolution = Resolution::new(6, 4);
        let mut frame = VideoFrame::with_resolution(resolution);
        for (i, byte) in frame.data.iter_mut().enumerate() {
            *byte = i as u8;
        }

        let mut picture = ffmpeg::frame::Video::new(Pixel::YUV420P, 6, 4);
        copy_planes_in(&frame, &mut picture);
        let mut back = VideoFrame::with_resolution(resolution);
        copy_planes_out(&picture, &mut back);

        assert_eq!(back.data, frame.data);
    }

    #[test]
    fn test_missing_input_is_open_error() {
        let source = InputSource::new("/nonexistent/dashcast-input.mp4");
        assert!(matches!(open_input(&source), Err(crate::error::Error::Open(_))));
    }

    #[test]
    fn test_unknown_format_is_open_error() {
        let source = InputSource::new("whatever").set_format("no-such-demuxer");
        assert!(matches!(open_input(&source), Err(crate::error::Error::Open(_))));
    }
}
