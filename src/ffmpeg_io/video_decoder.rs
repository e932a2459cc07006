use crate::core::context::InputSource;
use crate::core::frame::{Resolution, VideoFrame};
use crate::core::media_io::{FrameSource, ReadOutcome};
use crate::error::{CodecError, OpenError, Result};
use crate::ffmpeg_io::{copy_planes_out, open_input};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use log::{debug, info};

/// Any FFmpeg-readable video input, converted to YUV 4:2:0 at its native size.
pub struct FfmpegVideoSource {
    url: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::decoder::Video,
    converter: Option<scaling::Context>,
    decoded: ffmpeg::frame::Video,
    converted: ffmpeg::frame::Video,
    framerate: Option<u32>,
    loop_input: bool,
    draining: bool,
    frames_read: u64,
}

// SAFETY: the format, codec and scaling contexts are owned exclusively by this
// source and only ever used from the decoder thread it is moved into.
unsafe impl Send for FfmpegVideoSource {}

impl FfmpegVideoSource {
    pub fn open(source: &InputSource) -> Result<Self> {
        let open_error = |reason: String| OpenError::Input {
            url: source.url.clone(),
            reason,
        };

        let input = open_input(source)?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| open_error("no video stream".to_string()))?;
        let stream_index = stream.index();
        let rate = stream.avg_frame_rate();
        let framerate = source.framerate.or_else(|| {
            (rate.numerator() > 0 && rate.denominator() > 0)
                .then(|| (rate.numerator() as f64 / rate.denominator() as f64).round() as u32)
        });

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| open_error(e.to_string()))?;
        let decoder = context.decoder().video().map_err(|e| open_error(e.to_string()))?;

        let converter = if decoder.format() != Pixel::YUV420P {
            Some(
                scaling::Context::get(
                    decoder.format(),
                    decoder.width(),
                    decoder.height(),
                    Pixel::YUV420P,
                    decoder.width(),
                    decoder.height(),
                    scaling::Flags::BILINEAR,
                )
                .map_err(|e| open_error(e.to_string()))?,
            )
        } else {
            None
        };

        info!(
            "Video input {}: {}x{} {:?}, {} fps",
            source.url,
            decoder.width(),
            decoder.height(),
            decoder.format(),
            framerate.unwrap_or_default()
        );
        Ok(Self {
            url: source.url.clone(),
            input,
            stream_index,
            decoder,
            converter,
            decoded: ffmpeg::frame::Video::empty(),
            converted: ffmpeg::frame::Video::empty(),
            framerate,
            loop_input: source.loop_input,
            draining: false,
            frames_read: 0,
        })
    }

    fn decode_error(&self, e: impl ToString) -> CodecError {
        CodecError::Decode {
            url: self.url.clone(),
            reason: e.to_string(),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        debug!("{}: looping after {} frames", self.url, self.frames_read);
        self.input.seek(0, ..).map_err(|e| self.decode_error(e))?;
        self.decoder.flush();
        self.draining = false;
        self.frames_read = 0;
        Ok(())
    }

    /// Feeds the next packet of the video stream, or end of file.
    fn feed(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        loop {
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == self.stream_index => {
                    return self.decoder.send_packet(&packet).map_err(|e| self.decode_error(e).into());
                }
                Ok(()) => continue,
                Err(ffmpeg::Error::Eof) => {
                    self.draining = true;
                    return self.decoder.send_eof().map_err(|e| self.decode_error(e).into());
                }
                Err(e) => return Err(self.decode_error(e).into()),
            }
        }
    }
}

impl FrameSource<VideoFrame> for FfmpegVideoSource {
    fn read_next(&mut self, frame: &mut VideoFrame) -> Result<ReadOutcome> {
        loop {
            match self.decoder.receive_frame(&mut self.decoded) {
                Ok(()) => break,
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN && !self.draining => {
                    self.feed()?;
                }
                Err(ffmpeg::Error::Eof) | Err(ffmpeg::Error::Other { errno: ffmpeg::error::EAGAIN }) => {
                    if self.loop_input && self.frames_read > 0 {
                        self.rewind()?;
                        continue;
                    }
                    return Ok(ReadOutcome::EndOfStream);
                }
                Err(e) => return Err(self.decode_error(e).into()),
            }
        }

        let picture = match self.converter.as_mut() {
            Some(converter) => {
                converter
                    .run(&self.decoded, &mut self.converted)
                    .map_err(|e| CodecError::Decode {
                        url: self.url.clone(),
                        reason: e.to_string(),
                    })?;
                &self.converted
            }
            None => &self.decoded,
        };
        frame.reshape(Resolution::new(picture.width(), picture.height()));
        copy_planes_out(picture, frame);
        self.frames_read += 1;
        Ok(ReadOutcome::Frame)
    }

    fn framerate(&self) -> Option<u32> {
        self.framerate
    }
}
