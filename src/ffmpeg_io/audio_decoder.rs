use crate::core::context::InputSource;
use crate::core::frame::AudioFrame;
use crate::core::media_io::{FrameSource, ReadOutcome};
use crate::core::segment::AUDIO_FRAME_SIZE;
use crate::error::{CodecError, OpenError, Result};
use crate::ffmpeg_io::open_input;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::{sample, Sample};
use ffmpeg_next::software::resampling;
use ffmpeg_next::ChannelLayout;
use log::{debug, info};
use std::collections::VecDeque;

/// Any FFmpeg-readable audio input, resampled to interleaved s16 and cut into
/// blocks of [`AUDIO_FRAME_SIZE`] samples per channel.
pub struct FfmpegAudioSource {
    url: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::decoder::Audio,
    resampler: resampling::Context,
    decoded: ffmpeg::frame::Audio,
    resampled: ffmpeg::frame::Audio,
    pending: VecDeque<i16>,
    sample_rate: u32,
    channels: u16,
    loop_input: bool,
    draining: bool,
    frames_read: u64,
}

// SAFETY: the format, codec and resampling contexts are owned exclusively by
// this source and only ever used from the decoder thread it is moved into.
unsafe impl Send for FfmpegAudioSource {}

impl FfmpegAudioSource {
    pub fn open(source: &InputSource) -> Result<Self> {
        let open_error = |reason: String| OpenError::Input {
            url: source.url.clone(),
            reason,
        };

        let input = open_input(source)?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .ok_or_else(|| open_error("no audio stream".to_string()))?;
        let stream_index = stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| open_error(e.to_string()))?;
        let decoder = context.decoder().audio().map_err(|e| open_error(e.to_string()))?;

        let sample_rate = source.sample_rate.unwrap_or(decoder.rate());
        let channels = source.channels.unwrap_or(decoder.channels());
        if channels == 0 {
            return Err(open_error("unknown channel layout".to_string()).into());
        }
        let mut input_layout = decoder.channel_layout();
        if input_layout.is_empty() {
            input_layout = ChannelLayout::default(decoder.channels() as i32);
        }
        let resampler = resampling::Context::get(
            decoder.format(),
            input_layout,
            decoder.rate(),
            Sample::I16(sample::Type::Packed),
            ChannelLayout::default(channels as i32),
            sample_rate,
        )
        .map_err(|e| open_error(e.to_string()))?;

        info!(
            "Audio input {}: {}Hz {} channels {:?}, delivered as {sample_rate}Hz {channels} channels s16",
            source.url,
            decoder.rate(),
            decoder.channels(),
            decoder.format()
        );
        Ok(Self {
            url: source.url.clone(),
            input,
            stream_index,
            decoder,
            resampler,
            decoded: ffmpeg::frame::Audio::empty(),
            resampled: ffmpeg::frame::Audio::empty(),
            pending: VecDeque::new(),
            sample_rate,
            channels,
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

    fn block_len(&self) -> usize {
        AUDIO_FRAME_SIZE as usize * self.channels as usize
    }

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

    /// Decodes until a full block is pending. Returns `false` at end of input.
    fn fill(&mut self) -> Result<bool> {
        while self.pending.len() < self.block_len() {
            match self.decoder.receive_frame(&mut self.decoded) {
                Ok(()) => {
                    self.resampler
                        .run(&self.decoded, &mut self.resampled)
                        .map_err(|e| CodecError::Decode {
                            url: self.url.clone(),
                            reason: e.to_string(),
                        })?;
                    let len = self.resampled.samples() * self.channels as usize * 2;
                    let bytes = &self.resampled.data(0)[..len];
                    self.pending
                        .extend(bytes.chunks_exact(2).map(|pair| i16::from_ne_bytes([pair[0], pair[1]])));
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN && !self.draining => {
                    self.feed()?;
                }
                Err(ffmpeg::Error::Eof) | Err(ffmpeg::Error::Other { errno: ffmpeg::error::EAGAIN }) => {
                    return Ok(false);
                }
                Err(e) => return Err(self.decode_error(e).into()),
            }
        }
        Ok(true)
    }
}

impl FrameSource<AudioFrame> for FfmpegAudioSource {
    fn read_next(&mut self, frame: &mut AudioFrame) -> Result<ReadOutcome> {
        let mut full = self.fill()?;
        if !full && self.pending.is_empty() && self.loop_input && self.frames_read > 0 {
            debug!("{}: looping after {} frames", self.url, self.frames_read);
            self.input.seek(0, ..).map_err(|e| self.decode_error(e))?;
            self.decoder.flush();
            self.draining = false;
            self.frames_read = 0;
            full = self.fill()?;
        }

        let take = if full {
            self.block_len()
        } else {
            self.pending.len() - self.pending.len() % self.channels as usize
        };
        if take == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }

        frame.sample_rate = self.sample_rate;
        frame.channels = self.channels;
        frame.samples.clear();
        frame.samples.extend(self.pending.drain(..take));
        self.frames_read += 1;
        Ok(ReadOutcome::Frame)
    }

    fn framerate(&self) -> Option<u32> {
        Some(self.sample_rate / AUDIO_FRAME_SIZE)
    }
}
