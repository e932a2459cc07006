use crate::core::context::representation::{DEFAULT_AUDIO_CHANNELS, DEFAULT_AUDIO_SAMPLE_RATE};
use crate::core::context::InputSource;
use crate::core::frame::AudioFrame;
use crate::core::media_io::{FrameSource, ReadOutcome};
use crate::core::segment::AUDIO_FRAME_SIZE;
use crate::error::{CodecError, OpenError, Result};
use log::debug;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};

/// Interleaved signed 16-bit little-endian PCM, read in blocks of
/// [`AUDIO_FRAME_SIZE`] samples per channel.
pub struct RawAudioSource {
    url: String,
    reader: BufReader<File>,
    sample_rate: u32,
    channels: u16,
    loop_input: bool,
    bytes: Vec<u8>,
    frames_read: u64,
}

impl RawAudioSource {
    pub fn open(source: &InputSource) -> Result<Self> {
        let channels = source.channels.unwrap_or(DEFAULT_AUDIO_CHANNELS);
        if channels == 0 {
            return Err(OpenError::Input {
                url: source.url.clone(),
                reason: "channel count must be at least 1".to_string(),
            }
            .into());
        }
        let file = File::open(&source.url).map_err(|e| OpenError::Input {
            url: source.url.clone(),
            reason: e.to_string(),
        })?;
        let sample_rate = source.sample_rate.unwrap_or(DEFAULT_AUDIO_SAMPLE_RATE);

        debug!("Raw audio input {} opened: {sample_rate}Hz, {channels} channels", source.url);
        Ok(Self {
            url: source.url.clone(),
            reader: BufReader::new(file),
            sample_rate,
            channels,
            loop_input: source.loop_input,
            bytes: vec![0; AUDIO_FRAME_SIZE as usize * channels as usize * 2],
            frames_read: 0,
        })
    }

    /// Fills `self.bytes` as far as the input allows and returns the byte count.
    fn fill(&mut self) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < self.bytes.len() {
            match self.reader.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl FrameSource<AudioFrame> for RawAudioSource {
    fn read_next(&mut self, frame: &mut AudioFrame) -> Result<ReadOutcome> {
        let decode_error = |url: &str, e: std::io::Error| CodecError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let mut filled = self.fill().map_err(|e| decode_error(&self.url, e))?;
        if filled == 0 && self.loop_input && self.frames_read > 0 {
            debug!("{}: looping after {} frames", self.url, self.frames_read);
            self.reader
                .seek(SeekFrom::Start(0))
                .map_err(|e| decode_error(&self.url, e))?;
            self.frames_read = 0;
            filled = self.fill().map_err(|e| decode_error(&self.url, e))?;
        }

        // The last block may be short; a dangling half sample is dropped.
        let block = 2 * self.channels as usize;
        let usable = filled - filled % block;
        if usable == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }

        frame.sample_rate = self.sample_rate;
        frame.channels = self.channels;
        frame.samples.clear();
        frame.samples.extend(
            self.bytes[..usable]
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );
        self.frames_read += 1;
        Ok(ReadOutcome::Frame)
    }

    fn framerate(&self) -> Option<u32> {
        Some(self.sample_rate / AUDIO_FRAME_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_fixed_blocks_and_short_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.pcm");
        // Mono, 1024 + 10 samples.
        let samples: Vec<u8> = (0..1034i16).flat_map(|s| s.to_le_bytes()).collect();
        std::fs::write(&path, samples).unwrap();

        let input = InputSource::new(path.display().to_string())
            .set_channels(1)
            .set_sample_rate(8000);
        let mut source = RawAudioSource::open(&input).unwrap();

        let mut frame = AudioFrame::default();
        assert_eq!(source.read_next(&mut frame).unwrap(), ReadOutcome::Frame);
        assert_eq!(frame.sample_count(), 1024);
        assert_eq!(frame.samples[1023], 1023);
        assert_eq!(frame.sample_rate, 8000);

        assert_eq!(source.read_next(&mut frame).unwrap(), ReadOutcome::Frame);
        assert_eq!(frame.sample_count(), 10);
        assert_eq!(frame.samples[0], 1024);

        assert_eq!(source.read_next(&mut frame).unwrap(), ReadOutcome::EndOfStream);
    }

    #[test]
    fn test_missing_file_is_an_open_error() {
        let result = RawAudioSource::open(&InputSource::new("/nonexistent/in.pcm"));
        assert!(matches!(result, Err(crate::error::Error::Open(_))));
    }
}
