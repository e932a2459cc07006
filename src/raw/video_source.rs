use crate::core::context::InputSource;
use crate::core::frame::{Resolution, VideoFrame};
use crate::core::media_io::{FrameSource, ReadOutcome};
use crate::error::{CodecError, OpenError, Result};
use log::debug;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};

/// Planar YUV 4:2:0 pictures stored back to back, as written by
/// `ffmpeg -f rawvideo -pix_fmt yuv420p`.
pub struct RawVideoSource {
    url: String,
    reader: BufReader<File>,
    resolution: Resolution,
    framerate: Option<u32>,
    loop_input: bool,
    frames_read: u64,
}

impl RawVideoSource {
    pub fn open(source: &InputSource) -> Result<Self> {
        let open_error = |reason: String| OpenError::Input {
            url: source.url.clone(),
            reason,
        };
        let resolution = source
            .resolution
            .filter(|r| r.width > 0 && r.height > 0)
            .ok_or_else(|| open_error("raw video needs a resolution".to_string()))?;
        let file = File::open(&source.url).map_err(|e| open_error(e.to_string()))?;

        debug!("Raw video input {} opened at {resolution}", source.url);
        Ok(Self {
            url: source.url.clone(),
            reader: BufReader::new(file),
            resolution,
            framerate: source.framerate,
            loop_input: source.loop_input,
            frames_read: 0,
        })
    }

    fn decode_error(&self, reason: impl ToString) -> CodecError {
        CodecError::Decode {
            url: self.url.clone(),
            reason: reason.to_string(),
        }
    }
}

impl FrameSource<VideoFrame> for RawVideoSource {
    fn read_next(&mut self, frame: &mut VideoFrame) -> Result<ReadOutcome> {
        frame.reshape(self.resolution);
        loop {
            match self.reader.read_exact(&mut frame.data) {
                Ok(()) => {
                    self.frames_read += 1;
                    return Ok(ReadOutcome::Frame);
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    // A truncated trailing picture is discarded.
                    if !self.loop_input || self.frames_read == 0 {
                        return Ok(ReadOutcome::EndOfStream);
                    }
                    debug!("{}: looping after {} frames", self.url, self.frames_read);
                    self.reader
                        .seek(SeekFrom::Start(0))
                        .map_err(|e| self.decode_error(e))?;
                    self.frames_read = 0;
                }
                Err(e) => return Err(self.decode_error(e).into()),
            }
        }
    }

    fn framerate(&self) -> Option<u32> {
        self.framerate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_frames(dir: &tempfile::TempDir, frames: &[u8]) -> String {
        let path = dir.path().join("in.yuv");
        let resolution = Resolution::new(4, 2);
        let mut data = Vec::new();
        for value in frames {
            data.extend(std::iter::repeat(*value).take(resolution.yuv420_len()));
        }
        // Half a picture of garbage at the end.
        data.extend([0xee; 6]);
        std::fs::write(&path, data).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_reads_whole_pictures_only() {
        let dir = tempfile::tempdir().unwrap();
        let url = write_frames(&dir, &[1, 2]);
        let mut source = RawVideoSource::open(&InputSource::new(url).set_resolution(4, 2)).unwrap();

        let mut frame = VideoFrame::default();
        assert_eq!(source.read_next(&mut frame).unwrap(), ReadOutcome::Frame);
        assert_eq!(frame.resolution, Resolution::new(4, 2));
        assert!(frame.data.iter().all(|b| *b == 1));
        assert_eq!(source.read_next(&mut frame).unwrap(), ReadOutcome::Frame);
        assert_eq!(source.read_next(&mut frame).unwrap(), ReadOutcome::EndOfStream);
    }

    #[test]
    fn test_loops_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let url = write_frames(&dir, &[1, 2]);
        let input = InputSource::new(url).set_resolution(4, 2).set_loop(true);
        let mut source = RawVideoSource::open(&input).unwrap();

        let mut frame = VideoFrame::default();
        let values: Vec<u8> = (0..5)
            .map(|_| {
                source.read_next(&mut frame).unwrap();
                frame.data[0]
            })
            .collect();
        assert_eq!(values, vec![1, 2, 1, 2, 1]);
    }

    #[test]
    fn test_resolution_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let url = write_frames(&dir, &[1]);
        assert!(RawVideoSource::open(&InputSource::new(url)).is_err());
    }
}
