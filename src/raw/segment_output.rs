// src/raw/segment_output.rs - Uncompressed segment writer
//
// Stands in for an encoder + fragmented MP4 muxer: every frame becomes one
// "encoded" unit carrying the raw picture or PCM bytes, and units are written
// as length-prefixed records into the segment files the pipeline asks for.
// Record layout (big endian): u32 payload length, i64 pts, u8 flags, payload.

use crate::core::context::{AudioRepresentation, VideoRepresentation};
use crate::core::frame::{AudioFrame, EncodedUnit, VideoFrame};
use crate::core::media_io::{EncoderMux, OutputOpener};
use crate::core::segment::{init_segment_path, SegmentPlan};
use crate::error::{OpenError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use log::debug;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const RECORD_HEADER_LEN: usize = 4 + 8 + 1;
const FLAG_KEYFRAME: u8 = 0x01;

/// Raw frame types the segment writer can serialize.
pub trait RawPayload: Send + Sync {
    fn payload(&self) -> Bytes;
    /// Duration in the representation timescale.
    fn duration(&self) -> i64;
    fn pts(&self) -> i64;
}

impl RawPayload for VideoFrame {
    fn payload(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }

    fn duration(&self) -> i64 {
        1
    }

    fn pts(&self) -> i64 {
        self.pts
    }
}

impl RawPayload for AudioFrame {
    fn payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            buf.put_i16_le(*sample);
        }
        buf.freeze()
    }

    fn duration(&self) -> i64 {
        self.sample_count() as i64
    }

    fn pts(&self) -> i64 {
        self.pts
    }
}

pub struct RawSegmentOutput {
    id: String,
    plan: SegmentPlan,
    gop: u64,
    frames_encoded: u64,
    segment: Option<BufWriter<File>>,
}

impl RawSegmentOutput {
    /// Writes the init segment of `id` and returns a writer ready for media
    /// segments.
    pub fn open(id: &str, description: &[(&str, String)], plan: SegmentPlan, gop: Option<u32>, out_dir: &Path) -> Result<Self> {
        let mut header = BytesMut::new();
        header.put_slice(b"dashcast-raw\n");
        for (key, value) in description {
            header.put_slice(format!("{key}={value}\n").as_bytes());
        }
        header.put_slice(format!("timescale={}\n", plan.timescale).as_bytes());

        let init_path = init_segment_path(out_dir, id);
        std::fs::write(&init_path, &header).map_err(|e| OpenError::Output {
            id: id.to_string(),
            reason: format!("{}: {e}", init_path.display()),
        })?;
        debug!("Init segment written: {}", init_path.display());

        let gop = gop.filter(|g| *g > 0).unwrap_or(plan.segment_frames).max(1);
        Ok(Self {
            id: id.to_string(),
            plan,
            gop: gop as u64,
            frames_encoded: 0,
            segment: None,
        })
    }
}

impl<F: RawPayload> EncoderMux<F> for RawSegmentOutput {
    fn encode(&mut self, frame: &F) -> Result<Option<EncodedUnit>> {
        let is_keyframe = self.frames_encoded % self.gop == 0;
        self.frames_encoded += 1;
        Ok(Some(EncodedUnit {
            data: frame.payload(),
            pts: frame.pts(),
            dts: frame.pts(),
            duration: frame.duration(),
            is_keyframe,
        }))
    }

    fn flush(&mut self) -> Result<Vec<EncodedUnit>> {
        Ok(Vec::new())
    }

    fn open_segment(&mut self, path: &Path, segment_number: u64) -> Result<()> {
        let file = File::create(path)?;
        debug!("{}: segment {segment_number} opened at {}", self.id, path.display());
        self.segment = Some(BufWriter::new(file));
        Ok(())
    }

    fn write_to_container(&mut self, unit: &EncodedUnit, frame_index: u32) -> Result<bool> {
        let Some(segment) = self.segment.as_mut() else {
            return Err(crate::error::CodecError::Mux {
                id: self.id.clone(),
                reason: "no open segment".to_string(),
            }
            .into());
        };

        let mut record = BytesMut::with_capacity(RECORD_HEADER_LEN + unit.data.len());
        record.put_u32(unit.data.len() as u32);
        record.put_i64(unit.pts);
        record.put_u8(if unit.is_keyframe { FLAG_KEYFRAME } else { 0 });
        record.put_slice(&unit.data);
        segment.write_all(&record)?;

        Ok(frame_index + 1 >= self.plan.segment_frames)
    }

    fn close_segment(&mut self) -> Result<()> {
        if let Some(mut segment) = self.segment.take() {
            segment.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        <Self as EncoderMux<F>>::close_segment(self)
    }
}

/// Opens a [`RawSegmentOutput`] per representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawOutputOpener {
    pub gop_size: Option<u32>,
}

impl OutputOpener for RawOutputOpener {
    fn open_video(
        &self,
        representation: &VideoRepresentation,
        plan: &SegmentPlan,
        out_dir: &Path,
    ) -> Result<Box<dyn EncoderMux<VideoFrame>>> {
        let description = [
            ("type", "video".to_string()),
            ("id", representation.id.clone()),
            ("width", representation.resolution.width.to_string()),
            ("height", representation.resolution.height.to_string()),
            ("framerate", representation.framerate.to_string()),
            ("codec", "yuv420p".to_string()),
        ];
        let output = RawSegmentOutput::open(&representation.id, &description, *plan, self.gop_size, out_dir)?;
        Ok(Box::new(output))
    }

    fn open_audio(
        &self,
        representation: &AudioRepresentation,
        plan: &SegmentPlan,
        out_dir: &Path,
    ) -> Result<Box<dyn EncoderMux<AudioFrame>>> {
        let description = [
            ("type", "audio".to_string()),
            ("id", representation.id.clone()),
            ("samplerate", representation.sample_rate.to_string()),
            ("channels", representation.channels.to_string()),
            ("codec", "s16le".to_string()),
        ];
        // Every audio frame is a sync sample.
        let output = RawSegmentOutput::open(&representation.id, &description, *plan, Some(1), out_dir)?;
        Ok(Box::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::Resolution;
    use crate::core::segment::segment_path;

    #[test]
    fn test_writes_init_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let representation = VideoRepresentation::new("v1").set_resolution(2, 2).set_framerate(2);
        let plan = SegmentPlan::video(2, 1000, 1000);
        let mut output = RawOutputOpener { gop_size: None }
            .open_video(&representation, &plan, dir.path())
            .unwrap();

        let init = std::fs::read_to_string(init_segment_path(dir.path(), "v1")).unwrap();
        assert!(init.starts_with("dashcast-raw\n"));
        assert!(init.contains("width=2\n"));

        let path = segment_path(dir.path(), "v1", 0);
        output.open_segment(&path, 0).unwrap();
        let mut frame = VideoFrame::with_resolution(Resolution::new(2, 2));
        let mut boundaries = Vec::new();
        let mut keys = Vec::new();
        for index in 0..2u32 {
            frame.data.fill(index as u8);
            frame.pts = index as i64;
            let unit = output.encode(&frame).unwrap().unwrap();
            keys.push(unit.is_keyframe);
            boundaries.push(output.write_to_container(&unit, index).unwrap());
        }
        output.close_segment().unwrap();
        output.close().unwrap();

        assert_eq!(keys, vec![true, false]);
        assert_eq!(boundaries, vec![false, true]);

        let written = std::fs::read(&path).unwrap();
        let picture = Resolution::new(2, 2).yuv420_len();
        assert_eq!(written.len(), 2 * (RECORD_HEADER_LEN + picture));
        assert_eq!(&written[..4], &(picture as u32).to_be_bytes());
        assert_eq!(written[12], FLAG_KEYFRAME);
    }

    #[test]
    fn test_audio_payload_is_little_endian() {
        let frame = AudioFrame {
            sample_rate: 8000,
            channels: 1,
            samples: vec![1, -2],
            pts: 0,
        };
        assert_eq!(frame.payload().as_ref(), &[1, 0, 0xfe, 0xff]);
        assert_eq!(RawPayload::duration(&frame), 2);
    }

    #[test]
    fn test_write_without_segment_fails() {
        let dir = tempfile::tempdir().unwrap();
        let plan = SegmentPlan::audio(8000, 1024, 1000, 1000);
        let mut output = RawOutputOpener::default()
            .open_audio(&AudioRepresentation::new("a1"), &plan, dir.path())
            .unwrap();
        assert!(output.write_to_container(&EncodedUnit::default(), 0).is_err());
    }
}
