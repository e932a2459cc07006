// src/core/scheduler/encode_task.rs - Encoder + segment muxer stage
//
// One thread per representation. Frames are encoded as they arrive and the
// resulting units are packed into segment files of `plan.segment_frames`
// frames. Every closed segment is announced to the manifest stage; in live
// modes the segment numbering is kept in step with the wall clock and expired
// segments are handed to the retention stage.

use crate::core::frame::EncodedUnit;
use crate::core::manifest::ManifestEvent;
use crate::core::media_io::{Clock, EncoderMux};
use crate::core::scheduler::{StageState, StageStatus};
use crate::core::segment::{retained_segments, segment_path, SegmentPlan};
use crate::core::sync::{ConsumerCursor, MessageQueue, RingBuffer, ShutdownToken};
use crate::error::{Error, RingBufferError};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Drift between wall clock and produced media tolerated without a warning.
const SYNC_SAFE_MS: i64 = 800;

pub(crate) type OutputOpen<F> = Box<dyn FnOnce() -> crate::error::Result<Box<dyn EncoderMux<F>>> + Send>;

#[derive(Debug, Clone)]
pub(crate) struct EncoderParameter {
    pub(crate) name: String,
    pub(crate) representation_id: String,
    pub(crate) plan: SegmentPlan,
    pub(crate) out_dir: PathBuf,
    pub(crate) live: bool,
    pub(crate) time_shift_secs: Option<u32>,
    pub(crate) segment_duration_ms: u32,
}

pub(crate) struct EncoderQueues {
    pub(crate) events: Arc<MessageQueue<ManifestEvent>>,
    pub(crate) deletions: Option<Arc<MessageQueue<PathBuf>>>,
}

pub(crate) fn encode_init<F: Send + Sync + 'static>(
    parameter: EncoderParameter,
    open: OutputOpen<F>,
    input: Arc<RingBuffer<F>>,
    queues: EncoderQueues,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownToken,
    status: StageStatus,
) -> std::io::Result<JoinHandle<crate::error::Result<()>>> {
    std::thread::Builder::new()
        .name(parameter.name.clone())
        .spawn(move || {
            let cursor = input.consumer_cursor()?;

            let mut output = match open() {
                Ok(output) => output,
                Err(e) => {
                    error!("{}: cannot open output: {e}", parameter.name);
                    shutdown.cancel();
                    input.consumer_detach(cursor);
                    status.set(StageState::Stopped);
                    return Err(e);
                }
            };

            status.set(StageState::Running);
            let mut writer = SegmentWriter::new(&parameter, queues, clock);
            let result = run_encoder(
                &parameter,
                output.as_mut(),
                &input,
                cursor,
                &mut writer,
                &shutdown,
                &status,
            );

            if writer.open {
                // Abandon the partial segment but keep the container consistent.
                if let Err(e) = output.close_segment() {
                    warn!("{}: closing partial segment failed: {e}", parameter.name);
                }
            }
            if !parameter.live {
                let duration_ms = parameter.plan.frames_to_ms(writer.frames_written);
                debug!("{}: duration {duration_ms}ms", parameter.name);
                writer.queues.events.put(ManifestEvent::DurationKnown {
                    representation: parameter.representation_id.clone(),
                    duration_ms,
                });
            }
            let closed = output.close();

            info!(
                "{} finished: {} segments, {} frames",
                parameter.name, writer.segments_written, writer.frames_written
            );
            status.set(StageState::Stopped);
            result.and(closed)
        })
}

fn run_encoder<F>(
    parameter: &EncoderParameter,
    output: &mut dyn EncoderMux<F>,
    input: &RingBuffer<F>,
    mut cursor: ConsumerCursor,
    writer: &mut SegmentWriter,
    shutdown: &ShutdownToken,
    status: &StageStatus,
) -> crate::error::Result<()> {
    let consumed = loop {
        match input.consumer_lock(&cursor) {
            Ok(()) => {}
            Err(RingBufferError::EndOfStream) => {
                debug!("{}: end of input", parameter.name);
                break Ok(());
            }
            Err(e) => break Err(Error::from(e)),
        }
        if shutdown.is_cancelled() {
            input.consumer_unlock(&cursor);
            info!("{}: shutdown requested, draining", parameter.name);
            break Ok(());
        }

        let encoded = output.encode(&input.consume(&cursor));
        input.consumer_unlock(&cursor);
        input.consumer_advance(&mut cursor);

        let pushed = match encoded {
            Ok(Some(unit)) => writer.push(output, unit),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = pushed {
            error!("{}: {e}", parameter.name);
            break Err(e);
        }
    };
    input.consumer_detach(cursor);
    consumed?;

    status.set(StageState::Draining);
    for unit in output.flush()? {
        writer.push(output, unit)?;
    }
    if writer.open {
        writer.close_segment(output)?;
    }
    Ok(())
}

/// Segment bookkeeping of one representation.
struct SegmentWriter {
    name: String,
    representation_id: String,
    plan: SegmentPlan,
    out_dir: PathBuf,
    live: bool,
    keep_segments: Option<u64>,
    queues: EncoderQueues,
    clock: Arc<dyn Clock>,

    segment_number: u64,
    frame_index: u32,
    open: bool,
    segment_start_ms: i64,
    stream_start_ms: i64,
    /// Cut the current segment at the next keyframe after losing sync.
    resync: bool,
    frames_written: u64,
    segments_written: u64,
}

impl SegmentWriter {
    fn new(parameter: &EncoderParameter, queues: EncoderQueues, clock: Arc<dyn Clock>) -> Self {
        let keep_segments = parameter
            .time_shift_secs
            .map(|secs| retained_segments(secs, parameter.segment_duration_ms));
        let stream_start_ms = clock.now_ms();
        Self {
            name: parameter.name.clone(),
            representation_id: parameter.representation_id.clone(),
            plan: parameter.plan,
            out_dir: parameter.out_dir.clone(),
            live: parameter.live,
            keep_segments,
            queues,
            clock,
            segment_number: 0,
            frame_index: 0,
            open: false,
            segment_start_ms: stream_start_ms,
            stream_start_ms,
            resync: false,
            frames_written: 0,
            segments_written: 0,
        }
    }

    fn push<F>(&mut self, output: &mut dyn EncoderMux<F>, unit: EncodedUnit) -> crate::error::Result<()> {
        if self.resync && unit.is_keyframe {
            if self.open {
                self.close_segment(output)?;
            }
            self.resync = false;
        }

        if !self.open {
            let path = segment_path(&self.out_dir, &self.representation_id, self.segment_number);
            output.open_segment(&path, self.segment_number)?;
            self.open = true;
            self.frame_index = 0;
            self.segment_start_ms = self.clock.now_ms();
        }

        let full = output.write_to_container(&unit, self.frame_index)?;
        self.frame_index += 1;
        self.frames_written += 1;

        if full || self.frame_index >= self.plan.segment_frames {
            self.close_segment(output)?;
        }
        Ok(())
    }

    fn close_segment<F>(&mut self, output: &mut dyn EncoderMux<F>) -> crate::error::Result<()> {
        output.close_segment()?;
        self.open = false;
        self.segments_written += 1;

        let number = self.segment_number;
        debug!("{}: segment {number} closed with {} frames", self.name, self.frame_index);
        self.queues.events.put(ManifestEvent::SegmentReady {
            representation: self.representation_id.clone(),
            segment_number: number,
            timestamp_ms: self.segment_start_ms,
        });

        if let (Some(keep), Some(deletions)) = (self.keep_segments, &self.queues.deletions) {
            if number >= keep {
                deletions.put(segment_path(&self.out_dir, &self.representation_id, number - keep));
            }
        }

        if self.live {
            self.check_drift();
        }
        self.segment_number += 1;
        Ok(())
    }

    /// Keeps segment numbers aligned with the wall clock.
    fn check_drift(&mut self) {
        let segment_ms = self.plan.real_segment_duration_ms as i64;
        if segment_ms == 0 {
            return;
        }
        let elapsed = self.clock.now_ms() - self.stream_start_ms;
        let number = self.segment_number as i64;

        if elapsed > (number + 2) * segment_ms {
            let mut caught_up = number;
            while elapsed > (caught_up + 2) * segment_ms {
                caught_up += 1;
            }
            error!(
                "{}: {elapsed}ms elapsed after segment {number}, frames were probably lost, skipping to segment {}",
                self.name,
                caught_up + 1
            );
            self.segment_number = caught_up as u64;
            self.resync = true;
            return;
        }

        let drift = elapsed - (number + 1) * segment_ms;
        if drift > SYNC_SAFE_MS {
            warn!(
                "{}: wall clock is {drift}ms ahead of produced media, frame rate is probably not correct",
                self.name
            );
        } else if drift < -SYNC_SAFE_MS {
            warn!(
                "{}: produced media is {}ms ahead of wall clock, frame rate is probably not correct",
                self.name, -drift
            );
        } else {
            debug!("{}: drift at segment {number} is {drift}ms", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::BufferMode;
    use crate::error::CodecError;
    use std::path::Path;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        segments: Vec<(PathBuf, u64, Vec<i64>)>,
        closed: bool,
    }

    /// Encodes every `u32` frame into a unit; holds one unit back like a
    /// B-frame encoder so the end-of-stream flush is exercised.
    struct DelayEncoder {
        held: Option<EncodedUnit>,
        fail_at: Option<u32>,
        record: Arc<Mutex<Recorder>>,
    }

    impl EncoderMux<u32> for DelayEncoder {
        fn encode(&mut self, frame: &u32) -> crate::error::Result<Option<EncodedUnit>> {
            if Some(*frame) == self.fail_at {
                return Err(CodecError::Encode {
                    id: "v".to_string(),
                    reason: "broken".to_string(),
                }
                .into());
            }
            let unit = EncodedUnit {
                pts: *frame as i64,
                is_keyframe: *frame % 5 == 0,
                ..EncodedUnit::default()
            };
            Ok(self.held.replace(unit))
        }

        fn flush(&mut self) -> crate::error::Result<Vec<EncodedUnit>> {
            Ok(self.held.take().into_iter().collect())
        }

        fn open_segment(&mut self, path: &Path, segment_number: u64) -> crate::error::Result<()> {
            self.record
                .lock()
                .unwrap()
                .segments
                .push((path.to_path_buf(), segment_number, Vec::new()));
            Ok(())
        }

        fn write_to_container(&mut self, unit: &EncodedUnit, _frame_index: u32) -> crate::error::Result<bool> {
            let mut record = self.record.lock().unwrap();
            if let Some(segment) = record.segments.last_mut() {
                segment.2.push(unit.pts);
            }
            Ok(false)
        }

        fn close_segment(&mut self) -> crate::error::Result<()> {
            Ok(())
        }

        fn close(&mut self) -> crate::error::Result<()> {
            self.record.lock().unwrap().closed = true;
            Ok(())
        }
    }

    struct FixedClock(AtomicI64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn parameter(live: bool, time_shift_secs: Option<u32>) -> EncoderParameter {
        EncoderParameter {
            name: "video-encoder:v".to_string(),
            representation_id: "v".to_string(),
            plan: SegmentPlan::video(4, 1000, 1000),
            out_dir: PathBuf::from("out"),
            live,
            time_shift_secs,
            segment_duration_ms: 1000,
        }
    }

    fn feed(input: &RingBuffer<u32>, frames: u32) {
        let mut cursor = input.producer_cursor().unwrap();
        for frame in 0..frames {
            input.producer_lock(&cursor).unwrap();
            *input.produce(&cursor) = frame;
            input.producer_unlock(&cursor);
            input.producer_advance(&mut cursor);
        }
        crate::core::scheduler::signal_end(input, &cursor, false);
    }

    fn drain_events(queue: &MessageQueue<ManifestEvent>) -> Vec<ManifestEvent> {
        queue.close();
        std::iter::from_fn(|| queue.get()).collect()
    }

    #[test]
    fn test_segments_are_cut_by_frame_count() {
        let _ = env_logger::builder().is_test(true).try_init();

        let record = Arc::new(Mutex::new(Recorder::default()));
        let input = Arc::new(RingBuffer::new(3, BufferMode::OnDemand, 1, || 0u32));
        let events = Arc::new(MessageQueue::new());
        let encoder = DelayEncoder {
            held: None,
            fail_at: None,
            record: record.clone(),
        };
        let handle = encode_init(
            parameter(false, None),
            Box::new(move || Ok(Box::new(encoder) as Box<dyn EncoderMux<u32>>)),
            input.clone(),
            EncoderQueues {
                events: events.clone(),
                deletions: None,
            },
            Arc::new(FixedClock(AtomicI64::new(0))),
            ShutdownToken::new(),
            StageStatus::new(),
        )
        .unwrap();

        feed(&input, 10);
        handle.join().unwrap().unwrap();

        let record = record.lock().unwrap();
        assert!(record.closed);
        let layout: Vec<_> = record.segments.iter().map(|s| (s.1, s.2.clone())).collect();
        assert_eq!(
            layout,
            vec![(0, vec![0, 1, 2, 3]), (1, vec![4, 5, 6, 7]), (2, vec![8, 9])]
        );
        assert_eq!(record.segments[1].0, PathBuf::from("out/v_1.m4s"));

        let events = drain_events(&events);
        assert_eq!(events.len(), 4);
        assert!(matches!(
            &events[2],
            ManifestEvent::SegmentReady { segment_number: 2, .. }
        ));
        // 10 frames at 4 fps.
        assert_eq!(
            events[3],
            ManifestEvent::DurationKnown {
                representation: "v".to_string(),
                duration_ms: 2500
            }
        );
    }

    #[test]
    fn test_live_retention_requests_expired_segments() {
        let record = Arc::new(Mutex::new(Recorder::default()));
        let input = Arc::new(RingBuffer::new(3, BufferMode::OnDemand, 1, || 0u32));
        let events = Arc::new(MessageQueue::new());
        let deletions = Arc::new(MessageQueue::new());
        let encoder = DelayEncoder {
            held: None,
            fail_at: None,
            record,
        };
        // Two seconds of time-shift with one second segments.
        let handle = encode_init(
            parameter(true, Some(2)),
            Box::new(move || Ok(Box::new(encoder) as Box<dyn EncoderMux<u32>>)),
            input.clone(),
            EncoderQueues {
                events: events.clone(),
                deletions: Some(deletions.clone()),
            },
            Arc::new(FixedClock(AtomicI64::new(0))),
            ShutdownToken::new(),
            StageStatus::new(),
        )
        .unwrap();

        feed(&input, 16);
        handle.join().unwrap().unwrap();

        deletions.close();
        let deleted: Vec<_> = std::iter::from_fn(|| deletions.get()).collect();
        assert_eq!(
            deleted,
            vec![PathBuf::from("out/v_0.m4s"), PathBuf::from("out/v_1.m4s")]
        );
        // Live encoders do not report a duration.
        assert!(drain_events(&events)
            .iter()
            .all(|e| matches!(e, ManifestEvent::SegmentReady { .. })));
    }

    #[test]
    fn test_lagging_live_encoder_skips_numbers_and_resyncs() {
        let clock = Arc::new(FixedClock(AtomicI64::new(0)));
        let mut writer = SegmentWriter::new(
            &parameter(true, None),
            EncoderQueues {
                events: Arc::new(MessageQueue::new()),
                deletions: None,
            },
            clock.clone(),
        );
        let record = Arc::new(Mutex::new(Recorder::default()));
        let mut encoder = DelayEncoder {
            held: None,
            fail_at: None,
            record: record.clone(),
        };

        for pts in 0..4 {
            let unit = EncodedUnit {
                pts,
                is_keyframe: pts == 0,
                ..EncodedUnit::default()
            };
            if pts == 3 {
                // The first segment closes 4.5s after start.
                clock.0.store(4500, Ordering::SeqCst);
            }
            writer.push::<u32>(&mut encoder, unit).unwrap();
        }
        // 4.5s in, the next segment to produce is number 4.
        assert_eq!(writer.segment_number, 4);
        assert!(writer.resync);

        // Non-keyframes keep filling the broken segment, the keyframe cuts it.
        for (pts, key) in [(4, false), (5, true)] {
            let unit = EncodedUnit {
                pts,
                is_keyframe: key,
                ..EncodedUnit::default()
            };
            writer.push::<u32>(&mut encoder, unit).unwrap();
        }
        assert!(!writer.resync);
        let numbers: Vec<_> = record.lock().unwrap().segments.iter().map(|s| (s.1, s.2.clone())).collect();
        assert_eq!(numbers, vec![(0, vec![0, 1, 2, 3]), (4, vec![4]), (5, vec![5])]);
    }

    #[test]
    fn test_encode_failure_detaches_input() {
        let record = Arc::new(Mutex::new(Recorder::default()));
        let input = Arc::new(RingBuffer::new(2, BufferMode::OnDemand, 1, || 0u32));
        let encoder = DelayEncoder {
            held: None,
            fail_at: Some(3),
            record: record.clone(),
        };
        let shutdown = ShutdownToken::new();
        let handle = encode_init(
            parameter(false, None),
            Box::new(move || Ok(Box::new(encoder) as Box<dyn EncoderMux<u32>>)),
            input.clone(),
            EncoderQueues {
                events: Arc::new(MessageQueue::new()),
                deletions: None,
            },
            Arc::new(FixedClock(AtomicI64::new(0))),
            shutdown.clone(),
            StageStatus::new(),
        )
        .unwrap();

        // Never blocks even though the encoder dies after three frames.
        feed(&input, 20);
        assert!(matches!(handle.join().unwrap(), Err(Error::Codec(_))));
        assert!(record.lock().unwrap().closed);
        // A mid-stream codec failure only stops this representation.
        assert!(!shutdown.is_cancelled());
    }

    #[test]
    fn test_cancelled_encoder_drains_without_reading() {
        let _ = env_logger::builder().is_test(true).try_init();

        let record = Arc::new(Mutex::new(Recorder::default()));
        let input = Arc::new(RingBuffer::new(2, BufferMode::OnDemand, 1, || 0u32));
        let events = Arc::new(MessageQueue::new());
        let encoder = DelayEncoder {
            held: None,
            fail_at: None,
            record: record.clone(),
        };
        let shutdown = ShutdownToken::new();
        shutdown.cancel();
        let status = StageStatus::new();
        let handle = encode_init(
            parameter(false, None),
            Box::new(move || Ok(Box::new(encoder) as Box<dyn EncoderMux<u32>>)),
            input.clone(),
            EncoderQueues {
                events: events.clone(),
                deletions: None,
            },
            Arc::new(FixedClock(AtomicI64::new(0))),
            shutdown,
            status.clone(),
        )
        .unwrap();

        // The input never ends; only the token stops the encoder, and its
        // detach keeps the producer from blocking.
        let mut cursor = input.producer_cursor().unwrap();
        for frame in 0..20 {
            input.producer_lock(&cursor).unwrap();
            *input.produce(&cursor) = frame;
            input.producer_unlock(&cursor);
            input.producer_advance(&mut cursor);
        }

        handle.join().unwrap().unwrap();
        let record = record.lock().unwrap();
        assert!(record.closed);
        assert!(record.segments.is_empty());
        assert_eq!(status.get(), StageState::Stopped);
        assert_eq!(
            drain_events(&events),
            vec![ManifestEvent::DurationKnown {
                representation: "v".to_string(),
                duration_ms: 0
            }]
        );
    }

    #[test]
    fn test_open_failure_requests_shutdown() {
        let input = Arc::new(RingBuffer::new(2, BufferMode::OnDemand, 1, || 0u32));
        let shutdown = ShutdownToken::new();
        let handle = encode_init::<u32>(
            parameter(false, None),
            Box::new(|| -> crate::error::Result<Box<dyn EncoderMux<u32>>> {
                Err(crate::error::OpenError::Output {
                    id: "v".to_string(),
                    reason: "no such codec".to_string(),
                }
                .into())
            }),
            input.clone(),
            EncoderQueues {
                events: Arc::new(MessageQueue::new()),
                deletions: None,
            },
            Arc::new(FixedClock(AtomicI64::new(0))),
            shutdown.clone(),
            StageStatus::new(),
        )
        .unwrap();

        assert!(matches!(handle.join().unwrap(), Err(Error::Open(_))));
        assert!(shutdown.is_cancelled());
        feed(&input, 5);
    }
}
