use crate::core::frame::{AudioFrame, VideoFrame};
use crate::core::media_io::{Clock, FrameSource, ReadOutcome};
use crate::core::scheduler::{signal_end, StageState, StageStatus};
use crate::core::source_schedule::{current_source, ScheduledTask, DEFAULT_SOURCE};
use crate::core::sync::{RingBuffer, ShutdownToken};
use crate::error::{Error, RingBufferError};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Payload that a decoder stamps with a continuous timeline, whatever input
/// it came from.
pub(crate) trait DecodedFrame: Default + Send + Sync + 'static {
    fn stamp(&mut self, source_index: usize, position: &mut i64);
}

impl DecodedFrame for VideoFrame {
    fn stamp(&mut self, source_index: usize, position: &mut i64) {
        self.source_index = source_index;
        self.pts = *position;
        *position += 1;
    }
}

impl DecodedFrame for AudioFrame {
    fn stamp(&mut self, _source_index: usize, position: &mut i64) {
        self.pts = *position;
        *position += self.sample_count() as i64;
    }
}

pub(crate) struct DecoderParameter<F> {
    pub(crate) name: String,
    /// Index 0 is the primary input, the rest are switch sources.
    pub(crate) sources: Vec<Box<dyn FrameSource<F>>>,
    pub(crate) schedule: Vec<ScheduledTask>,
    /// Minimum spacing between frames, used to play live media at its rate.
    pub(crate) pace: Option<Duration>,
}

pub(crate) fn decode_init<F: DecodedFrame>(
    parameter: DecoderParameter<F>,
    output: Arc<RingBuffer<F>>,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownToken,
    status: StageStatus,
) -> std::io::Result<JoinHandle<crate::error::Result<()>>> {
    std::thread::Builder::new()
        .name(parameter.name.clone())
        .spawn(move || {
            let mut parameter = parameter;
            status.set(StageState::Running);
            let result = run_decoder(&mut parameter, &output, clock.as_ref(), &shutdown);

            status.set(StageState::Draining);
            for source in parameter.sources.iter_mut() {
                source.close();
            }
            info!(
                "{} finished: {} frames produced, {} dropped",
                parameter.name,
                output.produced(),
                output.dropped()
            );
            status.set(StageState::Stopped);
            result
        })
}

fn run_decoder<F: DecodedFrame>(
    parameter: &mut DecoderParameter<F>,
    output: &RingBuffer<F>,
    clock: &dyn Clock,
    shutdown: &ShutdownToken,
) -> crate::error::Result<()> {
    let mut cursor = output.producer_cursor()?;
    let mut scratch = F::default();
    let mut position = 0i64;
    let mut current = DEFAULT_SOURCE;

    loop {
        let started = Instant::now();

        let mut index = current_source(&parameter.schedule, clock.now_ms()).index();
        if index >= parameter.sources.len() {
            warn!("{}: scheduled source {index} does not exist, using the primary input", parameter.name);
            index = DEFAULT_SOURCE;
        }
        if index != current {
            info!("{}: switching from source {current} to source {index}", parameter.name);
            current = index;
        }
        let source = &mut parameter.sources[index];

        match output.producer_lock(&cursor) {
            Ok(()) => {
                if shutdown.is_cancelled() {
                    info!("{} received shutdown, finishing.", parameter.name);
                    output.end_signal(&cursor);
                    break Ok(());
                }
                let outcome = {
                    let mut frame = output.produce(&cursor);
                    let outcome = source.read_next(&mut frame);
                    if matches!(outcome, Ok(ReadOutcome::Frame)) {
                        frame.stamp(index, &mut position);
                    }
                    outcome
                };
                match outcome {
                    Ok(ReadOutcome::Frame) => {
                        output.producer_unlock(&cursor);
                        output.producer_advance(&mut cursor);
                    }
                    Ok(ReadOutcome::EndOfStream) => {
                        debug!("{}: end of input", parameter.name);
                        output.end_signal(&cursor);
                        break Ok(());
                    }
                    Err(e) => {
                        error!("{}: read failed: {e}", parameter.name);
                        output.end_signal(&cursor);
                        break Err(e);
                    }
                }
            }
            Err(RingBufferError::WouldBlock) => {
                if shutdown.is_cancelled() {
                    info!("{} received shutdown, finishing.", parameter.name);
                    signal_end(output, &cursor, false);
                    break Ok(());
                }
                // Keep capture real-time: read the unit anyway and drop it.
                match source.read_next(&mut scratch) {
                    Ok(ReadOutcome::Frame) => {
                        scratch.stamp(index, &mut position);
                        debug!("{}: consumers busy, frame dropped", parameter.name);
                    }
                    Ok(ReadOutcome::EndOfStream) => {
                        debug!("{}: end of input", parameter.name);
                        signal_end(output, &cursor, false);
                        break Ok(());
                    }
                    Err(e) => {
                        error!("{}: read failed: {e}", parameter.name);
                        signal_end(output, &cursor, false);
                        break Err(e);
                    }
                }
            }
            Err(RingBufferError::EndOfStream) => break Ok(()),
            Err(e) => break Err(Error::from(e)),
        }

        if let Some(interval) = parameter.pace {
            let spent = started.elapsed();
            if spent < interval {
                std::thread::sleep(interval - spent);
            }
        }
    }
}
