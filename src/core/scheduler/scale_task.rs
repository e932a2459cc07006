use crate::core::frame::{Resolution, VideoFrame};
use crate::core::media_io::FrameScaler;
use crate::core::scheduler::{signal_end, StageState, StageStatus};
use crate::core::sync::RingBuffer;
use crate::error::{Error, RingBufferError};
use log::{debug, error, info};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Spawns the scaler feeding every representation of `resolution`.
pub(crate) fn scale_init(
    resolution: Resolution,
    scaler: Box<dyn FrameScaler>,
    input: Arc<RingBuffer<VideoFrame>>,
    output: Arc<RingBuffer<VideoFrame>>,
    status: StageStatus,
) -> std::io::Result<JoinHandle<crate::error::Result<()>>> {
    let name = format!("video-scaler:{resolution}");
    std::thread::Builder::new().name(name.clone()).spawn(move || {
        let mut scaler = scaler;
        status.set(StageState::Running);
        let result = run_scaler(&name, scaler.as_mut(), &input, &output, &status);
        info!(
            "{name} finished: {} frames produced, {} dropped",
            output.produced(),
            output.dropped()
        );
        status.set(StageState::Stopped);
        result
    })
}

fn run_scaler(
    name: &str,
    scaler: &mut dyn FrameScaler,
    input: &RingBuffer<VideoFrame>,
    output: &RingBuffer<VideoFrame>,
    status: &StageStatus,
) -> crate::error::Result<()> {
    let mut in_cursor = input.consumer_cursor()?;
    let mut out_cursor = match output.producer_cursor() {
        Ok(cursor) => cursor,
        Err(e) => {
            input.consumer_detach(in_cursor);
            return Err(e.into());
        }
    };

    let mut reserved = false;
    let result = loop {
        match input.consumer_lock(&in_cursor) {
            Ok(()) => {}
            Err(RingBufferError::EndOfStream) => {
                debug!("{name}: end of input");
                break Ok(());
            }
            Err(e) => break Err(Error::from(e)),
        }

        match output.producer_lock(&out_cursor) {
            Ok(()) => {
                reserved = true;
                let scaled = {
                    let source = input.consume(&in_cursor);
                    let mut target = output.produce(&out_cursor);
                    let scaled = scaler.scale(&source, &mut target);
                    target.pts = source.pts;
                    target.source_index = source.source_index;
                    scaled
                };
                input.consumer_unlock(&in_cursor);
                input.consumer_advance(&mut in_cursor);

                if let Err(e) = scaled {
                    error!("{name}: scaling failed: {e}");
                    break Err(e);
                }
                output.producer_unlock(&out_cursor);
                output.producer_advance(&mut out_cursor);
                reserved = false;
            }
            Err(RingBufferError::WouldBlock) => {
                // Encoders are behind; drop this picture.
                input.consumer_unlock(&in_cursor);
                input.consumer_advance(&mut in_cursor);
            }
            Err(RingBufferError::EndOfStream) => {
                input.consumer_unlock(&in_cursor);
                break Ok(());
            }
            Err(e) => {
                input.consumer_unlock(&in_cursor);
                break Err(Error::from(e));
            }
        }
    };

    status.set(StageState::Draining);
    signal_end(output, &out_cursor, reserved);
    input.consumer_detach(in_cursor);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::BufferMode;
    use crate::error::CodecError;

    struct HalfScaler;

    impl FrameScaler for HalfScaler {
        fn scale(&mut self, input: &VideoFrame, output: &mut VideoFrame) -> crate::error::Result<()> {
            if input.data[0] == 0xff {
                return Err(CodecError::Scale("corrupt picture".to_string()).into());
            }
            output.reshape(Resolution::new(input.resolution.width / 2, input.resolution.height / 2));
            output.data.fill(input.data[0]);
            Ok(())
        }
    }

    fn push(buffer: &RingBuffer<VideoFrame>, cursor: &mut crate::core::sync::ProducerCursor, value: u8, pts: i64) {
        buffer.producer_lock(cursor).unwrap();
        {
            let mut frame = buffer.produce(cursor);
            frame.reshape(Resolution::new(4, 4));
            frame.data.fill(value);
            frame.pts = pts;
        }
        buffer.producer_unlock(cursor);
        buffer.producer_advance(cursor);
    }

    fn collect(buffer: &RingBuffer<VideoFrame>) -> Vec<(i64, Resolution, u8)> {
        let mut cursor = buffer.consumer_cursor().unwrap();
        let mut frames = Vec::new();
        while buffer.consumer_lock(&cursor).is_ok() {
            {
                let frame = buffer.consume(&cursor);
                frames.push((frame.pts, frame.resolution, frame.data[0]));
            }
            buffer.consumer_unlock(&cursor);
            buffer.consumer_advance(&mut cursor);
        }
        frames
    }

    #[test]
    fn test_scaler_forwards_frames_and_end_of_stream() {
        let _ = env_logger::builder().is_test(true).try_init();

        let input = Arc::new(RingBuffer::new(2, BufferMode::OnDemand, 1, VideoFrame::default));
        let output = Arc::new(RingBuffer::new(2, BufferMode::OnDemand, 1, VideoFrame::default));
        let status = StageStatus::new();
        let handle = scale_init(
            Resolution::new(2, 2),
            Box::new(HalfScaler),
            input.clone(),
            output.clone(),
            status.clone(),
        )
        .unwrap();
        let reader = {
            let output = output.clone();
            std::thread::spawn(move || collect(&output))
        };

        let mut cursor = input.producer_cursor().unwrap();
        for pts in 0..10 {
            push(&input, &mut cursor, pts as u8 + 1, pts);
        }
        signal_end(&input, &cursor, false);

        handle.join().unwrap().unwrap();
        let frames = reader.join().unwrap();
        assert_eq!(frames.len(), 10);
        assert_eq!(frames[3], (3, Resolution::new(2, 2), 4));
        assert_eq!(status.get(), StageState::Stopped);
    }

    #[test]
    fn test_scaler_failure_ends_downstream() {
        let input = Arc::new(RingBuffer::new(2, BufferMode::OnDemand, 1, VideoFrame::default));
        let output = Arc::new(RingBuffer::new(2, BufferMode::OnDemand, 1, VideoFrame::default));
        let handle = scale_init(
            Resolution::new(2, 2),
            Box::new(HalfScaler),
            input.clone(),
            output.clone(),
            StageStatus::new(),
        )
        .unwrap();
        let reader = {
            let output = output.clone();
            std::thread::spawn(move || collect(&output))
        };

        let mut cursor = input.producer_cursor().unwrap();
        push(&input, &mut cursor, 1, 0);
        push(&input, &mut cursor, 0xff, 1);

        assert!(matches!(handle.join().unwrap(), Err(Error::Codec(_))));
        assert_eq!(reader.join().unwrap().len(), 1);

        // The scaler detached, so the producer keeps going without a reader.
        for pts in 2..6 {
            push(&input, &mut cursor, 1, pts);
        }
    }
}
