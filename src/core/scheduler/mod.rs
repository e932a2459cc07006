pub mod dash_scheduler;
pub(crate) mod decode_task;
pub(crate) mod encode_task;
pub(crate) mod manifest_task;
pub mod quit_task;
pub(crate) mod retention_task;
pub(crate) mod scale_task;

use crate::core::sync::{ProducerCursor, RingBuffer};
use crate::error::RingBufferError;
use log::debug;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of one stage thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Idle,
    Running,
    /// Input ended or shutdown observed; flushing and closing outputs.
    Draining,
    Stopped,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StageState::Idle,
            1 => StageState::Running,
            2 => StageState::Draining,
            _ => StageState::Stopped,
        }
    }
}

/// Shared view of a stage's [`StageState`].
#[derive(Debug, Clone)]
pub struct StageStatus {
    state: Arc<AtomicU8>,
}

impl StageStatus {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(StageState::Idle as u8)),
        }
    }

    pub(crate) fn set(&self, state: StageState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn get(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Join order of the controller follows the data flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageKind {
    Decoder,
    Scaler,
    Encoder,
    Manifest,
    Retention,
    Quit,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Decoder => "decoder",
            StageKind::Scaler => "scaler",
            StageKind::Encoder => "encoder",
            StageKind::Manifest => "manifest",
            StageKind::Retention => "retention",
            StageKind::Quit => "quit",
        };
        f.write_str(name)
    }
}

/// Terminates a producer's stream.
///
/// When the cursor's slot is not reserved yet it is reserved first, so in
/// on-demand mode the marker never overwrites a fill that consumers still
/// have to read. Live modes do not wait: an unread fill under the cursor is
/// replaced by the marker and counted as dropped.
pub(crate) fn signal_end<T>(buffer: &RingBuffer<T>, cursor: &ProducerCursor, reserved: bool) {
    if !reserved {
        if let Err(RingBufferError::WouldBlock) = buffer.producer_lock(cursor) {
            debug!(
                "Slot {} still holds an unread fill, dropping it for the end marker",
                cursor.index()
            );
        }
    }
    buffer.end_signal(cursor);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::BufferMode;

    #[test]
    fn test_stage_status_transitions() {
        let status = StageStatus::new();
        let view = status.clone();
        assert_eq!(view.get(), StageState::Idle);
        status.set(StageState::Running);
        assert_eq!(view.get(), StageState::Running);
        status.set(StageState::Draining);
        status.set(StageState::Stopped);
        assert_eq!(view.get(), StageState::Stopped);
    }

    fn fill(buffer: &RingBuffer<u32>, cursor: &mut ProducerCursor, value: u32) {
        buffer.producer_lock(cursor).unwrap();
        *buffer.produce(cursor) = value;
        buffer.producer_unlock(cursor);
        buffer.producer_advance(cursor);
    }

    #[test]
    fn test_live_end_replaces_unread_fill() {
        let _ = env_logger::builder().is_test(true).try_init();

        let buffer = RingBuffer::new(2, BufferMode::LiveMedia, 1, || 0u32);
        let mut producer = buffer.producer_cursor().unwrap();
        let mut consumer = buffer.consumer_cursor().unwrap();

        fill(&buffer, &mut producer, 1);
        fill(&buffer, &mut producer, 2);
        // The cursor wrapped onto slot 0, which still holds the unread 1.
        signal_end(&buffer, &producer, false);

        assert!(buffer.is_ended());
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(buffer.consumer_lock(&consumer), Err(RingBufferError::EndOfStream));
        buffer.consumer_advance(&mut consumer);
        assert_eq!(buffer.consumer_lock(&consumer), Ok(()));
        assert_eq!(*buffer.consume(&consumer), 2);
    }

    #[test]
    fn test_on_demand_end_waits_for_unread_fill() {
        let buffer = std::sync::Arc::new(RingBuffer::new(1, BufferMode::OnDemand, 1, || 0u32));
        let mut producer = buffer.producer_cursor().unwrap();
        let mut consumer = buffer.consumer_cursor().unwrap();
        fill(&buffer, &mut producer, 7);

        let reader = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(50));
                buffer.consumer_lock(&consumer).unwrap();
                let value = *buffer.consume(&consumer);
                buffer.consumer_unlock(&consumer);
                buffer.consumer_advance(&mut consumer);
                (value, buffer.consumer_lock(&consumer))
            })
        };
        signal_end(&buffer, &producer, false);

        assert_eq!(reader.join().unwrap(), (7, Err(RingBufferError::EndOfStream)));
        assert_eq!(buffer.dropped(), 0);
    }

    #[test]
    fn test_join_order_follows_data_flow() {
        let mut kinds = vec![
            StageKind::Quit,
            StageKind::Manifest,
            StageKind::Encoder,
            StageKind::Decoder,
            StageKind::Retention,
            StageKind::Scaler,
        ];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                StageKind::Decoder,
                StageKind::Scaler,
                StageKind::Encoder,
                StageKind::Manifest,
                StageKind::Retention,
                StageKind::Quit,
            ]
        );
    }
}
