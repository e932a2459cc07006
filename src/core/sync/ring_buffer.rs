// src/core/sync/ring_buffer.rs - Slotted ring buffer connecting pipeline stages
//
// One producer fills slots in order, `max_consumers` consumer roles each read
// every slot once. Each slot carries its own mutex and a pair of condition
// variables, so a stage only ever contends on the slot it is touching.
//
// Features:
// - Live modes never block the producer: an occupied slot yields `WouldBlock`
//   and the unit is dropped
// - On-demand mode blocks the producer until every consumer released the slot
// - Sticky end-of-stream marker that cascades to every waiting consumer
// - Consumer roles can detach so a failed stage never stalls its producer

use crate::error::RingBufferError;
use crossbeam::utils::CachePadded;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{
    Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

/// Upper bound on consumer roles per buffer (one bit per role).
pub const MAX_CONSUMERS: usize = 64;

/// Locking policy applied by [`RingBuffer::producer_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// Capture device; dropping frames is preferred over stalling capture.
    LiveCamera,
    /// File input paced at its native rate, same dropping policy as a camera.
    LiveMedia,
    /// Every unit must be delivered; the producer waits for slow consumers.
    OnDemand,
}

impl BufferMode {
    pub fn is_live(self) -> bool {
        !matches!(self, BufferMode::OnDemand)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotStatus {
    Empty,
    Valid,
    Terminal,
}

#[derive(Debug)]
struct SlotState {
    producer_count: u32,
    consumer_count: u32,
    consumers_waiting: u32,
    consumer_access_count: u32,
    // Roles that already read the current fill.
    served: u64,
    status: SlotStatus,
}

impl SlotState {
    fn new() -> Self {
        Self {
            producer_count: 0,
            consumer_count: 0,
            consumers_waiting: 0,
            consumer_access_count: 0,
            served: 0,
            status: SlotStatus::Empty,
        }
    }

    fn occupied(&self) -> bool {
        self.consumer_count > 0 || self.status != SlotStatus::Empty
    }

    fn reset(&mut self) {
        self.status = SlotStatus::Empty;
        self.served = 0;
        self.consumer_access_count = 0;
    }
}

struct Slot<T> {
    state: Mutex<SlotState>,
    producer_cond: Condvar,
    consumer_cond: Condvar,
    payload: RwLock<T>,
}

impl<T> Slot<T> {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct Counters {
    produced: AtomicU64,
    dropped: AtomicU64,
    consumed: AtomicU64,
}

/// Index of a role into the ring. Wraps modulo the ring length.
#[derive(Debug, Clone)]
struct Position {
    index: usize,
    len: usize,
    advanced: bool,
}

impl Position {
    fn new(len: usize) -> Self {
        Self {
            index: 0,
            len,
            advanced: false,
        }
    }

    fn advance(&mut self) {
        self.index = (self.index + 1) % self.len;
        self.advanced = true;
    }

    fn previous(&self) -> Result<usize, RingBufferError> {
        if !self.advanced {
            return Err(RingBufferError::NoPreviousSlot);
        }
        Ok((self.index + self.len - 1) % self.len)
    }
}

/// Cursor owned by the single producer of a buffer.
#[derive(Debug)]
pub struct ProducerCursor {
    pos: Position,
}

impl ProducerCursor {
    pub fn index(&self) -> usize {
        self.pos.index
    }
}

/// Cursor owned by one consumer role of a buffer.
#[derive(Debug)]
pub struct ConsumerCursor {
    pos: Position,
    role: usize,
}

impl ConsumerCursor {
    pub fn index(&self) -> usize {
        self.pos.index
    }

    pub fn role(&self) -> usize {
        self.role
    }

    fn role_bit(&self) -> u64 {
        1u64 << self.role
    }
}

pub struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    mode: BufferMode,
    max_consumers: usize,
    // Roles still counted toward slot completion.
    active_roles: AtomicU64,
    registered: AtomicUsize,
    producer_taken: AtomicBool,
    ended: AtomicBool,
    counters: CachePadded<Counters>,
}

impl<T> RingBuffer<T> {
    /// Creates a buffer of `len` slots, each payload built by `init`.
    ///
    /// `len` is raised to 1 and `max_consumers` clamped to `1..=MAX_CONSUMERS`.
    pub fn new(len: usize, mode: BufferMode, max_consumers: usize, mut init: impl FnMut() -> T) -> Self {
        let len = len.max(1);
        let clamped = max_consumers.clamp(1, MAX_CONSUMERS);
        if clamped != max_consumers {
            warn!("Ring buffer consumer count {max_consumers} clamped to {clamped}");
        }

        let slots = (0..len)
            .map(|_| Slot {
                state: Mutex::new(SlotState::new()),
                producer_cond: Condvar::new(),
                consumer_cond: Condvar::new(),
                payload: RwLock::new(init()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            mode,
            max_consumers: clamped,
            active_roles: AtomicU64::new(u64::MAX >> (MAX_CONSUMERS - clamped)),
            registered: AtomicUsize::new(0),
            producer_taken: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            counters: CachePadded::new(Counters::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    pub fn max_consumers(&self) -> usize {
        self.max_consumers
    }

    /// Hands out the single producer cursor.
    pub fn producer_cursor(&self) -> Result<ProducerCursor, RingBufferError> {
        if self.producer_taken.swap(true, Ordering::AcqRel) {
            return Err(RingBufferError::ProducerTaken);
        }
        Ok(ProducerCursor {
            pos: Position::new(self.slots.len()),
        })
    }

    /// Registers the next consumer role.
    pub fn consumer_cursor(&self) -> Result<ConsumerCursor, RingBufferError> {
        let role = self.registered.fetch_add(1, Ordering::AcqRel);
        if role >= self.max_consumers {
            self.registered.fetch_sub(1, Ordering::AcqRel);
            return Err(RingBufferError::TooManyConsumers(self.max_consumers));
        }
        Ok(ConsumerCursor {
            pos: Position::new(self.slots.len()),
            role,
        })
    }

    /// Reserves the slot under the cursor for writing.
    ///
    /// Live modes fail with `WouldBlock` when the slot is still held or unread;
    /// on-demand mode waits for it. A Terminal slot yields `EndOfStream`.
    pub fn producer_lock(&self, cursor: &ProducerCursor) -> Result<(), RingBufferError> {
        let slot = &self.slots[cursor.pos.index];
        let mut state = slot.lock();

        if state.status == SlotStatus::Terminal || self.ended.load(Ordering::Acquire) {
            return Err(RingBufferError::EndOfStream);
        }

        if self.mode.is_live() {
            if state.occupied() {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(RingBufferError::WouldBlock);
            }
        } else {
            state = slot
                .producer_cond
                .wait_while(state, |s| {
                    s.status != SlotStatus::Terminal
                        && !self.ended.load(Ordering::Acquire)
                        && s.occupied()
                })
                .unwrap_or_else(PoisonError::into_inner);
            if state.status == SlotStatus::Terminal || self.ended.load(Ordering::Acquire) {
                return Err(RingBufferError::EndOfStream);
            }
        }

        state.producer_count = 1;
        state.status = SlotStatus::Valid;
        state.served = 0;
        state.consumer_access_count = 0;
        Ok(())
    }

    /// Write access to the payload of the reserved slot.
    pub fn produce(&self, cursor: &ProducerCursor) -> RwLockWriteGuard<'_, T> {
        self.slots[cursor.pos.index]
            .payload
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes the slot under the cursor to the consumers.
    pub fn producer_unlock(&self, cursor: &ProducerCursor) {
        self.release_producer(cursor.pos.index);
    }

    /// Publishes the slot before the cursor.
    pub fn producer_unlock_previous(&self, cursor: &ProducerCursor) -> Result<(), RingBufferError> {
        self.release_producer(cursor.pos.previous()?);
        Ok(())
    }

    pub fn producer_advance(&self, cursor: &mut ProducerCursor) {
        cursor.pos.advance();
    }

    /// Marks the slot under the cursor Terminal and wakes every waiter.
    pub fn end_signal(&self, cursor: &ProducerCursor) {
        self.mark_terminal(cursor.pos.index);
    }

    pub fn end_signal_previous(&self, cursor: &ProducerCursor) -> Result<(), RingBufferError> {
        self.mark_terminal(cursor.pos.previous()?);
        Ok(())
    }

    /// Waits until the slot under the cursor holds a fill this role has not read.
    pub fn consumer_lock(&self, cursor: &ConsumerCursor) -> Result<(), RingBufferError> {
        let slot = &self.slots[cursor.pos.index];
        let bit = cursor.role_bit();
        let mut state = slot.lock();

        state.consumers_waiting += 1;
        let result = loop {
            if state.status == SlotStatus::Terminal {
                break Err(RingBufferError::EndOfStream);
            }
            let already_read = state.served & bit != 0;
            if state.producer_count == 0 && state.status == SlotStatus::Valid && !already_read {
                break Ok(());
            }
            // Nothing will be produced any more, this slot stays empty or stale.
            if self.ended.load(Ordering::Acquire)
                && state.producer_count == 0
                && (state.status == SlotStatus::Empty || already_read)
            {
                break Err(RingBufferError::EndOfStream);
            }
            state = slot
                .consumer_cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        };
        state.consumers_waiting -= 1;

        if result.is_ok() {
            state.consumer_count += 1;
        }
        result
    }

    /// Read access to the payload of the locked slot.
    pub fn consume(&self, cursor: &ConsumerCursor) -> RwLockReadGuard<'_, T> {
        self.slots[cursor.pos.index]
            .payload
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Releases the slot under the cursor. Returns `true` if this call was the
    /// last outstanding read and the slot became free for the producer.
    pub fn consumer_unlock(&self, cursor: &ConsumerCursor) -> bool {
        self.release_consumer(cursor.pos.index, cursor.role_bit())
    }

    pub fn consumer_unlock_previous(&self, cursor: &ConsumerCursor) -> Result<bool, RingBufferError> {
        Ok(self.release_consumer(cursor.pos.previous()?, cursor.role_bit()))
    }

    pub fn consumer_advance(&self, cursor: &mut ConsumerCursor) {
        cursor.pos.advance();
    }

    /// Withdraws a consumer role from slot completion.
    ///
    /// Must not be called while the role holds a slot lock. Slots that were only
    /// waiting on this role are released and blocked producers woken.
    pub fn consumer_detach(&self, cursor: ConsumerCursor) {
        let bit = cursor.role_bit();
        let previous = self.active_roles.fetch_and(!bit, Ordering::AcqRel);
        if previous & bit == 0 {
            return;
        }
        debug!("Consumer role {} detached from ring buffer", cursor.role);

        for slot in self.slots.iter() {
            let mut state = slot.lock();
            if state.status == SlotStatus::Valid
                && state.producer_count == 0
                && state.consumer_count == 0
                && self.fill_complete(&state)
            {
                state.reset();
            }
            slot.producer_cond.notify_all();
        }
    }

    /// Ends the stream without a producer cursor, waking every waiter.
    ///
    /// Consumers still drain fills they have not read; no new fill is accepted.
    pub fn abort(&self) {
        self.ended.store(true, Ordering::Release);
        for slot in self.slots.iter() {
            let _state = slot.lock();
            slot.consumer_cond.notify_all();
            slot.producer_cond.notify_all();
        }
    }

    /// Whether a producer signalled end of stream on any slot.
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    pub fn produced(&self) -> u64 {
        self.counters.produced.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn consumed(&self) -> u64 {
        self.counters.consumed.load(Ordering::Relaxed)
    }

    fn fill_complete(&self, state: &SlotState) -> bool {
        let active = self.active_roles.load(Ordering::Acquire);
        state.served & active == active
    }

    fn release_producer(&self, index: usize) {
        let slot = &self.slots[index];
        let mut state = slot.lock();
        if state.producer_count == 0 {
            warn!("Producer unlock on slot {index} that was not reserved");
            return;
        }
        state.producer_count = 0;

        if state.status == SlotStatus::Valid {
            self.counters.produced.fetch_add(1, Ordering::Relaxed);
            // Every consumer role is gone, nobody will ever read this fill.
            if self.fill_complete(&state) {
                state.reset();
                slot.producer_cond.notify_all();
                return;
            }
        }

        if state.consumers_waiting > 0 {
            slot.consumer_cond.notify_all();
        }
    }

    fn release_consumer(&self, index: usize, bit: u64) -> bool {
        let slot = &self.slots[index];
        let mut state = slot.lock();
        if state.consumer_count == 0 {
            warn!("Consumer unlock on slot {index} that was not locked");
            return false;
        }
        state.consumer_count -= 1;
        state.consumer_access_count += 1;
        state.served |= bit;
        self.counters.consumed.fetch_add(1, Ordering::Relaxed);

        if state.status == SlotStatus::Valid && state.consumer_count == 0 && self.fill_complete(&state) {
            state.reset();
            slot.producer_cond.notify_all();
            return true;
        }
        false
    }

    fn mark_terminal(&self, index: usize) {
        self.ended.store(true, Ordering::Release);
        {
            let mut state = self.slots[index].lock();
            state.status = SlotStatus::Terminal;
            state.producer_count = 0;
        }
        debug!("End of stream signalled on slot {index}");

        // Wake waiters on every slot: some may be parked on a slot that will
        // never be filled again.
        for slot in self.slots.iter() {
            let _state = slot.lock();
            slot.consumer_cond.notify_all();
            slot.producer_cond.notify_all();
        }
    }
}
