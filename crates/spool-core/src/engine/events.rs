//! Sample-accurate scheduled note queue
//!
//! Control threads schedule note on/off events at absolute sample times;
//! the audio thread drains the ones due before the end of each block.
//!
//! # Design
//!
//! - Backed by an `rtrb` SPSC ring. Multiple producers are serialized by a
//!   test-and-set [`SpinLock`] on the producer side; the consumer only uses
//!   the ring's acquire/release atomics and never spins.
//! - The ring holds `capacity - 1` events. When it is full the newest event
//!   is dropped and counted; enqueue never blocks on the audio thread.
//! - Events that are not yet due stay in a pre-allocated pending list on the
//!   consumer side, so they survive untouched to later blocks.
//! - Every pushed event carries a sequence number. `clear()` records the
//!   current push count and the consumer discards anything older.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::spin::SpinLock;
use crate::types::TargetMask;

/// A note event scheduled at an absolute sample time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledNoteEvent {
    /// Absolute sample index at which the event fires
    pub sample_time: u64,
    pub note: u8,
    pub velocity: u8,
    pub is_note_on: bool,
    /// Engines the event is delivered to
    pub target_mask: TargetMask,
    /// Source identity used by voice allocation and track routing
    pub track_id: u8,
}

impl ScheduledNoteEvent {
    pub fn note_on(note: u8, velocity: u8, sample_time: u64, target_mask: TargetMask) -> Self {
        Self {
            sample_time,
            note,
            velocity,
            is_note_on: true,
            target_mask,
            track_id: 0,
        }
    }

    pub fn note_off(note: u8, velocity: u8, sample_time: u64, target_mask: TargetMask) -> Self {
        Self {
            is_note_on: false,
            ..Self::note_on(note, velocity, sample_time, target_mask)
        }
    }

    pub fn with_track(mut self, track_id: u8) -> Self {
        self.track_id = track_id;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct QueuedEvent {
    seq: u64,
    event: ScheduledNoteEvent,
}

impl QueuedEvent {
    /// Time first, note-off before note-on at the same time, then enqueue order
    #[inline]
    fn sort_key(&self) -> (u64, bool, u64) {
        (self.event.sample_time, self.event.is_note_on, self.seq)
    }
}

#[derive(Default)]
struct QueueCounters {
    /// Events successfully pushed (also the next sequence number)
    pushed: AtomicU64,
    /// Events with `seq` below this were cleared
    clear_mark: AtomicU64,
    /// Events rejected because the queue was full
    dropped: AtomicU64,
}

/// Create a queue holding up to `capacity - 1` events
pub fn event_queue(capacity: usize) -> (EventProducer, EventConsumer) {
    let slots = capacity.max(2) - 1;
    let (producer, consumer) = rtrb::RingBuffer::new(slots);
    let counters = Arc::new(QueueCounters::default());

    (
        EventProducer {
            ring: SpinLock::new(producer),
            counters: Arc::clone(&counters),
        },
        EventConsumer {
            ring: consumer,
            pending: Vec::with_capacity(slots),
            pending_limit: slots,
            scratch: Vec::with_capacity(slots * 2),
            due: Vec::with_capacity(slots * 2),
            counters,
        },
    )
}

/// Producer side, shareable between control threads
pub struct EventProducer {
    ring: SpinLock<rtrb::Producer<QueuedEvent>>,
    counters: Arc<QueueCounters>,
}

impl EventProducer {
    /// Enqueue an event; returns false (dropping it) if the queue is full
    pub fn enqueue(&self, event: ScheduledNoteEvent) -> bool {
        let mut ring = self.ring.lock();
        let seq = self.counters.pushed.load(Ordering::Relaxed);
        match ring.push(QueuedEvent { seq, event }) {
            Ok(()) => {
                self.counters.pushed.store(seq + 1, Ordering::Release);
                true
            }
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Discard every event enqueued so far
    ///
    /// Events enqueued after this call are unaffected.
    pub fn clear(&self) {
        let _ring = self.ring.lock();
        let pushed = self.counters.pushed.load(Ordering::Relaxed);
        self.counters.clear_mark.store(pushed, Ordering::Release);
    }

    /// Total events dropped because the queue was full
    pub fn dropped_count(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side, owned by the audio thread
pub struct EventConsumer {
    ring: rtrb::Consumer<QueuedEvent>,
    pending: Vec<QueuedEvent>,
    pending_limit: usize,
    scratch: Vec<QueuedEvent>,
    due: Vec<ScheduledNoteEvent>,
    counters: Arc<QueueCounters>,
}

impl EventConsumer {
    /// Pop every event due before `block_end`, ordered for dispatch
    ///
    /// Events earlier than `block_start` are clamped to it. Events at or
    /// after `block_end` are kept for later blocks. Never allocates.
    pub fn drain_due_before(&mut self, block_start: u64, block_end: u64) -> &[ScheduledNoteEvent] {
        let mark = self.counters.clear_mark.load(Ordering::Acquire);
        self.scratch.clear();
        self.due.clear();

        self.pending.retain(|queued| queued.seq >= mark);
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].event.sample_time < block_end {
                let queued = self.pending.swap_remove(i);
                self.scratch.push(queued);
            } else {
                i += 1;
            }
        }

        // Bounded by what is in the ring right now
        let available = self.ring.slots();
        for _ in 0..available {
            let Ok(next) = self.ring.peek().copied() else {
                break;
            };
            let is_due = next.event.sample_time < block_end;
            if !is_due && next.seq >= mark && self.pending.len() >= self.pending_limit {
                // No room to hold it back; leave it in the ring
                break;
            }
            if self.ring.pop().is_err() {
                break;
            }
            if next.seq < mark {
                continue;
            }
            if is_due {
                self.scratch.push(next);
            } else {
                self.pending.push(next);
            }
        }

        for queued in self.scratch.iter_mut() {
            if queued.event.sample_time < block_start {
                queued.event.sample_time = block_start;
            }
        }
        // Keys are unique (sequence numbers), so an unstable sort is deterministic
        self.scratch.sort_unstable_by_key(QueuedEvent::sort_key);
        self.due.extend(self.scratch.iter().map(|queued| queued.event));

        &self.due
    }

    /// Number of future events held back from earlier blocks
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Discard everything queued or held back
    pub fn reset(&mut self) {
        while self.ring.pop().is_ok() {}
        self.pending.clear();
        self.scratch.clear();
        self.due.clear();
    }
}
