//! Multi-channel ring buffer between the processing thread and host taps
//!
//! One writer pushes the unmixed per-channel output (8 stereo pairs = 16
//! mono channels); every mono channel has its own read cursor so host taps
//! can consume at their own pace. The writer only advances when every
//! reader has room, so unread data is never overwritten.
//!
//! Samples are stored as `f32` bits in `AtomicU32` cells. Cursors are
//! monotonic frame counters; positions wrap with a power-of-two mask.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::types::{StereoBuffer, NUM_CHANNELS, NUM_OUTPUT_CHANNELS};

/// Lock-free single-writer, per-channel-reader ring
pub struct MultiChannelRing {
    /// Channel-major storage: `channel * capacity + frame`
    samples: Box<[AtomicU32]>,
    capacity: usize,
    mask: usize,
    write: AtomicU64,
    read: [AtomicU64; NUM_OUTPUT_CHANNELS],
}

impl MultiChannelRing {
    /// Create a ring of `capacity` frames (rounded up to a power of two)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            samples: (0..capacity * NUM_OUTPUT_CHANNELS)
                .map(|_| AtomicU32::new(0))
                .collect(),
            capacity,
            mask: capacity - 1,
            write: AtomicU64::new(0),
            read: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames written but not yet read on `channel` (0 for a bad index)
    pub fn readable(&self, channel: usize) -> usize {
        let Some(read) = self.read.get(channel) else {
            return 0;
        };
        let write = self.write.load(Ordering::Acquire);
        write.saturating_sub(read.load(Ordering::Acquire)) as usize
    }

    /// Whether `frames` more frames fit without overtaking any reader
    pub fn can_write(&self, frames: usize) -> bool {
        let write = self.write.load(Ordering::Relaxed);
        let limit = (self.capacity - 1) as u64;
        self.read.iter().all(|read| {
            let used = write.saturating_sub(read.load(Ordering::Acquire));
            used + frames as u64 <= limit
        })
    }

    /// Push one chunk of stereo pairs (pair `i` → channels `2i`, `2i + 1`)
    ///
    /// All pairs must have the same length. Returns false, writing nothing,
    /// if the chunk does not fit. Must only be called from one thread.
    pub fn push_stereo_pairs(&self, pairs: &[StereoBuffer]) -> bool {
        let frames = pairs.first().map(|p| p.len()).unwrap_or(0);
        if frames == 0 || pairs.len() > NUM_CHANNELS || !self.can_write(frames) {
            return false;
        }

        let write = self.write.load(Ordering::Relaxed);
        for (pair_index, pair) in pairs.iter().enumerate() {
            let left = &self.samples[(pair_index * 2) * self.capacity..][..self.capacity];
            let right = &self.samples[(pair_index * 2 + 1) * self.capacity..][..self.capacity];
            for (i, sample) in pair.iter().take(frames).enumerate() {
                let pos = (write as usize + i) & self.mask;
                left[pos].store(sample.left.to_bits(), Ordering::Relaxed);
                right[pos].store(sample.right.to_bits(), Ordering::Relaxed);
            }
        }
        // Channels not covered by `pairs` receive silence
        for channel in pairs.len() * 2..NUM_OUTPUT_CHANNELS {
            let cells = &self.samples[channel * self.capacity..][..self.capacity];
            for i in 0..frames {
                cells[(write as usize + i) & self.mask].store(0, Ordering::Relaxed);
            }
        }

        self.write.store(write + frames as u64, Ordering::Release);
        true
    }

    /// Read up to `out.len()` frames of `channel`
    ///
    /// Frames beyond what is available are zero-filled. Only this channel's
    /// cursor advances. Returns the number of frames actually read.
    pub fn read_channel(&self, channel: usize, out: &mut [f32]) -> usize {
        let Some(cursor) = self.read.get(channel) else {
            out.fill(0.0);
            return 0;
        };

        let read = cursor.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);
        let available = write.saturating_sub(read) as usize;
        let count = available.min(out.len());

        let cells = &self.samples[channel * self.capacity..][..self.capacity];
        for (i, sample) in out[..count].iter_mut().enumerate() {
            let pos = (read as usize + i) & self.mask;
            *sample = f32::from_bits(cells[pos].load(Ordering::Relaxed));
        }
        out[count..].fill(0.0);

        cursor.store(read + count as u64, Ordering::Release);
        count
    }

    /// Rewind every cursor (only while nothing writes or reads)
    pub fn reset(&self) {
        self.write.store(0, Ordering::Release);
        for read in &self.read {
            read.store(0, Ordering::Release);
        }
    }
}
