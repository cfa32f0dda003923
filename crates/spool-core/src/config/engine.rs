//! Engine sizing configuration
//!
//! Every buffer the audio thread touches is sized from this struct at
//! `initialize()`. Nothing here can change while the engine is running.

use serde::{Deserialize, Serialize};

use crate::types::{DEFAULT_SAMPLE_RATE, MAX_BLOCK_SIZE};

/// Capacity of the scheduled note queue (power of two, fixed)
pub const EVENT_QUEUE_CAPACITY: usize = 4096;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate in Hz (overridden by `initialize(sample_rate, ..)`)
    pub sample_rate: u32,

    /// Host buffer size in frames (overridden by `initialize(.., buffer_size)`)
    pub buffer_size: u32,

    /// Capacity of the multi-channel ring buffer in frames (power of two)
    /// Default: 8192 (~170ms at 48kHz)
    pub ring_capacity_frames: usize,

    /// Frames rendered per iteration of the background processing thread
    pub worker_chunk_frames: usize,

    /// Worker sleep between iterations as a fraction of one chunk's duration.
    /// Below 1.0 the worker renders faster than playback drains.
    pub worker_sleep_fraction: f32,

    /// Number of reel buffers available to tracks and recording
    pub reel_count: usize,

    /// Capacity of each reel in seconds (also the live-loop pre-size length)
    pub max_loop_seconds: f32,

    /// Maximum per-channel micro-delay in samples
    pub max_micro_delay_samples: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: 512,
            ring_capacity_frames: 8192,
            worker_chunk_frames: 256,
            worker_sleep_fraction: 0.5,
            reel_count: 8,
            max_loop_seconds: 8.0,
            max_micro_delay_samples: 4800,
        }
    }
}

impl EngineConfig {
    /// Return a copy with every field clamped to a usable range
    ///
    /// Out-of-range values are logged and replaced rather than rejected.
    pub fn validated(&self) -> Self {
        let mut config = self.clone();

        if !(8000..=384_000).contains(&config.sample_rate) {
            log::warn!(
                "EngineConfig: sample rate {} out of range, using {}",
                config.sample_rate,
                DEFAULT_SAMPLE_RATE
            );
            config.sample_rate = DEFAULT_SAMPLE_RATE;
        }

        config.worker_chunk_frames = config.worker_chunk_frames.clamp(16, MAX_BLOCK_SIZE);

        let min_ring = (config.worker_chunk_frames * 2).next_power_of_two();
        if !config.ring_capacity_frames.is_power_of_two()
            || config.ring_capacity_frames < min_ring
            || config.ring_capacity_frames > 1 << 20
        {
            let fixed = config
                .ring_capacity_frames
                .clamp(min_ring, 1 << 20)
                .next_power_of_two()
                .min(1 << 20);
            log::warn!(
                "EngineConfig: ring capacity {} invalid, using {}",
                config.ring_capacity_frames,
                fixed
            );
            config.ring_capacity_frames = fixed;
        }

        if !config.worker_sleep_fraction.is_finite() {
            config.worker_sleep_fraction = 0.5;
        }
        config.worker_sleep_fraction = config.worker_sleep_fraction.clamp(0.05, 1.0);

        config.reel_count = config.reel_count.clamp(1, 64);

        if !config.max_loop_seconds.is_finite() {
            config.max_loop_seconds = 8.0;
        }
        config.max_loop_seconds = config.max_loop_seconds.clamp(0.5, 120.0);

        config.max_micro_delay_samples = config.max_micro_delay_samples.clamp(1, 48_000);

        config
    }

    /// Reel capacity in frames at the configured sample rate
    pub fn reel_capacity_frames(&self) -> usize {
        (self.max_loop_seconds * self.sample_rate as f32).round() as usize
    }
}
