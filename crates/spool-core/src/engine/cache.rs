//! Cached render for host taps sharing one render
//!
//! Several host taps (per-channel outputs, the legacy bus) may ask for the
//! same `(sample_time, frames)` render. The first caller renders into the
//! cache while holding its flag; concurrent callers spin a bounded number
//! of times and then read the finished result instead of rendering again.

use crossbeam::utils::Backoff;

use super::spin::SpinLock;
use crate::types::NUM_OUTPUT_CHANNELS;

/// Attempts to acquire the cache before giving up with silence
pub const MAX_CACHE_ATTEMPTS: u32 = 256;

/// Largest request served through the cache
pub const MAX_CACHED_FRAMES: usize = 16384;

/// One cached render: 16 unmixed channels plus the master pair
pub struct CachedRender {
    key: Option<(u64, usize)>,
    /// Frames valid from the most recent render
    frames: usize,
    pub channels: [Vec<f32>; NUM_OUTPUT_CHANNELS],
    pub master: [Vec<f32>; 2],
}

impl CachedRender {
    fn new() -> Self {
        Self {
            key: None,
            frames: 0,
            channels: std::array::from_fn(|_| vec![0.0; MAX_CACHED_FRAMES]),
            master: std::array::from_fn(|_| vec![0.0; MAX_CACHED_FRAMES]),
        }
    }

    /// Whether the cache holds the render for this request
    pub fn matches(&self, sample_time: u64, frames: usize) -> bool {
        self.key == Some((sample_time, frames))
    }

    /// Whether anything was ever rendered
    pub fn is_valid(&self) -> bool {
        self.key.is_some()
    }

    /// Mark the buffers as holding `frames` frames rendered at `sample_time`
    pub fn store_key(&mut self, sample_time: u64, frames: usize) {
        self.key = Some((sample_time, frames));
        self.frames = frames.min(MAX_CACHED_FRAMES);
    }

    pub fn invalidate(&mut self) {
        self.key = None;
        self.frames = 0;
    }

    /// Copy cached channels into `outputs`, zero-filling past the valid frames
    pub fn copy_channels_to(&self, outputs: &mut [&mut [f32]], frames: usize) {
        for (out, cached) in outputs.iter_mut().zip(self.channels.iter()) {
            copy_prefix(out, cached, frames, self.frames);
        }
        for out in outputs.iter_mut().skip(NUM_OUTPUT_CHANNELS) {
            out.fill(0.0);
        }
    }

    /// Copy the cached master pair, zero-filling past the valid frames
    pub fn copy_master_to(&self, left: &mut [f32], right: &mut [f32], frames: usize) {
        copy_prefix(left, &self.master[0], frames, self.frames);
        copy_prefix(right, &self.master[1], frames, self.frames);
    }
}

fn copy_prefix(out: &mut [f32], cached: &[f32], frames: usize, valid: usize) {
    let len = out.len().min(frames);
    let valid = valid.min(len);
    out[..valid].copy_from_slice(&cached[..valid]);
    out[valid..].fill(0.0);
}

/// Cache guarded by a compare-and-swap "in progress" flag
pub struct RenderCache {
    data: SpinLock<CachedRender>,
}

impl RenderCache {
    pub fn new() -> Self {
        Self {
            data: SpinLock::new(CachedRender::new()),
        }
    }

    /// Run `f` with exclusive access to the cache
    ///
    /// Retries at most [`MAX_CACHE_ATTEMPTS`] times. Returns `None` if the
    /// cache stayed busy the whole time.
    pub fn with_cache<T>(&self, f: impl FnOnce(&mut CachedRender) -> T) -> Option<T> {
        let backoff = Backoff::new();
        for _ in 0..MAX_CACHE_ATTEMPTS {
            if let Some(mut cache) = self.data.try_lock() {
                return Some(f(&mut *cache));
            }
            backoff.snooze();
        }
        None
    }

    /// Drop the cached render (after re-initialization)
    pub fn invalidate(&self) {
        self.data.lock().invalidate();
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_hit_and_miss() {
        let cache = RenderCache::new();
        let hit = cache.with_cache(|c| c.matches(0, 64)).unwrap();
        assert!(!hit);

        cache.with_cache(|c| {
            c.channels[3][..64].fill(0.5);
            c.store_key(0, 64);
        });
        assert_eq!(cache.with_cache(|c| c.matches(0, 64)), Some(true));
        assert_eq!(cache.with_cache(|c| c.matches(64, 64)), Some(false));

        cache.invalidate();
        assert_eq!(cache.with_cache(|c| c.is_valid()), Some(false));
    }

    #[test]
    fn test_copy_zero_fills_past_valid_frames() {
        let cache = RenderCache::new();
        cache.with_cache(|c| {
            c.master[0][..4].fill(1.0);
            c.store_key(0, 4);
        });

        let mut left = [9.0f32; 8];
        let mut right = [9.0f32; 8];
        cache.with_cache(|c| c.copy_master_to(&mut left, &mut right, 8));
        assert_eq!(left, [1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(right, [0.0; 8]);
    }

    #[test]
    fn test_busy_cache_gives_up() {
        let cache = RenderCache::new();
        let _held = cache.data.lock();
        assert!(cache.with_cache(|_| ()).is_none());
    }

    #[test]
    fn test_concurrent_callers_render_once() {
        let cache = Arc::new(RenderCache::new());
        let renders = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let renders = Arc::clone(&renders);
                thread::spawn(move || loop {
                    let done = cache.with_cache(|c| {
                        if !c.matches(512, 128) {
                            renders.fetch_add(1, Ordering::Relaxed);
                            c.channels[0][..128].fill(0.25);
                            c.store_key(512, 128);
                        }
                        c.channels[0][0]
                    });
                    if let Some(value) = done {
                        break value;
                    }
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 0.25);
        }
        assert_eq!(renders.load(Ordering::Relaxed), 1);
    }
}
