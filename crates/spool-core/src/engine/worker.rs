//! Background processing thread
//!
//! Renders fixed-size chunks into the [`MultiChannelRing`] whenever every
//! reader has room, then sleeps for a fraction of a chunk's duration. With
//! a fraction below 1.0 the thread stays ahead of the host taps draining
//! the ring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::ring::MultiChannelRing;
use crate::error::{EngineError, EngineResult};

/// Something that can render one chunk into the ring
pub trait ChunkSource: Send + Sync + 'static {
    /// Render `frames` frames and push them into `ring`
    ///
    /// Returns false when nothing was rendered (for example while the
    /// engine is being re-initialized); the worker then waits a cycle.
    fn render_chunk(&self, ring: &MultiChannelRing, frames: usize) -> bool;
}

/// Handle to the processing thread
///
/// Dropping the handle stops the thread and waits for it.
pub struct ProcessingThread {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProcessingThread {
    /// Spawn the worker
    ///
    /// - `chunk_frames`: frames rendered per iteration
    /// - `sleep`: pause after the ring is full (or rendering failed)
    pub fn spawn(
        source: Arc<dyn ChunkSource>,
        ring: Arc<MultiChannelRing>,
        chunk_frames: usize,
        sleep: Duration,
    ) -> EngineResult<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let chunk_frames = chunk_frames.max(1);

        let handle = thread::Builder::new()
            .name("spool-render".to_string())
            .spawn(move || {
                Self::run_loop(&*source, &ring, chunk_frames, sleep, &shutdown_clone);
            })
            .map_err(|e| EngineError::ThreadSpawn(e.to_string()))?;

        log::info!(
            "Processing thread started ({} frames per chunk, {:?} sleep)",
            chunk_frames,
            sleep
        );

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    fn run_loop(
        source: &dyn ChunkSource,
        ring: &MultiChannelRing,
        chunk_frames: usize,
        sleep: Duration,
        shutdown: &AtomicBool,
    ) {
        while !shutdown.load(Ordering::Relaxed) {
            while ring.can_write(chunk_frames) && !shutdown.load(Ordering::Relaxed) {
                if !source.render_chunk(ring, chunk_frames) {
                    break;
                }
            }
            thread::sleep(sleep);
        }
    }

    /// Whether the thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread to stop and wait for it
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Processing thread panicked");
            } else {
                log::info!("Processing thread stopped");
            }
        }
    }
}

impl Drop for ProcessingThread {
    fn drop(&mut self) {
        self.stop();
    }
}
