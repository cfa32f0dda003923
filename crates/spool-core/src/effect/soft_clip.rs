//! Final `tanh` saturation stage with a clip indicator

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::dsp::soft_clip;
use crate::types::StereoBuffer;

/// Input level above which the indicator is raised
const CLIP_THRESHOLD: f32 = 1.0;

/// Soft clipper for every signal leaving the engine
///
/// The audio thread raises the indicator when any input sample exceeds
/// full scale; the control side reads and clears it.
pub struct SoftClipper {
    clip_active: Arc<AtomicBool>,
}

impl SoftClipper {
    pub fn new() -> Self {
        Self::with_indicator(Arc::new(AtomicBool::new(false)))
    }

    /// Create a clipper reporting into an existing indicator
    pub fn with_indicator(clip_active: Arc<AtomicBool>) -> Self {
        Self { clip_active }
    }

    /// Get the clip indicator atomic (shared with the control side)
    pub fn clip_indicator(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.clip_active)
    }

    pub fn process(&mut self, buffer: &mut StereoBuffer) {
        let mut clipped = false;
        for sample in buffer.iter_mut() {
            clipped |= sample.peak() > CLIP_THRESHOLD;
            sample.left = soft_clip(sample.left);
            sample.right = soft_clip(sample.right);
        }
        if clipped {
            self.clip_active.store(true, Ordering::Relaxed);
        }
    }
}

impl Default for SoftClipper {
    fn default() -> Self {
        Self::new()
    }
}
