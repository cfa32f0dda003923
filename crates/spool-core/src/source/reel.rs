//! Reel buffers - indexed sample storage for tracks and recording
//!
//! A reel owns its samples, a logical length within a fixed capacity and a
//! default splice (the region track voices play). Capacity is allocated
//! up front so recording never allocates on the audio thread.

use basedrop::Owned;

use crate::engine::gc::gc_handle;
use crate::types::StereoSample;

/// Playback region of a reel, `[start, end)` in frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Splice {
    pub start: usize,
    pub end: usize,
}

impl Splice {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Sample storage addressed by reel index
pub trait Reel: Send {
    /// Allocated size in frames
    fn capacity(&self) -> usize;

    /// Logical length in frames
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the logical length (clamped to capacity)
    fn set_len(&mut self, frames: usize);

    /// Read one frame (silence outside the logical length)
    fn read(&self, pos: usize) -> StereoSample;

    /// Linearly interpolated read at a fractional position
    fn read_interpolated(&self, pos: f64) -> StereoSample {
        let index = pos.floor();
        let frac = (pos - index) as f32;
        let a = self.read(index as usize);
        let b = self.read(index as usize + 1);
        a * (1.0 - frac) + b * frac
    }

    /// Write `existing * feedback + input` at `pos`, growing the logical
    /// length if `pos` lies past it. Writes beyond capacity are ignored.
    fn record_sample_with_feedback(&mut self, pos: usize, input: StereoSample, feedback: f32);

    /// Default playback region
    fn splice(&self) -> Splice;

    fn set_splice(&mut self, splice: Splice);

    /// Erase all content
    fn clear(&mut self);
}

/// In-memory reel with a fixed capacity
///
/// Frames at or beyond the logical length are always silent, so growing
/// the length never needs to touch the data.
pub struct LoopReel {
    data: Vec<StereoSample>,
    len: usize,
    splice: Splice,
}

impl LoopReel {
    /// Create an empty reel able to hold `frames` frames
    pub fn with_capacity(frames: usize) -> Self {
        Self {
            data: vec![StereoSample::silence(); frames],
            len: 0,
            splice: Splice::default(),
        }
    }

    /// Create a reel holding `samples`, spliced to its full length
    pub fn from_samples(samples: Vec<StereoSample>) -> Self {
        let len = samples.len();
        Self {
            data: samples,
            len,
            splice: Splice::new(0, len),
        }
    }

    /// Create a reel holding `samples` inside a larger capacity
    pub fn from_samples_with_capacity(samples: &[StereoSample], capacity: usize) -> Self {
        let mut reel = Self::with_capacity(capacity.max(samples.len()));
        reel.data[..samples.len()].copy_from_slice(samples);
        reel.len = samples.len();
        reel.splice = Splice::new(0, samples.len());
        reel
    }
}

impl Reel for LoopReel {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn set_len(&mut self, frames: usize) {
        let frames = frames.min(self.data.len());
        if frames < self.len {
            self.data[frames..self.len].fill(StereoSample::silence());
        }
        self.len = frames;
        self.splice = Splice::new(self.splice.start.min(frames), self.splice.end.min(frames));
    }

    #[inline]
    fn read(&self, pos: usize) -> StereoSample {
        if pos < self.len {
            self.data[pos]
        } else {
            StereoSample::silence()
        }
    }

    #[inline]
    fn record_sample_with_feedback(&mut self, pos: usize, input: StereoSample, feedback: f32) {
        let Some(slot) = self.data.get_mut(pos) else {
            return;
        };
        *slot = *slot * feedback + input;
        if pos >= self.len {
            self.len = pos + 1;
        }
    }

    fn splice(&self) -> Splice {
        self.splice
    }

    fn set_splice(&mut self, splice: Splice) {
        self.splice = Splice::new(splice.start.min(self.len), splice.end.min(self.len));
    }

    fn clear(&mut self) {
        self.data[..self.len].fill(StereoSample::silence());
        self.len = 0;
        self.splice = Splice::default();
    }
}

/// Fixed set of reels owned by the render core
///
/// Replaced reels are dropped through the deferred collector, never on the
/// audio thread.
pub struct ReelBank {
    reels: Vec<Owned<Box<dyn Reel>>>,
}

impl ReelBank {
    /// A bank with no reels
    pub fn empty() -> Self {
        Self { reels: Vec::new() }
    }

    /// Allocate `count` empty reels of `frames` capacity each
    pub fn with_capacity(count: usize, frames: usize) -> Self {
        let handle = gc_handle();
        let reels = (0..count)
            .map(|_| Owned::new(&handle, Box::new(LoopReel::with_capacity(frames)) as Box<dyn Reel>))
            .collect();
        Self { reels }
    }

    pub fn len(&self) -> usize {
        self.reels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&dyn Reel> {
        self.reels.get(index).map(|reel| &***reel)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut dyn Reel> {
        self.reels.get_mut(index).map(|reel| -> &mut dyn Reel { &mut ***reel })
    }

    /// Swap in a new reel, returning the old one
    ///
    /// Returns the argument back if `index` is out of range.
    pub fn replace(
        &mut self,
        index: usize,
        reel: Owned<Box<dyn Reel>>,
    ) -> Owned<Box<dyn Reel>> {
        match self.reels.get_mut(index) {
            Some(slot) => std::mem::replace(slot, reel),
            None => reel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_grows_length() {
        let mut reel = LoopReel::with_capacity(16);
        assert!(reel.is_empty());

        reel.record_sample_with_feedback(0, StereoSample::mono(1.0), 0.0);
        reel.record_sample_with_feedback(1, StereoSample::mono(0.5), 0.0);
        assert_eq!(reel.len(), 2);
        assert_eq!(reel.read(1), StereoSample::mono(0.5));
        assert_eq!(reel.read(2), StereoSample::silence());
    }

    #[test]
    fn test_record_with_feedback_overdubs() {
        let mut reel = LoopReel::from_samples(vec![StereoSample::mono(1.0); 4]);
        reel.record_sample_with_feedback(2, StereoSample::mono(0.25), 0.5);
        assert_eq!(reel.read(2), StereoSample::mono(0.75));
    }

    #[test]
    fn test_write_past_capacity_is_ignored() {
        let mut reel = LoopReel::with_capacity(4);
        reel.record_sample_with_feedback(4, StereoSample::mono(1.0), 0.0);
        assert_eq!(reel.len(), 0);
    }

    #[test]
    fn test_shrink_silences_tail() {
        let mut reel = LoopReel::from_samples(vec![StereoSample::mono(1.0); 8]);
        reel.set_len(4);
        reel.set_len(8);
        assert_eq!(reel.read(3), StereoSample::mono(1.0));
        assert_eq!(reel.read(5), StereoSample::silence());
        assert_eq!(reel.splice(), Splice::new(0, 4));
    }

    #[test]
    fn test_interpolated_read() {
        let reel = LoopReel::from_samples(vec![StereoSample::mono(0.0), StereoSample::mono(1.0)]);
        let s = reel.read_interpolated(0.25);
        assert!((s.left - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_bank_replace() {
        let mut bank = ReelBank::with_capacity(2, 8);
        assert_eq!(bank.len(), 2);
        assert_eq!(bank.get(0).map(|r| r.capacity()), Some(8));

        let replacement = Owned::new(
            &gc_handle(),
            Box::new(LoopReel::from_samples(vec![StereoSample::mono(1.0); 3])) as Box<dyn Reel>,
        );
        let old = bank.replace(1, replacement);
        assert_eq!(old.capacity(), 8);
        assert_eq!(bank.get(1).map(|r| r.len()), Some(3));
        assert!(bank.get(2).is_none());
    }
}
