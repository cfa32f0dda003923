//! Common types for Spool
//!
//! Fundamental audio types used throughout the engine: stereo sample and
//! buffer handling, the fixed mixer channel layout and note target masks.

use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicU32, Ordering};

/// Default sample rate (48kHz). The real rate is passed to `initialize()`.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Number of fixed mixer channels
pub const NUM_CHANNELS: usize = 8;

/// Number of polyphonic synthesis voices on the poly-synth channel
pub const NUM_POLY_VOICES: usize = 8;

/// Number of granular/looper track voices
pub const NUM_TRACKS: usize = 4;

/// Number of clock / LFO outputs
pub const NUM_CLOCK_OUTPUTS: usize = 8;

/// Number of independent recording sessions
pub const NUM_RECORDING_SESSIONS: usize = 4;

/// Largest block the render pipeline processes in one pass.
/// Bigger host requests are chunked into repeated passes.
pub const MAX_BLOCK_SIZE: usize = 4096;

/// Unmixed multi-channel output width: one stereo pair per mixer channel
pub const NUM_OUTPUT_CHANNELS: usize = NUM_CHANNELS * 2;

/// Audio sample type
pub type Sample = f32;

/// Mixer channel identifiers
///
/// The order is the channel index used by the normalized parameter
/// interface and the multi-channel outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Channel {
    PolySynth = 0,
    Resonator = 1,
    Track1 = 2,
    Track2 = 3,
    Track3 = 4,
    Track4 = 5,
    DrumBank = 6,
    Sampler = 7,
}

impl Channel {
    /// All channels in index order
    pub const ALL: [Channel; NUM_CHANNELS] = [
        Channel::PolySynth,
        Channel::Resonator,
        Channel::Track1,
        Channel::Track2,
        Channel::Track3,
        Channel::Track4,
        Channel::DrumBank,
        Channel::Sampler,
    ];

    /// Convert from index (0-7) to Channel
    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    /// Channel carrying track voice `track` (0-3)
    pub fn track(track: usize) -> Option<Self> {
        if track < NUM_TRACKS {
            Self::from_index(Channel::Track1 as usize + track)
        } else {
            None
        }
    }

    /// Index of this channel
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Get the name of this channel
    pub fn name(&self) -> &'static str {
        match self {
            Channel::PolySynth => "Poly Synth",
            Channel::Resonator => "Resonator",
            Channel::Track1 => "Track 1",
            Channel::Track2 => "Track 2",
            Channel::Track3 => "Track 3",
            Channel::Track4 => "Track 4",
            Channel::DrumBank => "Drum Bank",
            Channel::Sampler => "Sampler",
        }
    }
}

/// Bit-set of synthesis engines a scheduled note is delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TargetMask(pub u8);

impl TargetMask {
    pub const NONE: TargetMask = TargetMask(0);
    pub const POLY_SYNTH: TargetMask = TargetMask(1 << 0);
    pub const RESONATOR: TargetMask = TargetMask(1 << 1);
    pub const DRUM: TargetMask = TargetMask(1 << 2);
    pub const SAMPLER: TargetMask = TargetMask(1 << 3);
    /// Routes to track voice `trackId % NUM_TRACKS`
    pub const TRACK: TargetMask = TargetMask(1 << 4);

    #[inline]
    pub fn contains(self, other: TargetMask) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for TargetMask {
    type Output = Self;

    #[inline]
    fn bitor(self, other: Self) -> Self {
        TargetMask(self.0 | other.0)
    }
}

/// A single stereo sample (left and right channels)
///
/// Uses `#[repr(C)]` to ensure predictable memory layout: [left, right].
/// This enables zero-copy conversion between `&[StereoSample]` and `&[f32]`
/// (interleaved format) using bytemuck.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    /// Create a new stereo sample
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    /// Create a silent stereo sample
    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Create a mono sample (same value in both channels)
    #[inline]
    pub fn mono(value: Sample) -> Self {
        Self { left: value, right: value }
    }

    /// Get the peak amplitude (max of abs(left), abs(right))
    #[inline]
    pub fn peak(&self) -> Sample {
        self.left.abs().max(self.right.abs())
    }
}

impl std::ops::Add for StereoSample {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            left: self.left + other.left,
            right: self.right + other.right,
        }
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

impl std::ops::Mul<Sample> for StereoSample {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Sample) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }
}

impl std::ops::MulAssign<Sample> for StereoSample {
    #[inline]
    fn mul_assign(&mut self, factor: Sample) {
        self.left *= factor;
        self.right *= factor;
    }
}

/// A buffer of stereo samples
///
/// Render buffers are allocated once with `MAX_BLOCK_SIZE` capacity and
/// only ever resized within that capacity on the audio thread.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    samples: Vec<StereoSample>,
}

impl StereoBuffer {
    /// Create an empty buffer with the specified capacity (in stereo samples)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Create a buffer filled with silence
    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![StereoSample::silence(); len],
        }
    }

    /// Create a buffer from separate left and right channel slices
    pub fn from_channels(left: &[Sample], right: &[Sample]) -> Self {
        assert_eq!(left.len(), right.len(), "Channel lengths must match");
        let samples = left
            .iter()
            .zip(right.iter())
            .map(|(&l, &r)| StereoSample::new(l, r))
            .collect();
        Self { samples }
    }

    /// Get the number of stereo samples in the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Allocated capacity in stereo samples
    #[inline]
    pub fn capacity(&self) -> usize {
        self.samples.capacity()
    }

    /// Set the working length of a pre-allocated buffer (real-time safe)
    ///
    /// Fills any newly exposed elements with silence. Never allocates as
    /// long as `new_len <= capacity()`.
    #[inline]
    pub fn set_len_from_capacity(&mut self, new_len: usize) {
        let current_len = self.samples.len();
        if new_len > current_len {
            debug_assert!(
                new_len <= self.samples.capacity(),
                "set_len_from_capacity called with len > capacity"
            );
            self.samples.resize(new_len, StereoSample::silence());
        } else {
            self.samples.truncate(new_len);
        }
    }

    /// Fill the buffer with silence
    pub fn fill_silence(&mut self) {
        self.samples.fill(StereoSample::silence());
    }

    /// Get a slice of the samples
    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        &self.samples
    }

    /// Get a mutable slice of the samples
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StereoSample] {
        &mut self.samples
    }

    /// Get a zero-copy view of samples as interleaved f32 [L, R, L, R, ...]
    #[inline]
    pub fn as_interleaved(&self) -> &[Sample] {
        bytemuck::cast_slice(&self.samples)
    }

    /// Write samples to separate left and right channel buffers
    ///
    /// Copies as many frames as fit in the shorter destination.
    pub fn to_channels(&self, left: &mut [Sample], right: &mut [Sample]) {
        for ((sample, l), r) in self.samples.iter().zip(left.iter_mut()).zip(right.iter_mut()) {
            *l = sample.left;
            *r = sample.right;
        }
    }

    /// Scale all samples by a factor
    pub fn scale(&mut self, factor: Sample) {
        for sample in &mut self.samples {
            *sample *= factor;
        }
    }

    /// Get an iterator over the samples
    pub fn iter(&self) -> impl Iterator<Item = &StereoSample> {
        self.samples.iter()
    }

    /// Get a mutable iterator over the samples
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StereoSample> {
        self.samples.iter_mut()
    }

    /// Get the peak amplitude in the buffer
    pub fn peak(&self) -> Sample {
        self.samples.iter().map(|s| s.peak()).fold(0.0, Sample::max)
    }
}

impl Index<usize> for StereoBuffer {
    type Output = StereoSample;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.samples[index]
    }
}

impl IndexMut<usize> for StereoBuffer {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.samples[index]
    }
}

/// An `f32` stored as its bit pattern in an `AtomicU32`
///
/// Used for every float shared between control threads and the audio
/// thread (parameters, meters, clock outputs).
#[derive(Debug, Default)]
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.bits.load(order))
    }

    #[inline]
    pub fn store(&self, value: f32, order: Ordering) {
        self.bits.store(value.to_bits(), order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stereo_sample_operations() {
        let a = StereoSample::new(1.0, 2.0);
        let b = StereoSample::new(0.5, 0.5);

        let sum = a + b;
        assert_eq!(sum.left, 1.5);
        assert_eq!(sum.right, 2.5);

        let scaled = a * 0.5;
        assert_eq!(scaled.left, 0.5);
        assert_eq!(scaled.right, 1.0);
    }

    #[test]
    fn test_set_len_from_capacity_never_grows_capacity() {
        let mut buffer = StereoBuffer::with_capacity(64);
        let cap = buffer.capacity();

        buffer.set_len_from_capacity(32);
        assert_eq!(buffer.len(), 32);
        buffer.set_len_from_capacity(64);
        assert_eq!(buffer.len(), 64);
        buffer.set_len_from_capacity(8);
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.capacity(), cap);
    }

    #[test]
    fn test_interleaved_view() {
        let buffer = StereoBuffer::from_channels(&[1.0, 3.0], &[2.0, 4.0]);
        assert_eq!(buffer.as_interleaved(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_channel_enumeration() {
        assert_eq!(Channel::ALL.len(), NUM_CHANNELS);
        assert_eq!(Channel::from_index(6), Some(Channel::DrumBank));
        assert_eq!(Channel::from_index(8), None);
        assert_eq!(Channel::track(2), Some(Channel::Track3));
        assert_eq!(Channel::track(4), None);
        assert_eq!(Channel::Sampler.name(), "Sampler");
    }

    #[test]
    fn test_atomic_f32_bit_exact() {
        let value = AtomicF32::new(0.25);
        assert_eq!(value.load(Ordering::Relaxed), 0.25);
        value.store(-1.5e-7, Ordering::Relaxed);
        assert_eq!(value.load(Ordering::Relaxed), -1.5e-7);
    }

    #[test]
    fn test_target_mask() {
        let mask = TargetMask::POLY_SYNTH | TargetMask::DRUM;
        assert!(mask.contains(TargetMask::POLY_SYNTH));
        assert!(mask.contains(TargetMask::DRUM));
        assert!(!mask.contains(TargetMask::SAMPLER));
        assert!(!mask.contains(TargetMask::NONE));
    }
}
