//! Sound sources - the synthesis engines behind each mixer channel
//!
//! The engine treats every source as a black box: it calls `render`,
//! `note_on`/`note_off` and the parameter/modulation setters, nothing else.
//! Real synthesis engines plug in through [`SoundSource`]; the built-in
//! sources here keep the engine audible and testable.
//!
//! - [`BasicVoice`]: one poly-synth voice (the poly channel owns eight)
//! - [`ReelPlayer`]: track voice playing a reel's splice
//! - [`Silence`]: placeholder for channels with no engine attached

mod basic_voice;
mod reel;
mod reel_player;

pub use basic_voice::BasicVoice;
pub use reel::{LoopReel, Reel, ReelBank, Splice};
pub use reel_player::ReelPlayer;

use crate::types::StereoSample;

/// Parameters and modulation inputs a source may respond to
///
/// Values are normalized (0.0-1.0) for parameters and bipolar (-1.0..1.0)
/// for modulation. Sources ignore the ones they don't implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceParam {
    Harmonics,
    Timbre,
    Morph,
    Level,
    Structure,
    Brightness,
    Damping,
    Position,
    Tone,
    Decay,
    Pitch,
    Speed,
}

/// Per-render information passed to every source
pub struct RenderContext<'a> {
    /// Current sample rate in Hz
    pub sample_rate: f32,
    /// Current clock tempo
    pub bpm: f32,
    /// Reel storage (read-only during rendering)
    pub reels: &'a ReelBank,
}

/// A synthesis engine attached to a mixer channel
///
/// Every method is called on the audio thread and must not allocate,
/// lock or block.
pub trait SoundSource: Send {
    /// Render additively into `out`
    ///
    /// `out` covers the frames between two scheduled events; sources must
    /// add into it rather than overwrite it.
    fn render(&mut self, out: &mut [StereoSample], ctx: &RenderContext<'_>);

    /// Start (or retrigger) a note
    fn note_on(&mut self, note: u8, velocity: u8);

    /// Release a note; the source keeps decaying on its own
    fn note_off(&mut self, note: u8);

    /// Set a normalized parameter
    fn set_parameter(&mut self, _param: SourceParam, _value: f32) {}

    /// Set the current modulation offset for a parameter
    ///
    /// Called every block with the full accumulated value (zero when no
    /// clock output targets it any more).
    fn set_modulation(&mut self, _param: SourceParam, _amount: f32) {}

    /// Silence the source and clear its state
    fn reset(&mut self);
}

/// A source that produces nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct Silence;

impl SoundSource for Silence {
    fn render(&mut self, _out: &mut [StereoSample], _ctx: &RenderContext<'_>) {}

    fn note_on(&mut self, _note: u8, _velocity: u8) {}

    fn note_off(&mut self, _note: u8) {}

    fn reset(&mut self) {}
}

/// Frequency in Hz of a MIDI note number
#[inline]
pub fn note_to_hz(note: f32) -> f32 {
    440.0 * 2.0_f32.powf((note - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_to_hz() {
        assert!((note_to_hz(69.0) - 440.0).abs() < 1e-3);
        assert!((note_to_hz(57.0) - 220.0).abs() < 1e-3);
    }

    #[test]
    fn test_silence_adds_nothing() {
        let reels = ReelBank::empty();
        let ctx = RenderContext {
            sample_rate: 48000.0,
            bpm: 120.0,
            reels: &reels,
        };
        let mut out = [StereoSample::new(0.25, -0.25); 8];
        let mut source = Silence;
        source.note_on(60, 100);
        source.render(&mut out, &ctx);
        assert!(out.iter().all(|s| *s == StereoSample::new(0.25, -0.25)));
    }
}
