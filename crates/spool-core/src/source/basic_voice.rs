//! Minimal poly-synth voice
//!
//! Sine/saw blend with an octave partial, linear attack and exponential
//! release. Stands in for a real synthesis engine on the poly channel.

use std::f32::consts::TAU;

use super::{note_to_hz, RenderContext, SoundSource, SourceParam};
use crate::types::StereoSample;

const ATTACK_SECS: f32 = 0.005;
const OUTPUT_SCALE: f32 = 0.3;
const SILENCE_THRESHOLD: f32 = 1.0e-5;

/// One voice of the built-in poly synth
///
/// Parameters:
/// - Harmonics: level of the octave partial
/// - Timbre: sine (0.0) to saw (1.0)
/// - Morph: release time, 50ms to 2s
/// - Level: output level
pub struct BasicVoice {
    note: u8,
    frequency: f32,
    velocity: f32,
    phase: f32,
    env: f32,
    gate: bool,
    active: bool,

    harmonics: f32,
    timbre: f32,
    morph: f32,
    level: f32,
    // Modulation offsets, reset every block by the engine
    mod_harmonics: f32,
    mod_timbre: f32,
    mod_morph: f32,
    mod_level: f32,
}

impl BasicVoice {
    pub fn new() -> Self {
        Self {
            note: 0,
            frequency: 440.0,
            velocity: 0.0,
            phase: 0.0,
            env: 0.0,
            gate: false,
            active: false,
            harmonics: 0.5,
            timbre: 0.5,
            morph: 0.5,
            level: 0.8,
            mod_harmonics: 0.0,
            mod_timbre: 0.0,
            mod_morph: 0.0,
            mod_level: 0.0,
        }
    }

    /// Whether the voice is still producing sound
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Note currently (or last) played
    pub fn note(&self) -> u8 {
        self.note
    }
}

impl Default for BasicVoice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundSource for BasicVoice {
    fn render(&mut self, out: &mut [StereoSample], ctx: &RenderContext<'_>) {
        if !self.active {
            return;
        }

        let sr = ctx.sample_rate;
        let inc = self.frequency / sr;
        let harmonics = (self.harmonics + self.mod_harmonics).clamp(0.0, 1.0);
        let timbre = (self.timbre + self.mod_timbre).clamp(0.0, 1.0);
        let morph = (self.morph + self.mod_morph).clamp(0.0, 1.0);
        let level = (self.level + self.mod_level).clamp(0.0, 1.0);

        let attack_step = 1.0 / (ATTACK_SECS * sr);
        let release_secs = 0.05 + morph * 1.95;
        let release_coeff = (-1.0 / (release_secs * sr)).exp();
        let gain = self.velocity * level * OUTPUT_SCALE;

        for frame in out.iter_mut() {
            if self.gate {
                self.env = (self.env + attack_step).min(1.0);
            } else {
                self.env *= release_coeff;
                if self.env < SILENCE_THRESHOLD {
                    self.env = 0.0;
                    self.active = false;
                    break;
                }
            }

            let sine = (TAU * self.phase).sin();
            let saw = 2.0 * self.phase - 1.0;
            let partial = (2.0 * TAU * self.phase).sin();
            let osc = sine * (1.0 - timbre) + saw * timbre + partial * harmonics * 0.5;

            *frame += StereoSample::mono(osc * self.env * gain);

            self.phase += inc;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
        }
    }

    fn note_on(&mut self, note: u8, velocity: u8) {
        if !self.active {
            self.phase = 0.0;
        }
        self.note = note;
        self.frequency = note_to_hz(note as f32);
        self.velocity = velocity as f32 / 127.0;
        self.gate = true;
        self.active = true;
    }

    fn note_off(&mut self, note: u8) {
        if note == self.note {
            self.gate = false;
        }
    }

    fn set_parameter(&mut self, param: SourceParam, value: f32) {
        match param {
            SourceParam::Harmonics => self.harmonics = value,
            SourceParam::Timbre => self.timbre = value,
            SourceParam::Morph => self.morph = value,
            SourceParam::Level => self.level = value,
            _ => {}
        }
    }

    fn set_modulation(&mut self, param: SourceParam, amount: f32) {
        match param {
            SourceParam::Harmonics => self.mod_harmonics = amount,
            SourceParam::Timbre => self.mod_timbre = amount,
            SourceParam::Morph => self.mod_morph = amount,
            SourceParam::Level => self.mod_level = amount,
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.env = 0.0;
        self.gate = false;
        self.active = false;
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ReelBank;

    fn render(voice: &mut BasicVoice, frames: usize) -> Vec<StereoSample> {
        let reels = ReelBank::empty();
        let ctx = RenderContext {
            sample_rate: 48000.0,
            bpm: 120.0,
            reels: &reels,
        };
        let mut out = vec![StereoSample::silence(); frames];
        voice.render(&mut out, &ctx);
        out
    }

    #[test]
    fn test_idle_voice_is_silent() {
        let mut voice = BasicVoice::new();
        assert!(render(&mut voice, 64).iter().all(|s| *s == StereoSample::silence()));
    }

    #[test]
    fn test_note_produces_sound_and_decays() {
        let mut voice = BasicVoice::new();
        voice.set_parameter(SourceParam::Morph, 0.0); // 50ms release
        voice.note_on(60, 127);
        let out = render(&mut voice, 4800);
        assert!(out.iter().any(|s| s.left.abs() > 0.01));

        voice.note_off(60);
        render(&mut voice, 48000);
        assert!(!voice.is_active(), "voice should finish its release");
    }

    #[test]
    fn test_note_off_for_other_note_is_ignored() {
        let mut voice = BasicVoice::new();
        voice.note_on(60, 100);
        voice.note_off(61);
        render(&mut voice, 48000);
        assert!(voice.is_active());
    }
}
