//! Track voice that loops a reel's splice

use super::{RenderContext, SoundSource, SourceParam};
use crate::params::ParamCurve;
use crate::types::StereoSample;

/// Speed control mapping: 0.5 is normal speed
const SPEED_CURVE: ParamCurve = ParamCurve::Exponential { min: 0.25, max: 4.0 };

/// Samples to fade in/out on gate changes
const FADE_FRAMES: f32 = 256.0;

/// Looping reel player
///
/// A note-on restarts playback at the splice start, pitched relative to
/// middle C; note-off fades out. Playback wraps inside the splice.
pub struct ReelPlayer {
    reel: usize,
    position: f64,
    rate: f64,
    velocity: f32,
    gate: bool,
    fade: f32,
    restart: bool,

    speed: f32,
    level: f32,
    mod_speed: f32,
    mod_level: f32,
}

impl ReelPlayer {
    /// Create a player reading reel `reel`
    pub fn new(reel: usize) -> Self {
        Self {
            reel,
            position: 0.0,
            rate: 1.0,
            velocity: 1.0,
            gate: false,
            fade: 0.0,
            restart: false,
            speed: 0.5,
            level: 0.8,
            mod_speed: 0.0,
            mod_level: 0.0,
        }
    }

    pub fn reel(&self) -> usize {
        self.reel
    }

    /// Current playhead in frames
    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn is_playing(&self) -> bool {
        self.gate || self.fade > 0.0
    }
}

impl SoundSource for ReelPlayer {
    fn render(&mut self, out: &mut [StereoSample], ctx: &RenderContext<'_>) {
        if !self.is_playing() {
            return;
        }
        let Some(reel) = ctx.reels.get(self.reel) else {
            return;
        };
        let splice = reel.splice();
        if splice.is_empty() {
            return;
        }

        let start = splice.start as f64;
        let end = splice.end as f64;
        if self.restart || self.position < start || self.position >= end {
            self.position = start;
            self.restart = false;
        }

        let speed = SPEED_CURVE.to_actual((self.speed + self.mod_speed).clamp(0.0, 1.0)) as f64;
        let step = self.rate * speed;
        let gain = self.velocity * (self.level + self.mod_level).clamp(0.0, 1.0);
        let fade_step = 1.0 / FADE_FRAMES;

        for frame in out.iter_mut() {
            if self.gate {
                self.fade = (self.fade + fade_step).min(1.0);
            } else {
                self.fade -= fade_step;
                if self.fade <= 0.0 {
                    self.fade = 0.0;
                    break;
                }
            }

            *frame += reel.read_interpolated(self.position) * (gain * self.fade);

            self.position += step;
            if self.position >= end {
                self.position = start + (self.position - end) % (end - start);
            }
        }
    }

    fn note_on(&mut self, note: u8, velocity: u8) {
        self.rate = 2.0_f64.powf((note as f64 - 60.0) / 12.0);
        self.velocity = velocity as f32 / 127.0;
        self.gate = true;
        self.restart = true;
    }

    fn note_off(&mut self, _note: u8) {
        self.gate = false;
    }

    fn set_parameter(&mut self, param: SourceParam, value: f32) {
        match param {
            SourceParam::Speed => self.speed = value,
            SourceParam::Level => self.level = value,
            _ => {}
        }
    }

    fn set_modulation(&mut self, param: SourceParam, amount: f32) {
        match param {
            SourceParam::Speed => self.mod_speed = amount,
            SourceParam::Level => self.mod_level = amount,
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.gate = false;
        self.fade = 0.0;
        self.position = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Reel, ReelBank, Splice};

    fn bank_with_ramp() -> ReelBank {
        let mut bank = ReelBank::with_capacity(1, 64);
        if let Some(reel) = bank.get_mut(0) {
            for i in 0..32 {
                reel.record_sample_with_feedback(i, StereoSample::mono(i as f32 / 32.0), 0.0);
            }
            reel.set_splice(Splice::new(0, 32));
        }
        bank
    }

    #[test]
    fn test_plays_only_after_note_on() {
        let bank = bank_with_ramp();
        let ctx = RenderContext {
            sample_rate: 48000.0,
            bpm: 120.0,
            reels: &bank,
        };
        let mut player = ReelPlayer::new(0);
        let mut out = vec![StereoSample::silence(); 64];
        player.render(&mut out, &ctx);
        assert!(out.iter().all(|s| *s == StereoSample::silence()));

        player.note_on(60, 127);
        player.render(&mut out, &ctx);
        assert!(out.iter().any(|s| s.left > 0.0));
        assert!(player.position() < 32.0, "playhead must wrap inside the splice");
    }

    #[test]
    fn test_empty_reel_is_silent() {
        let bank = ReelBank::with_capacity(1, 64);
        let ctx = RenderContext {
            sample_rate: 48000.0,
            bpm: 120.0,
            reels: &bank,
        };
        let mut player = ReelPlayer::new(0);
        player.note_on(60, 127);
        let mut out = vec![StereoSample::silence(); 16];
        player.render(&mut out, &ctx);
        assert!(out.iter().all(|s| *s == StereoSample::silence()));
    }

    #[test]
    fn test_note_sets_rate() {
        let mut player = ReelPlayer::new(0);
        player.note_on(72, 127);
        assert!((player.rate - 2.0).abs() < 1e-9);
    }
}
