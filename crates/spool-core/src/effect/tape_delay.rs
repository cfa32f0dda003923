//! Three-head tape delay for send bus A
//!
//! One mono tape loop read by three playback heads at fixed ratios
//! (1.0×, 1.42×, 1.95×) of a smoothed base time. Head combinations are
//! chosen from eight gain matrices. The feedback path runs through a tone
//! low-pass, a fixed ~110Hz high-pass, `tanh` saturation and a small hiss
//! term proportional to the signal, so silence stays exactly silent.
//!
//! Wow, flutter and a slow random drift modulate the effective delay time
//! by at most ±2%.

use std::f32::consts::TAU;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::{Effect, EffectBase, EffectInfo};
use crate::dsp::{equal_power_pan, one_pole_coeff, snap_denormal, soft_clip};
use crate::params::{ParamCurve, ParamInfo, ParamValue};
use crate::types::{StereoBuffer, StereoSample};

/// Synced division lengths in beats:
/// 1/32, 1/16T, 1/16, 1/8T, 1/8, 1/8D, 1/4, 1/4D, 1/2
pub const DELAY_DIVISIONS: [f32; 9] = [
    0.125,
    1.0 / 6.0,
    0.25,
    1.0 / 3.0,
    0.5,
    0.75,
    1.0,
    1.5,
    2.0,
];

/// Head positions relative to the base time
const HEAD_RATIOS: [f32; 3] = [1.0, 1.42, 1.95];

/// Bipolar head pans: centre, left, right
const HEAD_PANS: [f32; 3] = [0.0, -0.6, 0.6];

/// Slowest tempo the tape is sized for
const MIN_SYNC_BPM: f32 = 40.0;

/// Headroom for the modulation swing
const MOD_HEADROOM: f32 = 1.02;

/// Largest combined time modulation
const MAX_TIME_MOD: f32 = 0.02;

const WOW_HZ: f32 = 0.5;
const WOW_DEPTH: f32 = 0.01;
const FLUTTER_HZ: f32 = 6.3;
const FLUTTER_DEPTH: f32 = 0.003;
const DRIFT_STEP: f32 = 2.0e-5;
const DRIFT_LIMIT: f32 = 0.006;

const FEEDBACK_HP_HZ: f32 = 110.0;
const HISS_LEVEL: f32 = 0.002;
const TIME_SMOOTHING_SECS: f32 = 0.05;

/// Cross-feed between output sides in dense mode
const DENSE_CROSS_FEED: f32 = 0.3;

/// Parameter indices
pub const PARAM_TIME: usize = 0;
pub const PARAM_FEEDBACK: usize = 1;
pub const PARAM_MIX: usize = 2;
pub const PARAM_TONE: usize = 3;
pub const PARAM_SYNC: usize = 4;
pub const PARAM_DIVISION: usize = 5;
pub const PARAM_HEAD_MODE: usize = 6;
pub const PARAM_WOW: usize = 7;
pub const PARAM_FLUTTER: usize = 8;

/// Playback head combination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadMode {
    Head1,
    Head2,
    Head3,
    Heads12,
    Heads13,
    Heads23,
    AllHeads,
    /// Weighted all heads with stereo cross-feed
    Dense,
}

impl HeadMode {
    pub const ALL: [HeadMode; 8] = [
        HeadMode::Head1,
        HeadMode::Head2,
        HeadMode::Head3,
        HeadMode::Heads12,
        HeadMode::Heads13,
        HeadMode::Heads23,
        HeadMode::AllHeads,
        HeadMode::Dense,
    ];

    pub fn from_index(index: usize) -> Self {
        Self::ALL.get(index).copied().unwrap_or(HeadMode::Head1)
    }

    /// Gain of each head
    pub fn gains(self) -> [f32; 3] {
        match self {
            HeadMode::Head1 => [1.0, 0.0, 0.0],
            HeadMode::Head2 => [0.0, 1.0, 0.0],
            HeadMode::Head3 => [0.0, 0.0, 1.0],
            HeadMode::Heads12 => [0.7, 0.7, 0.0],
            HeadMode::Heads13 => [0.7, 0.0, 0.7],
            HeadMode::Heads23 => [0.0, 0.7, 0.7],
            HeadMode::AllHeads => [0.58, 0.58, 0.58],
            HeadMode::Dense => [0.5, 0.45, 0.4],
        }
    }
}

/// Multi-head tape delay
///
/// Parameters:
/// - Time: free-running base time, 60-450ms (quadratic)
/// - Feedback: 0-0.95
/// - Mix: wet level returned to the master
/// - Tone: feedback/output low-pass, 800Hz-12kHz
/// - Sync: tempo-synced when on
/// - Division: synced length, see [`DELAY_DIVISIONS`]
/// - Heads: see [`HeadMode`]
/// - Wow / Flutter: tape speed modulation depth
pub struct TapeDelay {
    base: EffectBase,
    sample_rate: f32,
    bpm: f32,

    tape: Vec<f32>,
    write_pos: usize,
    /// Smoothed base time in samples; `None` until first use
    time: Option<f32>,

    wow_phase: f32,
    flutter_phase: f32,
    drift: f32,
    rng: SmallRng,

    fb_lp: f32,
    fb_hp: f32,
    out_lp: [f32; 2],
}

impl TapeDelay {
    pub fn new(sample_rate: f32) -> Self {
        let info = EffectInfo::new("Tape Delay", "Delay")
            .with_param(
                ParamInfo::new("Time", 0.4)
                    .with_curve(ParamCurve::Quadratic { min: 60.0, max: 450.0 })
                    .with_unit("ms"),
            )
            .with_param(ParamInfo::new("Feedback", 0.35).with_range(0.0, 0.95))
            .with_param(ParamInfo::new("Mix", 0.3).with_unit("%"))
            .with_param(
                ParamInfo::new("Tone", 0.6)
                    .with_curve(ParamCurve::Exponential { min: 800.0, max: 12000.0 })
                    .with_unit("Hz"),
            )
            .with_param(ParamInfo::new("Sync", 1.0).with_curve(ParamCurve::Toggle))
            .with_param(
                ParamInfo::new("Division", 0.75).with_curve(ParamCurve::Stepped {
                    steps: DELAY_DIVISIONS.len() as u32,
                }),
            )
            .with_param(
                ParamInfo::new("Heads", 0.0).with_curve(ParamCurve::Stepped {
                    steps: HeadMode::ALL.len() as u32,
                }),
            )
            .with_param(ParamInfo::new("Wow", 0.2))
            .with_param(ParamInfo::new("Flutter", 0.2));

        let longest_beats = DELAY_DIVISIONS[DELAY_DIVISIONS.len() - 1];
        let longest_secs = longest_beats * 60.0 / MIN_SYNC_BPM * HEAD_RATIOS[2] * MOD_HEADROOM;
        let tape_len = (longest_secs * sample_rate).ceil() as usize + 4;

        Self {
            base: EffectBase::new(info),
            sample_rate,
            bpm: 120.0,
            tape: vec![0.0; tape_len],
            write_pos: 0,
            time: None,
            wow_phase: 0.0,
            flutter_phase: 0.0,
            drift: 0.0,
            rng: SmallRng::seed_from_u64(0x7a9e_de1a),
            fb_lp: 0.0,
            fb_hp: 0.0,
            out_lp: [0.0; 2],
        }
    }

    pub fn head_mode(&self) -> HeadMode {
        HeadMode::from_index(self.base.param_step(PARAM_HEAD_MODE))
    }

    /// Target base time in samples for the current settings
    pub fn target_time_samples(&self) -> f32 {
        let secs = if self.base.param_actual(PARAM_SYNC) >= 0.5 {
            let beats = DELAY_DIVISIONS[self.base.param_step(PARAM_DIVISION).min(DELAY_DIVISIONS.len() - 1)];
            beats * 60.0 / self.bpm.max(MIN_SYNC_BPM)
        } else {
            self.base.param_actual(PARAM_TIME) / 1000.0
        };
        let max_base = (self.tape.len() - 4) as f32 / (HEAD_RATIOS[2] * MOD_HEADROOM);
        (secs * self.sample_rate).clamp(1.0, max_base)
    }

    /// Linear-interpolated tape read `delay` samples behind the write head
    #[inline]
    fn read(&self, delay: f32) -> f32 {
        let len = self.tape.len();
        let mut pos = self.write_pos as f32 - delay;
        if pos < 0.0 {
            pos += len as f32;
        }
        let index = pos.floor();
        let frac = pos - index;
        let a = self.tape[index as usize % len];
        let b = self.tape[(index as usize + 1) % len];
        a + (b - a) * frac
    }

    /// Combined wow/flutter/drift factor for the next sample
    #[inline]
    fn next_time_mod(&mut self, wow: f32, flutter: f32) -> f32 {
        self.wow_phase = (self.wow_phase + WOW_HZ / self.sample_rate).fract();
        self.flutter_phase = (self.flutter_phase + FLUTTER_HZ / self.sample_rate).fract();

        let step: f32 = self.rng.gen_range(-1.0..1.0);
        self.drift = (self.drift * 0.9999 + step * DRIFT_STEP).clamp(-DRIFT_LIMIT, DRIFT_LIMIT);

        let wow_mod = (TAU * self.wow_phase).sin() * WOW_DEPTH * wow;
        let flutter_mod = (TAU * self.flutter_phase).sin() * FLUTTER_DEPTH * flutter;
        (wow_mod + flutter_mod + self.drift * wow).clamp(-MAX_TIME_MOD, MAX_TIME_MOD)
    }
}

impl Effect for TapeDelay {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        let feedback = self.base.param_actual(PARAM_FEEDBACK);
        let mix = self.base.param_actual(PARAM_MIX);
        let tone_coeff = one_pole_coeff(self.base.param_actual(PARAM_TONE), self.sample_rate);
        let hp_coeff = one_pole_coeff(FEEDBACK_HP_HZ, self.sample_rate);
        let wow = self.base.param_actual(PARAM_WOW);
        let flutter = self.base.param_actual(PARAM_FLUTTER);
        let mode = self.head_mode();
        let gains = mode.gains();
        let pans = HEAD_PANS.map(equal_power_pan);

        let target = self.target_time_samples();
        let mut time = self.time.unwrap_or(target);
        let time_coeff = 1.0 - (-1.0 / (TIME_SMOOTHING_SECS * self.sample_rate)).exp();
        let tape_len = self.tape.len();

        for sample in buffer.iter_mut() {
            time += (target - time) * time_coeff;
            let modulated = time * (1.0 + self.next_time_mod(wow, flutter));

            let mut out_l = 0.0f32;
            let mut out_r = 0.0f32;
            let mut fb_sum = 0.0f32;
            for head in 0..3 {
                if gains[head] == 0.0 {
                    continue;
                }
                let tap = self.read(modulated * HEAD_RATIOS[head]) * gains[head];
                out_l += tap * pans[head].0;
                out_r += tap * pans[head].1;
                fb_sum += tap;
            }
            if mode == HeadMode::Dense {
                let (l, r) = (out_l, out_r);
                out_l = l + r * DENSE_CROSS_FEED;
                out_r = r + l * DENSE_CROSS_FEED;
            }

            // Feedback path: tone → high-pass → saturation → hiss
            self.fb_lp = snap_denormal(self.fb_lp + tone_coeff * (fb_sum - self.fb_lp));
            self.fb_hp = snap_denormal(self.fb_hp + hp_coeff * (self.fb_lp - self.fb_hp));
            let shaped = (self.fb_lp - self.fb_hp) * feedback;
            let hiss = self.rng.gen_range(-1.0f32..1.0) * HISS_LEVEL * shaped.abs();
            let fb = shaped.tanh() + hiss;

            let input = (sample.left + sample.right) * 0.5;
            self.tape[self.write_pos] = input + fb;
            self.write_pos = (self.write_pos + 1) % tape_len;

            self.out_lp[0] = snap_denormal(self.out_lp[0] + tone_coeff * (out_l - self.out_lp[0]));
            self.out_lp[1] = snap_denormal(self.out_lp[1] + tone_coeff * (out_r - self.out_lp[1]));

            *sample = StereoSample::new(
                soft_clip(self.out_lp[0]) * mix,
                soft_clip(self.out_lp[1]) * mix,
            );
        }

        self.time = Some(time);
    }

    fn info(&self) -> &EffectInfo {
        self.base.info()
    }

    fn get_params(&self) -> &[ParamValue] {
        self.base.get_params()
    }

    fn set_param(&mut self, index: usize, value: f32) {
        self.base.set_param(index, value);
    }

    fn set_tempo(&mut self, bpm: f32) {
        if bpm.is_finite() && bpm > 0.0 {
            self.bpm = bpm;
        }
    }

    fn reset(&mut self) {
        self.tape.fill(0.0);
        self.write_pos = 0;
        self.time = None;
        self.wow_phase = 0.0;
        self.flutter_phase = 0.0;
        self.drift = 0.0;
        self.fb_lp = 0.0;
        self.fb_hp = 0.0;
        self.out_lp = [0.0; 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;
    const BLOCK: usize = 512;

    /// Run `total` frames through the delay with an impulse at frame 0
    fn impulse_response(delay: &mut TapeDelay, total: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(total);
        let mut first = true;
        while out.len() < total {
            let mut buffer = StereoBuffer::silence(BLOCK);
            if first {
                buffer[0] = StereoSample::mono(1.0);
                first = false;
            }
            delay.process(&mut buffer);
            out.extend(buffer.iter().map(|s| s.left + s.right));
        }
        out
    }

    fn stable_delay() -> TapeDelay {
        let mut delay = TapeDelay::new(SR);
        delay.set_param(PARAM_WOW, 0.0);
        delay.set_param(PARAM_FLUTTER, 0.0);
        delay.set_param(PARAM_MIX, 1.0);
        delay
    }

    #[test]
    fn test_quarter_note_at_120_bpm() {
        let mut delay = stable_delay();
        delay.set_tempo(120.0);
        assert_eq!(delay.target_time_samples(), 24000.0);

        let out = impulse_response(&mut delay, 30000);
        let first = out.iter().position(|s| s.abs() > 1e-6);
        assert_eq!(first, Some(24000));
    }

    #[test]
    fn test_second_head_ratio() {
        let mut delay = stable_delay();
        delay.set_param(PARAM_HEAD_MODE, 1.0 / 7.0);
        assert_eq!(delay.head_mode(), HeadMode::Head2);

        let out = impulse_response(&mut delay, 40000);
        let first = out.iter().position(|s| s.abs() > 1e-6).unwrap_or(0);
        assert!((first as i64 - 34080).abs() <= 1, "second head at {}", first);
    }

    #[test]
    fn test_free_time_mapping() {
        let mut delay = TapeDelay::new(SR);
        delay.set_param(PARAM_SYNC, 0.0);
        delay.set_param(PARAM_TIME, 0.0);
        assert!((delay.target_time_samples() - 2880.0).abs() < 0.5);
        delay.set_param(PARAM_TIME, 1.0);
        assert!((delay.target_time_samples() - 21600.0).abs() < 0.5);
    }

    #[test]
    fn test_zero_mix_is_exact_silence() {
        let mut delay = TapeDelay::new(SR);
        delay.set_param(PARAM_MIX, 0.0);
        let out = impulse_response(&mut delay, 60000);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut delay = TapeDelay::new(SR);
        delay.set_param(PARAM_MIX, 1.0);
        for _ in 0..20 {
            let mut buffer = StereoBuffer::silence(BLOCK);
            delay.process(&mut buffer);
            assert_eq!(buffer.peak(), 0.0);
        }
    }

    #[test]
    fn test_full_feedback_stays_bounded() {
        let mut delay = TapeDelay::new(SR);
        delay.set_param(PARAM_FEEDBACK, 1.0);
        delay.set_param(PARAM_MIX, 1.0);
        delay.set_param(PARAM_SYNC, 0.0);
        delay.set_param(PARAM_TIME, 0.0);
        delay.set_param(PARAM_HEAD_MODE, 1.0);

        for _ in 0..400 {
            let mut buffer = StereoBuffer::from_channels(&[0.9; BLOCK], &[0.9; BLOCK]);
            delay.process(&mut buffer);
            assert!(buffer.iter().all(|s| s.left.is_finite() && s.left.abs() <= 1.0));
        }
    }

    #[test]
    fn test_slow_tempo_is_clamped_to_tape() {
        let mut delay = stable_delay();
        delay.set_param(PARAM_DIVISION, 1.0);
        delay.set_tempo(10.0);
        let max_base = (delay.tape.len() - 4) as f32 / (HEAD_RATIOS[2] * MOD_HEADROOM);
        assert!(delay.target_time_samples() <= max_base);
    }
}
