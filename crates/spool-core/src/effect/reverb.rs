//! Freeverb-style stereo reverb for send bus B
//!
//! Eight parallel damped comb filters per side followed by four series
//! allpass filters. The right side uses lengths offset by a fixed spread
//! for stereo decorrelation.

use super::{Effect, EffectBase, EffectInfo};
use crate::params::{ParamInfo, ParamValue};
use crate::types::StereoBuffer;

/// Comb filter lengths in samples at 44.1kHz
const COMB_LENGTHS: [usize; 8] = [1557, 1617, 1491, 1422, 1277, 1356, 1188, 1116];

/// Allpass filter lengths in samples at 44.1kHz
const ALLPASS_LENGTHS: [usize; 4] = [225, 556, 441, 341];

/// Right-channel length offset in samples
const STEREO_SPREAD: usize = 23;

const ALLPASS_FEEDBACK: f32 = 0.5;

/// Gain compensation for summing eight combs
const COMB_GAIN: f32 = 0.2;

/// Parameter indices
pub const PARAM_SIZE: usize = 0;
pub const PARAM_DAMPING: usize = 1;
pub const PARAM_WIDTH: usize = 2;
pub const PARAM_MIX: usize = 3;

fn scaled_len(length: usize, sample_rate: f32) -> usize {
    ((length as f32 * sample_rate / 44100.0) as usize).max(1)
}

struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    filter_state: f32,
}

impl CombFilter {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length],
            pos: 0,
            filter_state: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.pos];

        // One-pole lowpass in the feedback path
        self.filter_state = output * (1.0 - damp) + self.filter_state * damp;

        self.buffer[self.pos] = input + self.filter_state * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();

        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
        self.pos = 0;
    }
}

struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllpassFilter {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.pos];
        let output = -input + buffered;
        self.buffer[self.pos] = input + buffered * ALLPASS_FEEDBACK;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
    }
}

/// Freeverb-style reverb
///
/// Parameters:
/// - Size: comb feedback, `0.70 + size * 0.28`
/// - Damping: comb lowpass coefficient (0.0 = bright, 1.0 = dark)
/// - Width: stereo width (0.0 = mono, 1.0 = full stereo)
/// - Mix: wet level returned to the master
pub struct Reverb {
    base: EffectBase,
    combs_l: Vec<CombFilter>,
    combs_r: Vec<CombFilter>,
    allpass_l: Vec<AllpassFilter>,
    allpass_r: Vec<AllpassFilter>,
}

impl Reverb {
    pub fn new(sample_rate: f32) -> Self {
        let info = EffectInfo::new("Reverb", "Reverb")
            .with_param(ParamInfo::new("Size", 0.5))
            .with_param(ParamInfo::new("Damping", 0.5))
            .with_param(ParamInfo::new("Width", 1.0))
            .with_param(ParamInfo::new("Mix", 0.3).with_unit("%"));

        let combs = |spread: usize| -> Vec<CombFilter> {
            COMB_LENGTHS
                .iter()
                .map(|&len| CombFilter::new(scaled_len(len + spread, sample_rate)))
                .collect()
        };
        let allpasses = |spread: usize| -> Vec<AllpassFilter> {
            ALLPASS_LENGTHS
                .iter()
                .map(|&len| AllpassFilter::new(scaled_len(len + spread, sample_rate)))
                .collect()
        };

        Self {
            base: EffectBase::new(info),
            combs_l: combs(0),
            combs_r: combs(STEREO_SPREAD),
            allpass_l: allpasses(0),
            allpass_r: allpasses(STEREO_SPREAD),
        }
    }

    fn room_size(&self) -> f32 {
        0.7 + self.base.param_actual(PARAM_SIZE) * 0.28
    }

    fn damping(&self) -> f32 {
        self.base.param_actual(PARAM_DAMPING)
    }

    fn width(&self) -> f32 {
        self.base.param_actual(PARAM_WIDTH)
    }

    fn mix(&self) -> f32 {
        self.base.param_actual(PARAM_MIX)
    }
}

impl Effect for Reverb {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        let room_size = self.room_size();
        let damp = self.damping();
        let width = self.width();
        let wet = self.mix();

        let wet1 = wet * (width / 2.0 + 0.5);
        let wet2 = wet * ((1.0 - width) / 2.0);

        for sample in buffer.iter_mut() {
            let input = (sample.left + sample.right) * 0.5;

            let mut out_l = 0.0f32;
            let mut out_r = 0.0f32;
            for comb in &mut self.combs_l {
                out_l += comb.process(input, room_size, damp);
            }
            for comb in &mut self.combs_r {
                out_r += comb.process(input, room_size, damp);
            }
            out_l *= COMB_GAIN;
            out_r *= COMB_GAIN;

            for ap in &mut self.allpass_l {
                out_l = ap.process(out_l);
            }
            for ap in &mut self.allpass_r {
                out_r = ap.process(out_r);
            }

            sample.left = out_l * wet1 + out_r * wet2;
            sample.right = out_r * wet1 + out_l * wet2;
        }
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

    fn reset(&mut self) {
        self.combs_l.iter_mut().for_each(CombFilter::reset);
        self.combs_r.iter_mut().for_each(CombFilter::reset);
        self.allpass_l.iter_mut().for_each(AllpassFilter::reset);
        self.allpass_r.iter_mut().for_each(AllpassFilter::reset);
    }
}
