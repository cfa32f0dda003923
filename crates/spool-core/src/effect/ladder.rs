//! Master low-pass filter with selectable models
//!
//! - [`FilterModel::Ladder`]: Stilson/Smith 4-pole transistor ladder with a
//!   cubic soft limit on the last stage
//! - [`FilterModel::ZeroDelay`]: topology-preserving (TPT) 4-pole ladder
//!   with the feedback loop solved instantaneously
//! - [`FilterModel::StateVariable`]: 2-pole SVF low-pass
//!
//! Each model has its own cutoff and resonance ceiling beyond which it
//! becomes unstable. Changing the model recreates the filter kernel;
//! changing cutoff or resonance only recomputes coefficients.

use std::f32::consts::PI;

use crate::dsp::snap_denormal;
use crate::params::ParamCurve;
use crate::types::{StereoBuffer, StereoSample};

/// Normalized cutoff → Hz (20Hz-20kHz, log-frequency)
pub const CUTOFF_CURVE: ParamCurve = ParamCurve::Exponential { min: 20.0, max: 20000.0 };

/// Above this cutoff (with no resonance) the filter is bypassed
const FAST_PATH_HZ: f32 = 19000.0;
const FAST_PATH_RESONANCE: f32 = 0.001;

/// Filter topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterModel {
    Ladder,
    ZeroDelay,
    StateVariable,
}

impl FilterModel {
    pub const ALL: [FilterModel; 3] = [
        FilterModel::Ladder,
        FilterModel::ZeroDelay,
        FilterModel::StateVariable,
    ];

    /// Model selected by a normalized value
    pub fn from_normalized(value: f32) -> Self {
        let steps = ParamCurve::Stepped {
            steps: Self::ALL.len() as u32,
        };
        Self::ALL[steps.step_index(value).min(Self::ALL.len() - 1)]
    }

    /// (max cutoff as a fraction of the sample rate, max resonance)
    pub const fn ceilings(self) -> (f32, f32) {
        match self {
            FilterModel::Ladder => (0.35, 0.95),
            FilterModel::ZeroDelay => (0.45, 0.98),
            FilterModel::StateVariable => (0.45, 0.97),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterModel::Ladder => "Ladder",
            FilterModel::ZeroDelay => "Zero Delay Ladder",
            FilterModel::StateVariable => "State Variable",
        }
    }
}

/// Stilson/Smith ladder, per channel state
#[derive(Debug, Clone, Default)]
struct StilsonLadder {
    p: f32,
    k: f32,
    r: f32,
    stage: [[f32; 4]; 2],
    old: [[f32; 4]; 2],
}

impl StilsonLadder {
    fn set(&mut self, cutoff: f32, resonance: f32, sample_rate: f32) {
        let f = 2.0 * cutoff / sample_rate;
        self.p = f * (1.8 - 0.8 * f);
        self.k = 2.0 * self.p - 1.0;
        let t = (1.0 - self.p) * 1.386_249;
        let t2 = 12.0 + t * t;
        self.r = resonance * (t2 + 6.0 * t) / (t2 - 6.0 * t);
    }

    #[inline]
    fn tick(&mut self, input: f32, ch: usize) -> f32 {
        let (p, k) = (self.p, self.k);
        let y = &mut self.stage[ch];
        let old = &mut self.old[ch];

        let x = input - self.r * y[3];
        y[0] = x * p + old[0] * p - k * y[0];
        y[1] = y[0] * p + old[1] * p - k * y[1];
        y[2] = y[1] * p + old[2] * p - k * y[2];
        y[3] = y[2] * p + old[3] * p - k * y[3];
        y[3] -= y[3] * y[3] * y[3] / 6.0;

        *old = [x, y[0], y[1], y[2]];
        for v in y.iter_mut() {
            *v = snap_denormal(*v);
        }
        y[3]
    }
}

/// TPT ladder, per channel integrator states
#[derive(Debug, Clone, Default)]
struct TptLadder {
    big_g: f32,
    k: f32,
    s: [[f32; 4]; 2],
}

impl TptLadder {
    fn set(&mut self, cutoff: f32, resonance: f32, sample_rate: f32) {
        let g = (PI * cutoff / sample_rate).tan();
        self.big_g = g / (1.0 + g);
        self.k = 4.0 * resonance;
    }

    #[inline]
    fn tick(&mut self, input: f32, ch: usize) -> f32 {
        let big_g = self.big_g;
        let s = &mut self.s[ch];
        let one_minus_g = 1.0 - big_g;

        // y4 = G^4 x + sigma, with sigma from the stored states
        let sigma = big_g * big_g * big_g * s[0] * one_minus_g
            + big_g * big_g * s[1] * one_minus_g
            + big_g * s[2] * one_minus_g
            + s[3] * one_minus_g;
        let g4 = big_g * big_g * big_g * big_g;
        let y4 = (g4 * input + sigma) / (1.0 + self.k * g4);

        let mut stage_in = input - self.k * y4;
        for state in s.iter_mut() {
            let v = (stage_in - *state) * big_g;
            let y = v + *state;
            *state = snap_denormal(y + v);
            stage_in = y;
        }
        stage_in
    }
}

/// Two-pole state-variable low-pass, per channel state
#[derive(Debug, Clone, Default)]
struct Svf {
    a1: f32,
    a2: f32,
    a3: f32,
    ic1eq: [f32; 2],
    ic2eq: [f32; 2],
}

impl Svf {
    fn set(&mut self, cutoff: f32, resonance: f32, sample_rate: f32) {
        let g = (PI * cutoff / sample_rate).tan();
        let q = 0.5 + resonance * 20.0;
        let k = 1.0 / q;
        self.a1 = 1.0 / (1.0 + g * (g + k));
        self.a2 = g * self.a1;
        self.a3 = g * self.a2;
    }

    #[inline]
    fn tick(&mut self, input: f32, ch: usize) -> f32 {
        let v3 = input - self.ic2eq[ch];
        let v1 = self.a1 * self.ic1eq[ch] + self.a2 * v3;
        let v2 = self.ic2eq[ch] + self.a2 * self.ic1eq[ch] + self.a3 * v3;
        self.ic1eq[ch] = snap_denormal(2.0 * v1 - self.ic1eq[ch]);
        self.ic2eq[ch] = snap_denormal(2.0 * v2 - self.ic2eq[ch]);
        v2
    }
}

#[derive(Debug, Clone)]
enum Kernel {
    Ladder(StilsonLadder),
    ZeroDelay(TptLadder),
    StateVariable(Svf),
}

impl Kernel {
    fn new(model: FilterModel) -> Self {
        match model {
            FilterModel::Ladder => Kernel::Ladder(StilsonLadder::default()),
            FilterModel::ZeroDelay => Kernel::ZeroDelay(TptLadder::default()),
            FilterModel::StateVariable => Kernel::StateVariable(Svf::default()),
        }
    }

    fn set(&mut self, cutoff: f32, resonance: f32, sample_rate: f32) {
        match self {
            Kernel::Ladder(f) => f.set(cutoff, resonance, sample_rate),
            Kernel::ZeroDelay(f) => f.set(cutoff, resonance, sample_rate),
            Kernel::StateVariable(f) => f.set(cutoff, resonance, sample_rate),
        }
    }

    #[inline]
    fn tick(&mut self, input: f32, ch: usize) -> f32 {
        match self {
            Kernel::Ladder(f) => f.tick(input, ch),
            Kernel::ZeroDelay(f) => f.tick(input, ch),
            Kernel::StateVariable(f) => f.tick(input, ch),
        }
    }
}

/// Resonant low-pass on the master bus
pub struct MasterFilter {
    sample_rate: f32,
    model: FilterModel,
    kernel: Kernel,
    cutoff: f32,
    resonance: f32,
    /// Bumped every time the kernel is recreated
    generation: u32,
}

impl MasterFilter {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            model: FilterModel::Ladder,
            kernel: Kernel::new(FilterModel::Ladder),
            cutoff: 1.0,
            resonance: 0.0,
            generation: 0,
        }
    }

    /// Select a model; only an actual change recreates the kernel
    pub fn set_model(&mut self, model: FilterModel) {
        if model != self.model {
            self.model = model;
            self.kernel = Kernel::new(model);
            self.generation = self.generation.wrapping_add(1);
        }
    }

    pub fn model(&self) -> FilterModel {
        self.model
    }

    /// Number of kernel recreations so far
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Normalized cutoff (0.0-1.0)
    pub fn set_cutoff(&mut self, normalized: f32) {
        self.cutoff = normalized.clamp(0.0, 1.0);
    }

    /// Normalized resonance (0.0-1.0)
    pub fn set_resonance(&mut self, normalized: f32) {
        self.resonance = normalized.clamp(0.0, 1.0);
    }

    /// Cutoff in Hz before the model ceiling is applied
    pub fn cutoff_hz(&self) -> f32 {
        CUTOFF_CURVE.to_actual(self.cutoff)
    }

    /// Whether the filter currently passes audio untouched
    pub fn is_bypassed(&self) -> bool {
        self.cutoff_hz() >= FAST_PATH_HZ && self.resonance < FAST_PATH_RESONANCE
    }

    pub fn process(&mut self, buffer: &mut StereoBuffer) {
        if self.is_bypassed() {
            return;
        }

        let (max_ratio, max_resonance) = self.model.ceilings();
        let cutoff = self.cutoff_hz().min(max_ratio * self.sample_rate);
        let resonance = self.resonance.min(max_resonance);
        self.kernel.set(cutoff, resonance, self.sample_rate);

        for sample in buffer.iter_mut() {
            let left = self.kernel.tick(sample.left.tanh(), 0);
            let right = self.kernel.tick(sample.right.tanh(), 1);
            *sample = StereoSample::new(snap_denormal(left), snap_denormal(right));
        }
    }

    pub fn reset(&mut self) {
        self.kernel = Kernel::new(self.model);
    }
}
