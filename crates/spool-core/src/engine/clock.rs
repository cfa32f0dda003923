//! Master clock and LFO outputs
//!
//! Control threads write the clock configuration into [`ClockControl`]
//! atomics. The audio thread's [`MasterClock`] advances one phase
//! accumulator per output every block, publishes the output values back
//! into the atomics and feeds routed outputs into the modulation matrix.
//!
//! ```text
//! Stopped ──start──▶ Running ──stop──▶ Stopped
//!           (accumulators re-aligned)   (values zeroed, modulation cleared)
//! ```

use std::f64::consts::TAU;
use std::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicU64, Ordering};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::modulation::{ModDestination, ModulationMatrix};
use crate::types::{AtomicF32, NUM_CLOCK_OUTPUTS};

/// Rate multipliers per beat, /16 … ×16
pub const CLOCK_DIVISIONS: [f64; 15] = [
    1.0 / 16.0,
    1.0 / 12.0,
    1.0 / 8.0,
    1.0 / 6.0,
    1.0 / 4.0,
    1.0 / 3.0,
    1.0 / 2.0,
    1.0,
    2.0,
    3.0,
    4.0,
    6.0,
    8.0,
    12.0,
    16.0,
];

/// Division index of ×1
pub const DEFAULT_DIVISION: usize = 7;

pub const MIN_BPM: f32 = 20.0;
pub const MAX_BPM: f32 = 300.0;

/// Largest swing, as a fraction of a cycle
const MAX_SWING: f64 = 0.25;

/// Rate factor in slow mode
const SLOW_FACTOR: f64 = 0.25;

/// Output value range interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ClockMode {
    /// Bipolar (-1..1)
    #[default]
    Lfo = 0,
    /// Unipolar (0..1)
    Clock = 1,
}

impl ClockMode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ClockMode::Lfo),
            1 => Some(ClockMode::Clock),
            _ => None,
        }
    }
}

/// Output waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Waveform {
    /// Pulse with duty cycle = width
    #[default]
    Gate = 0,
    Sine = 1,
    /// Rises until the width breakpoint, then falls
    Triangle = 2,
    /// Falling saw
    Saw = 3,
    /// Rising saw
    Ramp = 4,
    /// Fixed 50% pulse
    Square = 5,
    /// Glides toward a new random target every cycle
    Random = 6,
    /// New random step every cycle
    SampleHold = 7,
}

impl Waveform {
    pub const ALL: [Waveform; 8] = [
        Waveform::Gate,
        Waveform::Sine,
        Waveform::Triangle,
        Waveform::Saw,
        Waveform::Ramp,
        Waveform::Square,
        Waveform::Random,
        Waveform::SampleHold,
    ];

    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    fn swings(self) -> bool {
        matches!(self, Waveform::Gate | Waveform::Square)
    }
}

/// Configuration and published value of one output
struct OutputControl {
    mode: AtomicU32,
    waveform: AtomicU32,
    division: AtomicU32,
    level: AtomicF32,
    offset: AtomicF32,
    phase: AtomicF32,
    width: AtomicF32,
    destination: AtomicU32,
    mod_amount: AtomicF32,
    muted: AtomicBool,
    slow: AtomicBool,
    /// Written by the audio thread
    value: AtomicF32,
}

impl Default for OutputControl {
    fn default() -> Self {
        Self {
            mode: AtomicU32::new(ClockMode::Lfo as u32),
            waveform: AtomicU32::new(Waveform::Gate as u32),
            division: AtomicU32::new(DEFAULT_DIVISION as u32),
            level: AtomicF32::new(1.0),
            offset: AtomicF32::new(0.0),
            phase: AtomicF32::new(0.0),
            width: AtomicF32::new(0.5),
            destination: AtomicU32::new(ModDestination::None as u32),
            mod_amount: AtomicF32::new(0.0),
            muted: AtomicBool::new(false),
            slow: AtomicBool::new(false),
            value: AtomicF32::new(0.0),
        }
    }
}

/// Snapshot of one output's configuration for a block
#[derive(Debug, Clone, Copy)]
struct OutputSettings {
    mode: ClockMode,
    waveform: Waveform,
    rate_per_beat: f64,
    level: f32,
    offset: f32,
    phase: f64,
    width: f64,
    destination: ModDestination,
    mod_amount: f32,
    muted: bool,
}

/// Clock state shared between control threads and the audio thread
pub struct ClockControl {
    running: AtomicBool,
    bpm: AtomicF32,
    start_sample: AtomicU64,
    /// Bumped whenever the accumulators must be re-aligned
    generation: AtomicU64,
    swing: AtomicF32,
    outputs: [OutputControl; NUM_CLOCK_OUTPUTS],
}

impl ClockControl {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            bpm: AtomicF32::new(120.0),
            start_sample: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            swing: AtomicF32::new(0.0),
            outputs: std::array::from_fn(|_| OutputControl::default()),
        }
    }

    fn output(&self, index: usize) -> Option<&OutputControl> {
        self.outputs.get(index)
    }

    pub fn set_bpm(&self, bpm: f32) -> bool {
        if !bpm.is_finite() {
            return false;
        }
        self.bpm.store(bpm.clamp(MIN_BPM, MAX_BPM), Ordering::Relaxed);
        true
    }

    pub fn bpm(&self) -> f32 {
        self.bpm.load(Ordering::Relaxed)
    }

    /// Start or stop the clock; starting aligns phase to `now`
    pub fn set_running(&self, running: bool, now: u64) {
        if running {
            if !self.running.load(Ordering::Acquire) {
                self.start_sample.store(now, Ordering::Relaxed);
                self.generation.fetch_add(1, Ordering::Release);
                self.running.store(true, Ordering::Release);
            }
        } else {
            self.running.store(false, Ordering::Release);
            // Pairs with the fence in `MasterClock::process`
            fence(Ordering::SeqCst);
            for output in &self.outputs {
                output.value.store(0.0, Ordering::Relaxed);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Re-align every accumulator as if the clock started at `sample`
    pub fn set_start_sample(&self, sample: u64) {
        self.start_sample.store(sample, Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn start_sample(&self) -> u64 {
        self.start_sample.load(Ordering::Relaxed)
    }

    /// Normalized swing (0.0-1.0 → 0-25% of a cycle)
    pub fn set_swing(&self, swing: f32) -> bool {
        if !swing.is_finite() {
            return false;
        }
        self.swing.store(swing.clamp(0.0, 1.0), Ordering::Relaxed);
        true
    }

    pub fn set_output_mode(&self, index: usize, mode: ClockMode) -> bool {
        self.output(index)
            .map(|o| o.mode.store(mode as u32, Ordering::Relaxed))
            .is_some()
    }

    pub fn set_output_waveform(&self, index: usize, waveform: Waveform) -> bool {
        self.output(index)
            .map(|o| o.waveform.store(waveform as u32, Ordering::Relaxed))
            .is_some()
    }

    /// Division index into [`CLOCK_DIVISIONS`]
    pub fn set_output_division(&self, index: usize, division: usize) -> bool {
        if division >= CLOCK_DIVISIONS.len() {
            return false;
        }
        self.output(index)
            .map(|o| o.division.store(division as u32, Ordering::Relaxed))
            .is_some()
    }

    /// Output level (0.0-1.0)
    pub fn set_output_level(&self, index: usize, level: f32) -> bool {
        self.store_float(index, level, 0.0, 1.0, |o| &o.level)
    }

    /// Output offset (-1.0..1.0)
    pub fn set_output_offset(&self, index: usize, offset: f32) -> bool {
        self.store_float(index, offset, -1.0, 1.0, |o| &o.offset)
    }

    /// Phase offset applied when the accumulator is re-aligned (0.0-1.0)
    pub fn set_output_phase(&self, index: usize, phase: f32) -> bool {
        self.store_float(index, phase, 0.0, 1.0, |o| &o.phase)
    }

    /// Pulse width / triangle breakpoint (0.0-1.0)
    pub fn set_output_width(&self, index: usize, width: f32) -> bool {
        self.store_float(index, width, 0.0, 1.0, |o| &o.width)
    }

    pub fn set_output_destination(&self, index: usize, destination: ModDestination) -> bool {
        self.output(index)
            .map(|o| o.destination.store(destination as u32, Ordering::Relaxed))
            .is_some()
    }

    /// Scale applied to the output before it reaches its destination (-1.0..1.0)
    pub fn set_output_mod_amount(&self, index: usize, amount: f32) -> bool {
        self.store_float(index, amount, -1.0, 1.0, |o| &o.mod_amount)
    }

    pub fn set_output_muted(&self, index: usize, muted: bool) -> bool {
        self.output(index)
            .map(|o| o.muted.store(muted, Ordering::Relaxed))
            .is_some()
    }

    /// Slow mode runs the output at a quarter of its rate
    pub fn set_output_slow(&self, index: usize, slow: bool) -> bool {
        self.output(index)
            .map(|o| o.slow.store(slow, Ordering::Relaxed))
            .is_some()
    }

    /// Most recent value of an output (0.0 when stopped or out of range)
    pub fn output_value(&self, index: usize) -> f32 {
        self.output(index)
            .map(|o| o.value.load(Ordering::Relaxed))
            .unwrap_or(0.0)
    }

    fn store_float(
        &self,
        index: usize,
        value: f32,
        min: f32,
        max: f32,
        field: impl Fn(&OutputControl) -> &AtomicF32,
    ) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self.output(index) {
            Some(output) => {
                field(output).store(value.clamp(min, max), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    fn settings(&self, index: usize) -> OutputSettings {
        let o = &self.outputs[index];
        let division = (o.division.load(Ordering::Relaxed) as usize).min(CLOCK_DIVISIONS.len() - 1);
        let slow = if o.slow.load(Ordering::Relaxed) { SLOW_FACTOR } else { 1.0 };
        OutputSettings {
            mode: ClockMode::from_u32(o.mode.load(Ordering::Relaxed)).unwrap_or_default(),
            waveform: Waveform::from_u32(o.waveform.load(Ordering::Relaxed)).unwrap_or_default(),
            rate_per_beat: CLOCK_DIVISIONS[division] * slow,
            level: o.level.load(Ordering::Relaxed),
            offset: o.offset.load(Ordering::Relaxed),
            phase: o.phase.load(Ordering::Relaxed) as f64,
            width: o.width.load(Ordering::Relaxed) as f64,
            destination: ModDestination::from_u32(o.destination.load(Ordering::Relaxed))
                .unwrap_or_default(),
            mod_amount: o.mod_amount.load(Ordering::Relaxed),
            muted: o.muted.load(Ordering::Relaxed),
        }
    }
}

impl Default for ClockControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Audio-thread state of one output
#[derive(Debug, Clone, Copy, Default)]
struct OutputState {
    accumulator: f64,
    cycles: u64,
    random_from: f32,
    random_to: f32,
    held: f32,
}

/// Audio-thread side of the clock
pub struct MasterClock {
    outputs: [OutputState; NUM_CLOCK_OUTPUTS],
    values: [f32; NUM_CLOCK_OUTPUTS],
    seen_generation: u64,
    was_running: bool,
    rng: SmallRng,
}

impl MasterClock {
    pub fn new() -> Self {
        Self {
            outputs: [OutputState::default(); NUM_CLOCK_OUTPUTS],
            values: [0.0; NUM_CLOCK_OUTPUTS],
            seen_generation: 0,
            was_running: false,
            rng: SmallRng::seed_from_u64(0xc10c_0001),
        }
    }

    /// Output values computed for the last block
    pub fn values(&self) -> &[f32; NUM_CLOCK_OUTPUTS] {
        &self.values
    }

    /// Advance the clock over `[block_start, block_start + frames)`
    ///
    /// Rebuilds `matrix` from the routed outputs; when the clock is stopped
    /// the matrix is left cleared.
    pub fn process(
        &mut self,
        control: &ClockControl,
        block_start: u64,
        frames: usize,
        sample_rate: f32,
        matrix: &mut ModulationMatrix,
    ) {
        matrix.reset();

        if !control.is_running() {
            if self.was_running {
                self.values = [0.0; NUM_CLOCK_OUTPUTS];
                self.was_running = false;
            }
            for output in &control.outputs {
                output.value.store(0.0, Ordering::Relaxed);
            }
            return;
        }

        let beats_per_sample = control.bpm() as f64 / 60.0 / sample_rate.max(1.0) as f64;
        let swing = control.swing.load(Ordering::Relaxed) as f64 * MAX_SWING;

        let generation = control.generation.load(Ordering::Acquire);
        if generation != self.seen_generation || !self.was_running {
            self.seen_generation = generation;
            let elapsed = block_start.saturating_sub(control.start_sample()) as f64;
            for (index, state) in self.outputs.iter_mut().enumerate() {
                let settings = control.settings(index);
                let position = settings.phase + elapsed * beats_per_sample * settings.rate_per_beat;
                state.accumulator = position.fract();
                state.cycles = position.floor() as u64;
            }
        }
        self.was_running = true;

        for index in 0..NUM_CLOCK_OUTPUTS {
            let settings = control.settings(index);
            let value = if settings.muted {
                0.0
            } else {
                let raw = Self::waveform_value(&self.outputs[index], &settings, swing);
                let raw = match settings.mode {
                    ClockMode::Lfo => raw,
                    ClockMode::Clock => (raw + 1.0) * 0.5,
                };
                (raw * settings.level + settings.offset).clamp(-1.0, 1.0)
            };

            self.values[index] = value;
            control.outputs[index].value.store(value, Ordering::Relaxed);
            matrix.add(settings.destination, value * settings.mod_amount);

            self.advance(index, settings.rate_per_beat * beats_per_sample * frames as f64);
        }

        // Stopped while this block was publishing: leave the outputs at zero
        fence(Ordering::SeqCst);
        if !control.is_running() {
            for output in &control.outputs {
                output.value.store(0.0, Ordering::Relaxed);
            }
        }
    }

    /// Raw bipolar waveform at the current accumulator
    fn waveform_value(state: &OutputState, settings: &OutputSettings, swing: f64) -> f32 {
        let mut p = state.accumulator;
        let width = settings.width.clamp(0.0, 1.0);

        // Odd cycles of pulse shapes start late by the swing amount
        if settings.waveform.swings() && swing > 0.0 && state.cycles % 2 == 1 {
            if p < swing {
                return -1.0;
            }
            p = (p - swing) / (1.0 - swing);
        }

        let value = match settings.waveform {
            Waveform::Gate => {
                if p < width {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sine => (TAU * p).sin(),
            Waveform::Triangle => {
                let w = width.clamp(0.001, 0.999);
                if p < w {
                    -1.0 + 2.0 * p / w
                } else {
                    1.0 - 2.0 * (p - w) / (1.0 - w)
                }
            }
            Waveform::Saw => 1.0 - 2.0 * p,
            Waveform::Ramp => 2.0 * p - 1.0,
            Waveform::Square => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Random => {
                let from = state.random_from as f64;
                from + (state.random_to as f64 - from) * p
            }
            Waveform::SampleHold => state.held as f64,
        };
        value as f32
    }

    fn advance(&mut self, index: usize, increment: f64) {
        let state = &mut self.outputs[index];
        state.accumulator += increment;
        if state.accumulator >= 1.0 {
            let wraps = state.accumulator.floor();
            state.accumulator -= wraps;
            state.cycles = state.cycles.wrapping_add(wraps as u64);

            state.random_from = state.random_to;
            state.random_to = self.rng.gen_range(-1.0..=1.0);
            state.held = self.rng.gen_range(-1.0..=1.0);
        }
    }
}

impl Default for MasterClock {
    fn default() -> Self {
        Self::new()
    }
}
