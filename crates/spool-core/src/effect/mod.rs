//! Effects - send effects and master bus processing
//!
//! - [`TapeDelay`]: three-head tape delay on send bus A
//! - [`Reverb`]: Freeverb-style reverb on send bus B
//! - [`MasterFilter`]: selectable resonant low-pass on the master bus
//! - [`SoftClipper`]: final `tanh` stage with a clip indicator
//!
//! Send effects implement [`Effect`] and return only their wet signal
//! scaled by their mix parameter; the dry send is never returned.

mod ladder;
pub mod reverb;
mod soft_clip;
pub mod tape_delay;

pub use ladder::{FilterModel, MasterFilter};
pub use reverb::Reverb;
pub use soft_clip::SoftClipper;
pub use tape_delay::{HeadMode, TapeDelay, DELAY_DIVISIONS};

use crate::params::{ParamInfo, ParamValue};
use crate::types::StereoBuffer;

/// Information about an effect
#[derive(Debug, Clone)]
pub struct EffectInfo {
    /// Effect name for display
    pub name: String,
    /// Effect category (e.g., "Delay", "Reverb")
    pub category: String,
    /// Parameter descriptions, in parameter index order
    pub params: Vec<ParamInfo>,
}

impl EffectInfo {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            params: Vec::new(),
        }
    }

    /// Add a parameter to this effect
    pub fn with_param(mut self, param: ParamInfo) -> Self {
        self.params.push(param);
        self
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

/// A send effect
///
/// All parameters are normalized (0.0-1.0). Processing is in place and
/// must not allocate.
pub trait Effect: Send {
    /// Replace the buffer with the effect's wet output × mix
    fn process(&mut self, buffer: &mut StereoBuffer);

    /// Get information about this effect (name, category, parameters)
    fn info(&self) -> &EffectInfo;

    /// Get the current parameter values
    fn get_params(&self) -> &[ParamValue];

    /// Set a parameter by index (normalized value 0.0-1.0)
    fn set_param(&mut self, index: usize, value: f32);

    /// Current tempo, for tempo-synced effects
    fn set_tempo(&mut self, _bpm: f32) {}

    /// Clear all internal state (delay lines, filters)
    fn reset(&mut self);
}

/// Parameter storage shared by the built-in effects
#[derive(Debug, Clone)]
pub struct EffectBase {
    info: EffectInfo,
    params: Vec<ParamValue>,
}

impl EffectBase {
    pub fn new(info: EffectInfo) -> Self {
        let params: Vec<ParamValue> = info
            .params
            .iter()
            .map(|p| ParamValue::from_normalized(p.default, p))
            .collect();
        Self { info, params }
    }

    pub fn info(&self) -> &EffectInfo {
        &self.info
    }

    pub fn get_params(&self) -> &[ParamValue] {
        &self.params
    }

    /// Set a parameter value; out-of-range indices are ignored
    pub fn set_param(&mut self, index: usize, value: f32) {
        if let (Some(param), Some(info)) = (self.params.get_mut(index), self.info.params.get(index)) {
            *param = ParamValue::from_normalized(value, info);
        }
    }

    /// A parameter's mapped value
    pub fn param_actual(&self, index: usize) -> f32 {
        self.params.get(index).map(|p| p.actual).unwrap_or(0.0)
    }

    pub fn param_normalized(&self, index: usize) -> f32 {
        self.params.get(index).map(|p| p.normalized).unwrap_or(0.0)
    }

    /// Selected step of a stepped parameter
    pub fn param_step(&self, index: usize) -> usize {
        match (self.params.get(index), self.info.params.get(index)) {
            (Some(value), Some(info)) => info.curve.step_index(value.normalized),
            _ => 0,
        }
    }
}
