//! Audio engine - event scheduling, voices, mixing, clock, recording
//!
//! - [`Engine`]: the explicit engine object behind the C API
//! - Event queue: note events scheduled at absolute sample times
//! - Mixer: 8 channel strips, two aux sends, master bus
//! - Master clock: 8 LFO/clock outputs driving the modulation matrix
//! - Recording into reels, background rendering into a multi-channel ring

mod cache;
mod clock;
mod command;
mod engine;
mod events;
pub(crate) mod gc;
mod micro_delay;
mod mixer;
mod modulation;
mod recording;
mod render;
mod ring;
mod spin;
mod voices;
mod worker;

pub use cache::{MAX_CACHED_FRAMES, MAX_CACHE_ATTEMPTS};
pub use clock::{ClockControl, ClockMode, Waveform, CLOCK_DIVISIONS, DEFAULT_DIVISION, MAX_BPM, MIN_BPM};
pub use engine::*;
pub use events::ScheduledNoteEvent;
pub use modulation::ModDestination;
pub use recording::{RecordingMode, RecordingSource};
pub use ring::MultiChannelRing;
pub use voices::VoiceAllocator;
