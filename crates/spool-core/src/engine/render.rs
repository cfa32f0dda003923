//! Per-block render pipeline
//!
//! [`RenderCore`] owns everything the audio thread mutates: sound sources,
//! reels, the voice allocator, mixer, effects, clock state and every
//! scratch buffer. One call to [`RenderCore::render_block`] runs:
//!
//! ```text
//! structural commands → clock + modulation → parameters
//!   → sources (split at each event's frame) → external input → recording
//!   → mixer → send effects → master gain → filter → soft clip → meters
//! ```
//!
//! Shared state the control side writes lives in [`EngineControls`] and is
//! read once per block.

use std::sync::atomic::Ordering;

use basedrop::Owned;

use super::clock::{ClockControl, MasterClock};
use super::command::EngineCommand;
use super::events::ScheduledNoteEvent;
use super::mixer::{MixBuses, Mixer};
use super::modulation::{ModDestination, ModulationMatrix};
use super::recording::{RecordInputs, Recorder, RecordingControl};
use super::voices::VoiceAllocator;
use crate::config::EngineConfig;
use crate::dsp::{enable_flush_to_zero, soft_clip};
use crate::effect::{Effect, FilterModel, MasterFilter, Reverb, SoftClipper, TapeDelay};
use crate::effect::{reverb, tape_delay};
use crate::engine::gc::gc_handle;
use crate::params::{ParamId, ParameterStore, MAX_PARAM_SLOTS};
use crate::source::{BasicVoice, ReelBank, ReelPlayer, RenderContext, Silence, SoundSource, SourceParam};
use crate::types::{
    AtomicF32, Channel, StereoBuffer, StereoSample, TargetMask, MAX_BLOCK_SIZE, NUM_CHANNELS,
    NUM_POLY_VOICES, NUM_TRACKS,
};

/// Control-side state read by the audio thread once per block
pub struct EngineControls {
    pub params: ParameterStore,
    pub clock: ClockControl,
    pub recording: RecordingControl,
    /// Per-channel peak meters, written by the audio thread
    pub meters: [AtomicF32; NUM_CHANNELS],
}

impl EngineControls {
    pub fn new(reel_count: usize) -> Self {
        Self {
            params: ParameterStore::new(),
            clock: ClockControl::new(),
            recording: RecordingControl::new(reel_count),
            meters: std::array::from_fn(|_| AtomicF32::new(0.0)),
        }
    }
}

/// Audio input for one block besides the sources
pub enum ExternalInput<'a> {
    /// No external signal
    None,
    /// Interleaved host input with `channels` samples per frame
    Interleaved { samples: &'a [f32], channels: usize },
    /// Frames queued through `write_external_input`
    Queue(&'a mut rtrb::Consumer<StereoSample>),
}

type SourceSlot = Owned<Box<dyn SoundSource>>;

/// Sources attached to `channel` by default
fn default_sources(channel: Channel) -> Vec<SourceSlot> {
    let handle = gc_handle();
    let boxed = |source: Box<dyn SoundSource>| Owned::new(&handle, source);
    match channel {
        Channel::PolySynth => (0..NUM_POLY_VOICES)
            .map(|_| boxed(Box::new(BasicVoice::new())))
            .collect(),
        Channel::Track1 | Channel::Track2 | Channel::Track3 | Channel::Track4 => {
            let track = channel.index() - Channel::Track1.index();
            vec![boxed(Box::new(ReelPlayer::new(track)))]
        }
        _ => vec![boxed(Box::new(Silence))],
    }
}

/// Source parameter a [`ParamId`] controls, with the channel it lives on
fn source_param(id: ParamId, slot: usize) -> Option<(Channel, SourceParam)> {
    use ParamId::*;
    let target = match id {
        PolyHarmonics => (Channel::PolySynth, SourceParam::Harmonics),
        PolyTimbre => (Channel::PolySynth, SourceParam::Timbre),
        PolyMorph => (Channel::PolySynth, SourceParam::Morph),
        PolyLevel => (Channel::PolySynth, SourceParam::Level),
        ResonatorStructure => (Channel::Resonator, SourceParam::Structure),
        ResonatorBrightness => (Channel::Resonator, SourceParam::Brightness),
        ResonatorDamping => (Channel::Resonator, SourceParam::Damping),
        ResonatorPosition => (Channel::Resonator, SourceParam::Position),
        DrumTone => (Channel::DrumBank, SourceParam::Tone),
        DrumDecay => (Channel::DrumBank, SourceParam::Decay),
        SamplerPitch => (Channel::Sampler, SourceParam::Pitch),
        TrackSpeed => (Channel::track(slot)?, SourceParam::Speed),
        TrackLevel => (Channel::track(slot)?, SourceParam::Level),
        _ => return None,
    };
    Some(target)
}

/// Everything the audio thread owns
pub struct RenderCore {
    sample_rate: f32,
    bpm: f32,
    /// Smoothers snap to their first targets instead of ramping from defaults
    fresh: bool,

    sources: [Vec<SourceSlot>; NUM_CHANNELS],
    reels: ReelBank,
    allocator: VoiceAllocator<NUM_POLY_VOICES>,

    mixer: Mixer,
    delay: TapeDelay,
    reverb: Reverb,
    filter: MasterFilter,
    clipper: SoftClipper,

    clock: MasterClock,
    modulation: ModulationMatrix,
    recorder: Recorder,

    scratch: [StereoBuffer; NUM_CHANNELS],
    channel_out: [StereoBuffer; NUM_CHANNELS],
    external: StereoBuffer,
    master: StereoBuffer,
    aux_a: StereoBuffer,
    aux_b: StereoBuffer,

    /// Last value forwarded per parameter slot (NaN = never)
    applied: Vec<f32>,
}

impl RenderCore {
    /// Allocate every buffer for `sample_rate`
    pub fn new(config: &EngineConfig, sample_rate: f32, clipper: SoftClipper) -> Self {
        let reel_frames = (config.max_loop_seconds * sample_rate).round() as usize;
        let buffer = || StereoBuffer::with_capacity(MAX_BLOCK_SIZE);

        Self {
            sample_rate,
            bpm: f32::NAN,
            fresh: true,
            sources: std::array::from_fn(|i| default_sources(Channel::ALL[i])),
            reels: ReelBank::with_capacity(config.reel_count, reel_frames),
            allocator: VoiceAllocator::new(),
            mixer: Mixer::new(config.max_micro_delay_samples),
            delay: TapeDelay::new(sample_rate),
            reverb: Reverb::new(sample_rate),
            filter: MasterFilter::new(sample_rate),
            clipper,
            clock: MasterClock::new(),
            modulation: ModulationMatrix::new(),
            recorder: Recorder::new(reel_frames),
            scratch: std::array::from_fn(|_| buffer()),
            channel_out: std::array::from_fn(|_| buffer()),
            external: buffer(),
            master: buffer(),
            aux_a: buffer(),
            aux_b: buffer(),
            applied: vec![f32::NAN; ParamId::COUNT * MAX_PARAM_SLOTS],
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Mixed, filtered and clipped master of the last block
    pub fn master(&self) -> &StereoBuffer {
        &self.master
    }

    /// Soft-clipped post-strip signal of every channel for the last block
    pub fn channel_outputs(&self) -> &[StereoBuffer; NUM_CHANNELS] {
        &self.channel_out
    }

    pub fn reels(&self) -> &ReelBank {
        &self.reels
    }

    pub fn allocator(&self) -> &VoiceAllocator<NUM_POLY_VOICES> {
        &self.allocator
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    pub fn filter(&self) -> &MasterFilter {
        &self.filter
    }

    /// Render `frames` frames starting at `block_start`
    ///
    /// `events` must be due within the block (as returned by
    /// `drain_due_before`). `frames` must not exceed [`MAX_BLOCK_SIZE`].
    pub fn render_block(
        &mut self,
        controls: &EngineControls,
        commands: &mut rtrb::Consumer<EngineCommand>,
        events: &[ScheduledNoteEvent],
        external: ExternalInput<'_>,
        block_start: u64,
        frames: usize,
    ) {
        let frames = frames.min(MAX_BLOCK_SIZE);
        enable_flush_to_zero();

        self.apply_commands(commands);

        self.clock.process(
            &controls.clock,
            block_start,
            frames,
            self.sample_rate,
            &mut self.modulation,
        );
        self.apply_parameters(&controls.params);
        self.apply_modulation();

        let bpm = controls.clock.bpm();
        if bpm != self.bpm {
            self.bpm = bpm;
            self.delay.set_tempo(bpm);
            self.reverb.set_tempo(bpm);
        }

        for buffer in self
            .scratch
            .iter_mut()
            .chain(self.channel_out.iter_mut())
            .chain([&mut self.external, &mut self.master, &mut self.aux_a, &mut self.aux_b])
        {
            buffer.set_len_from_capacity(frames);
            buffer.fill_silence();
        }

        // Sources render up to each event's frame, then the event applies
        let mut cursor = 0;
        for event in events {
            let offset = (event.sample_time.saturating_sub(block_start) as usize).min(frames);
            if offset > cursor {
                self.render_sources(cursor, offset);
                cursor = offset;
            }
            self.dispatch(event);
        }
        if cursor < frames {
            self.render_sources(cursor, frames);
        }

        self.read_external(external, frames);

        self.recorder.process(
            &controls.recording,
            &mut self.reels,
            RecordInputs {
                channels: &self.scratch,
                external: &self.external,
            },
        );

        self.mixer.process(
            &mut self.scratch,
            MixBuses {
                channel_out: &mut self.channel_out,
                master: &mut self.master,
                aux_a: &mut self.aux_a,
                aux_b: &mut self.aux_b,
            },
            self.sample_rate,
        );

        self.delay.process(&mut self.aux_a);
        self.reverb.process(&mut self.aux_b);
        for ((m, a), b) in self
            .master
            .iter_mut()
            .zip(self.aux_a.iter())
            .zip(self.aux_b.iter())
        {
            *m += *a + *b;
        }

        self.mixer.apply_master_gain(&mut self.master, self.sample_rate);
        self.filter.process(&mut self.master);
        self.clipper.process(&mut self.master);

        for buffer in self.channel_out.iter_mut() {
            for sample in buffer.iter_mut() {
                sample.left = soft_clip(sample.left);
                sample.right = soft_clip(sample.right);
            }
        }

        for (channel, meter) in controls.meters.iter().enumerate() {
            let peak = self.mixer.strip(channel).map(|s| s.peak()).unwrap_or(0.0);
            meter.store(peak, Ordering::Relaxed);
        }
    }

    fn apply_commands(&mut self, commands: &mut rtrb::Consumer<EngineCommand>) {
        while let Ok(command) = commands.pop() {
            match command {
                EngineCommand::SetSource {
                    channel,
                    voice,
                    source,
                } => {
                    if let Some(slot) = self.sources.get_mut(channel).and_then(|v| v.get_mut(voice)) {
                        // The replaced source is freed on the collector thread
                        drop(std::mem::replace(slot, source));
                        if channel == Channel::PolySynth.index() {
                            self.allocator.free_slot(voice);
                        }
                        // Resend every parameter so the new source starts in sync
                        self.applied.fill(f32::NAN);
                    }
                }
                EngineCommand::LoadReel { index, reel } => {
                    drop(self.reels.replace(index, reel));
                }
                EngineCommand::AllNotesOff => {
                    for source in self.sources.iter_mut().flatten() {
                        source.reset();
                    }
                    self.allocator.reset();
                }
            }
        }
    }

    fn apply_parameters(&mut self, params: &ParameterStore) {
        for id in ParamId::ALL {
            let bias = ModDestination::for_effect_param(id).map(|d| self.modulation.get(d));
            for slot in 0..id.slot_count() {
                let mut value = params.get(id, slot);
                if let Some(bias) = bias {
                    value = (value + bias).clamp(0.0, 1.0);
                }
                let key = id.index() * MAX_PARAM_SLOTS + slot;
                if self.applied[key] == value {
                    continue;
                }
                self.applied[key] = value;
                self.apply_parameter(id, slot, value);
            }
        }

        if self.fresh {
            self.mixer.reset();
            self.fresh = false;
        }
    }

    fn apply_parameter(&mut self, id: ParamId, slot: usize, value: f32) {
        use ParamId::*;
        match id {
            ChannelGain | ChannelPan | ChannelSendA | ChannelSendB | ChannelMute | ChannelSolo
            | ChannelMicroDelay => {
                let Some(strip) = self.mixer.strip_mut(slot) else {
                    return;
                };
                match id {
                    ChannelGain => strip.set_gain(value),
                    ChannelPan => strip.set_pan(value),
                    ChannelSendA => strip.set_send_a(value),
                    ChannelSendB => strip.set_send_b(value),
                    ChannelMute => strip.set_muted(value >= 0.5),
                    ChannelSolo => strip.set_solo(value >= 0.5),
                    _ => strip.set_micro_delay(value),
                }
            }
            MasterGain => self.mixer.set_master_gain(value),

            DelayTime => self.delay.set_param(tape_delay::PARAM_TIME, value),
            DelayFeedback => self.delay.set_param(tape_delay::PARAM_FEEDBACK, value),
            DelayMix => self.delay.set_param(tape_delay::PARAM_MIX, value),
            DelayTone => self.delay.set_param(tape_delay::PARAM_TONE, value),
            DelaySync => self.delay.set_param(tape_delay::PARAM_SYNC, value),
            DelayDivision => self.delay.set_param(tape_delay::PARAM_DIVISION, value),
            DelayHeadMode => self.delay.set_param(tape_delay::PARAM_HEAD_MODE, value),
            DelayWow => self.delay.set_param(tape_delay::PARAM_WOW, value),
            DelayFlutter => self.delay.set_param(tape_delay::PARAM_FLUTTER, value),

            ReverbSize => self.reverb.set_param(reverb::PARAM_SIZE, value),
            ReverbDamping => self.reverb.set_param(reverb::PARAM_DAMPING, value),
            ReverbWidth => self.reverb.set_param(reverb::PARAM_WIDTH, value),
            ReverbMix => self.reverb.set_param(reverb::PARAM_MIX, value),

            FilterCutoff => self.filter.set_cutoff(value),
            FilterResonance => self.filter.set_resonance(value),
            ParamId::FilterModel => {
                self.filter.set_model(crate::effect::FilterModel::from_normalized(value))
            }

            _ => {
                if let Some((channel, param)) = source_param(id, slot) {
                    for source in self.sources[channel.index()].iter_mut() {
                        source.set_parameter(param, value);
                    }
                }
            }
        }
    }

    /// Push the accumulated modulation to every source destination
    ///
    /// Every destination is written each block, so a removed routing
    /// returns its target to zero.
    fn apply_modulation(&mut self) {
        for destination in ModDestination::ALL {
            let Some((channels, param)) = destination.source_target() else {
                continue;
            };
            let amount = self.modulation.get(destination);
            for channel in channels {
                for source in self.sources[channel.index()].iter_mut() {
                    source.set_modulation(param, amount);
                }
            }
        }
    }

    /// Render every channel's sources into `[start, end)` of its scratch buffer
    fn render_sources(&mut self, start: usize, end: usize) {
        let ctx = RenderContext {
            sample_rate: self.sample_rate,
            bpm: self.bpm,
            reels: &self.reels,
        };
        for (sources, scratch) in self.sources.iter_mut().zip(self.scratch.iter_mut()) {
            let out = &mut scratch.as_mut_slice()[start..end];
            for source in sources.iter_mut() {
                source.render(out, &ctx);
            }
        }
    }

    fn dispatch(&mut self, event: &ScheduledNoteEvent) {
        let mask = event.target_mask;
        let note = event.note;

        if mask.contains(TargetMask::POLY_SYNTH) {
            let voices = &mut self.sources[Channel::PolySynth.index()];
            if event.is_note_on {
                let slot = self.allocator.allocate(note, event.track_id);
                if let Some(voice) = voices.get_mut(slot) {
                    voice.note_on(note, event.velocity);
                }
            } else if let Some(slot) = self.allocator.release(note, event.track_id) {
                if let Some(voice) = voices.get_mut(slot) {
                    voice.note_off(note);
                }
            }
        }

        let direct = [
            (TargetMask::RESONATOR, Some(Channel::Resonator)),
            (TargetMask::DRUM, Some(Channel::DrumBank)),
            (TargetMask::SAMPLER, Some(Channel::Sampler)),
            (TargetMask::TRACK, Channel::track(event.track_id as usize % NUM_TRACKS)),
        ];
        for (bit, channel) in direct {
            let Some(channel) = channel.filter(|_| mask.contains(bit)) else {
                continue;
            };
            for source in self.sources[channel.index()].iter_mut() {
                if event.is_note_on {
                    source.note_on(note, event.velocity);
                } else {
                    source.note_off(note);
                }
            }
        }
    }

    fn read_external(&mut self, input: ExternalInput<'_>, frames: usize) {
        match input {
            ExternalInput::None => {}
            ExternalInput::Interleaved { samples, channels } => {
                if channels == 0 {
                    return;
                }
                for (i, out) in self.external.iter_mut().enumerate().take(frames) {
                    let base = i * channels;
                    let Some(left) = samples.get(base).copied() else {
                        break;
                    };
                    let right = if channels > 1 {
                        samples.get(base + 1).copied().unwrap_or(left)
                    } else {
                        left
                    };
                    *out = StereoSample::new(left, right);
                }
            }
            ExternalInput::Queue(queue) => {
                for out in self.external.iter_mut().take(frames) {
                    match queue.pop() {
                        Ok(sample) => *out = sample,
                        Err(_) => break,
                    }
                }
            }
        }
    }

    /// Currently selected filter model
    pub fn filter_model(&self) -> FilterModel {
        self.filter.model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::command::command_channel;
    use crate::engine::recording::{RecordingMode, RecordingSource};
    use crate::source::Reel;

    const SR: f32 = 48000.0;

    fn core() -> (RenderCore, EngineControls) {
        let config = EngineConfig {
            max_loop_seconds: 1.0,
            reel_count: 4,
            ..EngineConfig::default()
        };
        (
            RenderCore::new(&config, SR, SoftClipper::new()),
            EngineControls::new(config.reel_count),
        )
    }

    /// Emits one unit sample on the first frame after note-on
    struct Impulse {
        pending: bool,
    }

    impl SoundSource for Impulse {
        fn render(&mut self, out: &mut [StereoSample], _ctx: &RenderContext<'_>) {
            if self.pending {
                if let Some(first) = out.first_mut() {
                    *first += StereoSample::mono(1.0);
                    self.pending = false;
                }
            }
        }

        fn note_on(&mut self, _note: u8, _velocity: u8) {
            self.pending = true;
        }

        fn note_off(&mut self, _note: u8) {}

        fn reset(&mut self) {
            self.pending = false;
        }
    }

    fn first_nonzero(buffer: &StereoBuffer) -> Option<usize> {
        buffer.iter().position(|s| s.left != 0.0 || s.right != 0.0)
    }

    #[test]
    fn test_event_fires_at_its_frame() {
        let (mut core, controls) = core();
        let (_tx, mut rx) = command_channel();
        let events = [ScheduledNoteEvent::note_on(60, 100, 1000, TargetMask::POLY_SYNTH)];

        core.render_block(&controls, &mut rx, &[], ExternalInput::None, 512, 512);
        assert_eq!(first_nonzero(core.master()), None);

        core.render_block(&controls, &mut rx, &events, ExternalInput::None, 512, 512);
        assert_eq!(first_nonzero(core.master()), Some(488));
        assert_eq!(first_nonzero(&core.channel_outputs()[0]), Some(488));
    }

    #[test]
    fn test_set_source_applies_at_block_start() {
        let (mut core, controls) = core();
        let (mut tx, mut rx) = command_channel();
        let impulse = Owned::new(
            &gc_handle(),
            Box::new(Impulse { pending: false }) as Box<dyn SoundSource>,
        );
        assert!(tx
            .push(EngineCommand::SetSource {
                channel: Channel::Sampler.index(),
                voice: 0,
                source: impulse,
            })
            .is_ok());

        let events = [ScheduledNoteEvent::note_on(60, 100, 10, TargetMask::SAMPLER)];
        core.render_block(&controls, &mut rx, &events, ExternalInput::None, 0, 64);
        assert_eq!(first_nonzero(&core.channel_outputs()[7]), Some(10));
    }

    #[test]
    fn test_track_mask_routes_by_track_id() {
        let (mut core, controls) = core();
        let (mut tx, mut rx) = command_channel();
        let impulse = Owned::new(
            &gc_handle(),
            Box::new(Impulse { pending: false }) as Box<dyn SoundSource>,
        );
        assert!(tx
            .push(EngineCommand::SetSource {
                channel: Channel::Track3.index(),
                voice: 0,
                source: impulse,
            })
            .is_ok());

        // Track id 6 wraps to track 2 (channel Track3)
        let events = [ScheduledNoteEvent::note_on(60, 100, 0, TargetMask::TRACK).with_track(6)];
        core.render_block(&controls, &mut rx, &events, ExternalInput::None, 0, 32);
        assert_eq!(first_nonzero(&core.channel_outputs()[Channel::Track3.index()]), Some(0));
        assert_eq!(first_nonzero(core.master()), Some(0));
    }

    #[test]
    fn test_bypassed_sends_contribute_nothing() {
        let (mut core, controls) = core();
        let (_tx, mut rx) = command_channel();
        controls.params.set(ParamId::DelayMix, 0, 0.0);
        controls.params.set(ParamId::ReverbMix, 0, 0.0);
        controls.params.set(ParamId::ChannelSendA, 0, 1.0);
        controls.params.set(ParamId::ChannelSendB, 0, 1.0);
        // Dry path muted: anything left on the master came from the sends
        controls.params.set(ParamId::ChannelMute, 0, 1.0);

        let events = [ScheduledNoteEvent::note_on(60, 127, 0, TargetMask::POLY_SYNTH)];
        core.render_block(&controls, &mut rx, &events, ExternalInput::None, 0, 512);
        for block in 1..40u64 {
            core.render_block(&controls, &mut rx, &[], ExternalInput::None, block * 512, 512);
            assert_eq!(first_nonzero(core.master()), None);
        }
    }

    #[test]
    fn test_external_input_is_recorded() {
        let (mut core, controls) = core();
        let (_tx, mut rx) = command_channel();
        let (mut ext_tx, mut ext_rx) = rtrb::RingBuffer::<StereoSample>::new(256);
        for _ in 0..100 {
            ext_tx.push(StereoSample::mono(0.5)).unwrap();
        }

        assert!(controls
            .recording
            .start(2, RecordingMode::OneShot, RecordingSource::External, 0));
        core.render_block(&controls, &mut rx, &[], ExternalInput::Queue(&mut ext_rx), 0, 128);
        controls.recording.stop(2);
        core.render_block(&controls, &mut rx, &[], ExternalInput::None, 128, 128);

        let reel = core.reels().get(2).unwrap();
        assert_eq!(reel.read(99), StereoSample::mono(0.5));
        assert_eq!(reel.read(100), StereoSample::silence());
        assert_eq!(reel.splice().len(), 128);
    }

    #[test]
    fn test_filter_model_change_recreates_once() {
        let (mut core, controls) = core();
        let (_tx, mut rx) = command_channel();
        controls.params.set(ParamId::FilterModel, 0, 0.5);
        core.render_block(&controls, &mut rx, &[], ExternalInput::None, 0, 64);
        let generation = core.filter().generation();
        assert_eq!(core.filter_model(), FilterModel::ZeroDelay);

        controls.params.set(ParamId::FilterCutoff, 0, 0.3);
        controls.params.set(ParamId::FilterResonance, 0, 0.4);
        core.render_block(&controls, &mut rx, &[], ExternalInput::None, 64, 64);
        assert_eq!(core.filter().generation(), generation);
    }

    #[test]
    fn test_all_notes_off_frees_voices() {
        let (mut core, controls) = core();
        let (mut tx, mut rx) = command_channel();
        let events: Vec<_> = (0..3)
            .map(|i| ScheduledNoteEvent::note_on(60 + i, 100, 0, TargetMask::POLY_SYNTH))
            .collect();
        core.render_block(&controls, &mut rx, &events, ExternalInput::None, 0, 64);
        assert_eq!(core.allocator().active_count(), 3);

        assert!(tx.push(EngineCommand::AllNotesOff).is_ok());
        core.render_block(&controls, &mut rx, &[], ExternalInput::None, 64, 64);
        assert_eq!(core.allocator().active_count(), 0);
        assert_eq!(first_nonzero(core.master()), None);
    }
}
