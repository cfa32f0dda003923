//! Engine - the explicit engine object and its public API
//!
//! All methods take `&self`, so one `Engine` (usually in an `Arc`) is shared
//! between the host audio callback, control threads and the processing
//! thread. Cross-thread state is either atomic ([`EngineControls`], sample
//! time, flags) or owned by the audio side behind a spin lock that audio
//! entry points only ever try for a bounded number of spins.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use basedrop::Owned;

use super::cache::{CachedRender, RenderCache, MAX_CACHED_FRAMES};
use super::clock::ClockControl;
use super::command::{command_channel, EngineCommand};
use super::events::{event_queue, EventConsumer, EventProducer, ScheduledNoteEvent};
use super::gc::gc_handle;
use super::recording::{RecordingMode, RecordingSource};
use super::render::{EngineControls, ExternalInput, RenderCore};
use super::ring::MultiChannelRing;
use super::spin::{SpinLock, SpinLockGuard};
use super::worker::{ChunkSource, ProcessingThread};
use crate::config::{EngineConfig, EVENT_QUEUE_CAPACITY};
use crate::effect::{FilterModel, SoftClipper};
use crate::error::{EngineError, EngineResult};
use crate::params::ParamId;
use crate::source::{Reel, SoundSource};
use crate::types::{
    Channel, StereoSample, TargetMask, MAX_BLOCK_SIZE, NUM_OUTPUT_CHANNELS, NUM_POLY_VOICES,
};

/// Spin attempts an audio entry point makes for the render core
pub const MAX_RENDER_SPINS: u32 = 64;

/// Frames of external input that can be queued ahead of rendering
const EXTERNAL_QUEUE_FRAMES: usize = MAX_BLOCK_SIZE * 4;

/// Everything only the rendering thread touches
struct AudioSide {
    events: EventConsumer,
    commands: rtrb::Consumer<EngineCommand>,
    external: rtrb::Consumer<StereoSample>,
    /// `None` until `initialize()`
    core: Option<RenderCore>,
}

/// State shared by the engine handle and the processing thread
struct EngineShared {
    config: EngineConfig,
    initialized: AtomicBool,
    sample_rate: AtomicU32,
    buffer_size: AtomicU32,
    /// Start of the next block to render
    sample_time: AtomicU64,
    /// Sample time of the last dropped-event warning
    drop_reported_at: AtomicU64,
    contention_logged: AtomicBool,

    controls: EngineControls,
    clip: Arc<AtomicBool>,

    events: EventProducer,
    commands: SpinLock<rtrb::Producer<EngineCommand>>,
    external: SpinLock<rtrb::Producer<StereoSample>>,
    audio: SpinLock<AudioSide>,

    ring: Arc<MultiChannelRing>,
    cache: RenderCache,
}

impl EngineShared {
    /// Bounded acquire of the audio side; logs the first failure
    fn try_audio(&self) -> Option<SpinLockGuard<'_, AudioSide>> {
        let guard = self.audio.try_lock_for(MAX_RENDER_SPINS);
        if guard.is_none() && !self.contention_logged.swap(true, Ordering::Relaxed) {
            log::warn!("Render core busy, emitting silence");
        }
        guard
    }

    /// Render one block of at most [`MAX_BLOCK_SIZE`] frames at the
    /// current sample time and advance it
    fn render_locked<'a>(
        &self,
        audio: &'a mut AudioSide,
        frames: usize,
        input: Option<(&[f32], usize)>,
    ) -> Option<&'a RenderCore> {
        let AudioSide {
            events,
            commands,
            external,
            core,
        } = audio;
        let core = core.as_mut()?;

        let frames = frames.min(MAX_BLOCK_SIZE);
        let start = self.sample_time.load(Ordering::Acquire);
        let due = events.drain_due_before(start, start + frames as u64);
        let external = match input {
            Some((samples, channels)) => ExternalInput::Interleaved { samples, channels },
            None => ExternalInput::Queue(external),
        };

        core.render_block(&self.controls, commands, due, external, start, frames);
        self.sample_time.store(start + frames as u64, Ordering::Release);
        Some(core)
    }

    /// Render `frames` into the cache in blocks
    fn render_into_cache(&self, cache: &mut CachedRender, sample_time: u64, frames: usize) -> bool {
        let Some(mut audio) = self.try_audio() else {
            return false;
        };

        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(MAX_BLOCK_SIZE);
            let Some(core) = self.render_locked(&mut audio, n, None) else {
                // Partially overwritten buffers no longer match the old key
                if done > 0 {
                    cache.invalidate();
                }
                return false;
            };

            for (pair, buffer) in core.channel_outputs().iter().enumerate() {
                let (left, right) = cache.channels.split_at_mut(pair * 2 + 1);
                buffer.to_channels(&mut left[pair * 2][done..done + n], &mut right[0][done..done + n]);
            }
            let [master_l, master_r] = &mut cache.master;
            core.master()
                .to_channels(&mut master_l[done..done + n], &mut master_r[done..done + n]);
            done += n;
        }

        cache.store_key(sample_time, frames);
        true
    }

    /// Serve a cached-render request
    ///
    /// Renders on a cache miss; falls back to the last valid render when
    /// the core is busy. Returns false (after `read` saw nothing) when no
    /// render could be served.
    fn with_render(
        &self,
        sample_time: u64,
        frames: usize,
        read: impl FnOnce(&CachedRender),
    ) -> bool {
        self.cache
            .with_cache(|cache| {
                if !cache.matches(sample_time, frames)
                    && !self.render_into_cache(cache, sample_time, frames)
                    && !cache.is_valid()
                {
                    return false;
                }
                read(cache);
                true
            })
            .unwrap_or(false)
    }
}

impl ChunkSource for EngineShared {
    fn render_chunk(&self, ring: &MultiChannelRing, frames: usize) -> bool {
        if !self.initialized.load(Ordering::Acquire) {
            return false;
        }
        let Some(mut audio) = self.try_audio() else {
            return false;
        };
        match self.render_locked(&mut audio, frames, None) {
            Some(core) => ring.push_stereo_pairs(core.channel_outputs()),
            None => false,
        }
    }
}

/// The synthesis and mixing engine
pub struct Engine {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<ProcessingThread>>,
}

impl Engine {
    /// Create an engine; nothing renders until [`Engine::initialize`]
    pub fn new(config: EngineConfig) -> Self {
        let config = config.validated();
        let (events_tx, events_rx) = event_queue(EVENT_QUEUE_CAPACITY);
        let (commands_tx, commands_rx) = command_channel();
        let (external_tx, external_rx) = rtrb::RingBuffer::new(EXTERNAL_QUEUE_FRAMES);
        let ring = Arc::new(MultiChannelRing::new(config.ring_capacity_frames));

        let shared = EngineShared {
            initialized: AtomicBool::new(false),
            sample_rate: AtomicU32::new(config.sample_rate),
            buffer_size: AtomicU32::new(config.buffer_size),
            sample_time: AtomicU64::new(0),
            drop_reported_at: AtomicU64::new(u64::MAX),
            contention_logged: AtomicBool::new(false),
            controls: EngineControls::new(config.reel_count),
            clip: Arc::new(AtomicBool::new(false)),
            events: events_tx,
            commands: SpinLock::new(commands_tx),
            external: SpinLock::new(external_tx),
            audio: SpinLock::new(AudioSide {
                events: events_rx,
                commands: commands_rx,
                external: external_rx,
                core: None,
            }),
            ring,
            cache: RenderCache::new(),
            config,
        };

        Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Allocate every render buffer for `sample_rate` and reset time to 0
    ///
    /// Parameters and clock settings persist across re-initialization.
    pub fn initialize(&self, sample_rate: u32, buffer_size: u32) -> EngineResult<()> {
        if !(8000..=384_000).contains(&sample_rate) {
            return Err(EngineError::InvalidSampleRate(sample_rate));
        }
        if buffer_size == 0 {
            return Err(EngineError::InvalidBufferSize(buffer_size));
        }

        self.stop_processing_thread();
        let shared = &self.shared;
        shared.initialized.store(false, Ordering::Release);

        // Allocate outside the lock
        let core = RenderCore::new(
            &shared.config,
            sample_rate as f32,
            SoftClipper::with_indicator(Arc::clone(&shared.clip)),
        );

        {
            let mut audio = shared.audio.lock();
            audio.core = Some(core);
            audio.events.reset();
            while audio.external.pop().is_ok() {}
        }

        shared.controls.recording.reset();
        shared.ring.reset();
        shared.cache.invalidate();
        shared.sample_rate.store(sample_rate, Ordering::Relaxed);
        shared.buffer_size.store(buffer_size, Ordering::Relaxed);
        shared.sample_time.store(0, Ordering::Release);
        shared.contention_logged.store(false, Ordering::Relaxed);
        if shared.controls.clock.is_running() {
            shared.controls.clock.set_start_sample(0);
        }
        shared.initialized.store(true, Ordering::Release);

        log::info!(
            "Engine initialized: {} Hz, {} frame buffer",
            sample_rate,
            buffer_size
        );
        Ok(())
    }

    /// Stop rendering and release the render buffers
    pub fn shutdown(&self) {
        self.stop_processing_thread();
        let shared = &self.shared;
        shared.initialized.store(false, Ordering::Release);
        {
            let mut audio = shared.audio.lock();
            audio.core = None;
            audio.events.reset();
        }
        shared.controls.recording.reset();
        shared.cache.invalidate();
        log::info!("Engine shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate.load(Ordering::Relaxed)
    }

    pub fn buffer_size(&self) -> u32 {
        self.shared.buffer_size.load(Ordering::Relaxed)
    }

    // ─── Rendering ───────────────────────────────────────────────────────

    /// Render the mixed master into interleaved `output`
    ///
    /// Channels 0/1 carry left/right; further channels are silent. `input`
    /// (interleaved, same channel count) feeds external recording. Emits
    /// silence when not initialized or when the render core is busy.
    pub fn process(
        &self,
        input: Option<&[f32]>,
        output: &mut [f32],
        num_channels: usize,
        num_frames: usize,
    ) {
        output.fill(0.0);
        if num_channels == 0 || !self.is_initialized() {
            return;
        }
        let frames = num_frames.min(output.len() / num_channels);
        let Some(mut audio) = self.shared.try_audio() else {
            return;
        };

        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(MAX_BLOCK_SIZE);
            let chunk_input = input.and_then(|samples| {
                let start = (done * num_channels).min(samples.len());
                let end = ((done + n) * num_channels).min(samples.len());
                (start < end).then(|| (&samples[start..end], num_channels))
            });
            let Some(core) = self.shared.render_locked(&mut audio, n, chunk_input) else {
                return;
            };

            let out = &mut output[done * num_channels..(done + n) * num_channels];
            for (frame, sample) in out.chunks_exact_mut(num_channels).zip(core.master().iter()) {
                frame[0] = sample.left;
                if num_channels > 1 {
                    frame[1] = sample.right;
                }
            }
            done += n;
        }
    }

    /// Render the unmixed per-channel outputs (stereo pair per channel)
    ///
    /// `outputs[2c]`/`outputs[2c + 1]` receive channel `c`'s left/right.
    /// Buffers beyond the 16 channels are silenced.
    pub fn process_multi_channel(&self, outputs: &mut [&mut [f32]], num_frames: usize) {
        for out in outputs.iter_mut() {
            out.fill(0.0);
        }
        if !self.is_initialized() {
            return;
        }
        let Some(mut audio) = self.shared.try_audio() else {
            return;
        };

        let mut done = 0;
        while done < num_frames {
            let n = (num_frames - done).min(MAX_BLOCK_SIZE);
            let Some(core) = self.shared.render_locked(&mut audio, n, None) else {
                return;
            };
            for (index, out) in outputs.iter_mut().enumerate().take(NUM_OUTPUT_CHANNELS) {
                let buffer = &core.channel_outputs()[index / 2];
                let end = (done + n).min(out.len());
                if done >= end {
                    continue;
                }
                for (o, sample) in out[done..end].iter_mut().zip(buffer.iter()) {
                    *o = if index % 2 == 0 { sample.left } else { sample.right };
                }
            }
            done += n;
        }
    }

    /// Cached render of the per-channel outputs for host taps
    ///
    /// Taps asking for the same `(sample_time, num_frames)` share one
    /// render. Returns false (with silent outputs) when nothing could be
    /// served.
    pub fn render_and_read_multi_channel(
        &self,
        sample_time: u64,
        outputs: &mut [&mut [f32]],
        num_frames: usize,
    ) -> bool {
        if !self.is_initialized() {
            for out in outputs.iter_mut() {
                out.fill(0.0);
            }
            return false;
        }
        if num_frames > MAX_CACHED_FRAMES {
            self.process_multi_channel(outputs, num_frames);
            return true;
        }

        let served = self.shared.with_render(sample_time, num_frames, |cache| {
            cache.copy_channels_to(outputs, num_frames)
        });
        if !served {
            for out in outputs.iter_mut() {
                out.fill(0.0);
            }
        }
        served
    }

    /// Cached render of the mixed master as two mono buffers
    pub fn render_and_read_legacy_bus(
        &self,
        sample_time: u64,
        left: &mut [f32],
        right: &mut [f32],
        num_frames: usize,
    ) -> bool {
        if !self.is_initialized() {
            left.fill(0.0);
            right.fill(0.0);
            return false;
        }
        if num_frames > MAX_CACHED_FRAMES {
            return self.process_master_split(left, right, num_frames);
        }

        let served = self.shared.with_render(sample_time, num_frames, |cache| {
            cache.copy_master_to(left, right, num_frames)
        });
        if !served {
            left.fill(0.0);
            right.fill(0.0);
        }
        served
    }

    /// Render the mixed master straight into two mono buffers, in blocks
    fn process_master_split(&self, left: &mut [f32], right: &mut [f32], num_frames: usize) -> bool {
        left.fill(0.0);
        right.fill(0.0);
        let frames = num_frames.min(left.len()).min(right.len());
        let Some(mut audio) = self.shared.try_audio() else {
            return false;
        };

        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(MAX_BLOCK_SIZE);
            let Some(core) = self.shared.render_locked(&mut audio, n, None) else {
                return false;
            };
            core.master()
                .to_channels(&mut left[done..done + n], &mut right[done..done + n]);
            done += n;
        }
        true
    }

    // ─── Events ──────────────────────────────────────────────────────────

    /// Play `note` on the poly synth as soon as possible
    pub fn note_on(&self, note: u8, velocity: u8) -> bool {
        let now = self.current_sample_time();
        self.schedule_note(ScheduledNoteEvent::note_on(note, velocity, now, TargetMask::POLY_SYNTH))
    }

    /// Release `note` on the poly synth as soon as possible
    pub fn note_off(&self, note: u8, velocity: u8) -> bool {
        let now = self.current_sample_time();
        self.schedule_note(ScheduledNoteEvent::note_off(note, velocity, now, TargetMask::POLY_SYNTH))
    }

    /// Schedule a note-on at an absolute sample time
    pub fn schedule_note_on_target(
        &self,
        note: u8,
        velocity: u8,
        sample_time: u64,
        target: TargetMask,
    ) -> bool {
        self.schedule_note(ScheduledNoteEvent::note_on(note, velocity, sample_time, target))
    }

    /// Schedule a note-off at an absolute sample time
    pub fn schedule_note_off_target(
        &self,
        note: u8,
        velocity: u8,
        sample_time: u64,
        target: TargetMask,
    ) -> bool {
        self.schedule_note(ScheduledNoteEvent::note_off(note, velocity, sample_time, target))
    }

    /// Enqueue a fully specified event
    ///
    /// Returns false, dropping the event, when the queue is full.
    pub fn schedule_note(&self, event: ScheduledNoteEvent) -> bool {
        let shared = &self.shared;
        if shared.events.enqueue(event) {
            return true;
        }
        let now = shared.sample_time.load(Ordering::Relaxed);
        if shared.drop_reported_at.swap(now, Ordering::Relaxed) != now {
            log::warn!(
                "Event queue full, dropping events ({} dropped so far)",
                shared.events.dropped_count()
            );
        }
        false
    }

    /// Discard every scheduled event not yet rendered
    pub fn clear_scheduled_notes(&self) {
        self.shared.events.clear();
    }

    /// Start of the next block to render
    pub fn current_sample_time(&self) -> u64 {
        self.shared.sample_time.load(Ordering::Acquire)
    }

    /// Events rejected because the queue was full
    pub fn dropped_event_count(&self) -> u64 {
        self.shared.events.dropped_count()
    }

    // ─── Parameters ──────────────────────────────────────────────────────

    /// Set a normalized parameter; false for a bad slot or non-finite value
    pub fn set_parameter(&self, id: ParamId, slot: usize, value: f32) -> bool {
        let params = &self.shared.controls.params;
        if id == ParamId::FilterModel && value.is_finite() {
            let previous = FilterModel::from_normalized(params.get(id, 0));
            let next = FilterModel::from_normalized(value.clamp(0.0, 1.0));
            if previous != next {
                log::info!("Master filter model: {} -> {}", previous.name(), next.name());
            }
        }
        params.set(id, slot, value)
    }

    /// Normalized parameter value (0.0 for a bad slot)
    pub fn parameter(&self, id: ParamId, slot: usize) -> f32 {
        self.shared.controls.params.get(id, slot)
    }

    // ─── Clock ───────────────────────────────────────────────────────────

    /// Clock configuration and output values
    pub fn clock(&self) -> &ClockControl {
        &self.shared.controls.clock
    }

    /// Start the clock at the current sample time, or stop it
    pub fn set_clock_running(&self, running: bool) {
        let now = self.current_sample_time();
        self.shared.controls.clock.set_running(running, now);
        log::info!("Clock {}", if running { "started" } else { "stopped" });
    }

    pub fn clock_output_value(&self, index: usize) -> f32 {
        self.shared.controls.clock.output_value(index)
    }

    // ─── Recording ───────────────────────────────────────────────────────

    pub fn start_recording(
        &self,
        reel: usize,
        mode: RecordingMode,
        source: RecordingSource,
        channel: usize,
    ) -> bool {
        self.shared.controls.recording.start(reel, mode, source, channel)
    }

    pub fn stop_recording(&self, reel: usize) -> bool {
        self.shared.controls.recording.stop(reel)
    }

    pub fn set_recording_feedback(&self, reel: usize, amount: f32) -> bool {
        self.shared.controls.recording.set_feedback(reel, amount)
    }

    pub fn is_recording(&self, reel: usize) -> bool {
        self.shared.controls.recording.is_recording(reel)
    }

    /// Write cursor of the latest session on `reel`, in frames
    pub fn recording_position(&self, reel: usize) -> u64 {
        self.shared.controls.recording.position(reel)
    }

    /// Queue external audio for recording
    ///
    /// Returns the number of frames accepted (the shorter slice bounds the
    /// write; frames beyond the queue's free space are dropped).
    pub fn write_external_input(&self, left: &[f32], right: &[f32]) -> usize {
        let mut queue = self.shared.external.lock();
        let mut written = 0;
        for (l, r) in left.iter().zip(right.iter()) {
            if queue.push(StereoSample::new(*l, *r)).is_err() {
                break;
            }
            written += 1;
        }
        written
    }

    // ─── Processing thread and ring buffer ───────────────────────────────

    /// Start rendering ahead into the ring buffer on a background thread
    pub fn start_processing_thread(&self) -> EngineResult<()> {
        if !self.is_initialized() {
            return Err(EngineError::NotInitialized);
        }
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.as_ref().is_some_and(|w| w.is_running()) {
            return Ok(());
        }

        let config = &self.shared.config;
        let chunk = config.worker_chunk_frames;
        let chunk_secs = chunk as f64 / self.sample_rate().max(1) as f64;
        let sleep = Duration::from_secs_f64(chunk_secs * config.worker_sleep_fraction as f64);

        let source: Arc<dyn ChunkSource> = Arc::clone(&self.shared) as Arc<dyn ChunkSource>;
        *worker = Some(ProcessingThread::spawn(
            source,
            Arc::clone(&self.shared.ring),
            chunk,
            sleep,
        )?);
        Ok(())
    }

    pub fn stop_processing_thread(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut thread) = worker.take() {
            thread.stop();
        }
    }

    pub fn is_processing_thread_running(&self) -> bool {
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        worker.as_ref().is_some_and(|w| w.is_running())
    }

    /// Read rendered frames of one mono output channel from the ring
    ///
    /// Zero-fills on underrun; returns the frames actually read.
    pub fn read_channel(&self, channel: usize, out: &mut [f32]) -> usize {
        self.shared.ring.read_channel(channel, out)
    }

    pub fn readable_frames(&self, channel: usize) -> usize {
        self.shared.ring.readable(channel)
    }

    // ─── Structure ───────────────────────────────────────────────────────

    /// Replace the sound source at `voice` on `channel`
    ///
    /// The poly synth has one source per voice; every other channel has a
    /// single source (voice 0). Applied at the start of the next block.
    pub fn set_source(&self, channel: Channel, voice: usize, source: Box<dyn SoundSource>) -> bool {
        let voices = if channel == Channel::PolySynth {
            NUM_POLY_VOICES
        } else {
            1
        };
        if voice >= voices {
            return false;
        }
        self.send_command(EngineCommand::SetSource {
            channel: channel.index(),
            voice,
            source: Owned::new(&gc_handle(), source),
        })
    }

    /// Replace reel `index`; applied at the start of the next block
    pub fn load_reel(&self, index: usize, reel: Box<dyn Reel>) -> bool {
        if index >= self.shared.config.reel_count {
            return false;
        }
        self.send_command(EngineCommand::LoadReel {
            index,
            reel: Owned::new(&gc_handle(), reel),
        })
    }

    /// Silence every source and free every voice
    pub fn all_notes_off(&self) -> bool {
        self.clear_scheduled_notes();
        self.send_command(EngineCommand::AllNotesOff)
    }

    fn send_command(&self, command: EngineCommand) -> bool {
        let pushed = self.shared.commands.lock().push(command).is_ok();
        if !pushed {
            log::warn!("Command queue full, command dropped");
        }
        pushed
    }

    // ─── Metering ────────────────────────────────────────────────────────

    /// Smoothed peak of `channel` (0.0 for a bad index)
    pub fn channel_peak(&self, channel: usize) -> f32 {
        self.shared
            .controls
            .meters
            .get(channel)
            .map(|m| m.load(Ordering::Relaxed))
            .unwrap_or(0.0)
    }

    /// Master clip indicator, raised by the audio thread
    ///
    /// Readers clear it after displaying it.
    pub fn clip_indicator(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shared.clip)
    }

    #[cfg(test)]
    fn with_core<R>(&self, f: impl FnOnce(&RenderCore) -> R) -> Option<R> {
        let audio = self.shared.audio.lock();
        audio.core.as_ref().map(f)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_processing_thread();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::Waveform;
    use crate::engine::modulation::ModDestination;
    use crate::source::{LoopReel, RenderContext, Splice};
    use crate::types::NUM_CHANNELS;
    use std::thread;
    use std::time::Instant;

    const SR: u32 = 48000;

    fn engine() -> Engine {
        let engine = Engine::new(EngineConfig {
            max_loop_seconds: 1.0,
            reel_count: 4,
            ring_capacity_frames: 2048,
            ..EngineConfig::default()
        });
        engine.initialize(SR, 512).unwrap();
        engine
    }

    fn render_stereo(engine: &Engine, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * 2];
        engine.process(None, &mut out, 2, frames);
        out
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

    #[test]
    fn test_uninitialized_renders_silence() {
        let engine = Engine::default();
        let mut out = vec![1.0; 64];
        engine.process(None, &mut out, 2, 32);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(engine.current_sample_time(), 0);
        assert!(engine.start_processing_thread().is_err());

        let mut left = [1.0f32; 16];
        let mut right = [1.0f32; 16];
        assert!(!engine.render_and_read_legacy_bus(0, &mut left, &mut right, 16));
        assert_eq!(left, [0.0; 16]);
    }

    #[test]
    fn test_initialize_validates_arguments() {
        let engine = Engine::default();
        assert_eq!(engine.initialize(10, 512), Err(EngineError::InvalidSampleRate(10)));
        assert_eq!(engine.initialize(SR, 0), Err(EngineError::InvalidBufferSize(0)));
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_note_fires_at_scheduled_frame() {
        let engine = engine();
        assert!(engine.schedule_note_on_target(60, 100, 1000, TargetMask::POLY_SYNTH));

        let first = render_stereo(&engine, 512);
        assert!(first.iter().all(|s| *s == 0.0));
        assert_eq!(engine.current_sample_time(), 512);

        let second = render_stereo(&engine, 512);
        let first_sound = second.chunks_exact(2).position(|f| f[0] != 0.0);
        assert_eq!(first_sound, Some(488));
    }

    #[test]
    fn test_ninth_note_steals_oldest_voice() {
        let engine = engine();
        for note in 0..8u8 {
            engine.note_on(60 + note, 100);
        }
        render_stereo(&engine, 64);
        engine.note_on(80, 100);
        render_stereo(&engine, 64);

        engine
            .with_core(|core| {
                assert_eq!(core.allocator().active_count(), 8);
                assert_eq!(core.allocator().note_at(0), Some(80), "slot 0 was the oldest");
                assert_eq!(core.allocator().note_at(1), Some(61));
            })
            .unwrap();
    }

    #[test]
    fn test_delay_send_repeats_impulse_after_quarter_note() {
        let engine = engine();
        engine.set_parameter(ParamId::ChannelSendA, 0, 1.0);
        engine.set_parameter(ParamId::DelayMix, 0, 0.5);
        engine.set_parameter(ParamId::DelayWow, 0, 0.0);
        engine.set_parameter(ParamId::DelayFlutter, 0, 0.0);
        assert!(engine.set_source(Channel::PolySynth, 0, Box::new(Impulse { pending: false })));
        // Leave the other channels' sends at zero
        engine.schedule_note_on_target(60, 100, 0, TargetMask::POLY_SYNTH);

        let out = render_stereo(&engine, 30_000);
        let left: Vec<f32> = out.chunks_exact(2).map(|f| f[0]).collect();

        assert!(left[0] != 0.0, "dry impulse");
        assert!(
            left[1..23_400].iter().all(|s| *s == 0.0),
            "no energy before the first tap"
        );
        let energy: f32 = left[23_400..24_600].iter().map(|s| s * s).sum();
        assert!(energy > 1e-6, "first tap around 24000 samples, energy {}", energy);
    }

    #[test]
    fn test_solo_matches_muting_others() {
        let render_with = |setup: &dyn Fn(&Engine)| {
            let engine = engine();
            setup(&engine);
            engine.schedule_note_on_target(60, 100, 0, TargetMask::POLY_SYNTH);
            engine.schedule_note_on_target(64, 100, 0, TargetMask::TRACK);
            render_stereo(&engine, 2048)
        };

        let soloed = render_with(&|e| {
            e.set_parameter(ParamId::ChannelSolo, 0, 1.0);
        });
        let muted = render_with(&|e| {
            for channel in 1..NUM_CHANNELS {
                e.set_parameter(ParamId::ChannelMute, channel, 1.0);
            }
        });
        assert_eq!(soloed, muted);
        assert!(soloed.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_parameter_roundtrip() {
        let engine = Engine::default();
        for id in ParamId::ALL {
            for step in 0..=10 {
                let value = step as f32 / 10.0;
                assert!(engine.set_parameter(id, 0, value));
                assert!((engine.parameter(id, 0) - value).abs() < 1e-5, "{:?}", id);
            }
        }
        assert!(!engine.set_parameter(ParamId::TrackSpeed, 4, 0.5));
        assert_eq!(engine.parameter(ParamId::MasterGain, 3), 0.0);
    }

    #[test]
    fn test_clock_stop_zeroes_outputs() {
        let engine = engine();
        engine.clock().set_output_waveform(0, Waveform::Square);
        engine.clock().set_output_destination(0, ModDestination::PolyTimbre);
        engine.clock().set_output_mod_amount(0, 1.0);
        engine.set_clock_running(true);
        render_stereo(&engine, 512);
        assert_eq!(engine.clock_output_value(0), 1.0);

        engine.set_clock_running(false);
        assert_eq!(engine.clock_output_value(0), 0.0);
        render_stereo(&engine, 512);
        assert_eq!(engine.clock_output_value(0), 0.0);
    }

    #[test]
    fn test_clear_scheduled_notes() {
        let engine = engine();
        engine.schedule_note_on_target(60, 100, 100, TargetMask::POLY_SYNTH);
        engine.clear_scheduled_notes();
        let out = render_stereo(&engine, 512);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_oversized_request_is_chunked() {
        let engine = engine();
        let frames = MAX_BLOCK_SIZE * 2 + 100;
        render_stereo(&engine, frames);
        assert_eq!(engine.current_sample_time(), frames as u64);
    }

    #[test]
    fn test_cached_render_is_shared_between_taps() {
        let engine = engine();
        engine.schedule_note_on_target(60, 100, 0, TargetMask::POLY_SYNTH);

        let mut a = vec![vec![0.0f32; 256]; NUM_OUTPUT_CHANNELS];
        let mut refs: Vec<&mut [f32]> = a.iter_mut().map(|v| v.as_mut_slice()).collect();
        assert!(engine.render_and_read_multi_channel(0, &mut refs, 256));
        assert_eq!(engine.current_sample_time(), 256);

        let mut left = vec![0.0f32; 256];
        let mut right = vec![0.0f32; 256];
        assert!(engine.render_and_read_legacy_bus(0, &mut left, &mut right, 256));
        assert_eq!(engine.current_sample_time(), 256, "same key must not render again");
        assert!(a[0].iter().any(|s| *s != 0.0));
        assert!(left.iter().any(|s| *s != 0.0));

        // A new key renders the next block
        assert!(engine.render_and_read_legacy_bus(256, &mut left, &mut right, 256));
        assert_eq!(engine.current_sample_time(), 512);
    }

    #[test]
    fn test_oversized_legacy_bus_matches_process() {
        let frames = MAX_CACHED_FRAMES + 3000;
        let direct = engine();
        let bus = engine();
        for e in [&direct, &bus] {
            e.schedule_note_on_target(60, 100, 0, TargetMask::POLY_SYNTH);
            e.schedule_note_off_target(60, 0, 9000, TargetMask::POLY_SYNTH);
        }

        let interleaved = render_stereo(&direct, frames);
        let mut left = vec![1.0f32; frames];
        let mut right = vec![1.0f32; frames];
        assert!(bus.render_and_read_legacy_bus(0, &mut left, &mut right, frames));

        assert_eq!(bus.current_sample_time(), frames as u64);
        for (i, frame) in interleaved.chunks_exact(2).enumerate() {
            assert_eq!(left[i], frame[0], "left frame {}", i);
            assert_eq!(right[i], frame[1], "right frame {}", i);
        }
        assert!(left.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_missing_core_serves_last_cached_render() {
        let engine = engine();
        engine.schedule_note_on_target(60, 100, 0, TargetMask::POLY_SYNTH);

        let mut first_l = vec![0.0f32; 256];
        let mut first_r = vec![0.0f32; 256];
        assert!(engine.render_and_read_legacy_bus(0, &mut first_l, &mut first_r, 256));

        // Core gone while still flagged initialized: nothing new can render
        let core = engine.shared.audio.lock().core.take();
        let mut left = vec![0.0f32; 256];
        let mut right = vec![0.0f32; 256];
        assert!(engine.render_and_read_legacy_bus(256, &mut left, &mut right, 256));
        assert_eq!(left, first_l, "last valid render served unchanged");
        assert_eq!(engine.current_sample_time(), 256);

        engine.shared.audio.lock().core = core;
        assert!(engine.render_and_read_legacy_bus(256, &mut left, &mut right, 256));
        assert_eq!(engine.current_sample_time(), 512);
    }

    #[test]
    fn test_processing_thread_fills_ring() {
        let engine = engine();
        engine.schedule_note_on_target(60, 100, 0, TargetMask::POLY_SYNTH);
        engine.start_processing_thread().unwrap();
        assert!(engine.is_processing_thread_running());

        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.readable_frames(0) < 1024 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(engine.readable_frames(0) >= 1024);
        assert!(engine.readable_frames(0) <= 2047);

        let mut out = vec![0.0f32; 1024];
        assert_eq!(engine.read_channel(0, &mut out), 1024);
        assert!(out.iter().any(|s| *s != 0.0));

        engine.stop_processing_thread();
        assert!(!engine.is_processing_thread_running());
    }

    #[test]
    fn test_record_external_input_into_reel() {
        let engine = engine();
        assert!(engine.start_recording(1, RecordingMode::OneShot, RecordingSource::External, 0));
        assert_eq!(engine.write_external_input(&[0.25; 300], &[0.5; 300]), 300);
        render_stereo(&engine, 512);
        assert!(engine.is_recording(1));
        assert_eq!(engine.recording_position(1), 512);

        assert!(engine.stop_recording(1));
        assert!(!engine.is_recording(1));
        render_stereo(&engine, 512);
    }

    #[test]
    fn test_loaded_reel_plays_on_track() {
        let engine = engine();
        let mut reel = LoopReel::from_samples(vec![StereoSample::mono(0.5); 4800]);
        reel.set_splice(Splice::new(0, 4800));
        assert!(engine.load_reel(0, Box::new(reel)));
        assert!(!engine.load_reel(99, Box::new(LoopReel::with_capacity(1))));

        engine.schedule_note(ScheduledNoteEvent::note_on(60, 127, 0, TargetMask::TRACK).with_track(0));
        let out = render_stereo(&engine, 1024);
        assert!(out.iter().any(|s| *s != 0.0));
        assert!(engine.channel_peak(Channel::Track1.index()) > 0.0);
        assert_eq!(engine.channel_peak(NUM_CHANNELS), 0.0);
    }

    #[test]
    fn test_set_source_validates_voice() {
        let engine = engine();
        assert!(!engine.set_source(Channel::Resonator, 1, Box::new(Impulse { pending: false })));
        assert!(engine.set_source(Channel::PolySynth, 7, Box::new(Impulse { pending: false })));
    }
}
