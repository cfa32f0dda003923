//! C ABI for the Spool engine
//!
//! Every function takes the opaque pointer returned by
//! [`spool_engine_new`]. Invalid pointers (null), indices or enum values
//! never fault: setters return `false`, getters return `0`/`0.0` and render
//! calls emit silence.

use std::slice;
use std::sync::atomic::Ordering;

use spool_core::config::{default_config_path, load_config, EngineConfig};
use spool_core::engine::{ClockMode, ModDestination, RecordingMode, RecordingSource, Waveform};
use spool_core::params::ParamId;
use spool_core::{Engine, TargetMask, NUM_OUTPUT_CHANNELS};

/// Config file read by [`spool_engine_new`]
const CONFIG_FILE: &str = "engine.yaml";

unsafe fn engine_ref<'a>(engine: *const Engine) -> Option<&'a Engine> {
    engine.as_ref()
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Install the `env_logger` backend (`RUST_LOG`, default `info`)
///
/// Safe to call more than once.
#[no_mangle]
pub extern "C" fn spool_init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Create an engine using `<config dir>/spool/engine.yaml` (or defaults)
///
/// The engine is silent until [`spool_initialize`] succeeds.
#[no_mangle]
pub extern "C" fn spool_engine_new() -> *mut Engine {
    let config: EngineConfig = load_config(&default_config_path(CONFIG_FILE));
    Box::into_raw(Box::new(Engine::new(config)))
}

/// Destroy an engine, stopping its processing thread
///
/// # Safety
/// `engine` must be a pointer returned by [`spool_engine_new`], or null.
/// No other call may be in flight on it, and it must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn spool_engine_free(engine: *mut Engine) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Allocate render buffers for the given format; false on invalid arguments
///
/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_initialize(
    engine: *const Engine,
    sample_rate: u32,
    buffer_size: u32,
) -> bool {
    let Some(engine) = engine_ref(engine) else {
        return false;
    };
    match engine.initialize(sample_rate, buffer_size) {
        Ok(()) => true,
        Err(e) => {
            log::error!("spool_initialize: {}", e);
            false
        }
    }
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_shutdown(engine: *const Engine) {
    if let Some(engine) = engine_ref(engine) {
        engine.shutdown();
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Render the mixed master into interleaved `output`
///
/// `input` may be null; otherwise it holds `num_frames * num_channels`
/// interleaved samples used as the external recording source.
///
/// # Safety
/// `output` must hold `num_frames * num_channels` floats, `input` likewise
/// when non-null.
#[no_mangle]
pub unsafe extern "C" fn spool_process(
    engine: *const Engine,
    input: *const f32,
    output: *mut f32,
    num_channels: u32,
    num_frames: u32,
) {
    if output.is_null() {
        return;
    }
    let len = num_frames as usize * num_channels as usize;
    let output = slice::from_raw_parts_mut(output, len);
    let Some(engine) = engine_ref(engine) else {
        output.fill(0.0);
        return;
    };
    let input = (!input.is_null()).then(|| slice::from_raw_parts(input, len));
    engine.process(input, output, num_channels as usize, num_frames as usize);
}

/// Collect up to 16 mono output pointers; pointers past 16 are silenced
unsafe fn with_channel_outputs<R>(
    outputs: *const *mut f32,
    num_outputs: u32,
    num_frames: u32,
    f: impl FnOnce(&mut [&mut [f32]]) -> R,
) -> R {
    let mut slots: [&mut [f32]; NUM_OUTPUT_CHANNELS] = std::array::from_fn(|_| -> &mut [f32] { &mut [] });
    let mut used = 0;
    if !outputs.is_null() {
        let pointers = slice::from_raw_parts(outputs, num_outputs as usize);
        for (index, ptr) in pointers.iter().enumerate() {
            if ptr.is_null() {
                continue;
            }
            let buffer = slice::from_raw_parts_mut(*ptr, num_frames as usize);
            if index < NUM_OUTPUT_CHANNELS {
                slots[index] = buffer;
                used = index + 1;
            } else {
                buffer.fill(0.0);
            }
        }
    }
    f(&mut slots[..used])
}

/// Render unmixed per-channel stereo pairs (`outputs[2c]`, `outputs[2c + 1]`)
///
/// # Safety
/// `outputs` must point to `num_outputs` pointers, each null or holding
/// `num_frames` floats.
#[no_mangle]
pub unsafe extern "C" fn spool_process_multi_channel(
    engine: *const Engine,
    outputs: *const *mut f32,
    num_outputs: u32,
    num_frames: u32,
) {
    with_channel_outputs(outputs, num_outputs, num_frames, |buffers| match engine_ref(engine) {
        Some(engine) => engine.process_multi_channel(buffers, num_frames as usize),
        None => buffers.iter_mut().for_each(|b| b.fill(0.0)),
    });
}

/// Cached per-channel render shared by taps asking for the same block
///
/// # Safety
/// As [`spool_process_multi_channel`].
#[no_mangle]
pub unsafe extern "C" fn spool_render_and_read_multi_channel(
    engine: *const Engine,
    sample_time: u64,
    outputs: *const *mut f32,
    num_outputs: u32,
    num_frames: u32,
) -> bool {
    with_channel_outputs(outputs, num_outputs, num_frames, |buffers| match engine_ref(engine) {
        Some(engine) => {
            engine.render_and_read_multi_channel(sample_time, buffers, num_frames as usize)
        }
        None => {
            buffers.iter_mut().for_each(|b| b.fill(0.0));
            false
        }
    })
}

/// Cached master render as two mono buffers
///
/// # Safety
/// `left` and `right` must each hold `num_frames` floats.
#[no_mangle]
pub unsafe extern "C" fn spool_render_and_read_legacy_bus(
    engine: *const Engine,
    sample_time: u64,
    left: *mut f32,
    right: *mut f32,
    num_frames: u32,
) -> bool {
    if left.is_null() || right.is_null() {
        return false;
    }
    let left = slice::from_raw_parts_mut(left, num_frames as usize);
    let right = slice::from_raw_parts_mut(right, num_frames as usize);
    match engine_ref(engine) {
        Some(engine) => {
            engine.render_and_read_legacy_bus(sample_time, left, right, num_frames as usize)
        }
        None => {
            left.fill(0.0);
            right.fill(0.0);
            false
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_note_on(engine: *const Engine, note: u8, velocity: u8) -> bool {
    engine_ref(engine).is_some_and(|e| e.note_on(note, velocity))
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_note_off(engine: *const Engine, note: u8, velocity: u8) -> bool {
    engine_ref(engine).is_some_and(|e| e.note_off(note, velocity))
}

/// Schedule a note-on at an absolute sample time for the channels in `target_mask`
///
/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_schedule_note_on_target(
    engine: *const Engine,
    note: u8,
    velocity: u8,
    sample_time: u64,
    target_mask: u8,
) -> bool {
    engine_ref(engine).is_some_and(|e| {
        e.schedule_note_on_target(note, velocity, sample_time, TargetMask(target_mask))
    })
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_schedule_note_off_target(
    engine: *const Engine,
    note: u8,
    velocity: u8,
    sample_time: u64,
    target_mask: u8,
) -> bool {
    engine_ref(engine).is_some_and(|e| {
        e.schedule_note_off_target(note, velocity, sample_time, TargetMask(target_mask))
    })
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_clear_scheduled_notes(engine: *const Engine) {
    if let Some(engine) = engine_ref(engine) {
        engine.clear_scheduled_notes();
    }
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_get_current_sample_time(engine: *const Engine) -> u64 {
    engine_ref(engine).map_or(0, |e| e.current_sample_time())
}

// =============================================================================
// Parameters
// =============================================================================

/// Set a normalized parameter; `id` is the `ParamId` discriminant
///
/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_parameter(
    engine: *const Engine,
    id: u32,
    voice_index: u32,
    value: f32,
) -> bool {
    match (engine_ref(engine), ParamId::from_u32(id)) {
        (Some(engine), Some(id)) => engine.set_parameter(id, voice_index as usize, value),
        _ => false,
    }
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_get_parameter(engine: *const Engine, id: u32, voice_index: u32) -> f32 {
    match (engine_ref(engine), ParamId::from_u32(id)) {
        (Some(engine), Some(id)) => engine.parameter(id, voice_index as usize),
        _ => 0.0,
    }
}

// =============================================================================
// Clock
// =============================================================================

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_bpm(engine: *const Engine, bpm: f32) -> bool {
    engine_ref(engine).is_some_and(|e| e.clock().set_bpm(bpm))
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_running(engine: *const Engine, running: bool) {
    if let Some(engine) = engine_ref(engine) {
        engine.set_clock_running(running);
    }
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_start_sample(engine: *const Engine, sample_time: u64) {
    if let Some(engine) = engine_ref(engine) {
        engine.clock().set_start_sample(sample_time);
    }
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_swing(engine: *const Engine, swing: f32) -> bool {
    engine_ref(engine).is_some_and(|e| e.clock().set_swing(swing))
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_output_mode(engine: *const Engine, index: u32, mode: u32) -> bool {
    match (engine_ref(engine), ClockMode::from_u32(mode)) {
        (Some(engine), Some(mode)) => engine.clock().set_output_mode(index as usize, mode),
        _ => false,
    }
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_output_waveform(
    engine: *const Engine,
    index: u32,
    waveform: u32,
) -> bool {
    match (engine_ref(engine), Waveform::from_u32(waveform)) {
        (Some(engine), Some(waveform)) => engine.clock().set_output_waveform(index as usize, waveform),
        _ => false,
    }
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_output_division(
    engine: *const Engine,
    index: u32,
    division: u32,
) -> bool {
    engine_ref(engine).is_some_and(|e| e.clock().set_output_division(index as usize, division as usize))
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_output_level(engine: *const Engine, index: u32, level: f32) -> bool {
    engine_ref(engine).is_some_and(|e| e.clock().set_output_level(index as usize, level))
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_output_offset(engine: *const Engine, index: u32, offset: f32) -> bool {
    engine_ref(engine).is_some_and(|e| e.clock().set_output_offset(index as usize, offset))
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_output_phase(engine: *const Engine, index: u32, phase: f32) -> bool {
    engine_ref(engine).is_some_and(|e| e.clock().set_output_phase(index as usize, phase))
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_output_width(engine: *const Engine, index: u32, width: f32) -> bool {
    engine_ref(engine).is_some_and(|e| e.clock().set_output_width(index as usize, width))
}

/// `destination` is the `ModDestination` discriminant (0 = none)
///
/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_output_destination(
    engine: *const Engine,
    index: u32,
    destination: u32,
) -> bool {
    match (engine_ref(engine), ModDestination::from_u32(destination)) {
        (Some(engine), Some(destination)) => {
            engine.clock().set_output_destination(index as usize, destination)
        }
        _ => false,
    }
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_output_mod_amount(
    engine: *const Engine,
    index: u32,
    amount: f32,
) -> bool {
    engine_ref(engine).is_some_and(|e| e.clock().set_output_mod_amount(index as usize, amount))
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_output_muted(engine: *const Engine, index: u32, muted: bool) -> bool {
    engine_ref(engine).is_some_and(|e| e.clock().set_output_muted(index as usize, muted))
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_clock_output_slow_mode(engine: *const Engine, index: u32, slow: bool) -> bool {
    engine_ref(engine).is_some_and(|e| e.clock().set_output_slow(index as usize, slow))
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_get_clock_output_value(engine: *const Engine, index: u32) -> f32 {
    engine_ref(engine).map_or(0.0, |e| e.clock_output_value(index as usize))
}

// =============================================================================
// Recording
// =============================================================================

/// Start recording into `reel`
///
/// `mode`: 0 = one-shot, 1 = live loop. `source_type`: 0 = internal
/// channel `source_channel`, 1 = external input.
///
/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_start_recording(
    engine: *const Engine,
    reel: u32,
    mode: u32,
    source_type: u32,
    source_channel: u32,
) -> bool {
    let (Some(engine), Some(mode), Some(source)) = (
        engine_ref(engine),
        RecordingMode::from_u32(mode),
        RecordingSource::from_u32(source_type),
    ) else {
        return false;
    };
    engine.start_recording(reel as usize, mode, source, source_channel as usize)
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_stop_recording(engine: *const Engine, reel: u32) -> bool {
    engine_ref(engine).is_some_and(|e| e.stop_recording(reel as usize))
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_set_recording_feedback(engine: *const Engine, reel: u32, amount: f32) -> bool {
    engine_ref(engine).is_some_and(|e| e.set_recording_feedback(reel as usize, amount))
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_is_recording(engine: *const Engine, reel: u32) -> bool {
    engine_ref(engine).is_some_and(|e| e.is_recording(reel as usize))
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_get_recording_position(engine: *const Engine, reel: u32) -> u64 {
    engine_ref(engine).map_or(0, |e| e.recording_position(reel as usize))
}

/// Queue external input; returns the frames accepted
///
/// # Safety
/// `left` and `right` must each hold `num_frames` floats.
#[no_mangle]
pub unsafe extern "C" fn spool_write_external_input(
    engine: *const Engine,
    left: *const f32,
    right: *const f32,
    num_frames: u32,
) -> u32 {
    if left.is_null() || right.is_null() {
        return 0;
    }
    let Some(engine) = engine_ref(engine) else {
        return 0;
    };
    let left = slice::from_raw_parts(left, num_frames as usize);
    let right = slice::from_raw_parts(right, num_frames as usize);
    engine.write_external_input(left, right) as u32
}

// =============================================================================
// Processing thread and ring buffer
// =============================================================================

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_start_processing_thread(engine: *const Engine) -> bool {
    let Some(engine) = engine_ref(engine) else {
        return false;
    };
    match engine.start_processing_thread() {
        Ok(()) => true,
        Err(e) => {
            log::error!("spool_start_processing_thread: {}", e);
            false
        }
    }
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_stop_processing_thread(engine: *const Engine) {
    if let Some(engine) = engine_ref(engine) {
        engine.stop_processing_thread();
    }
}

/// Read pre-rendered frames of one mono output channel (0-15)
///
/// # Safety
/// `out` must hold `num_frames` floats.
#[no_mangle]
pub unsafe extern "C" fn spool_read_channel(
    engine: *const Engine,
    channel: u32,
    out: *mut f32,
    num_frames: u32,
) -> u32 {
    if out.is_null() {
        return 0;
    }
    let out = slice::from_raw_parts_mut(out, num_frames as usize);
    match engine_ref(engine) {
        Some(engine) => engine.read_channel(channel as usize, out) as u32,
        None => {
            out.fill(0.0);
            0
        }
    }
}

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_get_readable_frames(engine: *const Engine, channel: u32) -> u32 {
    engine_ref(engine).map_or(0, |e| e.readable_frames(channel as usize) as u32)
}

// =============================================================================
// Metering
// =============================================================================

/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_get_channel_peak(engine: *const Engine, channel: u32) -> f32 {
    engine_ref(engine).map_or(0.0, |e| e.channel_peak(channel as usize))
}

/// Read and clear the master clip indicator
///
/// # Safety
/// `engine` must be a valid engine pointer or null.
#[no_mangle]
pub unsafe extern "C" fn spool_take_clip_indicator(engine: *const Engine) -> bool {
    engine_ref(engine).is_some_and(|e| e.clip_indicator().swap(false, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    fn new_engine() -> *mut Engine {
        Box::into_raw(Box::new(Engine::new(EngineConfig::default())))
    }

    #[test]
    fn test_null_engine_is_neutral() {
        unsafe {
            assert!(!spool_initialize(ptr::null(), 48000, 512));
            assert!(!spool_set_parameter(ptr::null(), 0, 0, 0.5));
            assert_eq!(spool_get_parameter(ptr::null(), 0, 0), 0.0);
            assert_eq!(spool_get_current_sample_time(ptr::null()), 0);

            let mut out = [1.0f32; 8];
            spool_process(ptr::null(), ptr::null(), out.as_mut_ptr(), 2, 4);
            assert_eq!(out, [0.0; 8]);
            spool_engine_free(ptr::null_mut());
        }
    }

    #[test]
    fn test_lifecycle_and_render() {
        unsafe {
            let engine = new_engine();
            assert!(!spool_initialize(engine, 0, 512));
            assert!(spool_initialize(engine, 48000, 256));
            assert!(spool_schedule_note_on_target(engine, 60, 100, 0, TargetMask::POLY_SYNTH.bits()));

            let mut out = vec![0.0f32; 512];
            spool_process(engine, ptr::null(), out.as_mut_ptr(), 2, 256);
            assert!(out.iter().any(|s| *s != 0.0));
            assert_eq!(spool_get_current_sample_time(engine), 256);

            spool_shutdown(engine);
            spool_process(engine, ptr::null(), out.as_mut_ptr(), 2, 256);
            assert!(out.iter().all(|s| *s == 0.0));
            spool_engine_free(engine);
        }
    }

    #[test]
    fn test_invalid_enum_values_rejected() {
        unsafe {
            let engine = new_engine();
            assert!(!spool_set_parameter(engine, 999, 0, 0.5));
            assert!(!spool_set_clock_output_mode(engine, 0, 7));
            assert!(!spool_set_clock_output_waveform(engine, 0, 99));
            assert!(!spool_start_recording(engine, 0, 5, 0, 0));
            assert!(spool_set_clock_output_waveform(engine, 0, 1));
            spool_engine_free(engine);
        }
    }

    #[test]
    fn test_parameter_roundtrip() {
        unsafe {
            let engine = new_engine();
            assert!(spool_set_parameter(engine, ParamId::ChannelPan as u32, 3, 0.25));
            assert!((spool_get_parameter(engine, ParamId::ChannelPan as u32, 3) - 0.25).abs() < 1e-6);
            spool_engine_free(engine);
        }
    }

    #[test]
    fn test_multi_channel_with_null_and_extra_pointers() {
        unsafe {
            let engine = new_engine();
            assert!(spool_initialize(engine, 48000, 128));

            let mut buffers = vec![vec![1.0f32; 64]; NUM_OUTPUT_CHANNELS + 2];
            let mut pointers: Vec<*mut f32> = buffers.iter_mut().map(|b| b.as_mut_ptr()).collect();
            pointers[1] = ptr::null_mut();
            spool_process_multi_channel(engine, pointers.as_ptr(), pointers.len() as u32, 64);

            assert!(buffers[1].iter().all(|s| *s == 1.0), "null pointer left untouched");
            assert!(buffers[NUM_OUTPUT_CHANNELS].iter().all(|s| *s == 0.0));
            assert!(buffers[NUM_OUTPUT_CHANNELS + 1].iter().all(|s| *s == 0.0));
            assert_eq!(spool_get_current_sample_time(engine), 64);
            spool_engine_free(engine);
        }
    }
}
