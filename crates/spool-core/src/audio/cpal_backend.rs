//! CPAL output stream
//!
//! ```text
//! ┌──────────────────┐  set_parameter / schedule_note  ┌───────────────┐
//! │ Control threads  │────────────────────────────────►│    Engine     │
//! └──────────────────┘      atomics + SPSC queues      │ (Arc, shared) │
//!                                                      └───────┬───────┘
//!                                               process()      │
//!                                                      ┌───────▼───────┐
//!                                                      │ CPAL callback │
//!                                                      └───────────────┘
//! ```

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, SampleRate, Stream, StreamConfig};

use super::config::{AudioConfig, BufferSize};
use super::error::{AudioError, AudioResult};
use crate::engine::Engine;

/// Keeps the output stream alive; drop it to stop audio
pub struct OutputHandle {
    _stream: Stream,
    sample_rate: u32,
    buffer_size: u32,
}

impl OutputHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// One-way output latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }
}

/// Names of the default host's output devices
pub fn output_device_names() -> Vec<String> {
    let host = cpal::default_host();
    match host.output_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            log::warn!("Could not enumerate output devices: {}", e);
            Vec::new()
        }
    }
}

/// Open the configured device, initialize `engine` for it and start playback
pub fn start_output(engine: Arc<Engine>, config: &AudioConfig) -> AudioResult<OutputHandle> {
    let device = find_device(config.device.as_deref())?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let supported = output_config(&device, config.sample_rate)?;
    let sample_rate = supported.sample_rate().0;
    let buffer_size = config.buffer_size.frames();

    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: match config.buffer_size {
            BufferSize::Default => CpalBufferSize::Default,
            BufferSize::Fixed(_) => CpalBufferSize::Fixed(buffer_size),
        },
    };

    engine.initialize(sample_rate, buffer_size)?;
    log::info!(
        "Audio config: {} channels, {}Hz, {} frames",
        stream_config.channels,
        sample_rate,
        buffer_size
    );

    let channels = stream_config.channels as usize;
    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                engine.process(None, data, channels, frames);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;
    log::info!("Audio stream started");

    Ok(OutputHandle {
        _stream: stream,
        sample_rate,
        buffer_size,
    })
}

fn find_device(name: Option<&str>) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host.default_output_device().ok_or(AudioError::NoDefaultDevice),
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
    }
}

/// Pick an f32 stereo configuration, preferring `target_rate`
fn output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> AudioResult<cpal::SupportedStreamConfig> {
    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let in_range = |c: &cpal::SupportedStreamConfigRange| {
        (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&target_rate)
    };

    let best = configs
        .iter()
        .find(|c| c.channels() >= 2 && in_range(c))
        .or_else(|| configs.iter().find(|c| c.channels() >= 2))
        .or_else(|| configs.first())
        .ok_or_else(|| AudioError::ConfigError("No f32 output configuration".to_string()))?;

    let rate = if in_range(best) {
        SampleRate(target_rate)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            target_rate,
            fallback.0
        );
        fallback
    };

    Ok(best.clone().with_sample_rate(rate))
}
