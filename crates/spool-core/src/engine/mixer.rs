//! Mixer - sums the 8 fixed channels into master and two send buses
//!
//! Per channel: gain → equal-power pan → micro-delay. The result feeds
//! both sends unconditionally and the master bus only when the channel
//! should play (`!muted && (!any_solo || solo)`).
//!
//! Gain, pan, sends and master gain chase their targets once per chunk
//! with a ~10ms one-pole and are ramped linearly across the chunk, so a
//! parameter change never produces a step.

use super::micro_delay::MicroDelay;
use crate::dsp::{chunk_smoothing_alpha, equal_power_pan, SMOOTHING_TIME_SECS};
use crate::types::{StereoBuffer, StereoSample, NUM_CHANNELS};

/// Per-chunk meter decay
const METER_RELEASE: f32 = 0.95;

/// A target value and its smoothed follower
#[derive(Debug, Clone, Copy)]
struct Smoothed {
    target: f32,
    current: f32,
}

impl Smoothed {
    fn new(value: f32) -> Self {
        Self {
            target: value,
            current: value,
        }
    }

    fn set_target(&mut self, value: f32) {
        self.target = value.clamp(0.0, 1.0);
    }

    /// Advance one chunk; returns the (start, end) of the ramp
    fn advance(&mut self, alpha: f32) -> (f32, f32) {
        let start = self.current;
        self.current += alpha * (self.target - self.current);
        (start, self.current)
    }

    fn snap(&mut self) {
        self.current = self.target;
    }
}

/// Linear ramp from `start` to `end` over `len` samples
#[inline]
fn ramp((start, end): (f32, f32), i: usize, len: usize) -> f32 {
    start + (end - start) * (i + 1) as f32 / len as f32
}

/// Mixer state of one channel
pub struct ChannelStrip {
    gain: Smoothed,
    pan: Smoothed,
    send_a: Smoothed,
    send_b: Smoothed,
    muted: bool,
    solo: bool,
    micro_delay: MicroDelay,
    meter: f32,
}

impl ChannelStrip {
    /// Create a strip with default settings
    pub fn new(max_micro_delay: usize) -> Self {
        Self {
            gain: Smoothed::new(0.8),
            pan: Smoothed::new(0.5),
            send_a: Smoothed::new(0.0),
            send_b: Smoothed::new(0.0),
            muted: false,
            solo: false,
            micro_delay: MicroDelay::new(max_micro_delay),
            meter: 0.0,
        }
    }

    pub fn set_gain(&mut self, value: f32) {
        self.gain.set_target(value);
    }

    /// Normalized pan (0.0 = left, 0.5 = centre, 1.0 = right)
    pub fn set_pan(&mut self, value: f32) {
        self.pan.set_target(value);
    }

    pub fn set_send_a(&mut self, value: f32) {
        self.send_a.set_target(value);
    }

    pub fn set_send_b(&mut self, value: f32) {
        self.send_b.set_target(value);
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn set_solo(&mut self, solo: bool) {
        self.solo = solo;
    }

    /// Normalized micro-delay, scaled to the strip's maximum depth
    pub fn set_micro_delay(&mut self, value: f32) {
        let max = self.micro_delay.max_delay();
        let samples = (value.clamp(0.0, 1.0) * max as f32).round() as usize;
        self.micro_delay.set_delay(samples);
    }

    pub fn micro_delay_samples(&self) -> usize {
        self.micro_delay.delay()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_solo(&self) -> bool {
        self.solo
    }

    /// Smoothed peak level
    pub fn peak(&self) -> f32 {
        self.meter
    }

    /// Current (smoothed) gain
    pub fn gain(&self) -> f32 {
        self.gain.current
    }

    /// Current (smoothed) send A level
    pub fn send_a(&self) -> f32 {
        self.send_a.current
    }

    /// Whether this strip reaches the master bus
    #[inline]
    fn should_play(&self, any_solo: bool) -> bool {
        !self.muted && (!any_solo || self.solo)
    }

    /// Gain, pan and micro-delay in place; returns the send ramps
    fn process(&mut self, buffer: &mut StereoBuffer, alpha: f32) -> ((f32, f32), (f32, f32)) {
        let len = buffer.len();
        let gain = self.gain.advance(alpha);
        let pan = self.pan.advance(alpha);
        let send_a = self.send_a.advance(alpha);
        let send_b = self.send_b.advance(alpha);

        let (start_l, start_r) = equal_power_pan(pan.0 * 2.0 - 1.0);
        let (end_l, end_r) = equal_power_pan(pan.1 * 2.0 - 1.0);

        for (i, sample) in buffer.iter_mut().enumerate() {
            let g = ramp(gain, i, len);
            let pl = ramp((start_l, end_l), i, len);
            let pr = ramp((start_r, end_r), i, len);
            *sample = StereoSample::new(sample.left * g * pl, sample.right * g * pr);
        }

        self.micro_delay.process(buffer.as_mut_slice());
        self.meter = buffer.peak().max(self.meter * METER_RELEASE);

        (send_a, send_b)
    }

    fn reset(&mut self) {
        self.gain.snap();
        self.pan.snap();
        self.send_a.snap();
        self.send_b.snap();
        self.micro_delay.clear();
        self.meter = 0.0;
    }
}

/// Buses written by [`Mixer::process`]
pub struct MixBuses<'a> {
    /// Post-strip signal of each channel; silence where the channel does not play
    pub channel_out: &'a mut [StereoBuffer; NUM_CHANNELS],
    pub master: &'a mut StereoBuffer,
    /// Send bus A (tape delay)
    pub aux_a: &'a mut StereoBuffer,
    /// Send bus B (reverb)
    pub aux_b: &'a mut StereoBuffer,
}

/// The 8-channel mixer
pub struct Mixer {
    strips: [ChannelStrip; NUM_CHANNELS],
    master_gain: Smoothed,
}

impl Mixer {
    pub fn new(max_micro_delay: usize) -> Self {
        Self {
            strips: std::array::from_fn(|_| ChannelStrip::new(max_micro_delay)),
            master_gain: Smoothed::new(0.8),
        }
    }

    pub fn strip(&self, channel: usize) -> Option<&ChannelStrip> {
        self.strips.get(channel)
    }

    pub fn strip_mut(&mut self, channel: usize) -> Option<&mut ChannelStrip> {
        self.strips.get_mut(channel)
    }

    pub fn set_master_gain(&mut self, value: f32) {
        self.master_gain.set_target(value);
    }

    /// Whether any channel is soloed
    pub fn any_solo(&self) -> bool {
        self.strips.iter().any(|s| s.solo)
    }

    /// Mix pre-fader channel signals into the buses
    ///
    /// `inputs` are processed in place. Every buffer must already have the
    /// chunk length.
    pub fn process(
        &mut self,
        inputs: &mut [StereoBuffer; NUM_CHANNELS],
        buses: MixBuses<'_>,
        sample_rate: f32,
    ) {
        let MixBuses {
            channel_out,
            master,
            aux_a,
            aux_b,
        } = buses;
        let len = master.len();
        let alpha = chunk_smoothing_alpha(len, sample_rate, SMOOTHING_TIME_SECS);
        let any_solo = self.any_solo();

        master.fill_silence();
        aux_a.fill_silence();
        aux_b.fill_silence();

        for ((strip, input), out) in self
            .strips
            .iter_mut()
            .zip(inputs.iter_mut())
            .zip(channel_out.iter_mut())
        {
            let (send_a, send_b) = strip.process(input, alpha);

            // Sends are pre-mute
            for (i, sample) in input.iter().enumerate() {
                aux_a[i] += *sample * ramp(send_a, i, len);
                aux_b[i] += *sample * ramp(send_b, i, len);
            }

            if strip.should_play(any_solo) {
                for (m, sample) in master.iter_mut().zip(input.iter()) {
                    *m += *sample;
                }
                out.as_mut_slice().copy_from_slice(input.as_slice());
            } else {
                out.fill_silence();
            }
        }
    }

    /// Smoothed master gain, applied in place
    pub fn apply_master_gain(&mut self, master: &mut StereoBuffer, sample_rate: f32) {
        let len = master.len();
        let alpha = chunk_smoothing_alpha(len, sample_rate, SMOOTHING_TIME_SECS);
        let gain = self.master_gain.advance(alpha);
        for (i, sample) in master.iter_mut().enumerate() {
            *sample *= ramp(gain, i, len);
        }
    }

    /// Clear delay lines and meters, snapping smoothed values to targets
    pub fn reset(&mut self) {
        for strip in &mut self.strips {
            strip.reset();
        }
        self.master_gain.snap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;
    const LEN: usize = 256;

    struct Buses {
        channel_out: [StereoBuffer; NUM_CHANNELS],
        master: StereoBuffer,
        aux_a: StereoBuffer,
        aux_b: StereoBuffer,
    }

    impl Buses {
        fn new() -> Self {
            Self {
                channel_out: std::array::from_fn(|_| StereoBuffer::silence(LEN)),
                master: StereoBuffer::silence(LEN),
                aux_a: StereoBuffer::silence(LEN),
                aux_b: StereoBuffer::silence(LEN),
            }
        }

        fn as_mix(&mut self) -> MixBuses<'_> {
            MixBuses {
                channel_out: &mut self.channel_out,
                master: &mut self.master,
                aux_a: &mut self.aux_a,
                aux_b: &mut self.aux_b,
            }
        }
    }

    fn inputs(seed: f32) -> [StereoBuffer; NUM_CHANNELS] {
        std::array::from_fn(|ch| {
            let left: Vec<f32> = (0..LEN)
                .map(|i| ((i as f32 * 0.05 + ch as f32) * seed).sin() * 0.5)
                .collect();
            let right: Vec<f32> = (0..LEN)
                .map(|i| ((i as f32 * 0.07 + ch as f32) * seed).cos() * 0.5)
                .collect();
            StereoBuffer::from_channels(&left, &right)
        })
    }

    fn run(mixer: &mut Mixer, seed: f32, blocks: usize) -> Vec<StereoSample> {
        let mut buses = Buses::new();
        let mut out = Vec::new();
        for _ in 0..blocks {
            let mut channels = inputs(seed);
            mixer.process(&mut channels, buses.as_mix(), SR);
            out.extend_from_slice(buses.master.as_slice());
        }
        out
    }

    #[test]
    fn test_solo_equals_muting_others() {
        let mut soloed = Mixer::new(64);
        soloed.strip_mut(3).unwrap().set_solo(true);

        let mut muted = Mixer::new(64);
        for ch in (0..NUM_CHANNELS).filter(|&ch| ch != 3) {
            muted.strip_mut(ch).unwrap().set_muted(true);
        }

        for seed in [0.3, 1.7] {
            let a = run(&mut soloed, seed, 4);
            let b = run(&mut muted, seed, 4);
            assert_eq!(a, b, "solo must be bit-identical to muting the rest");
        }
    }

    #[test]
    fn test_sends_ignore_mute() {
        let mut mixer = Mixer::new(64);
        let strip = mixer.strip_mut(0).unwrap();
        strip.set_send_a(1.0);
        strip.set_muted(true);

        let mut buses = Buses::new();
        for _ in 0..8 {
            let mut channels: [StereoBuffer; NUM_CHANNELS] =
                std::array::from_fn(|_| StereoBuffer::silence(LEN));
            channels[0] = StereoBuffer::from_channels(&[0.5; LEN], &[0.5; LEN]);
            mixer.process(&mut channels, buses.as_mix(), SR);
        }

        assert_eq!(buses.master.peak(), 0.0);
        assert_eq!(buses.channel_out[0].peak(), 0.0, "muted channels export silence");
        assert!(buses.aux_a.peak() > 0.1, "send must stay active while muted");
        assert_eq!(buses.aux_b.peak(), 0.0);
    }

    #[test]
    fn test_gain_is_smoothed_not_snapped() {
        let mut mixer = Mixer::new(64);
        mixer.strip_mut(0).unwrap().set_gain(0.0);

        let mut buses = Buses::new();
        let mut channels: [StereoBuffer; NUM_CHANNELS] =
            std::array::from_fn(|_| StereoBuffer::silence(LEN));
        channels[0] = StereoBuffer::from_channels(&[1.0; LEN], &[1.0; LEN]);
        mixer.process(&mut channels, buses.as_mix(), SR);

        let first = buses.master[0].left;
        let last = buses.master[LEN - 1].left;
        assert!(first > 0.5, "gain must start from its previous value");
        assert!(last < first, "gain must ramp toward the target");
        assert!(last > 0.0, "one chunk must not reach the target");
    }

    #[test]
    fn test_hard_pan_left() {
        let mut mixer = Mixer::new(64);
        mixer.strip_mut(0).unwrap().set_pan(0.0);
        mixer.reset();

        let mut buses = Buses::new();
        let mut channels: [StereoBuffer; NUM_CHANNELS] =
            std::array::from_fn(|_| StereoBuffer::silence(LEN));
        channels[0] = StereoBuffer::from_channels(&[1.0; LEN], &[1.0; LEN]);
        mixer.process(&mut channels, buses.as_mix(), SR);

        assert!((buses.master[10].left - 0.8).abs() < 1e-5);
        assert!(buses.master[10].right.abs() < 1e-6);
    }

    #[test]
    fn test_micro_delay_mapping() {
        let mut strip = ChannelStrip::new(4800);
        strip.set_micro_delay(0.5);
        assert_eq!(strip.micro_delay_samples(), 2400);
        strip.set_micro_delay(2.0);
        assert_eq!(strip.micro_delay_samples(), 4800);
    }

    #[test]
    fn test_meter_attack_and_release() {
        let mut mixer = Mixer::new(64);
        let mut buses = Buses::new();

        let mut channels: [StereoBuffer; NUM_CHANNELS] =
            std::array::from_fn(|_| StereoBuffer::silence(LEN));
        channels[1] = StereoBuffer::from_channels(&[1.0; LEN], &[1.0; LEN]);
        mixer.process(&mut channels, buses.as_mix(), SR);
        let peak = mixer.strip(1).unwrap().peak();
        assert!(peak > 0.5);

        let mut silent: [StereoBuffer; NUM_CHANNELS] =
            std::array::from_fn(|_| StereoBuffer::silence(LEN));
        mixer.process(&mut silent, buses.as_mix(), SR);
        assert!((mixer.strip(1).unwrap().peak() - peak * METER_RELEASE).abs() < 1e-6);
    }
}
