//! Per-channel micro-delay
//!
//! Small circular delay used to re-align channels with differing internal
//! latency. Depth is fixed at construction; changing the delay never
//! allocates.

use crate::types::StereoSample;

/// Circular stereo delay line
pub struct MicroDelay {
    buffer: Vec<StereoSample>,
    write_pos: usize,
    delay_samples: usize,
}

impl MicroDelay {
    /// Create a delay able to hold up to `max_samples` of delay
    pub fn new(max_samples: usize) -> Self {
        Self {
            buffer: vec![StereoSample::silence(); max_samples.max(1) + 1],
            write_pos: 0,
            delay_samples: 0,
        }
    }

    /// Longest delay this line supports
    pub fn max_delay(&self) -> usize {
        self.buffer.len() - 1
    }

    /// Set the delay in samples (clamped to the maximum)
    pub fn set_delay(&mut self, samples: usize) {
        self.delay_samples = samples.min(self.max_delay());
    }

    pub fn delay(&self) -> usize {
        self.delay_samples
    }

    #[inline]
    fn process_sample(&mut self, input: StereoSample) -> StereoSample {
        self.buffer[self.write_pos] = input;

        let read_pos = if self.write_pos >= self.delay_samples {
            self.write_pos - self.delay_samples
        } else {
            self.buffer.len() - (self.delay_samples - self.write_pos)
        };
        let output = self.buffer[read_pos];

        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        output
    }

    /// Delay `samples` in place
    ///
    /// The history is kept up to date even at zero delay so a later delay
    /// change reads real signal instead of stale data.
    pub fn process(&mut self, samples: &mut [StereoSample]) {
        for sample in samples.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Fill the line with silence
    pub fn clear(&mut self) {
        self.buffer.fill(StereoSample::silence());
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse(len: usize) -> Vec<StereoSample> {
        let mut samples = vec![StereoSample::silence(); len];
        samples[0] = StereoSample::mono(1.0);
        samples
    }

    #[test]
    fn test_zero_delay_is_passthrough() {
        let mut line = MicroDelay::new(16);
        let mut samples = impulse(8);
        line.process(&mut samples);
        assert_eq!(samples[0], StereoSample::mono(1.0));
    }

    #[test]
    fn test_impulse_is_delayed() {
        let mut line = MicroDelay::new(16);
        line.set_delay(5);
        let mut samples = impulse(12);
        line.process(&mut samples);
        assert_eq!(samples[0], StereoSample::silence());
        assert_eq!(samples[5], StereoSample::mono(1.0));
    }

    #[test]
    fn test_delay_is_clamped() {
        let mut line = MicroDelay::new(16);
        line.set_delay(1000);
        assert_eq!(line.delay(), 16);

        let mut samples = impulse(20);
        line.process(&mut samples);
        assert_eq!(samples[16], StereoSample::mono(1.0));
    }

    #[test]
    fn test_delay_across_blocks() {
        let mut line = MicroDelay::new(8);
        line.set_delay(6);
        let mut first = impulse(4);
        line.process(&mut first);
        let mut second = vec![StereoSample::silence(); 4];
        line.process(&mut second);
        assert_eq!(second[2], StereoSample::mono(1.0));
    }
}
