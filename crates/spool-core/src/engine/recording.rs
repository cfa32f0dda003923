//! Recording sessions into reels
//!
//! Control threads claim and release session slots in [`RecordingControl`];
//! the audio thread's [`Recorder`] feeds each active session from the
//! pre-mix channel signals (or external input) and finalizes stopped
//! sessions.
//!
//! Each slot is one packed `AtomicU64`, so the audio thread always sees a
//! complete session description:
//!
//! ```text
//! bits  0-1   state (idle / recording / stopping)
//! bit   2     mode (one-shot / live loop)
//! bit   3     source (internal channel / external input)
//! bits  8-15  source channel
//! bits 16-31  reel index
//! bits 32-63  generation
//! ```

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::source::{ReelBank, Splice};
use crate::types::{AtomicF32, StereoBuffer, NUM_CHANNELS, NUM_RECORDING_SESSIONS};

/// How a session writes into its reel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum RecordingMode {
    /// Record from the start until stopped or the reel is full
    #[default]
    OneShot = 0,
    /// Loop over a fixed length, overdubbing with feedback
    LiveLoop = 1,
}

impl RecordingMode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(RecordingMode::OneShot),
            1 => Some(RecordingMode::LiveLoop),
            _ => None,
        }
    }
}

/// Where a session takes its signal from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum RecordingSource {
    /// Pre-mix signal of a mixer channel
    #[default]
    Internal = 0,
    /// Audio written through `write_external_input` or the process input
    External = 1,
}

impl RecordingSource {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(RecordingSource::Internal),
            1 => Some(RecordingSource::External),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle = 0,
    Recording = 1,
    Stopping = 2,
}

/// Unpacked view of one session slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Session {
    state: SessionState,
    mode: RecordingMode,
    source: RecordingSource,
    channel: u8,
    reel: u16,
    generation: u32,
}

impl Session {
    const IDLE: u64 = 0;

    fn pack(self) -> u64 {
        (self.state as u64)
            | ((self.mode as u64) << 2)
            | ((self.source as u64) << 3)
            | ((self.channel as u64) << 8)
            | ((self.reel as u64) << 16)
            | ((self.generation as u64) << 32)
    }

    fn unpack(bits: u64) -> Self {
        let state = match bits & 0b11 {
            1 => SessionState::Recording,
            2 => SessionState::Stopping,
            _ => SessionState::Idle,
        };
        let mode = if bits & (1 << 2) != 0 {
            RecordingMode::LiveLoop
        } else {
            RecordingMode::OneShot
        };
        let source = if bits & (1 << 3) != 0 {
            RecordingSource::External
        } else {
            RecordingSource::Internal
        };
        Self {
            state,
            mode,
            source,
            channel: (bits >> 8) as u8,
            reel: (bits >> 16) as u16,
            generation: (bits >> 32) as u32,
        }
    }

    fn with_state(self, state: SessionState) -> Self {
        Self { state, ..self }
    }
}

/// Recording state shared between control threads and the audio thread
pub struct RecordingControl {
    slots: [AtomicU64; NUM_RECORDING_SESSIONS],
    feedback: Box<[AtomicF32]>,
    positions: Box<[AtomicU64]>,
    next_generation: AtomicU32,
}

impl RecordingControl {
    /// Create control state for `reel_count` reels
    pub fn new(reel_count: usize) -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU64::new(Session::IDLE)),
            feedback: (0..reel_count).map(|_| AtomicF32::new(0.0)).collect(),
            positions: (0..reel_count).map(|_| AtomicU64::new(0)).collect(),
            next_generation: AtomicU32::new(1),
        }
    }

    pub fn reel_count(&self) -> usize {
        self.feedback.len()
    }

    /// Start recording into `reel`
    ///
    /// Replaces a session already targeting the reel, otherwise claims a
    /// free slot. Returns false for invalid arguments or when every slot
    /// is busy.
    pub fn start(
        &self,
        reel: usize,
        mode: RecordingMode,
        source: RecordingSource,
        channel: usize,
    ) -> bool {
        if reel >= self.reel_count() || reel > u16::MAX as usize {
            return false;
        }
        if source == RecordingSource::Internal && channel >= NUM_CHANNELS {
            return false;
        }

        let session = Session {
            state: SessionState::Recording,
            mode,
            source,
            channel: channel.min(NUM_CHANNELS - 1) as u8,
            reel: reel as u16,
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        };

        loop {
            let current: [u64; NUM_RECORDING_SESSIONS] =
                std::array::from_fn(|i| self.slots[i].load(Ordering::Acquire));
            let target = current
                .iter()
                .position(|bits| {
                    // A stopping session keeps its slot until the audio thread writes its splice
                    let existing = Session::unpack(*bits);
                    existing.state == SessionState::Recording && existing.reel as usize == reel
                })
                .or_else(|| {
                    current
                        .iter()
                        .position(|bits| Session::unpack(*bits).state == SessionState::Idle)
                });

            let Some(index) = target else {
                log::warn!("Recording: no free session for reel {}", reel);
                return false;
            };

            if self.slots[index]
                .compare_exchange(current[index], session.pack(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.positions[reel].store(0, Ordering::Relaxed);
                log::debug!(
                    "Recording: session {} started on reel {} ({:?}, {:?}, channel {})",
                    index,
                    reel,
                    mode,
                    source,
                    channel
                );
                return true;
            }
        }
    }

    /// Request the session recording into `reel` to stop
    ///
    /// The audio thread finalizes the reel's splice on its next block.
    pub fn stop(&self, reel: usize) -> bool {
        for (index, slot) in self.slots.iter().enumerate() {
            let bits = slot.load(Ordering::Acquire);
            let session = Session::unpack(bits);
            if session.state != SessionState::Recording || session.reel as usize != reel {
                continue;
            }
            let stopping = session.with_state(SessionState::Stopping).pack();
            if slot
                .compare_exchange(bits, stopping, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                log::debug!("Recording: session {} on reel {} stopping", index, reel);
                return true;
            }
        }
        false
    }

    /// Whether a session is actively recording into `reel`
    pub fn is_recording(&self, reel: usize) -> bool {
        self.slots.iter().any(|slot| {
            let session = Session::unpack(slot.load(Ordering::Acquire));
            session.state == SessionState::Recording && session.reel as usize == reel
        })
    }

    /// Overdub feedback for `reel` (0.0 replaces, 1.0 keeps everything)
    pub fn set_feedback(&self, reel: usize, amount: f32) -> bool {
        if !amount.is_finite() {
            return false;
        }
        match self.feedback.get(reel) {
            Some(cell) => {
                cell.store(amount.clamp(0.0, 1.0), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn feedback(&self, reel: usize) -> f32 {
        self.feedback
            .get(reel)
            .map(|cell| cell.load(Ordering::Relaxed))
            .unwrap_or(0.0)
    }

    /// Write cursor of the most recent session on `reel`, in frames
    pub fn position(&self, reel: usize) -> u64 {
        self.positions
            .get(reel)
            .map(|cell| cell.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Drop every session (used when the reels are reallocated)
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.store(Session::IDLE, Ordering::Release);
        }
        for position in self.positions.iter() {
            position.store(0, Ordering::Relaxed);
        }
    }
}

/// Audio-thread cursor of one slot
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    active: bool,
    generation: u32,
    position: usize,
    /// Furthest frame written + 1
    recorded: usize,
    /// Frames the cursor may address before wrapping or stopping
    limit: usize,
}

/// Signals available to recording sessions for one block
pub struct RecordInputs<'a> {
    /// Pre-mix signal of every channel
    pub channels: &'a [StereoBuffer],
    /// External input (silent when nothing was written)
    pub external: &'a StereoBuffer,
}

/// Audio-thread side of recording
pub struct Recorder {
    cursors: [Cursor; NUM_RECORDING_SESSIONS],
    /// Live-loop pre-size length in frames
    loop_frames: usize,
}

impl Recorder {
    pub fn new(loop_frames: usize) -> Self {
        Self {
            cursors: [Cursor::default(); NUM_RECORDING_SESSIONS],
            loop_frames,
        }
    }

    /// Feed one block into every active session and finalize stopped ones
    pub fn process(&mut self, control: &RecordingControl, reels: &mut ReelBank, inputs: RecordInputs<'_>) {
        for index in 0..NUM_RECORDING_SESSIONS {
            let bits = control.slots[index].load(Ordering::Acquire);
            let session = Session::unpack(bits);
            let cursor = &mut self.cursors[index];

            match session.state {
                SessionState::Idle => cursor.active = false,
                SessionState::Stopping => {
                    if cursor.active && cursor.generation == session.generation {
                        if let Some(reel) = reels.get_mut(session.reel as usize) {
                            reel.set_splice(Splice::new(0, cursor.recorded));
                        }
                    }
                    cursor.active = false;
                    // A new session may have replaced this one meanwhile
                    let _ = control.slots[index].compare_exchange(
                        bits,
                        Session::IDLE,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                }
                SessionState::Recording => {
                    let reel_index = session.reel as usize;
                    let Some(reel) = reels.get_mut(reel_index) else {
                        continue;
                    };

                    if !cursor.active || cursor.generation != session.generation {
                        let limit = match session.mode {
                            RecordingMode::LiveLoop => {
                                if reel.is_empty() {
                                    reel.set_len(self.loop_frames);
                                }
                                reel.len()
                            }
                            RecordingMode::OneShot => reel.capacity(),
                        };
                        *cursor = Cursor {
                            active: true,
                            generation: session.generation,
                            position: 0,
                            recorded: 0,
                            limit,
                        };
                    }

                    let signal = match session.source {
                        RecordingSource::Internal => {
                            match inputs.channels.get(session.channel as usize) {
                                Some(buffer) => buffer,
                                None => continue,
                            }
                        }
                        RecordingSource::External => inputs.external,
                    };

                    let feedback = control.feedback(reel_index);
                    let mut full = cursor.limit == 0;
                    for sample in signal.iter() {
                        if cursor.position >= cursor.limit {
                            match session.mode {
                                RecordingMode::LiveLoop => cursor.position = 0,
                                RecordingMode::OneShot => {
                                    full = true;
                                    break;
                                }
                            }
                        }
                        reel.record_sample_with_feedback(cursor.position, *sample, feedback);
                        cursor.position += 1;
                        cursor.recorded = cursor.recorded.max(cursor.position);
                    }

                    if let Some(position) = control.positions.get(reel_index) {
                        position.store(cursor.position as u64, Ordering::Relaxed);
                    }

                    if full {
                        let _ = control.slots[index].compare_exchange(
                            bits,
                            session.with_state(SessionState::Stopping).pack(),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        );
                    }
                }
            }
        }
    }

    /// Forget every cursor
    pub fn reset(&mut self) {
        self.cursors = [Cursor::default(); NUM_RECORDING_SESSIONS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Reel;
    use crate::types::StereoSample;

    fn channels(value: f32, frames: usize) -> Vec<StereoBuffer> {
        (0..NUM_CHANNELS)
            .map(|c| {
                let v = if c == 1 { value } else { 0.0 };
                StereoBuffer::from_channels(&vec![v; frames], &vec![v; frames])
            })
            .collect()
    }

    #[test]
    fn test_pack_roundtrip() {
        let session = Session {
            state: SessionState::Stopping,
            mode: RecordingMode::LiveLoop,
            source: RecordingSource::External,
            channel: 7,
            reel: 513,
            generation: u32::MAX,
        };
        assert_eq!(Session::unpack(session.pack()), session);
        assert_eq!(Session::unpack(Session::IDLE).state, SessionState::Idle);
    }

    #[test]
    fn test_slots_are_limited() {
        let control = RecordingControl::new(8);
        for reel in 0..NUM_RECORDING_SESSIONS {
            assert!(control.start(reel, RecordingMode::OneShot, RecordingSource::Internal, 0));
        }
        assert!(!control.start(6, RecordingMode::OneShot, RecordingSource::Internal, 0));
        // Same reel replaces its session instead of needing a new slot
        assert!(control.start(2, RecordingMode::LiveLoop, RecordingSource::External, 0));
        assert!(!control.start(99, RecordingMode::OneShot, RecordingSource::Internal, 0));
        assert!(!control.start(0, RecordingMode::OneShot, RecordingSource::Internal, NUM_CHANNELS));
    }

    #[test]
    fn test_one_shot_records_and_sets_splice() {
        let control = RecordingControl::new(2);
        let mut reels = ReelBank::with_capacity(2, 1000);
        let mut recorder = Recorder::new(500);
        let inputs = channels(0.5, 64);
        let external = StereoBuffer::silence(64);

        assert!(control.start(1, RecordingMode::OneShot, RecordingSource::Internal, 1));
        assert!(control.is_recording(1));
        for _ in 0..3 {
            recorder.process(&control, &mut reels, RecordInputs { channels: &inputs, external: &external });
        }
        assert_eq!(control.position(1), 192);

        assert!(control.stop(1));
        assert!(!control.is_recording(1), "stop is visible immediately");
        recorder.process(&control, &mut reels, RecordInputs { channels: &inputs, external: &external });

        let reel = reels.get(1).unwrap();
        assert_eq!(reel.splice(), Splice::new(0, 192));
        assert_eq!(reel.read(100), StereoSample::mono(0.5));
        assert_eq!(reel.read(192), StereoSample::silence());
        // Slot is free again
        assert_eq!(Session::unpack(control.slots[0].load(Ordering::Relaxed)).state, SessionState::Idle);
    }

    #[test]
    fn test_restart_after_stop_keeps_first_splice() {
        let control = RecordingControl::new(1);
        let mut reels = ReelBank::with_capacity(1, 1000);
        let mut recorder = Recorder::new(500);
        let inputs = channels(0.5, 64);
        let external = StereoBuffer::silence(64);

        assert!(control.start(0, RecordingMode::OneShot, RecordingSource::Internal, 1));
        recorder.process(&control, &mut reels, RecordInputs { channels: &inputs, external: &external });

        // Restart before the audio thread has seen the stop
        assert!(control.stop(0));
        assert!(control.start(0, RecordingMode::OneShot, RecordingSource::Internal, 1));
        assert_eq!(Session::unpack(control.slots[0].load(Ordering::Relaxed)).state, SessionState::Stopping);
        assert_eq!(Session::unpack(control.slots[1].load(Ordering::Relaxed)).state, SessionState::Recording);

        recorder.process(&control, &mut reels, RecordInputs { channels: &inputs, external: &external });
        assert_eq!(reels.get(0).unwrap().splice(), Splice::new(0, 64));
        assert_eq!(Session::unpack(control.slots[0].load(Ordering::Relaxed)).state, SessionState::Idle);
        assert!(control.is_recording(0));

        recorder.process(&control, &mut reels, RecordInputs { channels: &inputs, external: &external });
        assert!(control.stop(0));
        recorder.process(&control, &mut reels, RecordInputs { channels: &inputs, external: &external });
        assert_eq!(reels.get(0).unwrap().splice(), Splice::new(0, 128));
    }

    #[test]
    fn test_one_shot_stops_when_full() {
        let control = RecordingControl::new(1);
        let mut reels = ReelBank::with_capacity(1, 100);
        let mut recorder = Recorder::new(100);
        let inputs = channels(0.25, 64);
        let external = StereoBuffer::silence(64);

        control.start(0, RecordingMode::OneShot, RecordingSource::Internal, 1);
        recorder.process(&control, &mut reels, RecordInputs { channels: &inputs, external: &external });
        recorder.process(&control, &mut reels, RecordInputs { channels: &inputs, external: &external });
        assert!(!control.is_recording(0));

        recorder.process(&control, &mut reels, RecordInputs { channels: &inputs, external: &external });
        assert_eq!(reels.get(0).unwrap().splice(), Splice::new(0, 100));
    }

    #[test]
    fn test_live_loop_presizes_and_wraps() {
        let control = RecordingControl::new(1);
        let mut reels = ReelBank::with_capacity(1, 1000);
        let mut recorder = Recorder::new(100);
        let external = StereoBuffer::from_channels(&[1.0; 64], &[1.0; 64]);
        let inputs = channels(0.0, 64);

        control.set_feedback(0, 0.5);
        control.start(0, RecordingMode::LiveLoop, RecordingSource::External, 0);
        recorder.process(&control, &mut reels, RecordInputs { channels: &inputs, external: &external });
        assert_eq!(reels.get(0).unwrap().len(), 100, "empty reel pre-sized to loop length");

        recorder.process(&control, &mut reels, RecordInputs { channels: &inputs, external: &external });
        assert_eq!(control.position(0), 28, "cursor wrapped");
        // First 28 frames were written twice: 1.0 * 0.5 + 1.0
        assert_eq!(reels.get(0).unwrap().read(10), StereoSample::mono(1.5));
        assert_eq!(reels.get(0).unwrap().read(50), StereoSample::mono(1.0));

        control.stop(0);
        recorder.process(&control, &mut reels, RecordInputs { channels: &inputs, external: &external });
        assert_eq!(reels.get(0).unwrap().splice(), Splice::new(0, 100));
    }

    #[test]
    fn test_feedback_bounds() {
        let control = RecordingControl::new(2);
        assert!(control.set_feedback(1, 2.0));
        assert_eq!(control.feedback(1), 1.0);
        assert!(!control.set_feedback(2, 0.5));
        assert!(!control.set_feedback(0, f32::NAN));
        assert_eq!(control.position(5), 0);
        assert!(!control.stop(0));
    }
}
