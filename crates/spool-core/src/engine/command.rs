//! Structural command queue (control thread → audio thread)
//!
//! Note events and parameter changes have their own lock-free paths. This
//! queue carries the rare structural changes: replacing a channel's sound
//! source or swapping a reel. Commands are applied at the start of a block,
//! never mid-block.
//!
//! Payloads are wrapped in `basedrop::Owned` so the value they replace is
//! freed on the GC thread rather than on the audio thread.

use basedrop::Owned;

use crate::source::{Reel, SoundSource};

/// Capacity of the command ring buffer
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Commands sent from control threads to the audio thread
pub enum EngineCommand {
    /// Replace the source at `voice` on `channel`
    SetSource {
        channel: usize,
        voice: usize,
        source: Owned<Box<dyn SoundSource>>,
    },
    /// Replace reel `index`
    LoadReel {
        index: usize,
        reel: Owned<Box<dyn Reel>>,
    },
    /// Silence every source and free every poly voice
    AllNotesOff,
}

/// Create the command channel with [`COMMAND_QUEUE_CAPACITY`] slots
pub fn command_channel() -> (rtrb::Producer<EngineCommand>, rtrb::Consumer<EngineCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gc::gc_handle;
    use crate::source::Silence;

    #[test]
    fn test_command_channel_roundtrip() {
        let (mut tx, mut rx) = command_channel();
        let source = Owned::new(&gc_handle(), Box::new(Silence) as Box<dyn SoundSource>);
        assert!(tx
            .push(EngineCommand::SetSource {
                channel: 1,
                voice: 0,
                source,
            })
            .is_ok());

        let cmd = rx.pop();
        assert!(matches!(
            cmd,
            Ok(EngineCommand::SetSource {
                channel: 1,
                voice: 0,
                ..
            })
        ));
        assert!(rx.pop().is_err());
    }

    #[test]
    fn test_command_size() {
        // Payloads are pointer-sized; the enum must stay within half a cache line
        let size = std::mem::size_of::<EngineCommand>();
        assert!(size <= 32, "EngineCommand is {} bytes, expected <= 32", size);
    }
}
