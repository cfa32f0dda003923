//! Polyphonic voice allocation
//!
//! Maps `(note, track_id)` to one of `N` fixed voice slots. Allocation tries,
//! in order: the slot already holding the same note from the same track
//! (retrigger), the lowest free slot, then the least recently triggered slot
//! (lowest index on ties).

/// Note value of a free slot
const FREE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VoiceSlot {
    note: i32,
    track_id: u8,
    age: u32,
}

impl VoiceSlot {
    const EMPTY: VoiceSlot = VoiceSlot {
        note: FREE,
        track_id: 0,
        age: 0,
    };

    #[inline]
    fn holds(&self, note: u8, track_id: u8) -> bool {
        self.note == note as i32 && self.track_id == track_id
    }
}

/// Fixed-size voice allocator
#[derive(Debug, Clone)]
pub struct VoiceAllocator<const N: usize> {
    slots: [VoiceSlot; N],
    counter: u32,
}

impl<const N: usize> VoiceAllocator<N> {
    pub fn new() -> Self {
        Self {
            slots: [VoiceSlot::EMPTY; N],
            counter: 0,
        }
    }

    /// Slot to play `note` from `track_id` on
    ///
    /// Always returns a slot; when every slot is busy the oldest is stolen.
    pub fn allocate(&mut self, note: u8, track_id: u8) -> usize {
        self.counter = self.counter.wrapping_add(1);
        let age = self.counter;

        let index = if let Some(i) = self.slots.iter().position(|s| s.holds(note, track_id)) {
            i
        } else if let Some(i) = self.slots.iter().position(|s| s.note == FREE) {
            i
        } else {
            // min_by_key returns the first minimum, i.e. the lowest index on ties
            self.slots
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| s.age)
                .map(|(i, _)| i)
                .unwrap_or(0)
        };

        self.slots[index] = VoiceSlot {
            note: note as i32,
            track_id,
            age,
        };
        index
    }

    /// Mark the slot holding `(note, track_id)` free and return it
    ///
    /// The voice itself keeps sounding through its release.
    pub fn release(&mut self, note: u8, track_id: u8) -> Option<usize> {
        let index = self.slots.iter().position(|s| s.holds(note, track_id))?;
        self.slots[index].note = FREE;
        Some(index)
    }

    /// Free `slot` regardless of what it holds (its voice was replaced)
    pub fn free_slot(&mut self, slot: usize) {
        if let Some(s) = self.slots.get_mut(slot) {
            s.note = FREE;
        }
    }

    /// Note held by `slot`, if any
    pub fn note_at(&self, slot: usize) -> Option<u8> {
        self.slots
            .get(slot)
            .filter(|s| s.note != FREE)
            .map(|s| s.note as u8)
    }

    /// Trigger counter of `slot`
    pub fn age_at(&self, slot: usize) -> Option<u32> {
        self.slots.get(slot).map(|s| s.age)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.note != FREE).count()
    }

    /// Free every slot
    pub fn reset(&mut self) {
        self.slots = [VoiceSlot::EMPTY; N];
        self.counter = 0;
    }
}

impl<const N: usize> Default for VoiceAllocator<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrigger_reuses_slot() {
        let mut voices = VoiceAllocator::<8>::new();
        let first = voices.allocate(60, 0);
        voices.allocate(64, 0);
        let again = voices.allocate(60, 0);
        assert_eq!(first, again, "same note from same track must reuse its voice");
        assert_eq!(voices.active_count(), 2);
    }

    #[test]
    fn test_free_slot() {
        let mut voices = VoiceAllocator::<4>::new();
        voices.allocate(60, 0);
        voices.allocate(62, 0);
        voices.free_slot(0);
        voices.free_slot(9);
        assert_eq!(voices.note_at(0), None);
        assert_eq!(voices.allocate(70, 0), 0);
    }

    #[test]
    fn test_same_note_other_track_gets_new_slot() {
        let mut voices = VoiceAllocator::<8>::new();
        let a = voices.allocate(60, 0);
        let b = voices.allocate(60, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_steals_oldest() {
        let mut voices = VoiceAllocator::<8>::new();
        for note in 0..8u8 {
            assert_eq!(voices.allocate(60 + note, 0), note as usize);
        }
        // Retrigger slot 0 so slot 1 becomes the oldest
        voices.allocate(60, 0);

        let stolen = voices.allocate(80, 0);
        assert_eq!(stolen, 1);
        assert_eq!(voices.note_at(1), Some(80));
    }

    #[test]
    fn test_nine_notes_steal_first() {
        let mut voices = VoiceAllocator::<8>::new();
        for note in 0..8u8 {
            voices.allocate(40 + note, 0);
        }
        let ninth = voices.allocate(90, 0);
        assert_eq!(ninth, 0);
        assert_eq!(voices.note_at(0), Some(90));
    }

    #[test]
    fn test_release_frees_slot() {
        let mut voices = VoiceAllocator::<4>::new();
        let slot = voices.allocate(60, 2);
        assert_eq!(voices.release(60, 1), None, "track id must match");
        assert_eq!(voices.release(60, 2), Some(slot));
        assert_eq!(voices.note_at(slot), None);
        assert_eq!(voices.allocate(61, 0), slot, "lowest free slot is reused");
    }

    #[test]
    fn test_age_increases() {
        let mut voices = VoiceAllocator::<2>::new();
        let a = voices.allocate(1, 0);
        let b = voices.allocate(2, 0);
        assert!(voices.age_at(b) > voices.age_at(a));
    }
}
