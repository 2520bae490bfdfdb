//! The fixed-capacity voice pool and its whole-pool render snapshot.

use wmidi::U7;

use crate::voice::{NoteId, Voice, VoiceParams, VoiceState};

/// Ordered, fixed-size collection of voices; capacity is the hardware
/// polyphony limit.
///
/// The pool is created once with every voice Free and lives for the process
/// lifetime. The allocator is its sole writer; every other execution context
/// sees only [`VoiceBank`] snapshots or the discrete commands the allocator
/// emits, never live fields.
#[derive(Debug)]
pub struct VoicePool<const N: usize> {
    voices: [Voice; N],
    // wraps after 2^32 claims, far beyond any performance
    next_serial: u32,
}

impl<const N: usize> VoicePool<N> {
    /// Creates a pool with every voice Free.
    pub fn new() -> Self {
        Self {
            voices: [Voice::default(); N],
            next_serial: 0,
        }
    }

    /// Hardware polyphony limit.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Read access to one slot.
    pub fn voice(&self, slot: usize) -> &Voice {
        &self.voices[slot]
    }

    /// Number of Free slots.
    pub fn free_count(&self) -> usize {
        self.voices
            .iter()
            .filter(|v| v.state() == VoiceState::Free)
            .count()
    }

    /// The slot currently bound to `note`, Sounding or Releasing.
    ///
    /// Linear scan; capacities stay small enough that an index table buys
    /// nothing.
    pub fn find_bound(&self, note: NoteId) -> Option<usize> {
        self.voices.iter().position(|v| v.note() == Some(note))
    }

    /// Lowest-index Free slot.
    pub fn lowest_free(&self) -> Option<usize> {
        self.voices
            .iter()
            .position(|v| v.state() == VoiceState::Free)
    }

    /// Sounding slot with the oldest activation stamp; ties break toward the
    /// lowest index.
    pub fn oldest_sounding(&self) -> Option<usize> {
        self.oldest_in(VoiceState::Sounding)
    }

    /// Releasing slot with the oldest activation stamp. Only consulted as a
    /// steal target of last resort, when every slot has a stop in flight.
    pub fn oldest_releasing(&self) -> Option<usize> {
        self.oldest_in(VoiceState::Releasing)
    }

    fn oldest_in(&self, state: VoiceState) -> Option<usize> {
        self.voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.state() == state)
            .min_by_key(|(_, v)| v.serial())
            .map(|(slot, _)| slot)
    }

    pub(crate) fn claim(&mut self, slot: usize, note: NoteId, velocity: U7, params: VoiceParams) {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        self.voices[slot].claim(note, velocity, params, serial);
    }

    pub(crate) fn set_params(&mut self, slot: usize, params: VoiceParams) {
        self.voices[slot].set_params(params);
    }

    pub(crate) fn begin_release(&mut self, slot: usize) {
        self.voices[slot].begin_release();
    }

    pub(crate) fn free(&mut self, slot: usize) {
        self.voices[slot].free();
    }

    /// Copies every slot's render parameters into one immutable value.
    pub fn render_state(&self) -> VoiceBank<N> {
        let mut voices = [VoiceParams::default(); N];
        for (params, voice) in voices.iter_mut().zip(self.voices.iter()) {
            *params = voice.params();
        }
        VoiceBank { voices }
    }
}

impl<const N: usize> Default for VoicePool<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of every slot's render parameters.
///
/// Published as one value (for example through a
/// [`VoiceBankWatch`][crate::bridge::VoiceBankWatch]) so the audio path
/// renders from a consistent copy instead of re-reading live voice fields
/// mid-refill. A silent slot carries amplitude `0.0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoiceBank<const N: usize> {
    /// Per-slot render parameters, indexed by slot.
    pub voices: [VoiceParams; N],
}

#[cfg(test)]
mod tests {
    use super::*;
    use wmidi::{Channel, Note};

    fn id(note: Note) -> NoteId {
        NoteId {
            channel: Channel::Ch1,
            note,
        }
    }

    fn params() -> VoiceParams {
        VoiceParams {
            frequency: 261.63,
            amplitude: 0.3,
        }
    }

    #[test]
    fn new_pool_is_all_free() {
        let pool: VoicePool<4> = VoicePool::new();
        assert_eq!(4, pool.free_count(), "Expected left but got right");
        assert_eq!(None, pool.oldest_sounding(), "Expected left but got right");
    }

    #[test]
    fn claim_takes_the_lowest_free_slot_first() {
        let mut pool: VoicePool<4> = VoicePool::new();
        let slot = pool.lowest_free().expect("pool should have room");
        assert_eq!(0, slot, "Expected left but got right");

        pool.claim(slot, id(Note::C4), U7::from_u8_lossy(100), params());
        assert_eq!(
            Some(1),
            pool.lowest_free(),
            "Expected left but got right"
        );
    }

    #[test]
    fn oldest_sounding_is_fifo_with_ties_broken_by_index() {
        let mut pool: VoicePool<4> = VoicePool::new();
        for (slot, note) in [Note::C4, Note::D4, Note::E4, Note::F4].into_iter().enumerate() {
            pool.claim(slot, id(note), U7::from_u8_lossy(100), params());
        }
        assert_eq!(Some(0), pool.oldest_sounding(), "Expected left but got right");

        // freeing and reclaiming slot 0 makes it the newest
        pool.free(0);
        pool.claim(0, id(Note::G4), U7::from_u8_lossy(100), params());
        assert_eq!(Some(1), pool.oldest_sounding(), "Expected left but got right");
    }

    #[test]
    fn find_bound_matches_releasing_voices_too() {
        let mut pool: VoicePool<2> = VoicePool::new();
        pool.claim(1, id(Note::C4), U7::from_u8_lossy(100), params());
        pool.begin_release(1);
        assert_eq!(
            Some(1),
            pool.find_bound(id(Note::C4)),
            "Expected left but got right"
        );

        pool.free(1);
        assert_eq!(
            None,
            pool.find_bound(id(Note::C4)),
            "Expected left but got right"
        );
    }

    #[test]
    fn render_state_silences_free_and_releasing_slots() {
        let mut pool: VoicePool<3> = VoicePool::new();
        pool.claim(0, id(Note::C4), U7::from_u8_lossy(100), params());
        pool.claim(1, id(Note::D4), U7::from_u8_lossy(100), params());
        pool.begin_release(1);

        let bank = pool.render_state();
        assert_eq!(0.3, bank.voices[0].amplitude, "Expected left but got right");
        assert_eq!(0.0, bank.voices[1].amplitude, "Expected left but got right");
        assert_eq!(0.0, bank.voices[2].amplitude, "Expected left but got right");
    }
}
