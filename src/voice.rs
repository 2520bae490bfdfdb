//! Voice descriptors and the note-to-frequency mapping.

use micromath::F32Ext as _;
use wmidi::{Channel, Note, U7};

/// Concert pitch: MIDI note 69 (A4) sounds at 440 Hz.
const A4_NOTE_NUMBER: f32 = 69.0;
const A4_FREQUENCY_HZ: f32 = 440.0;

/// Equal-temperament frequency for `note`, offset by `bend_semitones`.
pub fn note_frequency(note: Note, bend_semitones: f32) -> f32 {
    let n = u8::from(note) as f32;
    A4_FREQUENCY_HZ * 2.0_f32.powf((n - A4_NOTE_NUMBER + bend_semitones) / 12.0)
}

/// Identity of a sounding note.
///
/// Keyed by the (channel, note) pair rather than the bare note number so a
/// multi-channel controller cannot alias two keys onto one voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoteId {
    /// MIDI channel the note arrived on.
    pub channel: Channel,
    /// The note number.
    pub note: Note,
}

/// Frequency/amplitude pair handed to the synthesis engine.
///
/// Parameters are always replaced as a whole value, never field by field,
/// so a reader holding a copy can never observe a new frequency with an old
/// amplitude.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VoiceParams {
    /// Oscillator frequency in Hz.
    pub frequency: f32,
    /// Linear amplitude in `0.0..=1.0`; `0.0` renders silence.
    pub amplitude: f32,
}

/// Occupancy state of one voice slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VoiceState {
    /// Not sounding and bound to no note.
    #[default]
    Free,
    /// Bound to a note and audible.
    Sounding,
    /// Stop issued but not yet accepted by the synthesis engine.
    Releasing,
}

/// One unit of synthesis capacity: a slot able to sound a single note.
///
/// Invariant: `note()` is `Some` exactly when the voice is not Free.
#[derive(Clone, Copy, Debug, Default)]
pub struct Voice {
    state: VoiceState,
    note: Option<NoteId>,
    velocity: U7,
    serial: u32,
    params: VoiceParams,
}

impl Voice {
    /// Occupancy state.
    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// The bound note, when not Free.
    pub fn note(&self) -> Option<NoteId> {
        self.note
    }

    /// Strike velocity of the bound note; kept so amplitude can be
    /// re-derived when a channel volume message arrives.
    pub fn velocity(&self) -> U7 {
        self.velocity
    }

    /// Activation stamp: lower means claimed earlier.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Current render parameters.
    pub fn params(&self) -> VoiceParams {
        self.params
    }

    pub(crate) fn claim(&mut self, note: NoteId, velocity: U7, params: VoiceParams, serial: u32) {
        self.state = VoiceState::Sounding;
        self.note = Some(note);
        self.velocity = velocity;
        self.serial = serial;
        self.params = params;
    }

    pub(crate) fn set_params(&mut self, params: VoiceParams) {
        self.params = params;
    }

    /// Marks the voice Releasing and silences its render parameters. The
    /// note stays bound until the release completes.
    pub(crate) fn begin_release(&mut self) {
        self.state = VoiceState::Releasing;
        self.params.amplitude = 0.0;
    }

    pub(crate) fn free(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(expected: f32, actual: f32) {
        let tolerance = expected * 1e-3;
        assert!(
            (expected - actual).abs() < tolerance,
            "expected {expected} Hz, got {actual} Hz"
        );
    }

    #[test]
    fn concert_pitch() {
        assert_close(440.0, note_frequency(Note::A4, 0.0));
    }

    #[test]
    fn octave_below_halves_frequency() {
        assert_close(220.0, note_frequency(Note::A3, 0.0));
    }

    #[test]
    fn bend_of_twelve_semitones_doubles_frequency() {
        assert_close(880.0, note_frequency(Note::A4, 12.0));
    }

    #[test]
    fn free_voice_binds_no_note() {
        let voice = Voice::default();
        assert_eq!(VoiceState::Free, voice.state(), "Expected left but got right");
        assert_eq!(None, voice.note(), "Expected left but got right");
    }

    #[test]
    fn release_keeps_the_note_bound_but_silent() {
        let mut voice = Voice::default();
        let id = NoteId {
            channel: Channel::Ch1,
            note: Note::C4,
        };
        voice.claim(
            id,
            U7::from_u8_lossy(100),
            VoiceParams {
                frequency: 261.63,
                amplitude: 0.4,
            },
            7,
        );
        voice.begin_release();

        assert_eq!(
            VoiceState::Releasing,
            voice.state(),
            "Expected left but got right"
        );
        assert_eq!(Some(id), voice.note(), "Expected left but got right");
        assert_eq!(0.0, voice.params().amplitude, "Expected left but got right");
    }
}
