//! USB-MIDI Event Packet decoding.
//!
//! A USB host-mode MIDI transport delivers fixed 4-byte Event Packets: a
//! header byte carrying the cable number and Code Index Number, followed by
//! up to three bytes of MIDI data (USB-MIDI 1.0 §4). The framing guarantees
//! that each packet self-contains a complete message chunk, so decoding is
//! stateless: one packet yields zero or one Channel Voice event, and a bad
//! packet is dropped (and counted by the caller) rather than raising a
//! fatal error. The host stack may deliver partial or hostile bytes under
//! load; nothing in this module panics on them.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use wmidi::{Channel, ControlFunction, MidiMessage, Note, U7, U14};

/// One raw USB-MIDI Event Packet as read from the host transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsbMidiPacket([u8; 4]);

impl UsbMidiPacket {
    /// Wraps four raw bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// The virtual MIDI port the message arrived on (upper nibble of the
    /// packet header).
    pub const fn cable_number(&self) -> u8 {
        self.0[0] >> 4
    }

    /// The Code Index Number (lower nibble of the packet header).
    pub const fn cin(&self) -> u8 {
        self.0[0] & 0x0f
    }

    /// The MIDI message bytes: status plus up to two data bytes.
    pub fn midi_bytes(&self) -> &[u8] {
        &self.0[1..]
    }
}

/// Code Index Number, classifying the MIDI content of an Event Packet.
///
/// Only the Channel Voice range (0x8..=0xE) and the single-byte value (0xF,
/// which carries System Real-Time traffic) are meaningful to this engine;
/// everything else (SysEx fragments, System Common, cable events) decodes
/// to [`DecodeError::UnsupportedCin`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodeIndexNumber {
    /// Note Off.
    NoteOff = 0x8,
    /// Note On.
    NoteOn = 0x9,
    /// Polyphonic key pressure (aftertouch).
    PolyKeyPressure = 0xa,
    /// Control Change.
    ControlChange = 0xb,
    /// Program Change.
    ProgramChange = 0xc,
    /// Channel pressure (aftertouch).
    ChannelPressure = 0xd,
    /// Pitch Bend Change.
    PitchBend = 0xe,
    /// Single byte, notably System Real-Time.
    SingleByte = 0xf,
}

/// A decoded MIDI Channel Voice event.
///
/// Immutable once decoded; the allocator consumes each event exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MidiEvent {
    /// A key was struck: channel, note, velocity.
    NoteOn(Channel, Note, U7),
    /// A key was released: channel, note, release velocity.
    NoteOff(Channel, Note, U7),
    /// A controller moved: channel, controller, value.
    ControlChange(Channel, ControlFunction, U7),
    /// The bend wheel moved: channel, 14-bit value centered at 0x2000.
    PitchBend(Channel, U14),
}

/// Why a packet produced no event and was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// The Code Index Number is outside the range this engine understands.
    UnsupportedCin(u8),
    /// A Channel Voice packet whose MIDI bytes do not parse as a message.
    Malformed,
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnsupportedCin(cin) => write!(f, "unsupported code index number {cin:#x}"),
            Self::Malformed => write!(f, "malformed channel voice packet"),
        }
    }
}

/// Decodes one Event Packet into at most one Channel Voice event.
///
/// Real-time traffic, aftertouch, and program changes are recognized but
/// produce no event (`Ok(None)`): a sequencer host commonly
/// floods the wire with timing clocks and pressure messages, and none of
/// them carry anything this voice engine acts on. The cable number is
/// ignored so that every port's stream merges into one.
pub fn decode(packet: &UsbMidiPacket) -> Result<Option<MidiEvent>, DecodeError> {
    let Some(cin) = CodeIndexNumber::from_u8(packet.cin()) else {
        return Err(DecodeError::UnsupportedCin(packet.cin()));
    };

    match cin {
        CodeIndexNumber::SingleByte
        | CodeIndexNumber::PolyKeyPressure
        | CodeIndexNumber::ChannelPressure
        | CodeIndexNumber::ProgramChange => Ok(None),
        _ => decode_channel_voice(packet),
    }
}

fn decode_channel_voice(packet: &UsbMidiPacket) -> Result<Option<MidiEvent>, DecodeError> {
    let message =
        MidiMessage::from_bytes(packet.midi_bytes()).map_err(|_| DecodeError::Malformed)?;

    Ok(match message {
        // NoteOn with velocity zero is the wire's spelling of NoteOff.
        MidiMessage::NoteOn(channel, note, velocity) if u8::from(velocity) == 0 => {
            Some(MidiEvent::NoteOff(channel, note, velocity))
        }
        MidiMessage::NoteOn(channel, note, velocity) => {
            Some(MidiEvent::NoteOn(channel, note, velocity))
        }
        MidiMessage::NoteOff(channel, note, velocity) => {
            Some(MidiEvent::NoteOff(channel, note, velocity))
        }
        MidiMessage::ControlChange(channel, controller, value) => {
            Some(MidiEvent::ControlChange(channel, controller, value))
        }
        MidiMessage::PitchBendChange(channel, value) => {
            Some(MidiEvent::PitchBend(channel, value))
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_decodes() {
        let packet = UsbMidiPacket::new([0x09, 0x90, 60, 100]);
        let event = decode(&packet).expect("should decode");
        assert_eq!(
            Some(MidiEvent::NoteOn(
                Channel::Ch1,
                Note::C4,
                U7::from_u8_lossy(100)
            )),
            event,
            "Expected left but got right"
        );
    }

    #[test]
    fn note_on_with_zero_velocity_is_note_off() {
        let packet = UsbMidiPacket::new([0x09, 0x91, 60, 0]);
        let event = decode(&packet).expect("should decode");
        assert_eq!(
            Some(MidiEvent::NoteOff(
                Channel::Ch2,
                Note::C4,
                U7::from_u8_lossy(0)
            )),
            event,
            "Expected left but got right"
        );
    }

    #[test]
    fn note_off_decodes() {
        let packet = UsbMidiPacket::new([0x08, 0x80, 64, 40]);
        let event = decode(&packet).expect("should decode");
        assert_eq!(
            Some(MidiEvent::NoteOff(
                Channel::Ch1,
                Note::E4,
                U7::from_u8_lossy(40)
            )),
            event,
            "Expected left but got right"
        );
    }

    #[test]
    fn control_change_decodes() {
        let packet = UsbMidiPacket::new([0x0b, 0xb0, 7, 99]);
        let event = decode(&packet).expect("should decode");
        assert_eq!(
            Some(MidiEvent::ControlChange(
                Channel::Ch1,
                ControlFunction::CHANNEL_VOLUME,
                U7::from_u8_lossy(99)
            )),
            event,
            "Expected left but got right"
        );
    }

    #[test]
    fn pitch_bend_decodes() {
        // 0x2000 (center) is lsb 0x00, msb 0x40 on the wire
        let packet = UsbMidiPacket::new([0x0e, 0xe0, 0x00, 0x40]);
        let event = decode(&packet).expect("should decode");
        assert_eq!(
            Some(MidiEvent::PitchBend(
                Channel::Ch1,
                U14::try_from(0x2000).unwrap()
            )),
            event,
            "Expected left but got right"
        );
    }

    #[test]
    fn realtime_traffic_is_filtered() {
        // timing clock
        let packet = UsbMidiPacket::new([0x0f, 0xf8, 0, 0]);
        assert_eq!(Ok(None), decode(&packet), "Expected left but got right");
    }

    #[test]
    fn aftertouch_produces_no_event() {
        let poly = UsbMidiPacket::new([0x0a, 0xa0, 60, 50]);
        let channel = UsbMidiPacket::new([0x0d, 0xd0, 50, 0]);
        assert_eq!(Ok(None), decode(&poly), "Expected left but got right");
        assert_eq!(Ok(None), decode(&channel), "Expected left but got right");
    }

    #[test]
    fn sysex_cin_is_unsupported() {
        let packet = UsbMidiPacket::new([0x04, 0xf0, 1, 2]);
        assert_eq!(
            Err(DecodeError::UnsupportedCin(0x4)),
            decode(&packet),
            "Expected left but got right"
        );
    }

    #[test]
    fn garbage_payload_is_malformed() {
        // data byte with the high bit set cannot belong to a note message
        let packet = UsbMidiPacket::new([0x09, 0x90, 0x90, 0x40]);
        assert_eq!(
            Err(DecodeError::Malformed),
            decode(&packet),
            "Expected left but got right"
        );
    }

    #[test]
    fn cable_number_is_exposed_but_ignored() {
        let packet = UsbMidiPacket::new([0x39, 0x90, 60, 100]);
        assert_eq!(3, packet.cable_number(), "Expected left but got right");
        assert!(
            decode(&packet).expect("should decode").is_some(),
            "Cable number should not affect decoding"
        );
    }
}
