//! Diagnostics counters.
//!
//! Malformed input and policy decisions degrade gracefully instead of
//! erroring, so these counters are the only trace they leave. They are
//! exposed for external logging; no format is mandated.

/// Decoder-side counters, kept by the [`Instrument`][crate::Instrument]
/// wrapper because the decoder itself is stateless.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecodeStats {
    /// Packets dropped as malformed or carrying an unsupported Code Index
    /// Number.
    pub malformed_packets: u32,
    /// Well-formed packets that produce no event: System Real-Time,
    /// aftertouch, program changes.
    pub ignored_events: u32,
}

/// Allocator-side counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AllocStats {
    /// Notes assigned by stealing the oldest sounding voice.
    pub steals: u32,
    /// Duplicate NoteOns that re-triggered their existing voice.
    pub retriggers: u32,
    /// NoteOffs with no matching bound voice (normal after a steal).
    pub orphan_releases: u32,
    /// Control Changes the engine does not act on.
    pub ignored_controls: u32,
    /// All-notes-off sweeps, whether from CC 120/123 or an explicit panic.
    pub all_notes_off: u32,
    /// Commands the synthesis bridge refused at first delivery.
    pub rejected_commands: u32,
    /// Voices forced Free after the bridge kept refusing their commands.
    pub forced_frees: u32,
}

/// Combined counter view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineStats {
    /// Packet decoder counters.
    pub decode: DecodeStats,
    /// Voice allocator counters.
    pub alloc: AllocStats,
}
