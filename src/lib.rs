//! This crate contains the hardware-agnostic core of a polyphonic
//! square-wave synthesizer driven by a USB MIDI controller: it turns a
//! stream of raw, possibly malformed or interleaved USB-MIDI Event Packets
//! into a bounded set of concurrently sounding notes, and translates those
//! decisions into commands for an external audio-synthesis engine.
//!
//! Data flows one direction: USB packets to decoded events, events to
//! allocation decisions, decisions to synthesis engine calls. Two
//! asynchronous contexts share voice state (a software-scheduled poll loop
//! pulling USB packets and a hardware audio-refill interrupt rendering
//! samples), so every mutation is handed across as an indivisible message:
//! discrete [`VoiceCommand`]s through a bounded queue, or whole
//! [`VoiceBank`] snapshots through a watch. The audio path never reads live
//! voice fields.
//!
//! No input can make this core panic or block. Malformed packets are
//! dropped and counted, pool exhaustion is resolved by stealing the oldest
//! voice, and a refused engine command is retried and, failing that,
//! resolved by forcing the voice Free. [`Instrument::panic_all_off`] is the
//! recovery path an external watchdog can always invoke.

#![no_std]
#![deny(missing_docs)]

// This must go first so the other modules see its macros.
mod fmt;

mod allocator;
mod bridge;
mod config;
mod packet;
mod pool;
mod scheduler;
mod stats;
mod voice;

pub use allocator::VoiceAllocator;
pub use bridge::{
    BridgeFault, CommandQueue, QueuedBridge, SynthBridge, VoiceBankWatch, VoiceCommand,
};
pub use config::{ConfigError, DEFAULT_POLYPHONY, EngineConfig};
pub use packet::{CodeIndexNumber, DecodeError, MidiEvent, UsbMidiPacket, decode};
pub use pool::{VoiceBank, VoicePool};
pub use scheduler::{CycleReport, PacketSource, PollLoop};
pub use stats::{AllocStats, DecodeStats, EngineStats};
pub use voice::{NoteId, Voice, VoiceParams, VoiceState, note_frequency};

use bitmask_enum::bitmask;

/// Operations that may be performed during a state update.
#[bitmask(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Activity {
    /// A voice was claimed, re-triggered, stolen, or released.
    VoiceChange,
    /// Voice or channel parameters changed without an occupancy change.
    ParamChange,
    /// Every voice was forced silent.
    AllNotesOff,
}

/// Binds the packet decoder, the voice allocator, and a synthesis bridge
/// into one engine.
///
/// `N` is the polyphony capacity, fixed at construction along with the
/// [`EngineConfig`]. The owner calls [`update`][Self::update] (or lets a
/// [`PollLoop`] call [`handle_packet`][Self::handle_packet]) from exactly
/// one context; the audio path talks only to the bridge's queue and to
/// published [`VoiceBank`] snapshots.
pub struct Instrument<B: SynthBridge, const N: usize = DEFAULT_POLYPHONY> {
    allocator: VoiceAllocator<N>,
    bridge: B,
    decode_stats: DecodeStats,
}

impl<B: SynthBridge, const N: usize> Instrument<B, N> {
    /// Validates `config` once and builds an engine with an all-Free pool.
    pub fn new(bridge: B, config: EngineConfig) -> Result<Self, ConfigError> {
        if N == 0 {
            return Err(ConfigError::ZeroPolyphony);
        }
        config.validate()?;
        Ok(Self {
            allocator: VoiceAllocator::new(config),
            bridge,
            decode_stats: DecodeStats::default(),
        })
    }

    /// Updates the engine given a slice of data as read from the USB
    /// transport. Data may contain one or more USB-MIDI Event Packets.
    pub fn update(&mut self, data: &[u8]) -> Activity {
        let mut activity = Activity::none();
        for chunk in data.chunks(4) {
            match <[u8; 4]>::try_from(chunk) {
                Ok(bytes) => activity |= self.handle_packet(UsbMidiPacket::new(bytes)),
                Err(_) => {
                    self.decode_stats.malformed_packets += 1;
                    warn!("USB-MIDI Event Packets must always be 32 bits long");
                }
            }
        }
        activity
    }

    /// Decodes and dispatches one Event Packet.
    pub fn handle_packet(&mut self, packet: UsbMidiPacket) -> Activity {
        match packet::decode(&packet) {
            Ok(Some(event)) => self.handle_event(event),
            Ok(None) => {
                self.decode_stats.ignored_events += 1;
                Activity::none()
            }
            Err(error) => {
                self.decode_stats.malformed_packets += 1;
                trace!("dropped packet: {}", error);
                Activity::none()
            }
        }
    }

    /// Dispatches one already-decoded event.
    pub fn handle_event(&mut self, event: MidiEvent) -> Activity {
        self.allocator.handle_event(&mut self.bridge, event)
    }

    /// Retries engine commands refused on earlier cycles. Call once per
    /// poll cycle; [`PollLoop::run_cycle`] does.
    pub fn service(&mut self) {
        self.allocator.service(&mut self.bridge);
    }

    /// Forces every voice Free with one stop each; see
    /// [`VoiceAllocator::panic_all_off`].
    pub fn panic_all_off(&mut self) -> Activity {
        self.allocator.panic_all_off(&mut self.bridge)
    }

    /// Snapshot of every slot's render parameters, for publication to the
    /// audio path as one value.
    pub fn render_state(&self) -> VoiceBank<N> {
        self.allocator.render_state()
    }

    /// Read access to the allocator and its pool.
    pub fn allocator(&self) -> &VoiceAllocator<N> {
        &self.allocator
    }

    /// Combined diagnostics counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            decode: self.decode_stats,
            alloc: *self.allocator.stats(),
        }
    }

    #[cfg(test)]
    pub(crate) fn bridge_mut(&mut self) -> &mut B {
        &mut self.bridge
    }
}
