//! Polyphonic voice allocation: the policy turning note events into a
//! bounded set of sounding voices.
//!
//! The allocator is the sole writer of the voice pool. Every decision
//! leaves it as a discrete [`VoiceCommand`], so the audio path only ever
//! consumes complete hand-offs.
//!
//! Assignment policy:
//! - a duplicate NoteOn re-triggers the voice already bound to its
//!   (channel, note) pair instead of layering a second one; a layered
//!   voice could never receive its own NoteOff and would stick;
//! - otherwise the lowest-index Free slot is claimed;
//! - with the pool exhausted, the Sounding voice with the oldest activation
//!   stamp is stolen (strict FIFO, ties toward the lowest slot index). The
//!   newest note is never the one dropped.

use tinyvec::ArrayVec;
use wmidi::{Channel, ControlFunction, Note, U7, U14};

use crate::{
    Activity,
    bridge::{SynthBridge, VoiceCommand},
    config::{DEFAULT_POLYPHONY, EngineConfig},
    packet::MidiEvent,
    pool::{VoiceBank, VoicePool},
    stats::AllocStats,
    voice::{NoteId, VoiceParams, VoiceState, note_frequency},
};

/// Commands a persistently busy engine can leave queued before the
/// allocator starts forcing voices Free instead.
const PENDING_DEPTH: usize = 16;

/// Delivery attempts per command before the allocator gives up on it.
const MAX_DELIVERY_ATTEMPTS: u8 = 3;

/// General MIDI powers channels up at volume 100 of 127.
const GM_DEFAULT_CHANNEL_VOLUME: u8 = 100;

const MIDI_CHANNELS: usize = 16;

/// Pitch bend wheel center (no deflection) on the 14-bit wire scale.
const BEND_CENTER: i32 = 0x2000;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct PendingCommand {
    command: VoiceCommand,
    /// Failed delivery attempts so far.
    attempts: u8,
}

/// Maps NoteOn/NoteOff events to pool slots and drives the synthesis
/// bridge; owns the [`VoicePool`] exclusively.
pub struct VoiceAllocator<const N: usize = DEFAULT_POLYPHONY> {
    pool: VoicePool<N>,
    config: EngineConfig,
    /// Semitone offset per channel, derived from the last bend message.
    bend: [f32; MIDI_CHANNELS],
    /// Last CC 7 value per channel.
    channel_volume: [U7; MIDI_CHANNELS],
    /// Store-and-forward queue for commands the bridge refused. Strict FIFO
    /// so per-slot start/stop order is preserved.
    pending: ArrayVec<[PendingCommand; PENDING_DEPTH]>,
    stats: AllocStats,
}

impl<const N: usize> VoiceAllocator<N> {
    /// Creates an allocator with an all-Free pool. `config` is fixed for the
    /// allocator's lifetime; callers validate it first (see
    /// [`Instrument::new`][crate::Instrument::new]).
    pub fn new(config: EngineConfig) -> Self {
        Self {
            pool: VoicePool::new(),
            config,
            bend: [0.0; MIDI_CHANNELS],
            channel_volume: [U7::from_u8_lossy(GM_DEFAULT_CHANNEL_VOLUME); MIDI_CHANNELS],
            pending: ArrayVec::new(),
            stats: AllocStats::default(),
        }
    }

    /// Read access to the pool.
    pub fn pool(&self) -> &VoicePool<N> {
        &self.pool
    }

    /// Counter view.
    pub fn stats(&self) -> &AllocStats {
        &self.stats
    }

    /// Snapshot of every slot's render parameters.
    pub fn render_state(&self) -> VoiceBank<N> {
        self.pool.render_state()
    }

    /// Routes one decoded event to the matching handler.
    pub fn handle_event<B: SynthBridge>(&mut self, bridge: &mut B, event: MidiEvent) -> Activity {
        match event {
            MidiEvent::NoteOn(channel, note, velocity) => {
                self.handle_note_on(bridge, channel, note, velocity)
            }
            MidiEvent::NoteOff(channel, note, velocity) => {
                self.handle_note_off(bridge, channel, note, velocity)
            }
            MidiEvent::ControlChange(channel, controller, value) => {
                self.handle_control_change(bridge, channel, controller, value)
            }
            MidiEvent::PitchBend(channel, value) => {
                self.handle_pitch_bend(bridge, channel, value)
            }
        }
    }

    /// Claims, re-triggers, or steals a voice for a struck note.
    pub fn handle_note_on<B: SynthBridge>(
        &mut self,
        bridge: &mut B,
        channel: Channel,
        note: Note,
        velocity: U7,
    ) -> Activity {
        let id = NoteId { channel, note };
        let params = self.voice_params(id, velocity);

        let slot = if let Some(slot) = self.pool.find_bound(id) {
            // Re-trigger: a duplicate NoteOn must reuse its own slot, or the
            // extra voice could never receive its own NoteOff.
            self.stats.retriggers += 1;
            self.deliver(bridge, VoiceCommand::Stop(slot as u8));
            slot
        } else if let Some(slot) = self.pool.lowest_free() {
            slot
        } else if let Some(slot) = self
            .pool
            .oldest_sounding()
            .or_else(|| self.pool.oldest_releasing())
        {
            self.stats.steals += 1;
            info!(
                "stealing voice {} for note {}",
                slot as u8,
                u8::from(note)
            );
            self.deliver(bridge, VoiceCommand::Stop(slot as u8));
            slot
        } else {
            // only reachable with a zero-capacity pool
            warn!("no voice slot available for note {}", u8::from(note));
            return Activity::none();
        };

        self.pool.claim(slot, id, velocity, params);
        self.deliver(bridge, VoiceCommand::Start(slot as u8, params));
        Activity::VoiceChange
    }

    /// Releases the voice bound to a lifted note, if any.
    pub fn handle_note_off<B: SynthBridge>(
        &mut self,
        bridge: &mut B,
        channel: Channel,
        note: Note,
        _velocity: U7,
    ) -> Activity {
        let id = NoteId { channel, note };
        let slot = self
            .pool
            .find_bound(id)
            .filter(|&slot| self.pool.voice(slot).state() == VoiceState::Sounding);
        let Some(slot) = slot else {
            // Expected after a steal or a duplicate NoteOn; count and move on.
            self.stats.orphan_releases += 1;
            trace!("NoteOff for unbound note {}", u8::from(note));
            return Activity::none();
        };

        // Release is synchronous for square-wave voices (no decay tail):
        // the voice goes Free the moment the bridge accepts the stop. A
        // refusal leaves it Releasing until the retry queue resolves it.
        self.pool.begin_release(slot);
        self.deliver(bridge, VoiceCommand::Stop(slot as u8));
        Activity::VoiceChange
    }

    /// Acts on the few controllers the engine understands; counts the rest.
    pub fn handle_control_change<B: SynthBridge>(
        &mut self,
        bridge: &mut B,
        channel: Channel,
        controller: ControlFunction,
        value: U7,
    ) -> Activity {
        match controller {
            // Only CC 123 with value 0 is the panic gesture; nonzero
            // values are not All Notes Off.
            ControlFunction::ALL_NOTES_OFF if u8::from(value) == 0 => self.panic_all_off(bridge),
            ControlFunction::ALL_SOUND_OFF => self.panic_all_off(bridge),
            ControlFunction::CHANNEL_VOLUME => {
                self.channel_volume[channel.index() as usize] = value;
                self.refresh_channel(bridge, channel)
            }
            _ => {
                self.stats.ignored_controls += 1;
                trace!(
                    "ignoring CC {} value {}",
                    u8::from(controller.0),
                    u8::from(value)
                );
                Activity::none()
            }
        }
    }

    /// Re-tunes every Sounding voice on the bent channel. Voice occupancy is
    /// unaffected.
    pub fn handle_pitch_bend<B: SynthBridge>(
        &mut self,
        bridge: &mut B,
        channel: Channel,
        value: U14,
    ) -> Activity {
        let deflection = i32::from(u16::from(value)) - BEND_CENTER;
        self.bend[channel.index() as usize] =
            deflection as f32 / BEND_CENTER as f32 * self.config.pitch_bend_range;
        self.refresh_channel(bridge, channel)
    }

    /// Forces every voice Free, emitting exactly one stop per previously
    /// non-Free slot. The recovery path for stuck notes, device disconnects,
    /// and CC 120/123.
    pub fn panic_all_off<B: SynthBridge>(&mut self, bridge: &mut B) -> Activity {
        // Anything still queued is stale once everything stops.
        self.pending.clear();
        self.stats.all_notes_off += 1;
        for slot in 0..N {
            if self.pool.voice(slot).state() == VoiceState::Free {
                continue;
            }
            self.pool.free(slot);
            self.deliver(bridge, VoiceCommand::Stop(slot as u8));
        }
        info!("all notes off");
        Activity::VoiceChange | Activity::AllNotesOff
    }

    /// Retries refused commands in order. Call once per poll cycle, before
    /// consuming new packets.
    pub fn service<B: SynthBridge>(&mut self, bridge: &mut B) {
        while !self.pending.is_empty() {
            let mut head = self.pending[0];
            match bridge.send(head.command) {
                Ok(()) => {
                    self.pending.remove(0);
                    self.resolve_sent(head.command);
                }
                Err(fault) => {
                    self.stats.rejected_commands += 1;
                    head.attempts += 1;
                    if head.attempts >= MAX_DELIVERY_ATTEMPTS {
                        warn!(
                            "giving up on command for slot {} after {} attempts: {}",
                            head.command.slot(),
                            head.attempts,
                            fault
                        );
                        self.pending.remove(0);
                        self.abandon(head.command);
                    } else {
                        self.pending[0] = head;
                    }
                    // later commands keep their place; try again next cycle
                    break;
                }
            }
        }
    }

    /// Re-derives parameters for every Sounding voice on `channel` and
    /// emits updates.
    fn refresh_channel<B: SynthBridge>(&mut self, bridge: &mut B, channel: Channel) -> Activity {
        let mut activity = Activity::none();
        for slot in 0..N {
            let voice = *self.pool.voice(slot);
            if voice.state() != VoiceState::Sounding {
                continue;
            }
            let Some(id) = voice.note() else { continue };
            if id.channel != channel {
                continue;
            }
            let params = self.voice_params(id, voice.velocity());
            self.pool.set_params(slot, params);
            self.deliver(bridge, VoiceCommand::Update(slot as u8, params));
            activity |= Activity::ParamChange;
        }
        activity
    }

    /// Frequency from note plus channel bend; amplitude from velocity,
    /// channel volume, and the master volume.
    fn voice_params(&self, id: NoteId, velocity: U7) -> VoiceParams {
        let ch = id.channel.index() as usize;
        let frequency = note_frequency(id.note, self.bend[ch]);
        let amplitude = self.config.master_volume
            * (u8::from(self.channel_volume[ch]) as f32 / 127.0)
            * (u8::from(velocity) as f32 / 127.0);
        VoiceParams {
            frequency,
            amplitude,
        }
    }

    /// Hands one command to the bridge, queueing behind anything already
    /// awaiting retry so per-slot command order is never inverted.
    fn deliver<B: SynthBridge>(&mut self, bridge: &mut B, command: VoiceCommand) {
        if !self.pending.is_empty() {
            self.enqueue(command, 0);
            return;
        }
        match bridge.send(command) {
            Ok(()) => self.resolve_sent(command),
            Err(fault) => {
                self.stats.rejected_commands += 1;
                warn!(
                    "bridge refused command for slot {}: {}",
                    command.slot(),
                    fault
                );
                self.enqueue(command, 1);
            }
        }
    }

    fn enqueue(&mut self, command: VoiceCommand, attempts: u8) {
        let pending = PendingCommand { command, attempts };
        if self.pending.try_push(pending).is_some() {
            // Queue full: the engine is wedged. Resolve now rather than
            // buffer unboundedly or deadlock.
            self.abandon(command);
        }
    }

    /// Gives up on a command: frees the voice it addressed and counts it.
    /// The voice may keep sounding until a later stop or panic lands; that
    /// is audible but recoverable, unlike a wedged allocator.
    fn abandon(&mut self, command: VoiceCommand) {
        self.stats.forced_frees += 1;
        warn!(
            "forcing voice {} free after repeated bridge refusals",
            command.slot()
        );
        let slot = command.slot() as usize;
        if slot < N {
            self.pool.free(slot);
        }
    }

    /// Post-delivery bookkeeping: a stop accepted by the bridge completes a
    /// synchronous release. The Releasing check keeps a steal's stop-old
    /// command from freeing the slot it just reassigned.
    fn resolve_sent(&mut self, command: VoiceCommand) {
        if let VoiceCommand::Stop(slot) = command {
            let slot = slot as usize;
            if slot < N && self.pool.voice(slot).state() == VoiceState::Releasing {
                self.pool.free(slot);
            }
        }
    }
}
