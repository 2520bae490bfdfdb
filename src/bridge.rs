//! The synthesis bridge: the single point of contact with the external
//! audio-synthesis engine.
//!
//! The allocator decides which voice does what; the bridge only translates
//! those decisions into start/stop/update commands under the engine's
//! concurrency contract. It never selects voices itself, which keeps the
//! allocation policy independent of the backend; a square-wave engine can
//! be swapped for any other waveform without touching allocation logic.
//!
//! Two execution contexts touch voice state: the software-scheduled poll
//! loop and the hardware audio-refill interrupt. [`QueuedBridge`] therefore
//! hands commands across as indivisible messages through a bounded channel,
//! and [`VoiceBankWatch`] publishes whole-pool snapshots, so the audio path
//! can never observe a half-applied voice change.

use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::{Channel, Sender},
    watch::Watch,
};

use crate::{pool::VoiceBank, voice::VoiceParams};

/// A discrete instruction for the synthesis engine, addressed to one pool
/// slot.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VoiceCommand {
    /// Begin sounding a slot with the given parameters.
    Start(u8, VoiceParams),
    /// Silence a slot.
    Stop(u8),
    /// Replace a sounding slot's parameters without retriggering it.
    Update(u8, VoiceParams),
}

impl VoiceCommand {
    /// The pool slot this command addresses.
    pub fn slot(&self) -> u8 {
        match self {
            Self::Start(slot, _) | Self::Stop(slot) | Self::Update(slot, _) => *slot,
        }
    }
}

/// Exists only to satisfy `tinyvec`'s `Array` bound for the allocator's
/// retry queue; a default command is never delivered.
impl Default for VoiceCommand {
    fn default() -> Self {
        Self::Stop(0)
    }
}

/// A recoverable refusal from the synthesis engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BridgeFault {
    /// The engine (or the queue in front of it) cannot accept a command
    /// right now; the allocator retries on a later cycle.
    Busy,
}

impl core::fmt::Display for BridgeFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Busy => write!(f, "synthesis engine busy"),
        }
    }
}

/// Contract between the voice allocator and the audio-synthesis engine.
///
/// Every fault is recoverable: the allocator queues the command for retry
/// and, failing that, forces the affected voice Free rather than
/// deadlocking.
pub trait SynthBridge {
    /// Begin sounding `params` on `slot`.
    fn start(&mut self, slot: u8, params: VoiceParams) -> Result<(), BridgeFault>;

    /// Silence `slot`.
    fn stop(&mut self, slot: u8) -> Result<(), BridgeFault>;

    /// Replace `slot`'s parameters without retriggering.
    fn update(&mut self, slot: u8, params: VoiceParams) -> Result<(), BridgeFault>;

    /// Routes one command to the matching method.
    fn send(&mut self, command: VoiceCommand) -> Result<(), BridgeFault> {
        match command {
            VoiceCommand::Start(slot, params) => self.start(slot, params),
            VoiceCommand::Stop(slot) => self.stop(slot),
            VoiceCommand::Update(slot, params) => self.update(slot, params),
        }
    }
}

/// Bounded queue carrying commands from the poll-loop context to the audio
/// context. The audio side drains it with `try_receive`, which never blocks
/// inside an interrupt.
pub type CommandQueue<const DEPTH: usize> =
    Channel<CriticalSectionRawMutex, VoiceCommand, DEPTH>;

/// Publishes whole [`VoiceBank`] snapshots to up to `RX` receiving contexts.
pub type VoiceBankWatch<const N: usize, const RX: usize> =
    Watch<CriticalSectionRawMutex, VoiceBank<N>, RX>;

/// [`SynthBridge`] over a [`CommandQueue`].
///
/// `try_send` never blocks; a full queue surfaces as [`BridgeFault::Busy`]
/// so back-pressure lands on the allocator's retry policy instead of on an
/// unbounded buffer.
pub struct QueuedBridge<'q, const DEPTH: usize> {
    commands: Sender<'q, CriticalSectionRawMutex, VoiceCommand, DEPTH>,
}

impl<'q, const DEPTH: usize> QueuedBridge<'q, DEPTH> {
    /// Attaches to the queue the audio path drains.
    pub fn new(queue: &'q CommandQueue<DEPTH>) -> Self {
        Self {
            commands: queue.sender(),
        }
    }

    fn push(&mut self, command: VoiceCommand) -> Result<(), BridgeFault> {
        self.commands.try_send(command).map_err(|_| BridgeFault::Busy)
    }
}

impl<const DEPTH: usize> SynthBridge for QueuedBridge<'_, DEPTH> {
    fn start(&mut self, slot: u8, params: VoiceParams) -> Result<(), BridgeFault> {
        self.push(VoiceCommand::Start(slot, params))
    }

    fn stop(&mut self, slot: u8) -> Result<(), BridgeFault> {
        self.push(VoiceCommand::Stop(slot))
    }

    fn update(&mut self, slot: u8, params: VoiceParams) -> Result<(), BridgeFault> {
        self.push(VoiceCommand::Update(slot, params))
    }
}

/// Test double recording every command, optionally refusing the next few.
#[cfg(test)]
pub(crate) struct RecordingBridge {
    pub sent: tinyvec::ArrayVec<[VoiceCommand; 64]>,
    /// Number of upcoming sends to refuse with `Busy`.
    pub refusals: usize,
}

#[cfg(test)]
impl RecordingBridge {
    pub fn new() -> Self {
        Self {
            sent: tinyvec::ArrayVec::new(),
            refusals: 0,
        }
    }

    fn record(&mut self, command: VoiceCommand) -> Result<(), BridgeFault> {
        if self.refusals > 0 {
            self.refusals -= 1;
            return Err(BridgeFault::Busy);
        }
        self.sent.push(command);
        Ok(())
    }
}

#[cfg(test)]
impl SynthBridge for RecordingBridge {
    fn start(&mut self, slot: u8, params: VoiceParams) -> Result<(), BridgeFault> {
        self.record(VoiceCommand::Start(slot, params))
    }

    fn stop(&mut self, slot: u8) -> Result<(), BridgeFault> {
        self.record(VoiceCommand::Stop(slot))
    }

    fn update(&mut self, slot: u8, params: VoiceParams) -> Result<(), BridgeFault> {
        self.record(VoiceCommand::Update(slot, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_cross_the_queue_in_order() {
        static QUEUE: CommandQueue<4> = Channel::new();
        let mut bridge = QueuedBridge::new(&QUEUE);

        let params = VoiceParams {
            frequency: 440.0,
            amplitude: 0.5,
        };
        bridge.start(2, params).expect("queue should have room");
        bridge.stop(2).expect("queue should have room");

        assert_eq!(
            Ok(VoiceCommand::Start(2, params)),
            QUEUE.try_receive(),
            "Expected left but got right"
        );
        assert_eq!(
            Ok(VoiceCommand::Stop(2)),
            QUEUE.try_receive(),
            "Expected left but got right"
        );
        assert!(QUEUE.try_receive().is_err(), "Queue should now be empty");
    }

    #[test]
    fn full_queue_reports_busy() {
        static QUEUE: CommandQueue<1> = Channel::new();
        let mut bridge = QueuedBridge::new(&QUEUE);

        bridge.stop(0).expect("queue should have room");
        assert_eq!(
            Err(BridgeFault::Busy),
            bridge.stop(1),
            "Expected left but got right"
        );

        // draining makes room again
        QUEUE.try_receive().expect("queue should hold one command");
        assert_eq!(Ok(()), bridge.stop(1), "Expected left but got right");
    }
}
