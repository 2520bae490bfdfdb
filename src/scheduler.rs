//! The poll loop: bounds how much MIDI intake happens per invocation.
//!
//! Decoding and allocation are synchronous, bounded-time operations; the
//! loop's only job is to cap the work done between audio-buffer refills so
//! USB traffic can never starve the refill deadline. Missing that deadline
//! is an audible glitch and a harder constraint than MIDI timing precision.

use crate::{Activity, Instrument, bridge::SynthBridge, packet::UsbMidiPacket};

/// A non-blocking source of USB-MIDI Event Packets, typically the USB host
/// transport's receive FIFO. The core polls it; it never drives the
/// transport. A source faster than the engine should drop (and count)
/// excess packets itself rather than buffer without bound.
pub trait PacketSource {
    /// Returns the next packet if one is already available.
    fn poll(&mut self) -> Option<UsbMidiPacket>;
}

/// Drives decoder → allocator → bridge, at most `budget` packets per cycle.
pub struct PollLoop {
    budget: usize,
}

/// What one cycle did.
#[derive(Clone, Copy, Debug)]
pub struct CycleReport {
    /// Packets consumed this cycle.
    pub packets: usize,
    /// Union of the activity of every handled event.
    pub activity: Activity,
    /// The budget ran out with input possibly still waiting; the caller
    /// should come back soon after servicing the audio refill.
    pub exhausted: bool,
}

impl PollLoop {
    /// `budget` is the most packets a single cycle may consume; zero is
    /// clamped to one so a cycle always makes progress.
    pub fn new(budget: usize) -> Self {
        Self {
            budget: budget.max(1),
        }
    }

    /// Services the allocator's retry queue, then drains up to the budget
    /// from `source`. Never suspends; the caller yields to the audio refill
    /// between cycles.
    pub fn run_cycle<S, B, const N: usize>(
        &self,
        source: &mut S,
        instrument: &mut Instrument<B, N>,
    ) -> CycleReport
    where
        S: PacketSource,
        B: SynthBridge,
    {
        instrument.service();

        let mut report = CycleReport {
            packets: 0,
            activity: Activity::none(),
            exhausted: false,
        };
        while report.packets < self.budget {
            let Some(packet) = source.poll() else {
                return report;
            };
            report.activity |= instrument.handle_packet(packet);
            report.packets += 1;
        }
        report.exhausted = true;
        report
    }
}
