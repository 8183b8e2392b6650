#![cfg_attr(not(test), no_std)]

pub mod protocol;
pub mod ticks;

pub use protocol::{
    ACK_SIZE, DataPoint, MAX_POINTS_PER_PACKET, Packet, ParseResult, ProtocolError,
    SINGLE_POINT_PACKET_SIZE, decode_ack, encode_ack, encode_single,
};
pub use ticks::{TICK_HZ, TICK_MASK, TICK_MODULUS, calculate_elapsed, ticks_to_secs};

use serde::{Deserialize, Serialize};

/// One motion-state interval recorded by a peripheral.
///
/// Both ticks come from the peripheral's wrapping counter, see [`ticks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Event {
    /// Motion state code reported by the sensing path.
    pub state: u8,
    /// Counter value when the state was entered.
    pub start_tick: u32,
    /// Counter value when the state was left.
    pub end_tick: u32,
}

impl Event {
    pub const fn new(state: u8, start_tick: u32, end_tick: u32) -> Self {
        Self {
            state,
            start_tick,
            end_tick,
        }
    }

    /// Ticks spent in this state, corrected for counter wraparound.
    pub fn duration_ticks(&self) -> u32 {
        calculate_elapsed(self.start_tick, self.end_tick)
    }
}

/// Absolute UNIX time, in seconds, of tick zero of the current counter epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Anchor {
    pub epoch_secs: u32,
}

impl Anchor {
    pub const fn new(epoch_secs: u32) -> Self {
        Self { epoch_secs }
    }

    /// Build an anchor from an acknowledged absolute timestamp and the tick
    /// counter value observed when the acknowledgment arrived.
    pub fn from_ack(timestamp: u32, now_tick: u32) -> Self {
        let since_epoch = ticks_to_secs(now_tick & TICK_MASK);
        Self {
            epoch_secs: timestamp.saturating_sub(since_epoch),
        }
    }

    /// Convert an event's relative ticks into absolute seconds.
    ///
    /// The end time is derived from the start plus the wrap-corrected
    /// duration, so an event spanning a counter overflow stays ordered.
    pub fn reconcile(&self, event: &Event) -> DataPoint {
        let start = u64::from(event.start_tick & TICK_MASK);
        let end = start + u64::from(event.duration_ticks());
        let hz = u64::from(TICK_HZ);

        DataPoint {
            state_code: event.state,
            field_a: to_absolute(self.epoch_secs, start / hz),
            field_b: to_absolute(self.epoch_secs, end / hz),
        }
    }
}

fn to_absolute(epoch: u32, secs: u64) -> u32 {
    let secs = u32::try_from(secs).unwrap_or(u32::MAX);
    epoch.saturating_add(secs)
}
