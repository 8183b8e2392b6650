use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_time::Duration;
use heapless::Vec;

pub const LINK_EVENT_DEPTH: usize = 8;

/// Longest ack write kept from the link. Anything longer is truncated and
/// later rejected for having the wrong size.
pub const ACK_WRITE_MAX: usize = 16;

/// Queue the radio callbacks push into. The engine is its only consumer.
pub static LINK_EVENTS: Channel<CriticalSectionRawMutex, LinkEvent, LINK_EVENT_DEPTH> =
    Channel::new();

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    Connected,
    Disconnected { reason: u8 },
    /// Raw bytes the central wrote to the ack channel.
    AckWritten(Vec<u8, ACK_WRITE_MAX>),
}

impl LinkEvent {
    pub fn ack(bytes: &[u8]) -> Self {
        let kept = &bytes[..bytes.len().min(ACK_WRITE_MAX)];
        LinkEvent::AckWritten(Vec::from_slice(kept).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkError;

/// Peripheral side of the wireless link.
pub trait PeripheralLink {
    /// Backed by a flag the connect and disconnect callbacks flip, so it
    /// reflects link loss even in the middle of a batch.
    fn is_connected(&self) -> bool;

    /// Push one packet on the data channel.
    fn notify(&mut self, bytes: &[u8]) -> impl Future<Output = Result<(), LinkError>>;
}

/// Clock source for the peripheral.
pub trait Timebase {
    /// Current value of the 8 Hz, 24-bit tick counter.
    fn now_tick(&self) -> u32;

    fn delay(&mut self, duration: Duration) -> impl Future<Output = ()>;
}

pub fn link_events() -> Sender<'static, CriticalSectionRawMutex, LinkEvent, LINK_EVENT_DEPTH> {
    LINK_EVENTS.sender()
}

pub fn link_event_receiver()
-> Receiver<'static, CriticalSectionRawMutex, LinkEvent, LINK_EVENT_DEPTH> {
    LINK_EVENTS.receiver()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_ack_write_is_truncated() {
        let event = LinkEvent::ack(&[0xAA; 40]);
        let LinkEvent::AckWritten(bytes) = event else {
            panic!("expected an ack event");
        };
        assert_eq!(bytes.len(), ACK_WRITE_MAX);
    }
}
