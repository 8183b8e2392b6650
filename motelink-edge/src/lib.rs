#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod engine;
pub mod link;
pub mod sender;
pub mod store;

#[cfg(test)]
mod testing;

#[cfg(test)]
use critical_section as _;

pub use engine::Engine;
pub use link::{
    LINK_EVENT_DEPTH, LinkError, LinkEvent, PeripheralLink, Timebase, link_event_receiver,
    link_events,
};
pub use sender::{BatchFill, BatchOutcome, MAX_BATCH, Sender, SenderConfig, SenderState};
pub use store::{EventStore, MemoryEventStore};

pub use motelink_core::{Anchor, DataPoint, Event};

use motelink_core::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The link dropped before `sequence` could be sent.
    NotConnected { sequence: u16 },
    /// The link refused the notification carrying `sequence`.
    NotifyFailed { sequence: u16 },
    /// A full batch would take longer than the link supervision timeout.
    PacingExceedsSupervision,
    InvalidBatchSize(usize),
    StoreFull,
    Protocol(ProtocolError),
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}
