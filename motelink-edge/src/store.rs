use heapless::Vec;

use crate::{Anchor, Error, Event};

/// Persistent log of motion events plus the last acknowledged anchor.
///
/// The sensing path appends; the sender only reads. Events are removed
/// solely through [`EventStore::clear`].
pub trait EventStore {
    /// Oldest-first view of at most `max` events.
    fn read(&self, max: usize) -> impl Iterator<Item = Event> + '_;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&mut self, event: Event) -> Result<(), Error>;

    fn clear(&mut self);

    fn anchor(&self) -> Option<Anchor>;

    fn store_anchor(&mut self, anchor: Anchor);
}

/// RAM-backed store holding up to `N` events.
#[derive(Debug, Default)]
pub struct MemoryEventStore<const N: usize> {
    events: Vec<Event, N>,
    anchor: Option<Anchor>,
}

impl<const N: usize> MemoryEventStore<N> {
    pub const fn new() -> Self {
        Self {
            events: Vec::new(),
            anchor: None,
        }
    }

    pub fn with_anchor(anchor: Anchor) -> Self {
        Self {
            events: Vec::new(),
            anchor: Some(anchor),
        }
    }
}

impl<const N: usize> EventStore for MemoryEventStore<N> {
    fn read(&self, max: usize) -> impl Iterator<Item = Event> + '_ {
        self.events.iter().copied().take(max)
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn append(&mut self, event: Event) -> Result<(), Error> {
        self.events.push(event).map_err(|_| {
            warn!("event store full, dropping state {}", event.state);
            Error::StoreFull
        })
    }

    fn clear(&mut self) {
        self.events.clear();
    }

    fn anchor(&self) -> Option<Anchor> {
        self.anchor
    }

    fn store_anchor(&mut self, anchor: Anchor) {
        self.anchor = Some(anchor);
    }
}
