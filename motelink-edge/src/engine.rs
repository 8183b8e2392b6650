use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Receiver;
use embassy_time::Duration;
use motelink_core::{TICK_HZ, calculate_elapsed};

use crate::{BatchOutcome, Error, EventStore, LinkEvent, PeripheralLink, Sender, Timebase};

/// Main loop of the peripheral.
///
/// Radio callbacks only enqueue [`LinkEvent`]s; the engine applies them to
/// the sender and starts a batch every `send_interval` while connected.
pub struct Engine<'a, M, S, L, T, const N: usize>
where
    M: RawMutex,
{
    sender: Sender<S>,
    link: L,
    timebase: T,
    events: Receiver<'a, M, LinkEvent, N>,
    last_send: Option<u32>,
}

impl<'a, M, S, L, T, const N: usize> Engine<'a, M, S, L, T, N>
where
    M: RawMutex,
    S: EventStore,
    L: PeripheralLink,
    T: Timebase,
{
    pub fn new(
        sender: Sender<S>,
        link: L,
        timebase: T,
        events: Receiver<'a, M, LinkEvent, N>,
    ) -> Self {
        Self {
            sender,
            link,
            timebase,
            events,
            last_send: None,
        }
    }

    pub fn sender(&self) -> &Sender<S> {
        &self.sender
    }

    pub fn sender_mut(&mut self) -> &mut Sender<S> {
        &mut self.sender
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Tear the engine down, keeping the sender and its store.
    pub fn into_sender(self) -> Sender<S> {
        self.sender
    }

    /// Wait for the next link event or for the send cadence to come due,
    /// whichever happens first. Returns the batch outcome if one was sent.
    pub async fn step(&mut self) -> Result<Option<BatchOutcome>, Error> {
        let mut wait = None;

        if let Some(last) = self.last_send {
            let now = self.timebase.now_tick();
            let elapsed = calculate_elapsed(last, now);
            let interval = duration_to_ticks(self.sender.config().send_interval);

            if self.sender.state() == crate::SenderState::Idle {
                if elapsed >= interval {
                    self.last_send = Some(now);
                    return self
                        .sender
                        .send_batch(&mut self.link, &mut self.timebase)
                        .await
                        .map(Some);
                }
                wait = Some(ticks_to_duration(interval - elapsed));
            }
        }

        let event = match wait {
            Some(remaining) => {
                match select(self.events.receive(), self.timebase.delay(remaining)).await {
                    Either::First(event) => event,
                    Either::Second(()) => return Ok(None),
                }
            }
            None => self.events.receive().await,
        };

        self.apply(event).await;
        Ok(None)
    }

    pub async fn run(mut self) -> ! {
        loop {
            match self.step().await {
                Ok(Some(outcome)) => debug!("batch finished: {}", outcome),
                Ok(None) => {}
                Err(e) => error!("transfer aborted: {}", e),
            }
        }
    }

    async fn apply(&mut self, event: LinkEvent) {
        let now = self.timebase.now_tick();
        self.sender.on_link_event(&event, now);

        match event {
            LinkEvent::Connected => {
                self.timebase.delay(self.sender.config().settle_delay).await;
                self.last_send = Some(now);
            }
            LinkEvent::Disconnected { .. } => self.last_send = None,
            LinkEvent::AckWritten(_) => {}
        }
    }
}

fn duration_to_ticks(duration: Duration) -> u32 {
    (duration.as_millis() * u64::from(TICK_HZ) / 1000) as u32
}

fn ticks_to_duration(ticks: u32) -> Duration {
    Duration::from_millis(u64::from(ticks) * 1000 / u64::from(TICK_HZ))
}
