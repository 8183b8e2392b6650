use embassy_time::Duration;
use motelink_core::{DataPoint, decode_ack, encode_single};

use crate::{Anchor, Error, EventStore, LinkEvent, PeripheralLink, Timebase};

/// Hard upper bound on packets per batch.
pub const MAX_BATCH: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SenderState {
    Idle,
    Loading,
    Transmitting,
    AwaitingAck,
}

/// How a batch is sized when the store holds fewer events than `batch_size`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BatchFill {
    /// Always send `batch_size` packets, zero-filling the tail.
    #[default]
    Padded,
    /// One packet per stored event; a lone empty packet if there are none.
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BatchOutcome {
    /// Busy or not connected; nothing was sent.
    Skipped,
    Sent { packets: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SenderConfig {
    pub batch_size: usize,
    pub fill: BatchFill,
    pub packet_interval: Duration,
    pub supervision_timeout: Duration,
    /// Pause after connecting while link parameters settle.
    pub settle_delay: Duration,
    /// Minimum spacing between batches on one connection.
    pub send_interval: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            fill: BatchFill::Padded,
            packet_interval: Duration::from_millis(50),
            supervision_timeout: Duration::from_secs(6),
            settle_delay: Duration::from_secs(1),
            send_interval: Duration::from_secs(10),
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.batch_size == 0 {
            return Err(Error::InvalidBatchSize(self.batch_size));
        }

        let batch = self.batch_size.min(MAX_BATCH) as u32;
        if self.packet_interval * batch >= self.supervision_timeout {
            return Err(Error::PacingExceedsSupervision);
        }

        Ok(())
    }

    fn batch_len(&self) -> usize {
        self.batch_size.min(MAX_BATCH)
    }
}

/// Peripheral half of the transfer protocol.
pub struct Sender<S> {
    store: S,
    config: SenderConfig,
    state: SenderState,
}

impl<S: EventStore> Sender<S> {
    pub fn new(store: S, config: SenderConfig) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            store,
            config,
            state: SenderState::Idle,
        })
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Apply a queued link event. Returns the new anchor when an ack landed.
    pub fn on_link_event(&mut self, event: &LinkEvent, now_tick: u32) -> Option<Anchor> {
        match event {
            LinkEvent::Connected => {
                debug!("link up");
                None
            }
            LinkEvent::Disconnected { reason } => {
                if self.state != SenderState::Idle {
                    warn!("link lost in {} (reason {})", self.state, reason);
                }
                self.state = SenderState::Idle;
                None
            }
            LinkEvent::AckWritten(bytes) => match decode_ack(bytes) {
                Ok(timestamp) => {
                    let anchor = Anchor::from_ack(timestamp, now_tick);
                    self.store.store_anchor(anchor);
                    self.state = SenderState::Idle;
                    info!("ack {} -> anchor {}", timestamp, anchor.epoch_secs);
                    Some(anchor)
                }
                Err(e) => {
                    warn!("ignoring ack: {}", e);
                    None
                }
            },
        }
    }

    /// Load, reconcile and transmit one batch.
    ///
    /// A link that is down, or a notification that fails, ends the batch at
    /// that packet; the rest is discarded and the sender is idle again.
    pub async fn send_batch<L, T>(
        &mut self,
        link: &mut L,
        timebase: &mut T,
    ) -> Result<BatchOutcome, Error>
    where
        L: PeripheralLink,
        T: Timebase,
    {
        if self.state != SenderState::Idle || !link.is_connected() {
            debug!("send request ignored in {}", self.state);
            return Ok(BatchOutcome::Skipped);
        }

        self.state = SenderState::Loading;

        let anchor = self.store.anchor().unwrap_or_default();
        let batch = self.config.batch_len();
        let available = self.store.len().min(batch);
        let total = match self.config.fill {
            BatchFill::Padded => batch,
            BatchFill::Exact => available.max(1),
        } as u16;

        info!(
            "loaded {} events against anchor {}, sending {} packets",
            available, anchor.epoch_secs, total
        );

        self.state = SenderState::Transmitting;
        let mut events = self.store.read(batch);

        for sequence in 1..=total {
            if !link.is_connected() {
                warn!("connection lost at packet {}/{}", sequence, total);
                self.state = SenderState::Idle;
                return Err(Error::NotConnected { sequence });
            }

            let point = events
                .next()
                .map(|event| anchor.reconcile(&event))
                .unwrap_or(DataPoint::EMPTY);

            if link.notify(&encode_single(sequence, total, &point)).await.is_err() {
                warn!("notify failed at packet {}/{}", sequence, total);
                self.state = SenderState::Idle;
                return Err(Error::NotifyFailed { sequence });
            }

            if sequence % 50 == 0 {
                trace!("sent {}/{}", sequence, total);
            }

            timebase.delay(self.config.packet_interval).await;
        }

        self.state = SenderState::AwaitingAck;
        info!("batch of {} sent, waiting for ack", total);

        Ok(BatchOutcome::Sent { packets: total })
    }
}
