use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use motelink_core::protocol::{ACK_CHANNEL_ID, DATA_CHANNEL_ID, LINK_PADDING_MAX, SERVICE_ID};
use motelink_core::{Anchor, Event, TICK_HZ, TICK_MASK};
use motelink_edge::{
    Engine, EventStore, LinkEvent as PeripheralEvent, MemoryEventStore, PeripheralLink, Sender,
    SenderConfig, Timebase,
};
use rand::Rng;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{
    ChannelHandle, ConnectionHandle, LinkError, LinkEvent, LinkTransport, PeerAddress,
    ScanCandidate,
};

pub const MOCK_STORE_CAPACITY: usize = 512;
const PERIPHERAL_QUEUE_DEPTH: usize = 8;

const DATA_CHANNEL: ChannelHandle = ChannelHandle(0x0010);
const ACK_CHANNEL: ChannelHandle = ChannelHandle(0x0012);

const REASON_SUPERVISION_TIMEOUT: u8 = 0x08;
const REASON_REMOTE_TERMINATED: u8 = 0x13;
const REASON_LOCAL_HOST: u8 = 0x16;

type PeripheralQueue = Channel<CriticalSectionRawMutex, PeripheralEvent, PERIPHERAL_QUEUE_DEPTH>;
pub type MockSender = Sender<MemoryEventStore<MOCK_STORE_CAPACITY>>;

/// Misbehaviour a simulated peripheral can be scripted with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerFaults {
    /// Drop the link right after this many packets.
    pub drop_after: Option<u16>,
    /// Stop sending, but stay connected, after this many packets.
    pub stall_after: Option<u16>,
    /// Do not expose the transfer service.
    pub missing_service: bool,
    pub refuse_connect: bool,
    /// Fail every write to the ack channel.
    pub reject_ack: bool,
    /// Pad every notification with link-layer filler bytes.
    pub pad_notifications: bool,
}

/// A simulated peripheral running the real edge sender.
pub struct MockPeer {
    name: String,
    advertised: String,
    address: PeerAddress,
    faults: PeerFaults,
    clock: TokioTimebase,
    sender: Mutex<Option<MockSender>>,
}

impl MockPeer {
    pub fn new(name: impl Into<String>, address: PeerAddress, sender: MockSender) -> Self {
        let name = name.into();

        Self {
            advertised: name.clone(),
            name,
            address,
            faults: PeerFaults::default(),
            clock: TokioTimebase::new(),
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Build a peer whose store is pre-loaded with `events`.
    pub fn with_events(
        name: impl Into<String>,
        address: PeerAddress,
        events: &[Event],
        anchor: Option<Anchor>,
        config: SenderConfig,
    ) -> Result<Self, motelink_edge::Error> {
        let mut store = match anchor {
            Some(anchor) => MemoryEventStore::with_anchor(anchor),
            None => MemoryEventStore::new(),
        };
        for event in events {
            store.append(*event)?;
        }

        Ok(Self::new(name, address, Sender::new(store, config)?))
    }

    pub fn with_faults(mut self, faults: PeerFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Advertise under a different (for instance truncated) name.
    pub fn advertising_as(mut self, name: impl Into<String>) -> Self {
        self.advertised = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> PeerAddress {
        self.address
    }

    pub fn faults(&self) -> PeerFaults {
        self.faults
    }

    /// Anchor the peripheral currently holds. `None` while a connection is
    /// still running, or if no ack was ever received.
    pub async fn anchor(&self) -> Option<Anchor> {
        self.sender
            .lock()
            .await
            .as_ref()
            .and_then(|sender| sender.store().anchor())
    }
}

/// Random motion events, as a peripheral would log them over a few hours.
pub fn random_events(count: usize) -> Vec<Event> {
    let mut rng = rand::rng();
    let mut tick: u32 = rng.random_range(0..TICK_HZ * 60);

    (0..count)
        .map(|_| {
            let state = rng.random_range(0..3u8);
            let len = rng.random_range(TICK_HZ..TICK_HZ * 600);
            let event = Event::new(state, tick & TICK_MASK, tick.wrapping_add(len) & TICK_MASK);
            tick = tick.wrapping_add(len);
            event
        })
        .collect()
}

/// Peripheral tick counter backed by tokio time, so paused-clock tests stay
/// deterministic.
#[derive(Debug, Clone, Copy)]
pub struct TokioTimebase {
    origin: Instant,
}

impl TokioTimebase {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioTimebase {
    fn default() -> Self {
        Self::new()
    }
}

impl Timebase for TokioTimebase {
    fn now_tick(&self) -> u32 {
        let ticks = self.origin.elapsed().as_millis() * u128::from(TICK_HZ) / 1000;
        (ticks as u32) & TICK_MASK
    }

    async fn delay(&mut self, duration: embassy_time::Duration) {
        tokio::time::sleep(Duration::from_micros(duration.as_micros())).await;
    }
}

struct MockNotifier {
    handle: ConnectionHandle,
    events: mpsc::Sender<LinkEvent>,
    connected: Arc<AtomicBool>,
    closed: CancellationToken,
    faults: PeerFaults,
    sent: u16,
}

impl PeripheralLink for MockNotifier {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn notify(&mut self, bytes: &[u8]) -> Result<(), motelink_edge::LinkError> {
        if self.faults.stall_after.is_some_and(|n| self.sent >= n) {
            debug!(sent = self.sent, "peripheral stalled");
            self.closed.cancelled().await;
            return Err(motelink_edge::LinkError);
        }

        let mut payload = bytes.to_vec();
        if self.faults.pad_notifications {
            payload.resize(bytes.len() + LINK_PADDING_MAX, 0);
        }

        let event = LinkEvent::Data {
            handle: self.handle,
            channel: DATA_CHANNEL,
            bytes: payload,
        };
        self.events
            .send(event)
            .await
            .map_err(|_| motelink_edge::LinkError)?;
        self.sent += 1;

        if self.faults.drop_after == Some(self.sent) {
            warn!(sent = self.sent, "simulating link loss");
            self.connected.store(false, Ordering::Release);
            self.closed.cancel();
            let _ = self
                .events
                .send(LinkEvent::Disconnected {
                    handle: self.handle,
                    reason: REASON_SUPERVISION_TIMEOUT,
                })
                .await;
        }

        Ok(())
    }
}

struct Connection {
    peer: Arc<MockPeer>,
    connected: Arc<AtomicBool>,
    closed: CancellationToken,
    queue: Arc<PeripheralQueue>,
    streaming: bool,
}

/// In-process link transport backed by simulated peripherals.
pub struct MockLink {
    peers: Vec<Arc<MockPeer>>,
    events: mpsc::Sender<LinkEvent>,
    scan_delay: Duration,
    connections: Mutex<HashMap<ConnectionHandle, Connection>>,
    next_handle: AtomicU16,
}

impl MockLink {
    pub fn new(peers: Vec<MockPeer>, events: mpsc::Sender<LinkEvent>) -> Self {
        Self {
            peers: peers.into_iter().map(Arc::new).collect(),
            events,
            scan_delay: Duration::ZERO,
            connections: Mutex::new(HashMap::new()),
            next_handle: AtomicU16::new(1),
        }
    }

    /// Make every scan take this long to return.
    pub fn with_scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = delay;
        self
    }

    pub fn peer(&self, name: &str) -> Option<Arc<MockPeer>> {
        self.peers.iter().find(|p| p.name == name).cloned()
    }

    pub async fn active_connections(&self) -> usize {
        self.connections.lock().await.len()
    }
}

#[async_trait]
impl LinkTransport for MockLink {
    async fn scan(&self, window: Duration) -> Result<Vec<ScanCandidate>, LinkError> {
        debug!(window_ms = window.as_millis() as u64, "mock scan");
        if !self.scan_delay.is_zero() {
            tokio::time::sleep(self.scan_delay).await;
        }

        let mut rng = rand::rng();
        Ok(self
            .peers
            .iter()
            .map(|peer| ScanCandidate {
                name: peer.advertised.clone(),
                address: peer.address,
                rssi: rng.random_range(-90..-40),
            })
            .collect())
    }

    async fn connect(&self, address: PeerAddress) -> Result<ConnectionHandle, LinkError> {
        let peer = self
            .peers
            .iter()
            .find(|p| p.address == address)
            .cloned()
            .ok_or(LinkError::UnknownPeer(address))?;

        if peer.faults.refuse_connect {
            return Err(LinkError::ConnectRefused(address));
        }

        let handle = ConnectionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(PeripheralQueue::new());
        let _ = queue.try_send(PeripheralEvent::Connected);

        self.connections.lock().await.insert(
            handle,
            Connection {
                peer,
                connected: Arc::new(AtomicBool::new(true)),
                closed: CancellationToken::new(),
                queue,
                streaming: false,
            },
        );

        self.events
            .send(LinkEvent::Connected { handle, address })
            .await
            .map_err(|_| LinkError::ChannelClosed)?;

        Ok(handle)
    }

    async fn discover_channel(
        &self,
        conn: ConnectionHandle,
        service: u128,
        channel: u128,
    ) -> Result<ChannelHandle, LinkError> {
        let connections = self.connections.lock().await;
        let connection = connections.get(&conn).ok_or(LinkError::NotConnected)?;

        if service != SERVICE_ID || connection.peer.faults.missing_service {
            return Err(LinkError::UnknownService(service));
        }

        match channel {
            DATA_CHANNEL_ID => Ok(DATA_CHANNEL),
            ACK_CHANNEL_ID => Ok(ACK_CHANNEL),
            other => Err(LinkError::UnknownChannel(other)),
        }
    }

    async fn subscribe(
        &self,
        conn: ConnectionHandle,
        channel: ChannelHandle,
    ) -> Result<(), LinkError> {
        if channel != DATA_CHANNEL {
            return Err(LinkError::UnknownChannel(u128::from(channel.0)));
        }

        let mut connections = self.connections.lock().await;
        let connection = connections.get_mut(&conn).ok_or(LinkError::NotConnected)?;

        if connection.streaming {
            return Ok(());
        }
        connection.streaming = true;

        let notifier = MockNotifier {
            handle: conn,
            events: self.events.clone(),
            connected: Arc::clone(&connection.connected),
            closed: connection.closed.clone(),
            faults: connection.peer.faults,
            sent: 0,
        };

        tokio::spawn(run_peripheral(
            Arc::clone(&connection.peer),
            notifier,
            Arc::clone(&connection.queue),
            connection.closed.clone(),
        ));

        Ok(())
    }

    async fn write(
        &self,
        conn: ConnectionHandle,
        channel: ChannelHandle,
        bytes: &[u8],
    ) -> Result<(), LinkError> {
        if channel != ACK_CHANNEL {
            return Err(LinkError::UnknownChannel(u128::from(channel.0)));
        }

        let connections = self.connections.lock().await;
        let connection = connections.get(&conn).ok_or(LinkError::NotConnected)?;

        if !connection.connected.load(Ordering::Acquire) {
            return Err(LinkError::NotConnected);
        }
        if connection.peer.faults.reject_ack {
            return Err(LinkError::WriteRejected);
        }

        connection
            .queue
            .try_send(PeripheralEvent::ack(bytes))
            .map_err(|_| LinkError::WriteRejected)
    }

    async fn disconnect(&self, conn: ConnectionHandle) -> Result<(), LinkError> {
        let Some(connection) = self.connections.lock().await.remove(&conn) else {
            debug!(%conn, "disconnect for unknown handle");
            return Ok(());
        };

        let was_connected = connection.connected.swap(false, Ordering::AcqRel);
        connection.closed.cancel();

        if was_connected {
            let _ = self
                .events
                .send(LinkEvent::Disconnected {
                    handle: conn,
                    reason: REASON_LOCAL_HOST,
                })
                .await;
        }

        Ok(())
    }
}

/// Peripheral side of one connection: drive the edge engine until the link
/// closes, then hand the sender back to the peer.
#[instrument(name = "mock_peripheral", skip_all, fields(peer = %peer.name, handle = %notifier.handle))]
async fn run_peripheral(
    peer: Arc<MockPeer>,
    notifier: MockNotifier,
    queue: Arc<PeripheralQueue>,
    closed: CancellationToken,
) {
    let Some(sender) = peer.sender.lock().await.take() else {
        warn!("peripheral already has an active connection");
        return;
    };
    let clock = peer.clock;

    info!("peripheral streaming enabled");
    let mut engine = Engine::new(sender, notifier, clock, queue.receiver());

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            step = engine.step() => match step {
                Ok(Some(outcome)) => debug!(?outcome, "batch finished"),
                Ok(None) => {}
                Err(e) => warn!(error = ?e, "batch aborted"),
            }
        }
    }

    let mut sender = engine.into_sender();

    // writes that landed just before the link closed
    while let Ok(event) = queue.try_receive() {
        sender.on_link_event(&event, clock.now_tick());
    }
    sender.on_link_event(
        &PeripheralEvent::Disconnected {
            reason: REASON_REMOTE_TERMINATED,
        },
        clock.now_tick(),
    );

    *peer.sender.lock().await = Some(sender);
    info!("peripheral connection closed");
}
