use std::time::Duration;

use motelink_core::protocol::packet_size_window;
use motelink_core::{DataPoint, Packet};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::error::SessionError;
use crate::link::{ChannelHandle, ConnectionHandle, PeerAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Disconnected,
    Connecting,
    DiscoveringCapabilities,
    Streaming,
    Acknowledging,
    Disconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Longest gap between packets before a liveness timeout is counted.
    pub quiet_interval: Duration,
    /// Consecutive liveness timeouts that abort the session.
    pub max_consecutive_timeouts: u8,
    pub buffer_capacity: usize,
    /// Largest point count per packet the size check will let through.
    pub max_points_per_packet: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            quiet_interval: Duration::from_secs(3),
            max_consecutive_timeouts: 2,
            buffer_capacity: 500,
            max_points_per_packet: 1,
        }
    }
}

/// What one accepted packet did to the session.
#[derive(Debug)]
pub struct PacketOutcome {
    pub sequence: u16,
    pub total: u16,
    /// Non-empty points added to the buffer.
    pub accepted_points: usize,
    /// Non-fatal irregularity worth logging.
    pub notice: Option<SessionError>,
    /// The final packet arrived; the stream is ready to publish.
    pub completed: bool,
}

/// Receiver side of one transfer session.
#[derive(Debug)]
pub struct SessionContext {
    id: Ulid,
    peer: String,
    address: PeerAddress,
    state: ReceiverState,
    handle: Option<ConnectionHandle>,
    ack_channel: Option<ChannelHandle>,
    total: u16,
    received: u32,
    last_sequence: u16,
    consecutive_timeouts: u8,
    anomalies: u32,
    restarts: u32,
    buffer_exhausted: bool,
    completed: bool,
    points: Vec<DataPoint>,
    started_at: Instant,
    last_activity: Instant,
    config: SessionConfig,
}

impl SessionContext {
    pub fn new(
        peer: impl Into<String>,
        address: PeerAddress,
        config: SessionConfig,
        now: Instant,
    ) -> Self {
        Self {
            id: Ulid::new(),
            peer: peer.into(),
            address,
            state: ReceiverState::Connecting,
            handle: None,
            ack_channel: None,
            total: 0,
            received: 0,
            last_sequence: 0,
            consecutive_timeouts: 0,
            anomalies: 0,
            restarts: 0,
            buffer_exhausted: false,
            completed: false,
            points: Vec::with_capacity(config.buffer_capacity),
            started_at: now,
            last_activity: now,
            config,
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn address(&self) -> PeerAddress {
        self.address
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.handle
    }

    pub fn ack_channel(&self) -> Option<ChannelHandle> {
        self.ack_channel
    }

    pub fn total(&self) -> u16 {
        self.total
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn last_sequence(&self) -> u16 {
        self.last_sequence
    }

    pub fn anomalies(&self) -> u32 {
        self.anomalies
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn consecutive_timeouts(&self) -> u8 {
        self.consecutive_timeouts
    }

    pub fn buffer_exhausted(&self) -> bool {
        self.buffer_exhausted
    }

    /// True once the final packet of the stream was received.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn connected(&mut self, handle: ConnectionHandle) {
        self.handle = Some(handle);
        self.state = ReceiverState::DiscoveringCapabilities;
    }

    /// Capabilities resolved and notifications enabled.
    pub fn streaming(&mut self, ack_channel: ChannelHandle, now: Instant) {
        self.ack_channel = Some(ack_channel);
        self.state = ReceiverState::Streaming;
        self.last_activity = now;
    }

    pub fn begin_disconnect(&mut self) {
        self.state = ReceiverState::Disconnecting;
    }

    /// Process one notification payload.
    ///
    /// Size and decode failures drop the packet but keep the session alive.
    pub fn on_packet(
        &mut self,
        bytes: &[u8],
        now: Instant,
    ) -> Result<PacketOutcome, SessionError> {
        if self.state != ReceiverState::Streaming {
            debug!(state = ?self.state, len = bytes.len(), "packet outside streaming ignored");
            return Ok(PacketOutcome {
                sequence: 0,
                total: self.total,
                accepted_points: 0,
                notice: None,
                completed: false,
            });
        }

        self.last_activity = now;
        self.consecutive_timeouts = 0;

        let (min, _) = packet_size_window(1);
        let (_, max) = packet_size_window(self.config.max_points_per_packet);
        if bytes.len() < min || bytes.len() > max {
            return Err(SessionError::InvalidPacketSize { len: bytes.len() });
        }

        let packet = Packet::decode(bytes)?;
        let expected = self.last_sequence.wrapping_add(1);
        let mut notice = None;

        if packet.sequence != expected {
            if packet.sequence == 1 && self.last_sequence > 0 {
                warn!(
                    previous = self.last_sequence,
                    "sequence restarted, discarding partial stream"
                );
                notice = Some(SessionError::SessionRestart {
                    previous: self.last_sequence,
                });
                self.reset_stream();
            } else {
                warn!(expected, received = packet.sequence, "sequence anomaly");
                self.anomalies += 1;
                notice = Some(SessionError::SequenceAnomaly {
                    expected,
                    received: packet.sequence,
                });
            }
        }

        self.total = packet.total;
        self.last_sequence = packet.sequence;
        self.received += 1;

        let mut accepted_points = 0;
        for point in packet.points.iter().filter(|p| !p.is_empty()) {
            if self.points.len() < self.config.buffer_capacity {
                self.points.push(*point);
                accepted_points += 1;
            } else if !self.buffer_exhausted {
                self.buffer_exhausted = true;
                let err = SessionError::BufferExhausted {
                    capacity: self.config.buffer_capacity,
                };
                warn!(error = %err, "dropping further points");
            }
        }

        let completed = packet.is_last();
        if completed {
            info!(
                total = packet.total,
                received = self.received,
                points = self.points.len(),
                anomalies = self.anomalies,
                "stream complete"
            );
            self.completed = true;
            self.state = ReceiverState::Acknowledging;
        }

        Ok(PacketOutcome {
            sequence: packet.sequence,
            total: packet.total,
            accepted_points,
            notice,
            completed,
        })
    }

    /// Count quiet intervals once the stream has started. Too many in a row
    /// move the session straight to `Disconnecting`.
    pub fn check_liveness(&mut self, now: Instant) -> Result<(), SessionError> {
        if self.state != ReceiverState::Streaming || self.last_sequence == 0 {
            return Ok(());
        }

        if now.saturating_duration_since(self.last_activity) < self.config.quiet_interval {
            return Ok(());
        }

        self.consecutive_timeouts += 1;
        self.last_activity = now;
        warn!(
            consecutive = self.consecutive_timeouts,
            last_sequence = self.last_sequence,
            "packet timeout"
        );

        if self.consecutive_timeouts >= self.config.max_consecutive_timeouts {
            self.begin_disconnect();
            return Err(SessionError::LivenessTimeout {
                consecutive: self.consecutive_timeouts,
            });
        }

        Ok(())
    }

    fn reset_stream(&mut self) {
        self.points.clear();
        self.received = 0;
        self.anomalies = 0;
        self.buffer_exhausted = false;
        self.restarts += 1;
    }
}

#[cfg(test)]
mod tests {
    use motelink_core::encode_single;

    use super::*;

    fn streaming_session(config: SessionConfig, now: Instant) -> SessionContext {
        let mut session = SessionContext::new("nRF_01", PeerAddress([0xAA; 6]), config, now);
        session.connected(ConnectionHandle(1));
        session.streaming(ChannelHandle(2), now);
        session
    }

    fn point(n: u16) -> DataPoint {
        DataPoint::new(1, 1_000 + u32::from(n), 1_001 + u32::from(n))
    }

    #[test]
    fn state_follows_connection_lifecycle() {
        let now = Instant::now();
        let mut session =
            SessionContext::new("nRF_01", PeerAddress([1; 6]), SessionConfig::default(), now);
        assert_eq!(session.state(), ReceiverState::Connecting);

        session.connected(ConnectionHandle(4));
        assert_eq!(session.state(), ReceiverState::DiscoveringCapabilities);
        assert_eq!(session.handle(), Some(ConnectionHandle(4)));

        session.streaming(ChannelHandle(9), now);
        assert_eq!(session.state(), ReceiverState::Streaming);
        assert_eq!(session.ack_channel(), Some(ChannelHandle(9)));
    }

    #[test]
    fn empty_points_are_not_buffered() {
        let now = Instant::now();
        let mut session = streaming_session(SessionConfig::default(), now);

        let outcome = session
            .on_packet(&encode_single(1, 2, &DataPoint::EMPTY), now)
            .unwrap();
        assert_eq!(outcome.accepted_points, 0);

        let outcome = session.on_packet(&encode_single(2, 2, &point(2)), now).unwrap();
        assert_eq!(outcome.accepted_points, 1);
        assert!(outcome.completed);
        assert_eq!(session.points(), &[point(2)]);
    }

    #[test]
    fn out_of_window_sizes_are_dropped_without_ending_session() {
        let now = Instant::now();
        let mut session = streaming_session(SessionConfig::default(), now);
        let bytes = encode_single(1, 3, &point(1));

        assert!(matches!(
            session.on_packet(&bytes[..13], now),
            Err(SessionError::InvalidPacketSize { len: 13 })
        ));

        let mut oversized = [0u8; 21];
        oversized[..14].copy_from_slice(&bytes);
        assert!(matches!(
            session.on_packet(&oversized, now),
            Err(SessionError::InvalidPacketSize { len: 21 })
        ));

        assert_eq!(session.state(), ReceiverState::Streaming);
        assert_eq!(session.received(), 0);
        session.on_packet(&bytes, now).unwrap();
        assert_eq!(session.received(), 1);
    }

    #[test]
    fn bad_point_count_is_malformed() {
        let now = Instant::now();
        let mut session = streaming_session(SessionConfig::default(), now);
        let mut bytes = encode_single(1, 3, &point(1));
        bytes[4] = 2;

        assert!(matches!(
            session.on_packet(&bytes, now),
            Err(SessionError::MalformedPacket(_))
        ));
        assert_eq!(session.state(), ReceiverState::Streaming);
    }

    #[test]
    fn buffer_capacity_is_respected() {
        let now = Instant::now();
        let config = SessionConfig {
            buffer_capacity: 4,
            ..SessionConfig::default()
        };
        let mut session = streaming_session(config, now);

        for n in 1..=10 {
            session.on_packet(&encode_single(n, 10, &point(n)), now).unwrap();
        }

        assert_eq!(session.points().len(), 4);
        assert!(session.buffer_exhausted());
        assert!(session.is_completed());
    }

    #[test]
    fn packets_after_completion_are_ignored() {
        let now = Instant::now();
        let mut session = streaming_session(SessionConfig::default(), now);
        session.on_packet(&encode_single(1, 1, &point(1)), now).unwrap();
        assert_eq!(session.state(), ReceiverState::Acknowledging);

        let outcome = session.on_packet(&encode_single(1, 1, &point(1)), now).unwrap();
        assert_eq!(outcome.accepted_points, 0);
        assert_eq!(session.points().len(), 1);
    }

    #[test]
    fn liveness_waits_for_first_packet() {
        let now = Instant::now();
        let mut session = streaming_session(SessionConfig::default(), now);

        assert!(session.check_liveness(now + Duration::from_secs(30)).is_ok());
        assert_eq!(session.consecutive_timeouts(), 0);
    }

    #[test]
    fn a_packet_resets_the_timeout_counter() {
        let start = Instant::now();
        let mut session = streaming_session(SessionConfig::default(), start);
        session.on_packet(&encode_single(1, 10, &point(1)), start).unwrap();

        let later = start + Duration::from_millis(3_100);
        session.check_liveness(later).unwrap();
        assert_eq!(session.consecutive_timeouts(), 1);

        session.on_packet(&encode_single(2, 10, &point(2)), later).unwrap();
        assert_eq!(session.consecutive_timeouts(), 0);
    }
}
