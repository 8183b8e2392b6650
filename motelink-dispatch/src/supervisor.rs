use std::sync::Arc;
use std::time::Duration;

use motelink_core::encode_ack;
use motelink_core::protocol::{ACK_CHANNEL_ID, DATA_CHANNEL_ID, SERVICE_ID};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::SessionError;
use crate::link::{
    ChannelHandle, ConnectionHandle, LinkError, LinkEvent, LinkTransport, ScanCandidate,
};
use crate::location::{LocationProvider, ack_timestamp};
use crate::session::{ReceiverState, SessionConfig, SessionContext};
use crate::sink::{PublishSink, STATE_EVENT, StatePayload};
use crate::state::GatewayState;

/// Shortest advertised name accepted as a truncated form of a target.
pub const MIN_TRUNCATED_NAME: usize = 5;

const SUBSCRIBE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// True if a peripheral advertising `advertised` is `target`.
///
/// Advertising payloads may cut long names short, so a prefix of the target
/// counts as long as it keeps at least [`MIN_TRUNCATED_NAME`] characters.
pub fn name_matches(advertised: &str, target: &str) -> bool {
    advertised == target
        || (advertised.len() >= MIN_TRUNCATED_NAME && target.starts_with(advertised))
}

/// Round-robin cursor over the configured peer names.
#[derive(Debug, Clone)]
pub struct TargetRing {
    targets: Vec<String>,
    cursor: usize,
}

impl TargetRing {
    pub fn new(targets: Vec<String>) -> Self {
        Self { targets, cursor: 0 }
    }

    pub fn current(&self) -> Option<&str> {
        self.targets.get(self.cursor).map(String::as_str)
    }

    pub fn advance(&mut self) {
        if !self.targets.is_empty() {
            self.cursor = (self.cursor + 1) % self.targets.len();
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub targets: Vec<String>,
    pub scan_interval: Duration,
    pub scan_window: Duration,
    pub scan_watchdog: Duration,
    pub scan_retry: Duration,
    pub op_timeout: Duration,
    pub ack_timeout: Duration,
    pub publish_timeout: Duration,
    pub session_watchdog: Duration,
    pub connect_settle: Duration,
    pub loop_period: Duration,
    pub status_interval: Duration,
    pub session: SessionConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            scan_interval: Duration::from_secs(15),
            scan_window: Duration::from_secs(5),
            scan_watchdog: Duration::from_secs(30),
            scan_retry: Duration::from_secs(5),
            op_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(2),
            publish_timeout: Duration::from_secs(15),
            session_watchdog: Duration::from_secs(60),
            connect_settle: Duration::from_millis(1500),
            loop_period: Duration::from_millis(100),
            status_interval: Duration::from_secs(10),
            session: SessionConfig::default(),
        }
    }
}

/// Central main loop: scans for the current target, runs one session at a
/// time against it, publishes completed streams and rotates to the next peer.
pub struct Supervisor<T, K, L> {
    link: Arc<T>,
    events: mpsc::Receiver<LinkEvent>,
    sink: K,
    location: L,
    config: SupervisorConfig,
    state: GatewayState,
    targets: TargetRing,
    session: Option<SessionContext>,
    next_scan: Instant,
    next_status: Instant,
}

impl<T, K, L> Supervisor<T, K, L>
where
    T: LinkTransport,
    K: PublishSink,
    L: LocationProvider,
{
    pub fn new(
        link: Arc<T>,
        events: mpsc::Receiver<LinkEvent>,
        sink: K,
        location: L,
        config: SupervisorConfig,
        state: GatewayState,
    ) -> Self {
        let now = Instant::now();

        Self {
            link,
            events,
            sink,
            location,
            targets: TargetRing::new(config.targets.clone()),
            config,
            state,
            session: None,
            next_scan: now,
            next_status: now,
        }
    }

    pub fn targets(&self) -> &TargetRing {
        &self.targets
    }

    pub fn session(&self) -> Option<&SessionContext> {
        self.session.as_ref()
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    /// Tick every `loop_period` until cancelled, then drop any open link.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            targets = self.targets.len(),
            loop_period_ms = self.config.loop_period.as_millis() as u64,
            "supervisor started"
        );
        if let Some(target) = self.targets.current() {
            self.state.target_changed(target).await;
        }

        let mut interval = tokio::time::interval(self.config.loop_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }

        if let Some(session) = self.session.as_mut() {
            session.begin_disconnect();
            self.teardown("shutdown").await;
        }
        info!("supervisor shut down");
    }

    /// One pass of the main loop.
    pub async fn tick(&mut self) {
        self.drain_events().await;

        let now = Instant::now();
        self.enforce_watchdogs(now);
        self.run_pending().await;

        if self.session.is_none() && now >= self.next_scan {
            self.scan(now).await;
        }

        if now >= self.next_status {
            self.next_status = now + self.config.status_interval;
            self.log_status().await;
        }
    }

    async fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event).await;
        }
    }

    async fn handle_event(&mut self, event: LinkEvent) {
        let active = self.session.as_ref().and_then(SessionContext::handle);

        match event {
            LinkEvent::Connected { handle, address } => {
                debug!(%handle, %address, "link up");
            }
            LinkEvent::Data { handle, bytes, .. } if Some(handle) == active => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };

                let completed = match session.on_packet(&bytes, Instant::now()) {
                    Ok(outcome) => {
                        if let Some(notice) = outcome.notice {
                            debug!(%notice, sequence = outcome.sequence, "stream irregularity");
                        }
                        outcome.completed
                    }
                    Err(e) => {
                        warn!(error = %e, len = bytes.len(), "packet dropped");
                        false
                    }
                };

                if completed {
                    self.publish().await;
                }
            }
            LinkEvent::Data { handle, .. } => {
                debug!(%handle, "data from inactive connection ignored");
            }
            LinkEvent::Disconnected { handle, reason } if Some(handle) == active => {
                warn!(%handle, reason, "peer disconnected");
                if let Some(session) = self.session.as_mut() {
                    session.begin_disconnect();
                }
                self.teardown("remote disconnect").await;
            }
            LinkEvent::Disconnected { handle, reason } => {
                debug!(%handle, reason, "stale disconnect ignored");
            }
        }
    }

    fn enforce_watchdogs(&mut self, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Err(e) = session.check_liveness(now) {
            warn!(error = %e, peer = session.peer(), "aborting session");
            return;
        }

        if session.state() != ReceiverState::Disconnecting
            && session.age(now) > self.config.session_watchdog
        {
            let err = SessionError::WatchdogExpired("session");
            warn!(error = %err, peer = session.peer(), "aborting session");
            session.begin_disconnect();
        }
    }

    /// Deferred link actions: the ack after a completed stream, then the
    /// disconnect.
    async fn run_pending(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if session.state() == ReceiverState::Acknowledging {
            if let (Some(handle), Some(channel)) = (session.handle(), session.ack_channel()) {
                let timestamp = ack_timestamp(self.location.current_time());
                let ack = encode_ack(timestamp);

                match timeout(
                    self.config.ack_timeout,
                    self.link.write(handle, channel, &ack),
                )
                .await
                {
                    Ok(Ok(())) => info!(%handle, timestamp, "ack written"),
                    Ok(Err(e)) => {
                        let err = SessionError::from(e);
                        warn!(error = %err, "ack write failed");
                    }
                    Err(_) => {
                        let err = SessionError::Timeout("ack write");
                        warn!(error = %err, "ack write failed");
                    }
                }
            }
            session.begin_disconnect();
        }

        if session.state() == ReceiverState::Disconnecting {
            self.teardown("session finished").await;
        }
    }

    /// Close the active session, whatever state it is in, and move the cursor.
    async fn teardown(&mut self, cause: &'static str) {
        let Some(session) = self.session.take() else {
            return;
        };

        if let Some(handle) = session.handle() {
            self.disconnect(handle).await;
        }

        let completed = session.is_completed();
        info!(
            session = %session.id(),
            peer = session.peer(),
            cause,
            completed,
            received = session.received(),
            anomalies = session.anomalies(),
            "session closed"
        );

        self.state.session_ended(completed).await;
        self.advance_target().await;
    }

    async fn disconnect(&self, handle: ConnectionHandle) {
        match timeout(self.config.op_timeout, self.link.disconnect(handle)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, %handle, "disconnect failed"),
            Err(_) => warn!(%handle, "disconnect timed out"),
        }
    }

    async fn advance_target(&mut self) {
        self.targets.advance();
        if let Some(target) = self.targets.current() {
            self.state.target_changed(target).await;
        }
    }

    async fn publish(&self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        let points = session.points();
        if points.is_empty() {
            info!(peer = session.peer(), "empty stream, nothing to publish");
            return;
        }

        let location = self.location.current_location();
        let timestamp = self.location.current_time();
        let payload = StatePayload {
            device: session.peer().to_owned(),
            address: session.address().to_string(),
            session: session.id(),
            count: points.len(),
            data: StatePayload::encode_points(points),
            points: points.to_vec(),
            anomalies: session.anomalies(),
            location,
            cell: location.and_then(|fix| fix.cell()).map(u64::from),
            timestamp,
        };

        match timeout(
            self.config.publish_timeout,
            self.sink.publish(STATE_EVENT, &payload),
        )
        .await
        {
            Ok(Ok(())) => {
                info!(peer = session.peer(), count = payload.count, "stream published");
                self.state.points_published(payload.count, timestamp).await;
            }
            Ok(Err(e)) => warn!(error = %e, peer = session.peer(), "publish failed"),
            Err(_) => {
                let err = SessionError::Timeout("publish");
                warn!(error = %err, peer = session.peer(), "publish abandoned");
            }
        }
    }

    async fn scan(&mut self, now: Instant) {
        let Some(target) = self.targets.current().map(str::to_owned) else {
            return;
        };
        self.next_scan = now + self.config.scan_interval;

        debug!(peer = %target, "scanning");
        let candidates = match timeout(
            self.config.scan_watchdog,
            self.link.scan(self.config.scan_window),
        )
        .await
        {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => {
                warn!(error = %e, "scan failed");
                self.next_scan = Instant::now() + self.config.scan_retry;
                return;
            }
            Err(_) => {
                let err = SessionError::WatchdogExpired("scan");
                warn!(error = %err, retry_secs = self.config.scan_retry.as_secs(), "scan abandoned");
                self.next_scan = Instant::now() + self.config.scan_retry;
                return;
            }
        };

        match candidates.into_iter().find(|c| name_matches(&c.name, &target)) {
            Some(candidate) => self.connect(&target, candidate).await,
            None => {
                info!(peer = %target, "target not in range");
                self.advance_target().await;
            }
        }
    }

    /// Open a session with `candidate`. Refused while another is active.
    pub async fn connect(&mut self, target: &str, candidate: ScanCandidate) {
        if let Some(active) = &self.session {
            warn!(peer = active.peer(), "connect rejected, session already active");
            return;
        }

        let mut session = SessionContext::new(
            target,
            candidate.address,
            self.config.session.clone(),
            Instant::now(),
        );
        let span = info_span!(
            "session",
            id = %session.id(),
            peer = target,
            address = %candidate.address,
        );

        let result = self.establish(&mut session).instrument(span).await;

        match result {
            Ok(()) => {
                info!(
                    session = %session.id(),
                    peer = target,
                    rssi = candidate.rssi,
                    "streaming"
                );
                self.state.session_started(target).await;
                self.session = Some(session);
            }
            Err(e) => {
                warn!(error = %e, peer = target, "session setup failed");
                if let Some(handle) = session.handle() {
                    self.disconnect(handle).await;
                }
                self.state.session_ended(false).await;
                self.advance_target().await;
            }
        }
    }

    async fn establish(&self, session: &mut SessionContext) -> Result<(), SessionError> {
        let handle = timeout(self.config.op_timeout, self.link.connect(session.address()))
            .await
            .map_err(|_| SessionError::Timeout("connect"))??;
        session.connected(handle);

        tokio::time::sleep(self.config.connect_settle).await;

        let data = self.discover(handle, DATA_CHANNEL_ID, "data").await?;
        let ack = self.discover(handle, ACK_CHANNEL_ID, "ack").await?;
        self.subscribe(handle, data).await?;

        session.streaming(ack, Instant::now());
        Ok(())
    }

    async fn discover(
        &self,
        handle: ConnectionHandle,
        channel: u128,
        name: &'static str,
    ) -> Result<ChannelHandle, SessionError> {
        let result = timeout(
            self.config.op_timeout,
            self.link.discover_channel(handle, SERVICE_ID, channel),
        )
        .await
        .map_err(|_| SessionError::Timeout("discovery"))?;

        match result {
            Ok(found) => Ok(found),
            Err(LinkError::UnknownService(_) | LinkError::UnknownChannel(_)) => {
                Err(SessionError::CapabilityMissing(name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn subscribe(
        &self,
        handle: ConnectionHandle,
        channel: ChannelHandle,
    ) -> Result<(), SessionError> {
        match timeout(self.config.op_timeout, self.link.subscribe(handle, channel)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => warn!(error = %e, "subscribe failed, retrying"),
            Err(_) => warn!("subscribe timed out, retrying"),
        }

        tokio::time::sleep(SUBSCRIBE_RETRY_DELAY).await;
        timeout(self.config.op_timeout, self.link.subscribe(handle, channel))
            .await
            .map_err(|_| SessionError::Timeout("subscribe"))??;
        Ok(())
    }

    async fn log_status(&self) {
        let status = self.state.snapshot().await;
        info!(
            current_target = status.current_target.as_deref().unwrap_or("-"),
            active = status.active_peer.as_deref().unwrap_or("-"),
            session_state = ?self.session.as_ref().map(SessionContext::state),
            completed = status.sessions_completed,
            aborted = status.sessions_aborted,
            points = status.points_published,
            "status"
        );
    }
}
