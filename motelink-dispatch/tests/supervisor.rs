use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use motelink_core::{Anchor, DataPoint, Event};
use motelink_dispatch::{
    GatewayState, LocationFix, MemorySink, MockLink, MockPeer, PeerAddress, PeerFaults,
    PublishSink, ReceiverState, STATE_EVENT, ScanCandidate, StatePayload, StaticLocation,
    Supervisor, SupervisorConfig,
};
use motelink_edge::{BatchFill, SenderConfig};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};

const LOOP: Duration = Duration::from_millis(100);
const ACK_TIME: i64 = 1_700_000_000;

type TestSupervisor<K = MemorySink> = Supervisor<MockLink, K, StaticLocation>;

/// Sink whose deliveries never complete.
struct StuckSink;

#[async_trait]
impl PublishSink for StuckSink {
    type Error = Infallible;

    async fn publish(&self, _event: &str, _payload: &StatePayload) -> Result<(), Self::Error> {
        std::future::pending().await
    }
}

fn address(n: u8) -> PeerAddress {
    PeerAddress([0xC0, 0xFF, 0xEE, 0x00, 0x00, n])
}

fn peer(name: &str, n: u8, events: &[Event], config: SenderConfig) -> MockPeer {
    MockPeer::with_events(name, address(n), events, Some(Anchor::new(1000)), config).unwrap()
}

fn exact(batch_size: usize) -> SenderConfig {
    SenderConfig {
        batch_size,
        fill: BatchFill::Exact,
        ..SenderConfig::default()
    }
}

fn supervisor_config(targets: &[&str]) -> SupervisorConfig {
    SupervisorConfig {
        targets: targets.iter().map(|t| t.to_string()).collect(),
        ..SupervisorConfig::default()
    }
}

fn setup(
    peers: Vec<MockPeer>,
    config: SupervisorConfig,
) -> (TestSupervisor, Arc<MockLink>, MemorySink) {
    let sink = MemorySink::new();
    let (supervisor, link) = setup_with_sink(peers, config, sink.clone());
    (supervisor, link, sink)
}

fn setup_with_sink<K: PublishSink>(
    peers: Vec<MockPeer>,
    config: SupervisorConfig,
    sink: K,
) -> (TestSupervisor<K>, Arc<MockLink>) {
    let (tx, rx) = mpsc::channel(256);
    let link = Arc::new(MockLink::new(peers, tx));
    let location = StaticLocation::new(LocationFix::new(9.03, 38.74))
        .pinned_at(jiff::Timestamp::from_second(ACK_TIME).unwrap());

    let supervisor = Supervisor::new(
        Arc::clone(&link),
        rx,
        sink,
        location,
        config,
        GatewayState::new("gw-test"),
    );

    (supervisor, link)
}

async fn tick_for<K: PublishSink>(supervisor: &mut TestSupervisor<K>, duration: Duration) {
    let end = Instant::now() + duration;
    while Instant::now() < end {
        supervisor.tick().await;
        sleep(LOOP).await;
    }
}

async fn tick_until_published(supervisor: &mut TestSupervisor, sink: &MemorySink, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(120);
    while sink.len().await < count {
        assert!(Instant::now() < deadline, "only {} streams published", sink.len().await);
        supervisor.tick().await;
        sleep(LOOP).await;
    }
}

/// Tick until a session has been opened and closed again.
async fn tick_through_session<K: PublishSink>(supervisor: &mut TestSupervisor<K>) {
    let deadline = Instant::now() + Duration::from_secs(120);
    let mut opened = false;
    loop {
        assert!(Instant::now() < deadline, "session never finished");
        supervisor.tick().await;

        match supervisor.session() {
            Some(_) => opened = true,
            None if opened => return,
            None => {}
        }
        sleep(LOOP).await;
    }
}

#[tokio::test(start_paused = true)]
async fn completed_stream_is_published_and_anchor_updated() {
    let events = [
        Event::new(1, 0, 8),
        Event::new(0, 8, 40),
        Event::new(2, 40, 100),
    ];
    let (mut supervisor, link, sink) = setup(
        vec![peer("nRF_01", 1, &events, SenderConfig::default())],
        SupervisorConfig {
            scan_interval: Duration::from_secs(60),
            ..supervisor_config(&["nRF_01"])
        },
    );

    tick_until_published(&mut supervisor, &sink, 1).await;
    tick_for(&mut supervisor, Duration::from_secs(1)).await;

    let published = sink.published().await;
    let (event, payload) = &published[0];
    assert_eq!(event, STATE_EVENT);
    assert_eq!(payload.device, "nRF_01");
    assert_eq!(payload.address, "C0:FF:EE:00:00:01");
    assert_eq!(payload.count, 3);
    assert_eq!(
        payload.points,
        [
            DataPoint::new(1, 1000, 1001),
            DataPoint::new(0, 1001, 1005),
            DataPoint::new(2, 1005, 1012),
        ]
    );
    assert_eq!(payload.data, "1:1000:1001,0:1001:1005,2:1005:1012");
    assert_eq!(payload.anomalies, 0);
    assert!(payload.location.is_some());
    assert!(payload.cell.is_some());

    let anchor = link.peer("nRF_01").unwrap().anchor().await.unwrap();
    let ack_time = ACK_TIME as u32;
    assert!(anchor.epoch_secs <= ack_time);
    assert!(anchor.epoch_secs > ack_time - 60, "anchor {anchor:?}");

    let status = supervisor.state().snapshot().await;
    assert_eq!(status.sessions_completed, 1);
    assert_eq!(status.points_published, 3);
}

#[tokio::test(start_paused = true)]
async fn link_loss_mid_stream_publishes_nothing_and_rotates() {
    let events: Vec<Event> = (0..100)
        .map(|i| Event::new(1, i * 8, i * 8 + 4))
        .collect();
    let faulty = peer("nRF_01", 1, &events, SenderConfig::default()).with_faults(PeerFaults {
        drop_after: Some(42),
        ..PeerFaults::default()
    });
    let config = SupervisorConfig {
        scan_interval: Duration::from_secs(60),
        ..supervisor_config(&["nRF_01", "nRF_02"])
    };
    let (mut supervisor, link, sink) = setup(vec![faulty], config);

    tick_through_session(&mut supervisor).await;

    assert!(sink.is_empty().await);
    assert_eq!(supervisor.targets().cursor(), 1);
    assert_eq!(link.active_connections().await, 0);

    let status = supervisor.state().snapshot().await;
    assert_eq!(status.sessions_aborted, 1);
    assert_eq!(status.current_target.as_deref(), Some("nRF_02"));

    // previous anchor survives the aborted transfer
    tick_for(&mut supervisor, Duration::from_secs(1)).await;
    let anchor = link.peer("nRF_01").unwrap().anchor().await;
    assert_eq!(anchor, Some(Anchor::new(1000)));
}

#[tokio::test(start_paused = true)]
async fn stalled_peer_is_dropped_after_two_quiet_intervals() {
    let events = [Event::new(1, 0, 8), Event::new(2, 8, 16)];
    let stalled = peer("nRF_01", 1, &events, SenderConfig::default()).with_faults(PeerFaults {
        stall_after: Some(10),
        ..PeerFaults::default()
    });
    let config = SupervisorConfig {
        scan_interval: Duration::from_secs(60),
        ..supervisor_config(&["nRF_01"])
    };
    let (mut supervisor, link, sink) = setup(vec![stalled], config);

    let mut last_packet = None;
    let deadline = Instant::now() + Duration::from_secs(60);
    loop {
        assert!(Instant::now() < deadline, "session never ended");
        supervisor.tick().await;

        match supervisor.session() {
            Some(session) if session.received() > 0 => {
                assert_ne!(session.state(), ReceiverState::Acknowledging);
                if session.received() == 10 && last_packet.is_none() {
                    last_packet = Some(Instant::now());
                }
            }
            Some(_) => {}
            None if last_packet.is_some() => break,
            None => {}
        }
        sleep(LOOP).await;
    }

    let quiet = Instant::now() - last_packet.unwrap();
    assert!(quiet >= Duration::from_secs(6), "dropped after {quiet:?}");
    assert!(quiet < Duration::from_secs(8), "dropped after {quiet:?}");

    assert!(sink.is_empty().await);
    assert_eq!(link.active_connections().await, 0);
    assert_eq!(supervisor.state().snapshot().await.sessions_aborted, 1);
}

#[tokio::test(start_paused = true)]
async fn missing_capability_tears_down_and_moves_on() {
    let broken = peer("nRF_01", 1, &[], exact(1)).with_faults(PeerFaults {
        missing_service: true,
        ..PeerFaults::default()
    });
    let (mut supervisor, link, sink) = setup(vec![broken], supervisor_config(&["nRF_01", "nRF_02"]));

    supervisor.tick().await;

    assert!(supervisor.session().is_none());
    assert_eq!(supervisor.targets().cursor(), 1);
    assert_eq!(link.active_connections().await, 0);
    assert!(sink.is_empty().await);
    assert_eq!(supervisor.state().snapshot().await.sessions_aborted, 1);
}

#[tokio::test(start_paused = true)]
async fn targets_are_visited_round_robin() {
    let names = ["nRF_01", "nRF_02", "nRF_03"];
    let peers = names
        .iter()
        .zip(1u8..)
        .map(|(name, n)| peer(name, n, &[Event::new(n, 0, 8)], exact(4)))
        .collect();
    let (mut supervisor, _link, sink) = setup(peers, supervisor_config(&names));

    tick_until_published(&mut supervisor, &sink, 3).await;

    let devices: Vec<String> = sink
        .published()
        .await
        .into_iter()
        .map(|(_, payload)| payload.device)
        .collect();
    assert_eq!(devices, names);
}

#[tokio::test(start_paused = true)]
async fn overlong_scan_is_abandoned_and_retried() {
    let (tx, rx) = mpsc::channel(16);
    let link = Arc::new(
        MockLink::new(vec![peer("nRF_01", 1, &[], exact(1))], tx)
            .with_scan_delay(Duration::from_secs(40)),
    );
    let mut supervisor = Supervisor::new(
        Arc::clone(&link),
        rx,
        MemorySink::new(),
        StaticLocation::default(),
        supervisor_config(&["nRF_01"]),
        GatewayState::new("gw-test"),
    );

    let start = Instant::now();
    supervisor.tick().await;
    let first = start.elapsed();
    assert!(first >= Duration::from_secs(30) && first < Duration::from_secs(31));
    assert!(supervisor.session().is_none());
    assert_eq!(supervisor.targets().cursor(), 0);

    // not due again until the retry delay has passed
    supervisor.tick().await;
    assert!(start.elapsed() < Duration::from_secs(31));

    sleep(Duration::from_secs(5)).await;
    let retry = Instant::now();
    supervisor.tick().await;
    assert!(retry.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn truncated_advertised_name_matches_target() {
    let truncated = peer("nRF_01", 1, &[Event::new(1, 0, 8)], exact(1)).advertising_as("nRF_0");
    let (mut supervisor, _link, _sink) = setup(vec![truncated], supervisor_config(&["nRF_01"]));

    supervisor.tick().await;

    let session = supervisor.session().unwrap();
    assert_eq!(session.peer(), "nRF_01");
    assert_eq!(session.state(), ReceiverState::Streaming);
}

#[tokio::test(start_paused = true)]
async fn connect_is_refused_while_a_session_is_active() {
    let (mut supervisor, link, _sink) = setup(
        vec![
            peer("nRF_01", 1, &[Event::new(1, 0, 8)], exact(1)),
            peer("nRF_02", 2, &[Event::new(1, 0, 8)], exact(1)),
        ],
        supervisor_config(&["nRF_01", "nRF_02"]),
    );

    supervisor.tick().await;
    let active = supervisor.session().unwrap().id();

    let candidate = ScanCandidate {
        name: "nRF_02".into(),
        address: address(2),
        rssi: -50,
    };
    supervisor.connect("nRF_02", candidate).await;

    assert_eq!(supervisor.session().unwrap().id(), active);
    assert_eq!(link.active_connections().await, 1);
}

#[tokio::test(start_paused = true)]
async fn empty_stream_is_not_published() {
    let (mut supervisor, link, sink) = setup(
        vec![peer("nRF_01", 1, &[], exact(1))],
        SupervisorConfig {
            scan_interval: Duration::from_secs(60),
            ..supervisor_config(&["nRF_01"])
        },
    );

    tick_through_session(&mut supervisor).await;

    assert!(sink.is_empty().await);
    assert_eq!(supervisor.state().snapshot().await.sessions_completed, 1);

    // the ack still reaches the peripheral
    tick_for(&mut supervisor, Duration::from_secs(1)).await;
    let anchor = link.peer("nRF_01").unwrap().anchor().await.unwrap();
    assert_ne!(anchor, Anchor::new(1000));
}

#[tokio::test(start_paused = true)]
async fn stuck_sink_does_not_block_the_ack() {
    let config = SupervisorConfig {
        scan_interval: Duration::from_secs(60),
        publish_timeout: Duration::from_secs(3),
        ..supervisor_config(&["nRF_01"])
    };
    let (mut supervisor, link) = setup_with_sink(
        vec![peer("nRF_01", 1, &[Event::new(1, 0, 8)], exact(1))],
        config,
        StuckSink,
    );

    let deadline = Instant::now() + Duration::from_secs(120);
    let mut opened = false;
    loop {
        assert!(Instant::now() < deadline, "session never finished");
        let started = Instant::now();
        supervisor.tick().await;
        assert!(started.elapsed() < Duration::from_secs(5), "tick blocked");

        match supervisor.session() {
            Some(_) => opened = true,
            None if opened => break,
            None => {}
        }
        sleep(LOOP).await;
    }

    let status = supervisor.state().snapshot().await;
    assert_eq!(status.sessions_completed, 1);
    assert_eq!(status.points_published, 0);

    tick_for(&mut supervisor, Duration::from_secs(1)).await;
    let anchor = link.peer("nRF_01").unwrap().anchor().await.unwrap();
    assert_ne!(anchor, Anchor::new(1000));
}

#[tokio::test(start_paused = true)]
async fn silent_peer_is_dropped_by_the_session_watchdog() {
    let silent = peer(
        "nRF_01",
        1,
        &[Event::new(1, 0, 8)],
        SenderConfig {
            send_interval: embassy_time::Duration::from_secs(600),
            ..SenderConfig::default()
        },
    );
    let config = SupervisorConfig {
        scan_interval: Duration::from_secs(120),
        ..supervisor_config(&["nRF_01", "nRF_02"])
    };
    let (mut supervisor, link, sink) = setup(vec![silent], config);

    let start = Instant::now();
    tick_through_session(&mut supervisor).await;
    let lasted = start.elapsed();

    assert!(lasted >= Duration::from_secs(60), "dropped after {lasted:?}");
    assert!(lasted < Duration::from_secs(62), "dropped after {lasted:?}");
    assert!(sink.is_empty().await);
    assert_eq!(supervisor.targets().cursor(), 1);
    assert_eq!(link.active_connections().await, 0);

    let status = supervisor.state().snapshot().await;
    assert_eq!(status.sessions_aborted, 1);
    assert_eq!(status.sessions_completed, 0);
}

#[tokio::test(start_paused = true)]
async fn refused_connect_counts_as_aborted_and_moves_on() {
    let refusing = peer("nRF_01", 1, &[Event::new(1, 0, 8)], exact(1)).with_faults(PeerFaults {
        refuse_connect: true,
        ..PeerFaults::default()
    });
    let (mut supervisor, link, sink) =
        setup(vec![refusing], supervisor_config(&["nRF_01", "nRF_02"]));

    supervisor.tick().await;

    assert!(supervisor.session().is_none());
    assert_eq!(supervisor.targets().cursor(), 1);
    assert_eq!(link.active_connections().await, 0);
    assert!(sink.is_empty().await);

    let status = supervisor.state().snapshot().await;
    assert_eq!(status.sessions_aborted, 1);
    assert_eq!(status.active_peer, None);
    assert_eq!(status.current_target.as_deref(), Some("nRF_02"));
}

#[tokio::test(start_paused = true)]
async fn rejected_ack_still_disconnects() {
    let stubborn = peer("nRF_01", 1, &[Event::new(1, 0, 8)], exact(1)).with_faults(PeerFaults {
        reject_ack: true,
        ..PeerFaults::default()
    });
    let config = SupervisorConfig {
        scan_interval: Duration::from_secs(60),
        ..supervisor_config(&["nRF_01", "nRF_02"])
    };
    let (mut supervisor, link, sink) = setup(vec![stubborn], config);

    tick_through_session(&mut supervisor).await;

    assert_eq!(sink.len().await, 1);
    assert_eq!(supervisor.targets().cursor(), 1);
    assert_eq!(link.active_connections().await, 0);
    assert_eq!(supervisor.state().snapshot().await.sessions_completed, 1);

    tick_for(&mut supervisor, Duration::from_secs(1)).await;
    let anchor = link.peer("nRF_01").unwrap().anchor().await;
    assert_eq!(anchor, Some(Anchor::new(1000)));
}

#[tokio::test(start_paused = true)]
async fn padded_notifications_are_accepted() {
    let events = [Event::new(1, 0, 8), Event::new(0, 8, 40)];
    let padded = peer("nRF_01", 1, &events, SenderConfig::default()).with_faults(PeerFaults {
        pad_notifications: true,
        ..PeerFaults::default()
    });
    let config = SupervisorConfig {
        scan_interval: Duration::from_secs(60),
        ..supervisor_config(&["nRF_01"])
    };
    let (mut supervisor, _link, sink) = setup(vec![padded], config);

    tick_until_published(&mut supervisor, &sink, 1).await;

    let published = sink.published().await;
    let payload = &published[0].1;
    assert_eq!(
        payload.points,
        [DataPoint::new(1, 1000, 1001), DataPoint::new(0, 1001, 1005)]
    );
    assert_eq!(payload.anomalies, 0);
}
