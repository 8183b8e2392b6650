use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use color_eyre::eyre::{WrapErr, eyre};
use motelink_core::{Anchor, Event};
use motelink_edge::{BatchFill, SenderConfig};
use serde::Deserialize;

use crate::link::PeerAddress;
use crate::link::mock::{MockPeer, PeerFaults, random_events};
use crate::location::LocationFix;
use crate::session::SessionConfig;
use crate::supervisor::SupervisorConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default = "default_targets")]
    pub targets: Vec<String>,
    pub link: LinkConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub location: LocationConfig,
}

#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    /// Name reported on `/status` and in logs
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address for the HTTP server to listen on
    pub http_addr: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub scan_interval_secs: u64,
    pub scan_window_secs: u64,
    /// Longest a single scan may run before it is abandoned
    pub scan_watchdog_secs: u64,
    /// Delay before scanning again after the watchdog fired
    pub scan_retry_secs: u64,
    /// Bound on connect, discovery, subscribe and disconnect
    pub op_timeout_secs: u64,
    pub ack_timeout_secs: u64,
    /// Bound on handing a completed stream to the sink
    pub publish_timeout_secs: u64,
    /// Longest a session may last from connect to teardown
    pub session_watchdog_secs: u64,
    pub connect_settle_ms: u64,
    pub loop_period_ms: u64,
    pub status_interval_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 15,
            scan_window_secs: 5,
            scan_watchdog_secs: 30,
            scan_retry_secs: 5,
            op_timeout_secs: 10,
            ack_timeout_secs: 2,
            publish_timeout_secs: 15,
            session_watchdog_secs: 60,
            connect_settle_ms: 1500,
            loop_period_ms: 100,
            status_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub quiet_interval_ms: u64,
    pub max_consecutive_timeouts: u8,
    pub buffer_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            quiet_interval_ms: defaults.quiet_interval.as_millis() as u64,
            max_consecutive_timeouts: defaults.max_consecutive_timeouts,
            buffer_capacity: defaults.buffer_capacity,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LinkConfig {
    Mock {
        #[serde(default)]
        peers: Vec<MockPeerConfig>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MockPeerConfig {
    pub name: String,
    pub address: String,
    /// Advertise under this name instead of `name`
    pub advertised: Option<String>,
    #[serde(default)]
    pub events: Vec<Event>,
    /// Generate this many random events instead of listing them
    pub random_events: Option<usize>,
    /// Anchor the peripheral starts with, in UNIX seconds
    pub anchor: Option<u32>,
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub exact_batches: bool,
    pub packet_interval_ms: Option<u64>,
    pub send_interval_secs: Option<u64>,
    pub drop_after: Option<u16>,
    pub stall_after: Option<u16>,
    #[serde(default)]
    pub missing_service: bool,
    #[serde(default)]
    pub refuse_connect: bool,
    #[serde(default)]
    pub reject_ack: bool,
    #[serde(default)]
    pub pad_notifications: bool,
}

impl MockPeerConfig {
    fn sender_config(&self) -> SenderConfig {
        let defaults = SenderConfig::default();
        SenderConfig {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            fill: if self.exact_batches {
                BatchFill::Exact
            } else {
                BatchFill::Padded
            },
            packet_interval: self
                .packet_interval_ms
                .map(embassy_time::Duration::from_millis)
                .unwrap_or(defaults.packet_interval),
            send_interval: self
                .send_interval_secs
                .map(embassy_time::Duration::from_secs)
                .unwrap_or(defaults.send_interval),
            ..defaults
        }
    }

    /// Build the simulated peripheral this entry describes.
    pub fn build(&self) -> color_eyre::Result<MockPeer> {
        let address: PeerAddress = self.address.parse()?;
        let events = match self.random_events {
            Some(count) => random_events(count),
            None => self.events.clone(),
        };

        let peer = MockPeer::with_events(
            &self.name,
            address,
            &events,
            self.anchor.map(Anchor::new),
            self.sender_config(),
        )
        .map_err(|e| eyre!("mock peer '{}': {e:?}", self.name))?
        .with_faults(PeerFaults {
            drop_after: self.drop_after,
            stall_after: self.stall_after,
            missing_service: self.missing_service,
            refuse_connect: self.refuse_connect,
            reject_ack: self.reject_ack,
            pad_notifications: self.pad_notifications,
        });

        Ok(match &self.advertised {
            Some(name) => peer.advertising_as(name),
            None => peer,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    Log,
    Http {
        url: String,
        #[serde(default = "default_http_timeout")]
        timeout_secs: u64,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LocationConfig {
    #[default]
    None,
    Fixed {
        lat: f64,
        lon: f64,
    },
}

impl LocationConfig {
    pub fn fix(&self) -> color_eyre::Result<Option<LocationFix>> {
        match *self {
            LocationConfig::None => Ok(None),
            LocationConfig::Fixed { lat, lon } => LocationFix::new(lat, lon)
                .map(Some)
                .ok_or_else(|| eyre!("invalid location fix {lat}, {lon}")),
        }
    }
}

fn default_targets() -> Vec<String> {
    ["nRF_01", "nRF_02", "nRF_03"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_http_timeout() -> u64 {
    10
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading {}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            quiet_interval: Duration::from_millis(self.session.quiet_interval_ms),
            max_consecutive_timeouts: self.session.max_consecutive_timeouts,
            buffer_capacity: self.session.buffer_capacity,
            ..SessionConfig::default()
        }
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        let t = &self.timing;
        SupervisorConfig {
            targets: self.targets.clone(),
            scan_interval: Duration::from_secs(t.scan_interval_secs),
            scan_window: Duration::from_secs(t.scan_window_secs),
            scan_watchdog: Duration::from_secs(t.scan_watchdog_secs),
            scan_retry: Duration::from_secs(t.scan_retry_secs),
            op_timeout: Duration::from_secs(t.op_timeout_secs),
            ack_timeout: Duration::from_secs(t.ack_timeout_secs),
            publish_timeout: Duration::from_secs(t.publish_timeout_secs),
            session_watchdog: Duration::from_secs(t.session_watchdog_secs),
            connect_settle: Duration::from_millis(t.connect_settle_ms),
            loop_period: Duration::from_millis(t.loop_period_ms),
            status_interval: Duration::from_secs(t.status_interval_secs),
            session: self.session(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let targets = default_targets();
        let peers = targets
            .iter()
            .enumerate()
            .map(|(i, name)| MockPeerConfig {
                name: name.clone(),
                address: format!("C0:FF:EE:00:00:{:02X}", i + 1),
                advertised: None,
                events: Vec::new(),
                random_events: Some(40),
                anchor: None,
                batch_size: None,
                exact_batches: false,
                packet_interval_ms: None,
                send_interval_secs: None,
                drop_after: None,
                stall_after: None,
                missing_service: false,
                refuse_connect: false,
                reject_ack: false,
                pad_notifications: false,
            })
            .collect();

        Self {
            gateway: GatewayConfig {
                name: "motelink-gateway".to_string(),
            },
            server: ServerConfig {
                http_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8081)),
            },
            timing: TimingConfig::default(),
            session: SessionSettings::default(),
            targets,
            link: LinkConfig::Mock { peers },
            sink: SinkConfig::Log,
            location: LocationConfig::None,
        }
    }
}
