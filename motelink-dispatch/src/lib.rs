pub mod config;
pub mod error;
pub mod link;
pub mod location;
pub mod session;
pub mod sink;
pub mod state;
pub mod supervisor;

// host critical-section impl for the embassy-sync channels in `link::mock`
use critical_section as _;

pub use config::{
    Config, GatewayConfig, LinkConfig, LocationConfig, MockPeerConfig, ServerConfig,
    SessionSettings, SinkConfig, TimingConfig,
};
pub use error::SessionError;
pub use link::mock::{MockLink, MockPeer, PeerFaults};
pub use link::{
    ChannelHandle, ConnectionHandle, LinkError, LinkEvent, LinkTransport, PeerAddress,
    ScanCandidate,
};
pub use location::{LocationFix, LocationProvider, StaticLocation};
pub use session::{PacketOutcome, ReceiverState, SessionConfig, SessionContext};
pub use sink::{HttpSink, LogSink, MemorySink, PublishSink, STATE_EVENT, StatePayload};
pub use state::{GatewayState, GatewayStatus};
pub use supervisor::{Supervisor, SupervisorConfig, TargetRing, name_matches};
