pub mod mock;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

/// Six-byte radio address of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress(pub [u8; 6]);

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid peer address '{0}'")]
pub struct InvalidAddress(String);

impl FromStr for PeerAddress {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');

        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| InvalidAddress(s.to_owned()))?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| InvalidAddress(s.to_owned()))?;
        }

        if parts.next().is_some() {
            return Err(InvalidAddress(s.to_owned()));
        }

        Ok(PeerAddress(bytes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u16);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(pub u16);

/// A named peripheral seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCandidate {
    pub name: String,
    pub address: PeerAddress,
    pub rssi: i8,
}

/// Callbacks from the link layer, queued for the supervisor loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected {
        handle: ConnectionHandle,
        address: PeerAddress,
    },
    Disconnected {
        handle: ConnectionHandle,
        reason: u8,
    },
    Data {
        handle: ConnectionHandle,
        channel: ChannelHandle,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("no peer at {0}")]
    UnknownPeer(PeerAddress),

    #[error("connection to {0} refused")]
    ConnectRefused(PeerAddress),

    #[error("service {0:#034x} not found")]
    UnknownService(u128),

    #[error("channel {0:#034x} not found")]
    UnknownChannel(u128),

    #[error("connection is not established")]
    NotConnected,

    #[error("write rejected")]
    WriteRejected,

    #[error("link event channel closed")]
    ChannelClosed,
}

/// Central side of the wireless link.
///
/// Implementations report asynchronous happenings (connection up or down,
/// notifications) as [`LinkEvent`]s on the channel handed to them at
/// construction; the methods here only issue requests.
#[async_trait]
pub trait LinkTransport: Send + Sync + 'static {
    /// Scan for `window` and return every named peripheral seen.
    async fn scan(&self, window: Duration) -> Result<Vec<ScanCandidate>, LinkError>;

    async fn connect(&self, address: PeerAddress) -> Result<ConnectionHandle, LinkError>;

    async fn discover_channel(
        &self,
        conn: ConnectionHandle,
        service: u128,
        channel: u128,
    ) -> Result<ChannelHandle, LinkError>;

    /// Enable notifications on `channel`.
    async fn subscribe(
        &self,
        conn: ConnectionHandle,
        channel: ChannelHandle,
    ) -> Result<(), LinkError>;

    async fn write(
        &self,
        conn: ConnectionHandle,
        channel: ChannelHandle,
        bytes: &[u8],
    ) -> Result<(), LinkError>;

    /// Must succeed for handles that are already gone.
    async fn disconnect(&self, conn: ConnectionHandle) -> Result<(), LinkError>;
}
