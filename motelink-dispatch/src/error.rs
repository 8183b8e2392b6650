use motelink_core::ProtocolError;

use crate::link::LinkError;

/// Everything that can go wrong during one transfer session.
///
/// Only fatal errors end the session; the rest are logged and counted.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("link failure: {0}")]
    LinkFailure(#[from] LinkError),

    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] ProtocolError),

    #[error("invalid packet size: {len} bytes")]
    InvalidPacketSize { len: usize },

    #[error("sequence anomaly: expected {expected}, received {received}")]
    SequenceAnomaly { expected: u16, received: u16 },

    #[error("sequence restarted after packet {previous}")]
    SessionRestart { previous: u16 },

    #[error("no packet for {consecutive} quiet intervals")]
    LivenessTimeout { consecutive: u8 },

    #[error("peer does not expose the {0} channel")]
    CapabilityMissing(&'static str),

    #[error("point buffer full at {capacity} points")]
    BufferExhausted { capacity: usize },

    #[error("{0} watchdog expired")]
    WatchdogExpired(&'static str),

    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl SessionError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::LinkFailure(_)
                | SessionError::LivenessTimeout { .. }
                | SessionError::CapabilityMissing(_)
                | SessionError::WatchdogExpired(_)
                | SessionError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_errors_are_not_fatal() {
        assert!(!SessionError::InvalidPacketSize { len: 3 }.is_fatal());
        assert!(!SessionError::SequenceAnomaly { expected: 5, received: 6 }.is_fatal());
        assert!(!SessionError::SessionRestart { previous: 7 }.is_fatal());
        assert!(!SessionError::BufferExhausted { capacity: 500 }.is_fatal());
        assert!(
            !SessionError::from(ProtocolError::MalformedPacket { len: 9, points: 1 }).is_fatal()
        );
    }

    #[test]
    fn teardown_errors_are_fatal() {
        assert!(SessionError::LivenessTimeout { consecutive: 2 }.is_fatal());
        assert!(SessionError::CapabilityMissing("ack").is_fatal());
        assert!(SessionError::Timeout("connect").is_fatal());
        assert!(SessionError::from(LinkError::NotConnected).is_fatal());
    }
}
