use core::fmt;

pub type ParseResult<T> = core::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    MalformedPacket { len: usize, points: u8 },
    InsufficientData { needed: usize, available: usize },
    TooManyPoints { count: usize, max: usize },
    InvalidAckSize(usize),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MalformedPacket { len, points } => {
                write!(f, "malformed packet: {len} bytes declaring {points} points")
            }
            ProtocolError::InsufficientData { needed, available } => {
                write!(f, "insufficient data: need {needed} bytes, have {available}")
            }
            ProtocolError::TooManyPoints { count, max } => {
                write!(f, "{count} points exceed the per-packet maximum of {max}")
            }
            ProtocolError::InvalidAckSize(len) => {
                write!(f, "acknowledgment must be 4 bytes, got {len}")
            }
        }
    }
}

impl core::error::Error for ProtocolError {}
