use heapless::Vec;
use serde::{Deserialize, Serialize};

use super::*;

/// One payload entry of a packet.
///
/// `field_a` and `field_b` carry either relative or absolute seconds; the
/// wire shape is the same for both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataPoint {
    pub state_code: u8,
    pub field_a: u32,
    pub field_b: u32,
}

impl DataPoint {
    pub const EMPTY: DataPoint = DataPoint::new(0, 0, 0);

    pub const fn new(state_code: u8, field_a: u32, field_b: u32) -> Self {
        Self {
            state_code,
            field_a,
            field_b,
        }
    }

    /// Padding points have every field zero and carry no data.
    pub fn is_empty(&self) -> bool {
        self.state_code == 0 && self.field_a == 0 && self.field_b == 0
    }

    fn from_bytes(bytes: &[u8; DATA_POINT_SIZE]) -> Self {
        Self {
            state_code: bytes[0],
            field_a: u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            field_b: u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
        }
    }

    fn to_bytes(self) -> [u8; DATA_POINT_SIZE] {
        let mut bytes = [0u8; DATA_POINT_SIZE];

        bytes[0] = self.state_code;
        bytes[1..5].copy_from_slice(&self.field_a.to_le_bytes());
        bytes[5..9].copy_from_slice(&self.field_b.to_le_bytes());

        bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PacketHeader {
    pub sequence: u16,
    pub total: u16,
    pub points: u8,
}

impl PacketHeader {
    pub fn from_bytes(bytes: &[u8]) -> ParseResult<Self> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::InsufficientData {
                needed: PACKET_HEADER_SIZE,
                available: bytes.len(),
            });
        }

        Ok(Self {
            sequence: u16::from_le_bytes([bytes[0], bytes[1]]),
            total: u16::from_le_bytes([bytes[2], bytes[3]]),
            points: bytes[4],
        })
    }

    pub fn to_bytes(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut bytes = [0u8; PACKET_HEADER_SIZE];

        bytes[0..2].copy_from_slice(&self.sequence.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.total.to_le_bytes());
        bytes[4] = self.points;

        bytes
    }
}

/// A decoded wire packet: header plus its data points.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Packet {
    pub sequence: u16,
    pub total: u16,
    pub points: Vec<DataPoint, MAX_POINTS_PER_PACKET>,
}

impl Packet {
    pub fn new(sequence: u16, total: u16, points: &[DataPoint]) -> ParseResult<Self> {
        let points = Vec::from_slice(points).map_err(|_| ProtocolError::TooManyPoints {
            count: points.len(),
            max: MAX_POINTS_PER_PACKET,
        })?;

        Ok(Self {
            sequence,
            total,
            points,
        })
    }

    pub fn single(sequence: u16, total: u16, point: DataPoint) -> Self {
        let mut points = Vec::new();
        // capacity is always at least one
        let _ = points.push(point);

        Self {
            sequence,
            total,
            points,
        }
    }

    pub fn header(&self) -> PacketHeader {
        PacketHeader {
            sequence: self.sequence,
            total: self.total,
            points: self.points.len() as u8,
        }
    }

    /// True when this packet closes its stream.
    pub fn is_last(&self) -> bool {
        self.sequence == self.total
    }

    pub fn encoded_len(&self) -> usize {
        PACKET_HEADER_SIZE + self.points.len() * DATA_POINT_SIZE
    }

    /// Decode a notification payload, tolerating up to
    /// [`LINK_PADDING_MAX`] trailing bytes of link-layer padding.
    pub fn decode(bytes: &[u8]) -> ParseResult<Self> {
        let header = PacketHeader::from_bytes(bytes).map_err(|_| malformed(bytes, 0))?;
        let count = header.points as usize;

        if count == 0 || count > MAX_POINTS_PER_PACKET {
            return Err(malformed(bytes, header.points));
        }

        let (min, max) = packet_size_window(count);
        if bytes.len() < min || bytes.len() > max {
            return Err(malformed(bytes, header.points));
        }

        let mut points = Vec::new();
        for chunk in bytes[PACKET_HEADER_SIZE..min].chunks_exact(DATA_POINT_SIZE) {
            let mut raw = [0u8; DATA_POINT_SIZE];
            raw.copy_from_slice(chunk);
            let _ = points.push(DataPoint::from_bytes(&raw));
        }

        Ok(Self {
            sequence: header.sequence,
            total: header.total,
            points,
        })
    }

    /// Write the packet into `buf`, returning the number of bytes used.
    pub fn encode(&self, buf: &mut [u8]) -> ParseResult<usize> {
        let len = self.encoded_len();
        if buf.len() < len {
            return Err(ProtocolError::InsufficientData {
                needed: len,
                available: buf.len(),
            });
        }

        buf[..PACKET_HEADER_SIZE].copy_from_slice(&self.header().to_bytes());

        for (i, point) in self.points.iter().enumerate() {
            let offset = PACKET_HEADER_SIZE + i * DATA_POINT_SIZE;
            buf[offset..offset + DATA_POINT_SIZE].copy_from_slice(&point.to_bytes());
        }

        Ok(len)
    }
}

fn malformed(bytes: &[u8], points: u8) -> ProtocolError {
    ProtocolError::MalformedPacket {
        len: bytes.len(),
        points,
    }
}

/// Encode the single-point packet the sender puts on the wire.
pub fn encode_single(
    sequence: u16,
    total: u16,
    point: &DataPoint,
) -> [u8; SINGLE_POINT_PACKET_SIZE] {
    let header = PacketHeader {
        sequence,
        total,
        points: 1,
    };

    let mut bytes = [0u8; SINGLE_POINT_PACKET_SIZE];
    bytes[..PACKET_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    bytes[PACKET_HEADER_SIZE..].copy_from_slice(&point.to_bytes());
    bytes
}

pub fn encode_ack(timestamp: u32) -> [u8; ACK_SIZE] {
    timestamp.to_le_bytes()
}

pub fn decode_ack(bytes: &[u8]) -> ParseResult<u32> {
    let raw: [u8; ACK_SIZE] = bytes
        .try_into()
        .map_err(|_| ProtocolError::InvalidAckSize(bytes.len()))?;

    Ok(u32::from_le_bytes(raw))
}
