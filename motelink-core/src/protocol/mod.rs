mod error;
mod packet;

pub use error::{ParseResult, ProtocolError};
pub use packet::{DataPoint, Packet, PacketHeader, decode_ack, encode_ack, encode_single};

// packet structure : sequence(2) + total(2) + points(1) + points * (state(1) + a(4) + b(4))

pub const PACKET_HEADER_SIZE: usize = 5;
pub const DATA_POINT_SIZE: usize = 9;
pub const SINGLE_POINT_PACKET_SIZE: usize = PACKET_HEADER_SIZE + DATA_POINT_SIZE;
/// Bytes a link layer may append to a notification beyond the packet itself.
pub const LINK_PADDING_MAX: usize = 6;
pub const MAX_PACKET_SIZE: usize = 244;
pub const MAX_POINTS_PER_PACKET: usize = (MAX_PACKET_SIZE - PACKET_HEADER_SIZE) / DATA_POINT_SIZE;
pub const ACK_SIZE: usize = 4;

/// GATT-style identifier of the transfer service.
pub const SERVICE_ID: u128 = 0x12345678_1234_1234_1234_123456789abc;
/// Channel the peripheral notifies packets on.
pub const DATA_CHANNEL_ID: u128 = 0x87654321_4321_4321_4321_cba987654321;
/// Channel the central writes the acknowledgment to.
pub const ACK_CHANNEL_ID: u128 = 0x11223344_5566_7788_99aa_bbccddeeff00;

/// Inclusive byte-length window accepted for a packet carrying `points` points.
pub const fn packet_size_window(points: usize) -> (usize, usize) {
    let exact = PACKET_HEADER_SIZE + points * DATA_POINT_SIZE;
    (exact, exact + LINK_PADDING_MAX)
}
