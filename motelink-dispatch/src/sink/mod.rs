pub mod http;
pub mod log;
pub mod memory;

use async_trait::async_trait;
use motelink_core::DataPoint;
use serde::Serialize;
use ulid::Ulid;

pub use http::HttpSink;
pub use log::LogSink;
pub use memory::MemorySink;

use crate::location::LocationFix;

/// Event name completed streams are published under.
pub const STATE_EVENT: &str = "state";

/// JSON body published for one completed stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatePayload {
    pub device: String,
    pub address: String,
    pub session: Ulid,
    pub count: usize,
    /// Points as `state:a:b` triples, comma separated.
    pub data: String,
    pub points: Vec<DataPoint>,
    pub anomalies: u32,
    pub location: Option<LocationFix>,
    /// H3 cell of `location`.
    pub cell: Option<u64>,
    pub timestamp: jiff::Timestamp,
}

impl StatePayload {
    pub fn encode_points(points: &[DataPoint]) -> String {
        points
            .iter()
            .map(|p| format!("{}:{}:{}", p.state_code, p.field_a, p.field_b))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Destination for completed streams. Delivery is best effort; the
/// supervisor logs failures and moves on.
#[async_trait]
pub trait PublishSink: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn publish(&self, event: &str, payload: &StatePayload) -> Result<(), Self::Error>;
}
