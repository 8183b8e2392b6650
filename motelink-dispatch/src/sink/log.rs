use std::convert::Infallible;

use async_trait::async_trait;
use tracing::info;

use super::{PublishSink, StatePayload};

/// Writes payloads to the log instead of a remote endpoint.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl PublishSink for LogSink {
    type Error = Infallible;

    async fn publish(&self, event: &str, payload: &StatePayload) -> Result<(), Self::Error> {
        match serde_json::to_string(payload) {
            Ok(json) => info!(event, device = %payload.device, count = payload.count, %json, "publish"),
            Err(e) => tracing::warn!(error = %e, event, "payload not serializable"),
        }
        Ok(())
    }
}
