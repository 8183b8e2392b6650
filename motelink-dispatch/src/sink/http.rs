use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, instrument};

use super::{PublishSink, StatePayload};

#[derive(Debug, thiserror::Error)]
pub enum HttpSinkError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("endpoint answered {0}")]
    Status(StatusCode),
}

#[derive(Serialize)]
struct Envelope<'a> {
    event: &'a str,
    data: &'a StatePayload,
}

/// POSTs each payload as JSON to a cloud endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, HttpSinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PublishSink for HttpSink {
    type Error = HttpSinkError;

    #[instrument(name = "http_publish", skip_all, fields(url = %self.url, event = %event))]
    async fn publish(&self, event: &str, payload: &StatePayload) -> Result<(), Self::Error> {
        let response = self
            .client
            .post(&self.url)
            .json(&Envelope {
                event,
                data: payload,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpSinkError::Status(status));
        }

        debug!(%status, count = payload.count, "published");
        Ok(())
    }
}
