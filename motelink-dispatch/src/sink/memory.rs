use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{PublishSink, StatePayload};

/// Keeps every published payload in memory. Clones share one buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    published: Arc<Mutex<Vec<(String, StatePayload)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<(String, StatePayload)> {
        self.published.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.published.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.published.lock().await.is_empty()
    }
}

#[async_trait]
impl PublishSink for MemorySink {
    type Error = Infallible;

    async fn publish(&self, event: &str, payload: &StatePayload) -> Result<(), Self::Error> {
        self.published
            .lock()
            .await
            .push((event.to_owned(), payload.clone()));
        Ok(())
    }
}
