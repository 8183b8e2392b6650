use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;

/// Snapshot served on `/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    pub gateway: String,
    pub uptime_secs: u64,
    pub current_target: Option<String>,
    pub active_peer: Option<String>,
    pub sessions_completed: u64,
    pub sessions_aborted: u64,
    pub points_published: u64,
    pub last_publish: Option<jiff::Timestamp>,
}

/// Counters shared between the supervisor and the HTTP server.
#[derive(Clone)]
pub struct GatewayState {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    gateway: String,
    startup_time: Instant,
    current_target: Option<String>,
    active_peer: Option<String>,
    sessions_completed: u64,
    sessions_aborted: u64,
    points_published: u64,
    last_publish: Option<jiff::Timestamp>,
}

impl GatewayState {
    pub fn new(gateway: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                gateway: gateway.into(),
                startup_time: Instant::now(),
                current_target: None,
                active_peer: None,
                sessions_completed: 0,
                sessions_aborted: 0,
                points_published: 0,
                last_publish: None,
            })),
        }
    }

    pub async fn target_changed(&self, target: &str) {
        let mut inner = self.inner.lock().await;
        inner.current_target = Some(target.to_owned());
    }

    pub async fn session_started(&self, peer: &str) {
        let mut inner = self.inner.lock().await;
        inner.active_peer = Some(peer.to_owned());
    }

    /// Record the end of a session. `completed` is false for aborted ones.
    pub async fn session_ended(&self, completed: bool) {
        let mut inner = self.inner.lock().await;
        inner.active_peer = None;
        if completed {
            inner.sessions_completed += 1;
        } else {
            inner.sessions_aborted += 1;
        }
    }

    pub async fn points_published(&self, count: usize, at: jiff::Timestamp) {
        let mut inner = self.inner.lock().await;
        inner.points_published += count as u64;
        inner.last_publish = Some(at);
    }

    pub async fn snapshot(&self) -> GatewayStatus {
        let inner = self.inner.lock().await;
        GatewayStatus {
            gateway: inner.gateway.clone(),
            uptime_secs: inner.startup_time.elapsed().as_secs(),
            current_target: inner.current_target.clone(),
            active_peer: inner.active_peer.clone(),
            sessions_completed: inner.sessions_completed,
            sessions_aborted: inner.sessions_aborted,
            points_published: inner.points_published,
            last_publish: inner.last_publish,
        }
    }
}
