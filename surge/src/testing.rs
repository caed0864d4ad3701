//! Transports and suppliers for unit tests.
use crate::transport::{Request, Transport, TransportResponse};
use std::time::Duration;

pub(crate) const ACCEPTED_BODY: &str = r#"{"status":"accepted"}"#;

pub(crate) fn empty_request() -> Request {
    Request::json(&b"{}"[..])
}

/// Answers every request with a fixed status after a fixed delay.
#[derive(Debug, Clone)]
pub(crate) struct FixedTransport {
    pub delay: Duration,
    pub status: u16,
}

impl FixedTransport {
    pub fn accepted(delay: Duration) -> Self {
        Self { delay, status: 202 }
    }
}

impl Transport for FixedTransport {
    async fn send(&self, _request: Request, _timeout: Duration) -> TransportResponse {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        TransportResponse::status(self.status, self.delay, ACCEPTED_BODY)
    }
}

/// Answers with a latency picked by the sequence of calls.
#[derive(Debug)]
pub(crate) struct ScriptedTransport {
    pub latencies: Vec<Duration>,
    pub next: std::sync::atomic::AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(latencies: Vec<Duration>) -> Self {
        Self {
            latencies,
            next: Default::default(),
        }
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, _request: Request, _timeout: Duration) -> TransportResponse {
        let i = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let delay = self.latencies[i % self.latencies.len()];
        tokio::time::sleep(delay).await;
        TransportResponse::status(202, delay, ACCEPTED_BODY)
    }
}
