//! The seam between the pool and the system under test.
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::Duration;

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
pub use http::HttpTransport;

/// A single request body plus the headers to send with it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub body: Bytes,
    pub headers: BTreeMap<String, String>,
}

impl Request {
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            headers: BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// Whatever came back from the target. `status` is absent when no response was received.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: Option<u16>,
    pub elapsed: Duration,
    pub body: Bytes,
    pub error: Option<TransportError>,
}

impl TransportResponse {
    pub fn status(status: u16, elapsed: Duration, body: impl Into<Bytes>) -> Self {
        Self {
            status: Some(status),
            elapsed,
            body: body.into(),
            error: None,
        }
    }

    pub fn error(error: TransportError, elapsed: Duration) -> Self {
        Self {
            status: None,
            elapsed,
            body: Bytes::new(),
            error: Some(error),
        }
    }
}

/// Sends one request to the target. Implementations must honor `timeout` or be cut off by the
/// caller.
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    async fn send(&self, request: Request, timeout: Duration) -> TransportResponse;
}
