use bytes::Bytes;
use super::{Request, Transport, TransportError, TransportResponse};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// POSTs every request to a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: Request, timeout: Duration) -> TransportResponse {
        let start = Instant::now();
        let mut builder = self.client.post(&self.url).timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let res = match builder.body(request.body).send().await {
            Ok(res) => res,
            Err(err) => return TransportResponse::error(map_error(err), start.elapsed()),
        };

        let status = res.status().as_u16();
        match res.bytes().await {
            Ok(body) => TransportResponse::status(status, start.elapsed(), body),
            Err(err) => {
                trace!("Failed reading body for status {status}: {err}");
                TransportResponse {
                    status: Some(status),
                    elapsed: start.elapsed(),
                    body: Bytes::new(),
                    error: Some(map_error(err)),
                }
            }
        }
    }
}

fn map_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
