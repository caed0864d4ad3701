use axum::{
    body::Bytes,
    debug_handler,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use lazy_static::lazy_static;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

const CHANNELS: &[&str] = &["web", "mobile", "api", "email", "push"];

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(event))
        .route("/events/bulk", post(bulk))
        .route("/delay/ms/:delay_ms/events", post(delayed))
        .route("/limited/:max_tps/events", post(limited))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Mock ingestion service listening on {addr}");
    axum::serve(listener, router()).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub event_name: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub campaign_id: String,
    pub user_id: String,
    pub timestamp: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventRequest {
    fn validate(&self) -> Result<(), String> {
        if self.event_name.is_empty() {
            return Err("event_name is required".to_string());
        }
        if self.user_id.is_empty() {
            return Err("user_id is required".to_string());
        }
        if self.timestamp == 0 {
            return Err("timestamp is required".to_string());
        }
        if !self.channel.is_empty() && !CHANNELS.contains(&self.channel.as_str()) {
            return Err(format!("unknown channel `{}`", self.channel));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkEventRequest {
    pub events: Vec<EventRequest>,
}

#[derive(Debug, Serialize)]
struct EventResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

type Reply = (StatusCode, axum::response::Response);

fn accepted(count: u64) -> Reply {
    ACCEPTED.fetch_add(count, Ordering::Relaxed);
    counter!("mock-service.accepted").increment(count);
    (
        StatusCode::ACCEPTED,
        Json(EventResponse { status: "accepted" }).into_response(),
    )
}

fn rejected(status: StatusCode, error: impl Into<String>) -> Reply {
    counter!("mock-service.rejected").increment(1);
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        })
        .into_response(),
    )
}

fn ingest(body: &[u8]) -> Reply {
    let event: EventRequest = match serde_json::from_slice(body) {
        Ok(event) => event,
        Err(err) => return rejected(StatusCode::BAD_REQUEST, err.to_string()),
    };
    match event.validate() {
        Ok(()) => accepted(1),
        Err(err) => rejected(StatusCode::BAD_REQUEST, err),
    }
}

#[debug_handler]
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

#[debug_handler]
pub async fn event(body: Bytes) -> impl IntoResponse {
    ingest(&body)
}

#[debug_handler]
pub async fn bulk(body: Bytes) -> impl IntoResponse {
    let req: BulkEventRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => return rejected(StatusCode::BAD_REQUEST, err.to_string()),
    };
    if let Some(err) = req.events.iter().find_map(|e| e.validate().err()) {
        return rejected(StatusCode::BAD_REQUEST, err);
    }
    accepted(req.events.len() as u64)
}

#[debug_handler]
pub async fn delayed(Path(delay_ms): Path<u64>, body: Bytes) -> impl IntoResponse {
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    ingest(&body)
}

lazy_static! {
    static ref LIMITED_MAP: RwLock<HashMap<u32, Arc<DefaultDirectRateLimiter>>> =
        RwLock::new(HashMap::new());
}

/// Accepts at most `max_tps` events per second and answers 500 beyond that.
#[debug_handler]
pub async fn limited(Path(max_tps): Path<u32>, body: Bytes) -> impl IntoResponse {
    let Some(limiter) = limiter_for(max_tps) else {
        return rejected(StatusCode::BAD_REQUEST, "max_tps must be positive");
    };

    match limiter.check() {
        Ok(_) => ingest(&body),
        Err(_) => {
            debug!("Rate limited at {max_tps} TPS");
            rejected(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

fn limiter_for(max_tps: u32) -> Option<Arc<DefaultDirectRateLimiter>> {
    let read = LIMITED_MAP
        .read()
        .ok()
        .and_then(|map| map.get(&max_tps).cloned());
    if read.is_some() {
        return read;
    }

    let limiter = Arc::new(rate_limiter(max_tps)?);
    if let Ok(mut map) = LIMITED_MAP.write() {
        return Some(map.entry(max_tps).or_insert(limiter).clone());
    }
    Some(limiter)
}

/** Utils **/

pub fn rate_limiter(tps: u32) -> Option<DefaultDirectRateLimiter> {
    NonZeroU32::new(tps).map(|tps| RateLimiter::direct(Quota::per_second(tps)))
}

/** Throughput printer **/

static ACCEPTED: AtomicU64 = AtomicU64::new(0);

/// Events accepted since the process started.
pub fn accepted_events() -> u64 {
    ACCEPTED.load(Ordering::Relaxed)
}

pub async fn throughput_task() {
    let mut last = accepted_events();
    loop {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let total = accepted_events();
        info!("{} events/s accepted", total - last);
        gauge!("mock-service.eps").set((total - last) as f64);
        last = total;
    }
}
