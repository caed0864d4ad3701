//! Request payloads.
use crate::transport::Request;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Produces the next request to send. Called once per dispatched fire event.
pub trait RequestSupplier: Send + Sync + 'static {
    fn produce(&self) -> Request;
}

impl<F> RequestSupplier for F
where
    F: Fn() -> Request + Send + Sync + 'static,
{
    fn produce(&self) -> Request {
        self()
    }
}

const EVENT_NAMES: &[&str] = &[
    "page_view",
    "product_view",
    "add_to_cart",
    "checkout_start",
    "purchase",
    "search",
    "login",
    "signup",
    "share",
    "favorite",
];
const CHANNELS: &[&str] = &["web", "mobile", "api", "email", "push"];
const SESSION_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Event {
    pub event_name: String,
    pub channel: String,
    pub campaign_id: String,
    pub user_id: String,
    pub timestamp: u64,
    pub tags: Vec<String>,
    pub metadata: EventMetadata,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EventMetadata {
    pub session_id: String,
    pub page_url: String,
    pub referrer: String,
}

/// Random analytics events, serialized as JSON.
#[derive(Debug, Clone, Default)]
pub struct EventSupplier;

impl EventSupplier {
    pub fn event<R: Rng>(rng: &mut R) -> Event {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Event {
            event_name: pick(rng, EVENT_NAMES),
            channel: pick(rng, CHANNELS),
            campaign_id: format!("campaign_{}", rng.gen_range(0..100)),
            user_id: format!("user_{}", rng.gen_range(0..100_000)),
            timestamp,
            tags: vec!["source:loadtest".to_string(), "env:test".to_string()],
            metadata: EventMetadata {
                session_id: session_id(rng),
                page_url: format!("/products/item-{}", rng.gen_range(0..1_000)),
                referrer: "https://example.com".to_string(),
            },
        }
    }
}

impl RequestSupplier for EventSupplier {
    fn produce(&self) -> Request {
        let event = Self::event(&mut rand::thread_rng());
        // Serializing plain strings and integers cannot fail.
        let body = serde_json::to_vec(&event).unwrap_or_default();
        Request::json(body)
    }
}

fn session_id<R: Rng>(rng: &mut R) -> String {
    let suffix: String = (0..9)
        .map(|_| char::from(SESSION_ALPHABET[rng.gen_range(0..SESSION_ALPHABET.len())]))
        .collect();
    format!("session_{suffix}")
}

fn pick<R: Rng>(rng: &mut R, options: &[&str]) -> String {
    options.choose(rng).copied().unwrap_or_default().to_string()
}
