//! Shared HTTP Client Module
//!
//! Provides global, lazy-initialized HTTP clients so the vision providers and
//! the Paperless upload reuse connections instead of building a client per
//! request.
//!
//! Every client carries a hard timeout: an expired request surfaces as an
//! absent recommendation or as an upload transport failure, never as a hang.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// Timeout for a single filename recommendation request
pub const RECOMMEND_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for a single document upload
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Global HTTP client for vision provider calls (OpenAI, Gemini)
///
/// Scans are large base64 payloads, so the connect phase is bounded
/// separately from the whole request.
pub static RECOMMEND_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(RECOMMEND_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_nodelay(true)
        .build()
        .expect("Failed to create recommendation HTTP client")
});

/// Global HTTP client for Paperless-ngx uploads
pub static UPLOAD_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(UPLOAD_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(2)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to create upload HTTP client")
});

/// Get the global recommendation HTTP client
#[inline]
pub fn recommend_client() -> &'static Client {
    &RECOMMEND_CLIENT
}

/// Get the global upload HTTP client
#[inline]
pub fn upload_client() -> &'static Client {
    &UPLOAD_CLIENT
}
