//! HTTP client for the upstream marketing platform.
//!
//! Wraps reqwest with the behaviors the sync pipeline depends on:
//! client-side rate limiting, retry with exponential backoff, typed
//! error mapping, cursor pagination, and coalescing of identical
//! concurrent requests.

pub mod client;
pub mod rate_limit;

pub use client::{AuthScheme, UpstreamClient, UpstreamConfig};
pub use rate_limit::{RateLimitConfig, RateLimitManager, RateLimitPermit};
