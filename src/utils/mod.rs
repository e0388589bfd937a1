//! Utility modules supporting lookups.
//!
//! - [`HttpClient`]: reqwest-backed [`Transport`] shared by every adapter
//! - [`HttpRequest`] / [`HttpResponse`]: the transport envelope adapters build and parse
//! - [`RateLimiter`]: per-adapter token bucket
//!
//! Tests swap [`HttpClient`] for [`StaticTransport`](crate::sources::StaticTransport),
//! a [`Transport`] that answers from a routing table.
//!
//! # Rate limiting
//!
//! ```rust,no_run
//! use lookup_master::utils::{AcquireMode, RateLimiter};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = RateLimiter::new("pubchem", 5, 5.0, AcquireMode::Wait)?;
//! limiter.acquire(Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

mod http;
mod rate_limit;

pub use http::{HttpClient, HttpRequest, HttpResponse, Transport, TransportError};
pub use rate_limit::{AcquireMode, RateLimiter};
