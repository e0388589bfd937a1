//! Source adapters with an extensible trait-based architecture.
//!
//! This module defines the [`SourceAdapter`] trait that every external data
//! provider implements. An adapter turns a [`Query`] into a provider request
//! and the provider's response into a [`PartialRecord`]. Adapters are
//! registered in a [`SourceRegistry`], which pairs each one with its own
//! [`RateLimiter`](crate::utils::RateLimiter).
//!
//! # Built-in adapters
//!
//! | Name | Query kinds | Provider |
//! |------|-------------|----------|
//! | `pubchem` | name, formula, smiles | PubChem PUG REST full compound record |
//! | `pubchem_rest` | name, formula, smiles | PubChem PUG REST CID → properties → synonyms |
//! | `semantic_scholar` | abstract_text, identifier | Semantic Scholar Graph API |
//! | `openalex` | abstract_text, identifier | OpenAlex works API |
//! | `crossref` | identifier | CrossRef works API |
//! | `pubtator` | abstract_text | PubTator3 search API |
//! | `paperlist` | abstract_text | Paperlist search → detail |
//!
//! [`MockSource`] and [`StaticTransport`] in [`mock`] are the test doubles:
//! a scripted adapter and a canned HTTP transport that answers from a routing
//! table instead of the network.
//!
//! # Implementing a new adapter
//!
//! 1. Create a struct holding an `Arc<dyn Transport>` and [`SourceSettings`]
//! 2. Implement [`SourceAdapter`]; use [`fetch`] and [`parse_json`] so HTTP
//!    statuses and deadlines map onto [`SourceError`] the same way everywhere
//! 3. Add the name to `registry::build_adapter`

mod crossref;
pub mod mock;
mod openalex;
mod paperlist;
mod pubchem;
mod pubchem_rest;
mod pubtator;
mod registry;
mod semantic;

pub use crossref::CrossRefSource;
pub use mock::{MockSource, StaticTransport};
pub use openalex::OpenAlexSource;
pub use paperlist::PaperlistSource;
pub use pubchem::PubChemCompoundSource;
pub use pubchem_rest::PubChemPropertySource;
pub use pubtator::PubTatorSource;
pub use registry::{BuiltinSource, RegisteredSource, SourceRegistry, BUILTIN_SOURCES};
pub use semantic::SemanticScholarSource;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{duration_ms, PartialRecord, Query, QueryKind, QueryKinds};
use crate::utils::{HttpRequest, HttpResponse, Transport, TransportError};

/// Interface for every external data provider.
///
/// `call` performs one logical provider call: multi-step sequences (search
/// then detail) share the same `deadline`. It must return `Timeout` rather
/// than run past `deadline`, and report undecodable payloads as `Malformed`
/// instead of panicking.
#[async_trait]
pub trait SourceAdapter: Send + Sync + fmt::Debug {
    /// Unique name used in policies, configuration and diagnostics
    fn name(&self) -> &str;

    /// Query kinds this adapter can answer
    fn capabilities(&self) -> QueryKinds;

    /// Default ordering when no policy lists adapters explicitly (lower first)
    fn priority(&self) -> i32 {
        100
    }

    /// Reliability declared on every record this adapter produces
    fn confidence(&self) -> i32 {
        1
    }

    fn supports(&self, kind: QueryKind) -> bool {
        self.capabilities().supports(kind)
    }

    async fn call(&self, query: &Query, deadline: Instant) -> Result<PartialRecord, SourceError>;
}

/// Why an adapter call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    Timeout,
    RateLimited,
    NotFound,
    Malformed,
    Unreachable,
}

impl fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceErrorKind::Timeout => "timeout",
            SourceErrorKind::RateLimited => "rate limited",
            SourceErrorKind::NotFound => "not found",
            SourceErrorKind::Malformed => "malformed response",
            SourceErrorKind::Unreachable => "unreachable",
        })
    }
}

/// Failure of one adapter call, tagged with the adapter that produced it
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{adapter}: {kind}: {detail}")]
pub struct SourceError {
    pub adapter: String,
    pub kind: SourceErrorKind,
    pub detail: String,
    #[serde(rename = "retry_after_ms", serialize_with = "duration_ms::serialize_opt")]
    pub retry_after: Option<Duration>,
}

impl SourceError {
    pub fn new(adapter: &str, kind: SourceErrorKind, detail: impl Into<String>) -> Self {
        Self {
            adapter: adapter.to_string(),
            kind,
            detail: detail.into(),
            retry_after: None,
        }
    }

    pub fn timeout(adapter: &str) -> Self {
        Self::new(adapter, SourceErrorKind::Timeout, "deadline exceeded")
    }

    pub fn rate_limited(adapter: &str, retry_after: Option<Duration>) -> Self {
        Self::new(adapter, SourceErrorKind::RateLimited, "no token available").with_retry_after(retry_after)
    }

    pub fn not_found(adapter: &str, detail: impl Into<String>) -> Self {
        Self::new(adapter, SourceErrorKind::NotFound, detail)
    }

    pub fn malformed(adapter: &str, detail: impl Into<String>) -> Self {
        Self::new(adapter, SourceErrorKind::Malformed, detail)
    }

    pub fn unreachable(adapter: &str, detail: impl Into<String>) -> Self {
        Self::new(adapter, SourceErrorKind::Unreachable, detail)
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn from_transport(adapter: &str, err: TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => Self::timeout(adapter),
            other => Self::unreachable(adapter, other.to_string()),
        }
    }
}

/// Per-adapter settings resolved from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub base_url: String,
    pub priority: i32,
    pub confidence: i32,
    pub api_key: Option<String>,
    /// Contact address for providers with a "polite pool"
    pub mailto: Option<String>,
}

impl SourceSettings {
    pub fn new(base_url: &str, priority: i32, confidence: i32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            priority,
            confidence,
            api_key: None,
            mailto: None,
        }
    }

    /// Join `path` onto the base URL
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Send `request` through `transport` without running past `deadline`.
///
/// Maps transport failures and non-2xx statuses onto [`SourceError`]:
/// 400/404/422 are `NotFound`, 429 is `RateLimited`, everything else is
/// `Unreachable`. `Retry-After` is kept as a hint.
pub async fn fetch(
    adapter: &str,
    transport: &dyn Transport,
    request: HttpRequest,
    deadline: Instant,
) -> Result<HttpResponse, SourceError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(SourceError::timeout(adapter));
    }

    let url = request.url.clone();
    tracing::debug!("[{}] GET {}", adapter, url);

    let response = match tokio::time::timeout_at(
        deadline,
        transport.execute(request.with_timeout(remaining)),
    )
    .await
    {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => return Err(SourceError::from_transport(adapter, err)),
        Err(_) => return Err(SourceError::timeout(adapter)),
    };

    if response.is_success() {
        return Ok(response);
    }

    let detail = format!("HTTP {} from {}", response.status, url);
    let err = match response.status {
        400 | 404 | 422 => SourceError::not_found(adapter, detail),
        429 => SourceError::new(adapter, SourceErrorKind::RateLimited, detail),
        _ => SourceError::unreachable(adapter, detail),
    };
    Err(err.with_retry_after(response.retry_after()))
}

/// Decode a JSON body, reporting failures as `Malformed`
pub fn parse_json<T: DeserializeOwned>(
    adapter: &str,
    response: &HttpResponse,
) -> Result<T, SourceError> {
    serde_json::from_slice(&response.body)
        .map_err(|e| SourceError::malformed(adapter, format!("invalid JSON: {}", e)))
}

/// Normalize a DOI given bare, as `doi:...`, or as a doi.org URL
pub fn normalize_doi(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let lower = trimmed.to_ascii_lowercase();

    let stripped = ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "doi:"]
        .iter()
        .find(|prefix| lower.starts_with(*prefix))
        .map(|prefix| trimmed[prefix.len()..].trim())
        .unwrap_or(trimmed);

    if stripped.starts_with("10.") && stripped.contains('/') {
        Some(stripped.to_string())
    } else {
        None
    }
}
