//! # Lookup Master
//!
//! A resilient multi-source lookup aggregator: given a search key (compound
//! name, formula, SMILES, abstract text or paper identifier) it queries
//! several external providers under per-provider rate limits and one global
//! deadline, and merges whatever they return into a single normalized record.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`models`]: Queries, partial and canonical records, diagnostics
//! - [`sources`]: Source adapters with an extensible trait-based architecture
//! - [`lookup`]: Fallback policy, fetch orchestration and record merging
//! - [`utils`]: HTTP transport and rate limiting
//! - [`config`]: Configuration management

pub mod config;
pub mod lookup;
pub mod models;
pub mod sources;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use lookup::{AggregateError, Aggregator, ExecutionMode, FallbackPolicy, PolicyOverride};
pub use models::{CanonicalRecord, LookupResult, Query, QueryKind};
pub use sources::{SourceAdapter, SourceError, SourceRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
