//! The lookup aggregator.
//!
//! [`Aggregator::lookup`] is the single entry point: it plans which adapters
//! to call for the query kind, runs them through the orchestrator under a
//! global deadline, and merges whatever came back into one
//! [`CanonicalRecord`].
//!
//! ```rust,no_run
//! use lookup_master::{Aggregator, Config, Query, QueryKind};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let aggregator = Aggregator::from_config(&Config::default())?;
//! let result = aggregator
//!     .lookup(Query::new("aspirin", QueryKind::Name), Duration::from_secs(10))
//!     .await?;
//! println!("{:?}", result.record.text("molecular_formula"));
//! # Ok(())
//! # }
//! ```

mod merge;
mod orchestrator;
mod policy;

pub use merge::{merge, EmptyMerge};
pub use orchestrator::FetchState;
pub use policy::{ExecutionMode, FallbackPolicy, KindPolicy, Plan, PolicyOverride};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{Config, ConfigError};
use crate::models::{duration_ms, CanonicalRecord, Diagnostics, LookupResult, Query};
use crate::sources::SourceRegistry;
use crate::utils::{HttpClient, Transport};

/// Top-level lookup failure.
///
/// Individual adapter errors never surface on their own; they are in the
/// diagnostics carried by `NoResult` and `DeadlineExceeded`.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum AggregateError {
    /// Every adapter failed or returned nothing
    #[error("no source returned a result: {}", .diagnostics.summary())]
    NoResult {
        diagnostics: Diagnostics,
        record: CanonicalRecord,
    },

    /// The global deadline elapsed before any adapter succeeded
    #[error("lookup deadline exceeded after {elapsed:?}: {}", .diagnostics.summary())]
    DeadlineExceeded {
        #[serde(rename = "elapsed_ms", serialize_with = "duration_ms::serialize")]
        elapsed: Duration,
        diagnostics: Diagnostics,
        record: CanonicalRecord,
    },

    /// No configured adapter can answer the query
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },
}

impl AggregateError {
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            AggregateError::NoResult { diagnostics, .. }
            | AggregateError::DeadlineExceeded { diagnostics, .. } => Some(diagnostics),
            AggregateError::InvalidQuery { .. } => None,
        }
    }

    /// The explicit empty record that accompanies a failed lookup
    pub fn record(&self) -> Option<&CanonicalRecord> {
        match self {
            AggregateError::NoResult { record, .. }
            | AggregateError::DeadlineExceeded { record, .. } => Some(record),
            AggregateError::InvalidQuery { .. } => None,
        }
    }
}

/// Resilient multi-source lookup.
///
/// Cheap to clone; the registry (and with it every rate limiter) is shared,
/// so clones draw from the same token buckets.
#[derive(Debug, Clone)]
pub struct Aggregator {
    registry: Arc<SourceRegistry>,
    policy: FallbackPolicy,
}

impl Aggregator {
    pub fn new(registry: SourceRegistry, policy: FallbackPolicy) -> Self {
        Self {
            registry: Arc::new(registry),
            policy,
        }
    }

    /// Validate `config`, build one HTTP client, and register every enabled adapter on it
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let http = HttpClient::with_settings(
            &config.http.user_agent,
            Duration::from_millis(config.http.connect_timeout_ms),
            Duration::from_secs(config.http.pool_idle_timeout_secs),
        )?;
        Self::with_transport(config, Arc::new(http))
    }

    /// Like [`Aggregator::from_config`] with a caller-supplied transport
    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = SourceRegistry::from_config(config, transport)?;
        let policy = FallbackPolicy::from_config(config)?;
        Ok(Self::new(registry, policy))
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &FallbackPolicy {
        &self.policy
    }

    /// Look up `query`, returning within `global_deadline` (plus scheduling slack)
    pub async fn lookup(
        &self,
        query: Query,
        global_deadline: Duration,
    ) -> Result<LookupResult, AggregateError> {
        self.lookup_with(query, global_deadline, &PolicyOverride::None)
            .await
    }

    /// Look up with the policy's configured global deadline
    pub async fn lookup_default(&self, query: Query) -> Result<LookupResult, AggregateError> {
        self.lookup(query, self.policy.deadline()).await
    }

    /// Look up with a per-call adjustment of the adapter order
    pub async fn lookup_with(
        &self,
        query: Query,
        global_deadline: Duration,
        adjust: &PolicyOverride,
    ) -> Result<LookupResult, AggregateError> {
        let deadline = Instant::now() + global_deadline;

        if query.key().trim().is_empty() {
            return Err(AggregateError::InvalidQuery {
                reason: "search key is empty".to_string(),
            });
        }

        let plan = self.policy.plan(query.kind(), &self.registry, adjust)?;
        tracing::debug!(
            "Plan for {} query: {} [{}]",
            query.kind(),
            plan.mode,
            plan.names().join(", ")
        );

        orchestrator::run(query, plan, deadline).await
    }
}
