//! Fallback policy: which adapters answer a query kind, in which order, and
//! whether they run one after another or all at once.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::AggregateError;
use crate::config::{Config, ConfigError, PolicyConfig};
use crate::models::QueryKind;
use crate::sources::{RegisteredSource, SourceRegistry};

/// How the orchestrator runs a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Strictly in order; the first success ends the lookup
    #[default]
    Sequential,
    /// All at once; every success is merged
    Parallel,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Parallel => "parallel",
        })
    }
}

/// Caller-side adjustment of the configured order for one lookup.
///
/// The execution mode is never changed by an override.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PolicyOverride {
    #[default]
    None,
    /// Move these adapters to the front, in this order; the rest keep theirs
    Prefer(Vec<String>),
    /// Use only these adapters, in this order
    Only(Vec<String>),
}

/// Configured order for one query kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindPolicy {
    pub mode: ExecutionMode,
    pub order: Vec<String>,
}

/// Resolved adapters for one lookup
#[derive(Debug, Clone)]
pub struct Plan {
    pub mode: ExecutionMode,
    pub sources: Vec<RegisteredSource>,
}

impl Plan {
    pub fn names(&self) -> Vec<&str> {
        self.sources.iter().map(RegisteredSource::name).collect()
    }
}

/// Per-kind ordering plus the default global deadline. Read-only during lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPolicy {
    kinds: BTreeMap<QueryKind, KindPolicy>,
    deadline: Duration,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

impl FallbackPolicy {
    /// A policy with no per-kind entries: every kind uses its capable adapters by priority
    pub fn new(deadline: Duration) -> Self {
        Self {
            kinds: BTreeMap::new(),
            deadline,
        }
    }

    /// Set the order for `kind`. Names must not repeat.
    pub fn with_kind(
        mut self,
        kind: QueryKind,
        mode: ExecutionMode,
        order: &[&str],
    ) -> Result<Self, ConfigError> {
        let order: Vec<String> = order.iter().map(|s| s.to_string()).collect();
        self.insert(kind, mode, order)?;
        Ok(self)
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut policy = Self::new(config.lookup.global_deadline());
        for PolicyConfig { kind, mode, sources } in &config.policies {
            policy.insert(*kind, *mode, sources.clone())?;
        }
        Ok(policy)
    }

    fn insert(
        &mut self,
        kind: QueryKind,
        mode: ExecutionMode,
        order: Vec<String>,
    ) -> Result<(), ConfigError> {
        for (i, name) in order.iter().enumerate() {
            if order[..i].contains(name) {
                return Err(ConfigError::InvalidPolicy(format!(
                    "'{}' listed twice in the {} policy",
                    name, kind
                )));
            }
        }
        if self.kinds.insert(kind, KindPolicy { mode, order }).is_some() {
            return Err(ConfigError::InvalidPolicy(format!(
                "more than one policy for kind '{}'",
                kind
            )));
        }
        Ok(())
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn kind(&self, kind: QueryKind) -> Option<&KindPolicy> {
        self.kinds.get(&kind)
    }

    /// Resolve the adapters for `kind` against the registry.
    ///
    /// Names that are not registered or cannot answer `kind` are skipped.
    /// An empty result is `InvalidQuery`.
    pub fn plan(
        &self,
        kind: QueryKind,
        registry: &SourceRegistry,
        adjust: &PolicyOverride,
    ) -> Result<Plan, AggregateError> {
        let (mode, configured): (ExecutionMode, Vec<&RegisteredSource>) = match self.kinds.get(&kind) {
            Some(policy) => (policy.mode, resolve(kind, &policy.order, registry)),
            None => (ExecutionMode::Sequential, registry.capable(kind)),
        };

        let sources: Vec<RegisteredSource> = match adjust {
            PolicyOverride::None => configured.into_iter().cloned().collect(),
            PolicyOverride::Only(names) => resolve(kind, names, registry)
                .into_iter()
                .cloned()
                .collect(),
            PolicyOverride::Prefer(names) => {
                let front = resolve(kind, names, registry);
                let rest: Vec<&RegisteredSource> = configured
                    .into_iter()
                    .filter(|s| !front.iter().any(|f| f.name() == s.name()))
                    .collect();
                front.into_iter().chain(rest).cloned().collect()
            }
        };

        if sources.is_empty() {
            return Err(AggregateError::InvalidQuery {
                reason: format!("no configured source can answer '{}' queries", kind),
            });
        }

        Ok(Plan { mode, sources })
    }
}

/// Look up `names` in order, dropping unknown, incapable and repeated entries
fn resolve<'r>(
    kind: QueryKind,
    names: &[String],
    registry: &'r SourceRegistry,
) -> Vec<&'r RegisteredSource> {
    let mut resolved: Vec<&RegisteredSource> = Vec::with_capacity(names.len());
    for name in names {
        match registry.get(name) {
            Some(source) if !source.adapter.supports(kind) => {
                tracing::warn!("Source '{}' cannot answer {} queries, skipping", name, kind);
            }
            Some(source) => {
                if !resolved.iter().any(|r| r.name() == name) {
                    resolved.push(source);
                }
            }
            None => tracing::warn!("Source '{}' is not registered, skipping", name),
        }
    }
    resolved
}
