//! Per-source diagnostics and the lookup result.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::lookup::ExecutionMode;
use crate::models::CanonicalRecord;
use crate::sources::{SourceError, SourceErrorKind};

/// What happened to one adapter call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The adapter returned a record with `fields` populated fields
    Success { fields: usize },
    /// The adapter failed, was throttled, or was cut off by the deadline
    Failure { error: SourceError },
}

/// One entry in the diagnostics log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub source: String,
    pub outcome: Outcome,
    #[serde(rename = "latency_ms", serialize_with = "duration_ms::serialize")]
    pub latency: Duration,
    pub completed_at: DateTime<Utc>,
}

impl Diagnostic {
    pub fn success(source: &str, fields: usize, latency: Duration) -> Self {
        Self {
            source: source.to_string(),
            outcome: Outcome::Success { fields },
            latency,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(error: SourceError, latency: Duration) -> Self {
        Self {
            source: error.adapter.clone(),
            outcome: Outcome::Failure { error },
            latency,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    /// Error kind for failed calls
    pub fn error_kind(&self) -> Option<SourceErrorKind> {
        match &self.outcome {
            Outcome::Failure { error } => Some(error.kind),
            Outcome::Success { .. } => None,
        }
    }
}

/// Ordered log of adapter outcomes for one lookup.
///
/// Entries are appended in completion order and never removed or reordered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, entry: Diagnostic) {
        self.entries.push(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry recorded for `source`
    pub fn get(&self, source: &str) -> Option<&Diagnostic> {
        self.entries.iter().find(|d| d.source == source)
    }

    pub fn successes(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| !d.is_success())
    }

    /// One-line summary, e.g. `pubchem: timeout; crossref: not found (404)`
    pub fn summary(&self) -> String {
        if self.entries.is_empty() {
            return "no sources attempted".to_string();
        }

        self.entries
            .iter()
            .map(|d| match &d.outcome {
                Outcome::Success { fields } => format!("{}: ok ({} fields)", d.source, fields),
                Outcome::Failure { error } if error.detail.is_empty() => {
                    format!("{}: {}", d.source, error.kind)
                }
                Outcome::Failure { error } => {
                    format!("{}: {} ({})", d.source, error.kind, error.detail)
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Successful lookup: the merged record plus how each source fared
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LookupResult {
    pub record: CanonicalRecord,
    pub diagnostics: Diagnostics,
    pub mode: ExecutionMode,
    #[serde(rename = "elapsed_ms", serialize_with = "duration_ms::serialize")]
    pub elapsed: Duration,
}

pub(crate) mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn serialize_opt<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }
}
