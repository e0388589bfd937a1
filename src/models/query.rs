//! Lookup query model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// What the query key denotes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Compound name (e.g. "aspirin")
    Name,
    /// Molecular formula (e.g. "C9H8O4")
    Formula,
    /// SMILES string
    Smiles,
    /// Free text matched against paper abstracts
    AbstractText,
    /// External identifier such as a DOI
    Identifier,
}

impl QueryKind {
    /// Every kind, in declaration order
    pub const ALL: [QueryKind; 5] = [
        QueryKind::Name,
        QueryKind::Formula,
        QueryKind::Smiles,
        QueryKind::AbstractText,
        QueryKind::Identifier,
    ];

    /// Wire/config name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Name => "name",
            QueryKind::Formula => "formula",
            QueryKind::Smiles => "smiles",
            QueryKind::AbstractText => "abstract_text",
            QueryKind::Identifier => "identifier",
        }
    }

    /// The capability flag matching this kind
    pub fn flag(self) -> QueryKinds {
        match self {
            QueryKind::Name => QueryKinds::NAME,
            QueryKind::Formula => QueryKinds::FORMULA,
            QueryKind::Smiles => QueryKinds::SMILES,
            QueryKind::AbstractText => QueryKinds::ABSTRACT_TEXT,
            QueryKind::Identifier => QueryKinds::IDENTIFIER,
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(QueryKind::Name),
            "formula" => Ok(QueryKind::Formula),
            "smiles" => Ok(QueryKind::Smiles),
            "abstract" | "abstract_text" | "abstract-text" => Ok(QueryKind::AbstractText),
            "identifier" | "id" | "doi" => Ok(QueryKind::Identifier),
            other => Err(format!(
                "unknown query kind '{}' (expected name, formula, smiles, abstract_text or identifier)",
                other
            )),
        }
    }
}

bitflags::bitflags! {
    /// Set of query kinds an adapter can answer
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueryKinds: u32 {
        const NAME = 1 << 0;
        const FORMULA = 1 << 1;
        const SMILES = 1 << 2;
        const ABSTRACT_TEXT = 1 << 3;
        const IDENTIFIER = 1 << 4;

        const CHEMISTRY = Self::NAME.bits() | Self::FORMULA.bits() | Self::SMILES.bits();
    }
}

impl QueryKinds {
    /// Whether `kind` is part of this set
    pub fn supports(self, kind: QueryKind) -> bool {
        self.contains(kind.flag())
    }

    /// Expand the set into its kinds, in declaration order
    pub fn kinds(self) -> Vec<QueryKind> {
        QueryKind::ALL
            .into_iter()
            .filter(|kind| self.supports(*kind))
            .collect()
    }
}

/// A lookup request.
///
/// Built once through [`Query::new`] and [`Query::with_option`]; there are no
/// mutating accessors, so a query handed to the aggregator never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    key: String,
    kind: QueryKind,
    #[serde(default)]
    options: BTreeMap<String, String>,
}

impl Query {
    pub fn new(key: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            key: key.into(),
            kind,
            options: BTreeMap::new(),
        }
    }

    /// Attach an adapter option (e.g. `max_synonyms`)
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    /// Parse an option, falling back to `default` when absent or malformed
    pub fn option_or<T: FromStr>(&self, name: &str, default: T) -> T {
        self.option(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("NAME".parse::<QueryKind>().unwrap(), QueryKind::Name);
        assert_eq!("abstract".parse::<QueryKind>().unwrap(), QueryKind::AbstractText);
        assert_eq!("doi".parse::<QueryKind>().unwrap(), QueryKind::Identifier);
        assert!("isbn".parse::<QueryKind>().is_err());
    }

    #[test]
    fn test_capability_set() {
        let caps = QueryKinds::CHEMISTRY;
        assert!(caps.supports(QueryKind::Smiles));
        assert!(!caps.supports(QueryKind::Identifier));
        assert_eq!(
            caps.kinds(),
            vec![QueryKind::Name, QueryKind::Formula, QueryKind::Smiles]
        );
    }

    #[test]
    fn test_query_options() {
        let query = Query::new("aspirin", QueryKind::Name)
            .with_option("max_synonyms", "3")
            .with_option("bogus", "x");

        assert_eq!(query.key(), "aspirin");
        assert_eq!(query.option_or("max_synonyms", 10usize), 3);
        assert_eq!(query.option_or("bogus", 7usize), 7);
        assert_eq!(query.option_or("missing", 10usize), 10);
    }
}
