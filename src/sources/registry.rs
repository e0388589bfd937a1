//! Registry of adapters and their rate limiters.

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    CrossRefSource, OpenAlexSource, PaperlistSource, PubChemCompoundSource,
    PubChemPropertySource, PubTatorSource, SemanticScholarSource, SourceAdapter, SourceSettings,
};
use crate::config::{Config, ConfigError, SourceConfig};
use crate::models::QueryKind;
use crate::utils::{AcquireMode, RateLimiter, Transport};

/// Built-in adapter defaults, overridable per `[[sources]]` entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuiltinSource {
    pub name: &'static str,
    pub base_url: &'static str,
    pub priority: i32,
    pub confidence: i32,
    pub capacity: u32,
    pub refill_per_second: f64,
}

pub const BUILTIN_SOURCES: &[BuiltinSource] = &[
    BuiltinSource {
        name: "pubchem",
        base_url: "https://pubchem.ncbi.nlm.nih.gov/rest/pug",
        priority: 10,
        confidence: 5,
        capacity: 5,
        refill_per_second: 5.0,
    },
    BuiltinSource {
        name: "pubchem_rest",
        base_url: "https://pubchem.ncbi.nlm.nih.gov/rest/pug",
        priority: 20,
        confidence: 5,
        capacity: 5,
        refill_per_second: 5.0,
    },
    BuiltinSource {
        name: "semantic_scholar",
        base_url: "https://api.semanticscholar.org/graph/v1",
        priority: 10,
        confidence: 3,
        capacity: 1,
        refill_per_second: 1.0,
    },
    BuiltinSource {
        name: "openalex",
        base_url: "https://api.openalex.org",
        priority: 20,
        confidence: 2,
        capacity: 10,
        refill_per_second: 10.0,
    },
    BuiltinSource {
        name: "crossref",
        base_url: "https://api.crossref.org",
        priority: 30,
        confidence: 4,
        capacity: 5,
        refill_per_second: 5.0,
    },
    BuiltinSource {
        name: "pubtator",
        base_url: "https://www.ncbi.nlm.nih.gov/research/pubtator3-api",
        priority: 5,
        confidence: 4,
        capacity: 3,
        refill_per_second: 3.0,
    },
    BuiltinSource {
        name: "paperlist",
        base_url: "https://www.papelist.app/api",
        priority: 15,
        confidence: 2,
        capacity: 5,
        refill_per_second: 2.0,
    },
];

impl BuiltinSource {
    pub fn find(name: &str) -> Option<&'static BuiltinSource> {
        BUILTIN_SOURCES.iter().find(|b| b.name == name)
    }
}

/// An adapter paired with the limiter that guards it
#[derive(Debug, Clone)]
pub struct RegisteredSource {
    pub adapter: Arc<dyn SourceAdapter>,
    pub limiter: Arc<RateLimiter>,
}

impl RegisteredSource {
    pub fn name(&self) -> &str {
        self.adapter.name()
    }
}

/// Registry for all enabled sources.
///
/// Read-only once built; shared across concurrent lookups behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, RegisteredSource>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every enabled `[[sources]]` entry on top of a shared transport
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        let mut registry = Self::new();

        for source in config.sources.iter().filter(|s| s.enabled) {
            let adapter = build_adapter(source, Arc::clone(&transport))?;
            let limiter = build_limiter(source)?;
            registry.register(adapter, limiter)?;
        }

        tracing::debug!(
            "Registered {} sources: {}",
            registry.len(),
            registry.names().join(", ")
        );
        Ok(registry)
    }

    /// Register an adapter. Names must be unique.
    pub fn register(
        &mut self,
        adapter: Arc<dyn SourceAdapter>,
        limiter: RateLimiter,
    ) -> Result<(), ConfigError> {
        let name = adapter.name().to_string();
        if self.sources.contains_key(&name) {
            return Err(ConfigError::DuplicateSource(name));
        }
        self.sources.insert(
            name,
            RegisteredSource {
                adapter,
                limiter: Arc::new(limiter),
            },
        );
        Ok(())
    }

    /// Register with an unthrottled limiter
    pub fn register_unlimited(&mut self, adapter: Arc<dyn SourceAdapter>) -> Result<(), ConfigError> {
        let limiter = RateLimiter::unlimited(adapter.name());
        self.register(adapter, limiter)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredSource> {
        self.sources.get(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &RegisteredSource> {
        self.sources.values()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Sources able to answer `kind`, by ascending priority then name
    pub fn capable(&self, kind: QueryKind) -> Vec<&RegisteredSource> {
        let mut capable: Vec<&RegisteredSource> = self
            .all()
            .filter(|s| s.adapter.supports(kind))
            .collect();
        capable.sort_by(|a, b| {
            a.adapter
                .priority()
                .cmp(&b.adapter.priority())
                .then_with(|| a.name().cmp(b.name()))
        });
        capable
    }

    pub fn has(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

fn settings_for(config: &SourceConfig, builtin: &BuiltinSource) -> SourceSettings {
    let mut settings = SourceSettings::new(
        config.base_url.as_deref().unwrap_or(builtin.base_url),
        config.priority.unwrap_or(builtin.priority),
        config.confidence.unwrap_or(builtin.confidence),
    );
    settings.api_key = config.api_key.clone();
    settings.mailto = config.mailto.clone();
    settings
}

fn build_adapter(
    config: &SourceConfig,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn SourceAdapter>, ConfigError> {
    let builtin = BuiltinSource::find(&config.name)
        .ok_or_else(|| ConfigError::UnknownSource(config.name.clone()))?;
    let settings = settings_for(config, builtin);

    let adapter: Arc<dyn SourceAdapter> = match builtin.name {
        "pubchem" => Arc::new(PubChemCompoundSource::new(transport, settings)),
        "pubchem_rest" => Arc::new(PubChemPropertySource::new(transport, settings)),
        "semantic_scholar" => Arc::new(SemanticScholarSource::new(transport, settings)),
        "openalex" => Arc::new(OpenAlexSource::new(transport, settings)),
        "crossref" => Arc::new(CrossRefSource::new(transport, settings)),
        "pubtator" => Arc::new(PubTatorSource::new(transport, settings)),
        "paperlist" => Arc::new(PaperlistSource::new(transport, settings)),
        other => return Err(ConfigError::UnknownSource(other.to_string())),
    };
    Ok(adapter)
}

fn build_limiter(config: &SourceConfig) -> Result<RateLimiter, ConfigError> {
    let builtin = BuiltinSource::find(&config.name)
        .ok_or_else(|| ConfigError::UnknownSource(config.name.clone()))?;

    match &config.rate_limit {
        Some(limit) => RateLimiter::new(
            &config.name,
            limit.capacity,
            limit.refill_per_second,
            limit.mode,
        ),
        None => RateLimiter::new(
            &config.name,
            builtin.capacity,
            builtin.refill_per_second,
            AcquireMode::Wait,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::models::QueryKinds;
    use crate::sources::mock::{MockSource, StaticTransport};

    fn transport() -> Arc<dyn Transport> {
        Arc::new(StaticTransport::new())
    }

    #[test]
    fn test_default_config_registers_all_builtins() {
        let registry = SourceRegistry::from_config(&Config::default(), transport()).unwrap();

        assert_eq!(registry.len(), BUILTIN_SOURCES.len());
        for builtin in BUILTIN_SOURCES {
            assert!(
                registry.has(builtin.name),
                "Source '{}' should be registered",
                builtin.name
            );
        }
    }

    #[test]
    fn test_capable_orders_by_priority() {
        let registry = SourceRegistry::from_config(&Config::default(), transport()).unwrap();

        let names: Vec<&str> = registry
            .capable(QueryKind::Identifier)
            .into_iter()
            .map(RegisteredSource::name)
            .collect();
        assert_eq!(names, vec!["semantic_scholar", "openalex", "crossref"]);

        let names: Vec<&str> = registry
            .capable(QueryKind::Name)
            .into_iter()
            .map(RegisteredSource::name)
            .collect();
        assert_eq!(names, vec!["pubchem", "pubchem_rest"]);

        let names: Vec<&str> = registry
            .capable(QueryKind::AbstractText)
            .into_iter()
            .map(RegisteredSource::name)
            .collect();
        assert_eq!(
            names,
            vec!["pubtator", "semantic_scholar", "paperlist", "openalex"]
        );
    }

    #[test]
    fn test_disabled_sources_are_skipped() {
        let mut config = Config::default();
        for source in config.sources.iter_mut() {
            source.enabled = source.name == "crossref";
        }

        let registry = SourceRegistry::from_config(&config, transport()).unwrap();
        assert_eq!(registry.names(), vec!["crossref"]);
    }

    #[test]
    fn test_configured_rate_limit_is_used() {
        let mut config = Config::default();
        let crossref = config
            .sources
            .iter_mut()
            .find(|s| s.name == "crossref")
            .unwrap();
        crossref.rate_limit = Some(RateLimitConfig {
            capacity: 2,
            refill_per_second: 0.5,
            mode: AcquireMode::FailFast,
        });

        let registry = SourceRegistry::from_config(&config, transport()).unwrap();
        let limiter = &registry.get("crossref").unwrap().limiter;
        assert_eq!(limiter.capacity(), 2);
        assert_eq!(limiter.mode(), AcquireMode::FailFast);
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        let mut config = Config::default();
        config.sources.push(SourceConfig::named("scopus"));

        let err = SourceRegistry::from_config(&config, transport()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSource(name) if name == "scopus"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = SourceRegistry::new();
        registry
            .register_unlimited(Arc::new(MockSource::new("a", QueryKinds::NAME)))
            .unwrap();

        let err = registry
            .register_unlimited(Arc::new(MockSource::new("a", QueryKinds::FORMULA)))
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSource(_)));
        assert_eq!(registry.len(), 1);
    }
}
