//! Configuration file support for lookup-master.
//!
//! # Configuration File Format
//!
//! ```toml
//! [lookup]
//! global_deadline_ms = 15000
//!
//! [http]
//! user_agent = "lookup-master/0.1.0"
//! connect_timeout_ms = 10000
//! pool_idle_timeout_secs = 90
//!
//! [logging]
//! level = "warn"
//!
//! [[sources]]
//! name = "semantic_scholar"
//! api_key = "your-api-key"
//!
//! [sources.rate_limit]
//! capacity = 1
//! refill_per_second = 1.0
//! mode = "fail_fast"
//!
//! [[sources]]
//! name = "openalex"
//! mailto = "you@example.org"
//!
//! [[policies]]
//! kind = "identifier"
//! mode = "sequential"
//! sources = ["semantic_scholar", "openalex"]
//! ```
//!
//! Listing `[[sources]]` replaces the built-in list, so only the named
//! adapters are built.

use std::path::{Path, PathBuf};

use super::{load_config, Config, ConfigError};

const LOCAL_CONFIG: &str = "lookup-master.toml";

/// Platform config location, e.g. `~/.config/lookup-master/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lookup-master").join("config.toml"))
}

/// Resolve the config file: explicit path, then `./lookup-master.toml`, then
/// the platform config dir. An explicit path is returned even if missing so
/// the load reports it.
pub fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let local = PathBuf::from(LOCAL_CONFIG);
    if local.is_file() {
        return Some(local);
    }

    default_config_path().filter(|path| path.is_file())
}

/// Load the resolved config file, or defaults when there is none
pub fn load_or_default(explicit: Option<&Path>) -> Result<(Config, Option<PathBuf>), ConfigError> {
    match find_config_file(explicit) {
        Some(path) => {
            tracing::debug!("Loading configuration from {}", path.display());
            let config = load_config(&path)?;
            Ok((config, Some(path)))
        }
        None => {
            tracing::debug!("No configuration file found, using defaults");
            Ok((Config::default(), None))
        }
    }
}

/// Write `config` as TOML, creating parent directories
pub fn save_config(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::ExecutionMode;
    use crate::models::QueryKind;
    use crate::utils::AcquireMode;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let toml_content = r#"
[lookup]
global_deadline_ms = 5000

[logging]
level = "debug"

[[sources]]
name = "semantic_scholar"
api_key = "test-key"

[sources.rate_limit]
capacity = 2
refill_per_second = 0.5
mode = "fail_fast"

[[sources]]
name = "crossref"
mailto = "lab@example.org"
priority = 1

[[policies]]
kind = "identifier"
mode = "parallel"
sources = ["crossref", "semantic_scholar"]
"#;

        let mut file = File::create(&path).unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = load_config(&path).unwrap();

        assert_eq!(config.lookup.global_deadline_ms, 5000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.sources.len(), 2);

        let semantic = config.source("semantic_scholar").unwrap();
        assert_eq!(semantic.api_key.as_deref(), Some("test-key"));
        let limit = semantic.rate_limit.as_ref().unwrap();
        assert_eq!(limit.capacity, 2);
        assert_eq!(limit.mode, AcquireMode::FailFast);

        assert_eq!(config.source("crossref").unwrap().priority, Some(1));
        assert_eq!(config.policies.len(), 1);
        assert_eq!(config.policies[0].kind, QueryKind::Identifier);
        assert_eq!(config.policies[0].mode, ExecutionMode::Parallel);
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.toml");
        std::fs::write(&path, "").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.lookup.global_deadline_ms = 2500;
        config.sources[0].api_key = Some("saved-key".to_string());

        save_config(&config, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_file_nonexistent() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_file_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("invalid.toml");

        std::fs::write(&path, "invalid = toml = content").unwrap();

        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_unknown_source_in_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unknown.toml");
        std::fs::write(&path, "[[sources]]\nname = \"scopus\"\n").unwrap();

        assert!(matches!(
            load_config(&path),
            Err(ConfigError::UnknownSource(name)) if name == "scopus"
        ));
    }

    #[test]
    fn test_explicit_path_wins() {
        let explicit = PathBuf::from("/some/where.toml");
        assert_eq!(find_config_file(Some(&explicit)), Some(explicit));
    }
}
