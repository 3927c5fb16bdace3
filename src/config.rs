//! Configuration file parser for ~/.config/almanac/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::content::ExtractorSettings;
use crate::online::AggregatorSettings;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Whether questions may trigger feed ingestion.
    pub online_enabled: bool,

    /// Pages ingested per question.
    pub max_results: usize,

    /// Per-request timeout for feeds and pages.
    pub timeout_seconds: u64,

    /// Minimum delay between two requests to the same host.
    pub fetch_delay_ms: u64,

    pub max_concurrent_fetches: usize,

    /// Vault size above which old items are evicted.
    pub cache_size_limit_mb: u64,

    /// Only items older than this are eligible for eviction.
    pub prune_age_days: u32,

    /// Word cap on stored article text.
    pub max_words: usize,

    pub snippet_chars: usize,
    pub max_quote_length: usize,
    pub quote_context_words: usize,

    /// HEAD target used to detect connectivity. Unset means assume online.
    pub probe_url: Option<String>,

    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        let aggregator = AggregatorSettings::default();
        let extractor = ExtractorSettings::default();
        Self {
            online_enabled: aggregator.enabled,
            max_results: aggregator.max_results,
            timeout_seconds: aggregator.fetch_timeout.as_secs(),
            fetch_delay_ms: aggregator.per_host_interval.as_millis() as u64,
            max_concurrent_fetches: aggregator.max_concurrent_fetches,
            cache_size_limit_mb: aggregator.cache_size_limit_mb,
            prune_age_days: aggregator.prune_age_days,
            max_words: extractor.max_words,
            snippet_chars: extractor.snippet_chars,
            max_quote_length: extractor.max_quote_length,
            quote_context_words: extractor.quote_context_words,
            probe_url: None,
            user_agent: format!("almanac/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

const KNOWN_KEYS: &[&str] = &[
    "online_enabled",
    "max_results",
    "timeout_seconds",
    "fetch_delay_ms",
    "max_concurrent_fetches",
    "cache_size_limit_mb",
    "prune_age_days",
    "max_words",
    "snippet_chars",
    "max_quote_length",
    "quote_context_words",
    "probe_url",
    "user_agent",
];

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check size before reading.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            online = config.online_enabled,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn aggregator_settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            enabled: self.online_enabled,
            max_results: self.max_results,
            fetch_timeout: Duration::from_secs(self.timeout_seconds),
            per_host_interval: Duration::from_millis(self.fetch_delay_ms),
            max_concurrent_fetches: self.max_concurrent_fetches.max(1),
            cache_size_limit_mb: self.cache_size_limit_mb,
            prune_age_days: self.prune_age_days,
        }
    }

    pub fn extractor_settings(&self) -> ExtractorSettings {
        ExtractorSettings {
            max_words: self.max_words,
            snippet_chars: self.snippet_chars,
            max_quote_length: self.max_quote_length,
            quote_context_words: self.quote_context_words,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("almanac_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_matches_component_defaults() {
        let config = Config::default();
        assert_eq!(config.aggregator_settings(), AggregatorSettings::default());
        assert_eq!(config.extractor_settings(), ExtractorSettings::default());
        assert!(config.probe_url.is_none());
        assert!(config.user_agent.starts_with("almanac/"));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/almanac_test_nonexistent_config.toml");
        assert_eq!(Config::load(path).unwrap(), Config::default());
    }

    #[test]
    fn test_empty_and_whitespace_files_return_default() {
        for (name, content) in [("empty", ""), ("whitespace", "   \n  \n  ")] {
            let path = write_config(name, content);
            assert_eq!(Config::load(&path).unwrap(), Config::default());
            cleanup(&path);
        }
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let path = write_config("partial", "max_results = 3\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_results, 3);
        assert!(config.online_enabled);
        assert_eq!(config.timeout_seconds, 30);

        cleanup(&path);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
online_enabled = false
max_results = 5
timeout_seconds = 10
fetch_delay_ms = 500
max_concurrent_fetches = 2
cache_size_limit_mb = 50
prune_age_days = 7
max_words = 1000
snippet_chars = 300
max_quote_length = 150
quote_context_words = 5
probe_url = "https://example.com/"
user_agent = "test-agent"
"#;
        let path = write_config("full", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.aggregator_settings(),
            AggregatorSettings {
                enabled: false,
                max_results: 5,
                fetch_timeout: Duration::from_secs(10),
                per_host_interval: Duration::from_millis(500),
                max_concurrent_fetches: 2,
                cache_size_limit_mb: 50,
                prune_age_days: 7,
            }
        );
        assert_eq!(
            config.extractor_settings(),
            ExtractorSettings {
                max_words: 1000,
                snippet_chars: 300,
                max_quote_length: 150,
                quote_context_words: 5,
            }
        );
        assert_eq!(config.probe_url.as_deref(), Some("https://example.com/"));
        assert_eq!(config.user_agent, "test-agent");

        cleanup(&path);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let config = Config {
            max_concurrent_fetches: 0,
            ..Config::default()
        };
        assert_eq!(config.aggregator_settings().max_concurrent_fetches, 1);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("invalid", "this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        cleanup(&path);
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let path = write_config("unknown", "max_results = 4\ntotally_fake_key = \"x\"\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_results, 4);

        cleanup(&path);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let path = write_config("wrongtype", "max_results = \"ten\"\n");
        assert!(Config::load(&path).is_err());
        cleanup(&path);
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        cleanup(&path);
    }
}
