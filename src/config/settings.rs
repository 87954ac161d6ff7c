//! TOML-based configuration for Tributary.
//!
//! Supports a config file (tributary.toml) with environment variable expansion
//! in the store path.
//!
//! Example configuration:
//! ```toml
//! [store]
//! path = "${HOME}/.tributary/lineage.db"
//! timeout_ms = 30000
//!
//! [parser]
//! structured = true
//! dialect = "ansi"
//! max_subquery_depth = 10
//! max_procedure_bytes = 1048576
//!
//! [traversal]
//! max_depth = 5
//! cache_enabled = true
//! cache_max_entries = 1024
//! cache_ttl_seconds = 300
//!
//! [ingest]
//! default_actor = "system"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sql::dialect::Dialect;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Unknown dialect: {0}")]
    UnknownDialect(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Lineage store configuration.
    pub store: StoreSettings,

    /// SQL and procedure parser configuration.
    pub parser: ParserSettings,

    /// Traversal configuration.
    pub traversal: TraversalSettings,

    /// Ingestion configuration.
    pub ingest: IngestSettings,
}

/// Lineage store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSettings {
    /// SQLite database path (supports ${ENV_VAR} expansion).
    ///
    /// Defaults to the platform data directory.
    pub path: Option<String>,

    /// Upper bound for a single store call, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: None,
            timeout_ms: 30_000,
        }
    }
}

impl StoreSettings {
    /// Get the store path with environment variables expanded.
    pub fn resolved_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.path
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Parser configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ParserSettings {
    /// Use the structured SQL parser; when false every statement goes
    /// through the regex fallback.
    pub structured: bool,

    /// Default dialect name (e.g. "ansi", "tsql", "plsql").
    pub dialect: String,

    /// Maximum subquery nesting followed by the structured parser.
    pub max_subquery_depth: usize,

    /// Procedure bodies larger than this are rejected.
    pub max_procedure_bytes: usize,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            structured: true,
            dialect: "ansi".to_string(),
            max_subquery_depth: crate::sql::lineage::DEFAULT_MAX_SUBQUERY_DEPTH,
            max_procedure_bytes: crate::procedure::DEFAULT_MAX_PROCEDURE_BYTES,
        }
    }
}

impl ParserSettings {
    /// Get the configured dialect.
    pub fn dialect(&self) -> Result<Dialect, SettingsError> {
        self.dialect
            .parse()
            .map_err(|_| SettingsError::UnknownDialect(self.dialect.clone()))
    }
}

/// Traversal configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TraversalSettings {
    /// Depth ceiling; may lower the built-in limit of 5 but never raise it.
    pub max_depth: u32,

    /// Enable the traversal result cache.
    pub cache_enabled: bool,

    /// Maximum cached projections.
    pub cache_max_entries: usize,

    /// Cache TTL in seconds.
    pub cache_ttl_seconds: u64,
}

impl Default for TraversalSettings {
    fn default() -> Self {
        Self {
            max_depth: 5,
            cache_enabled: true,
            cache_max_entries: 1024,
            cache_ttl_seconds: 300,
        }
    }
}

impl TraversalSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// Ingestion configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Actor recorded in audit entries when the caller supplies none.
    pub default_actor: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            default_actor: "system".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `TRIBUTARY_CONFIG`
    /// 2. `./tributary.toml`
    /// 3. `~/.config/tributary/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("TRIBUTARY_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("tributary.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("tributary").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        // Return defaults if no config file found
        Ok(Settings::default())
    }

    /// Check values that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.parser.dialect()?;

        if self.store.timeout_ms == 0 {
            return Err(SettingsError::InvalidConfig(
                "store.timeout_ms must be positive".to_string(),
            ));
        }
        if self.parser.max_subquery_depth == 0 {
            return Err(SettingsError::InvalidConfig(
                "parser.max_subquery_depth must be positive".to_string(),
            ));
        }
        if self.parser.max_procedure_bytes == 0 {
            return Err(SettingsError::InvalidConfig(
                "parser.max_procedure_bytes must be positive".to_string(),
            ));
        }
        if self.ingest.default_actor.trim().is_empty() {
            return Err(SettingsError::InvalidConfig(
                "ingest.default_actor must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let var_name: String = if chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            chars.by_ref().take_while(|&ch| ch != '}').collect()
        } else {
            // $VAR (ends at non-alphanumeric/underscore)
            let mut name = String::new();
            while let Some(&ch) = chars.peek() {
                if !(ch.is_alphanumeric() || ch == '_') {
                    break;
                }
                name.push(ch);
                chars.next();
            }
            if name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
            name
        };

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
