//! Configuration module for Tributary.
//!
//! Handles the TOML settings file and environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, IngestSettings, ParserSettings, Settings, SettingsError, StoreSettings,
    TraversalSettings,
};
