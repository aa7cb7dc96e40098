//! Configuration management for `beads_ops`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. Environment variables
//! 2. User config (`$BDOPS_CONFIG`, else ~/.config/bdops/config.yaml)
//! 3. Defaults
//!
//! Builders (`with_*`) apply on top of the resolved value; the conformance
//! harness uses them to pin `home` and the binary per test.

pub mod routing;

use crate::error::{OpsError, Result};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Storage-directory override read by the external tool.
pub const ENV_BEADS_DIR: &str = "BEADS_DIR";
/// Home directory.
pub const ENV_HOME: &str = "HOME";
/// Path or name of the external tool.
pub const ENV_BD_BINARY: &str = "BD_BINARY";
/// Actor identity used for created-by when the caller supplies none.
pub const ENV_ACTOR: &str = "BD_ACTOR";
/// Session identifier attached to close operations.
pub const ENV_SESSION_ID: &str = "BD_SESSION_ID";
/// Write policy (`direct` or `daemon`).
pub const ENV_WRITE_MODE: &str = "BDOPS_WRITE_MODE";
/// Whether reads pass `--allow-stale`.
pub const ENV_ALLOW_STALE: &str = "BDOPS_ALLOW_STALE";
/// Explicit config file location.
pub const ENV_CONFIG_PATH: &str = "BDOPS_CONFIG";

const DEFAULT_BD_BINARY: &str = "bd";

/// How mutating invocations reach the external tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Every call passes `--no-daemon`.
    #[default]
    Direct,
    /// Writes go through the daemon; reads stay direct.
    Daemon,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Daemon => f.write_str("daemon"),
        }
    }
}

impl FromStr for WriteMode {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "direct" | "no-daemon" => Ok(Self::Direct),
            "daemon" => Ok(Self::Daemon),
            other => Err(OpsError::Config(format!(
                "write mode must be 'direct' or 'daemon', got '{other}'"
            ))),
        }
    }
}

/// Resolved configuration shared by every `Ops` implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpsConfig {
    pub bd_binary: PathBuf,
    pub actor: Option<String>,
    pub session_id: Option<String>,
    /// Isolated home directory passed to subprocesses.
    pub home: Option<PathBuf>,
    pub write_mode: WriteMode,
    pub allow_stale: bool,
    pub max_redirect_depth: usize,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            bd_binary: PathBuf::from(DEFAULT_BD_BINARY),
            actor: None,
            session_id: None,
            home: None,
            write_mode: WriteMode::Direct,
            allow_stale: true,
            max_redirect_depth: routing::DEFAULT_MAX_REDIRECT_DEPTH,
        }
    }
}

/// A flat key/value configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub values: HashMap<String, String>,
}

impl ConfigLayer {
    /// Merge another layer on top of this one (higher precedence wins).
    pub fn merge_from(&mut self, other: &Self) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Build a layer from a YAML file path. Missing files return empty config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&contents)?;
        let mut layer = Self::default();
        if let serde_yaml::Value::Mapping(map) = value {
            for (key, value) in map {
                let Some(key) = key.as_str() else { continue };
                if let Some(value) = yaml_scalar(&value) {
                    layer.values.insert(normalize_key(key), value);
                }
            }
        }
        debug!(path = %path.display(), keys = layer.values.len(), "Loaded config file");
        Ok(layer)
    }

    /// Build a layer from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut layer = Self::default();
        for (var, key) in [
            (ENV_BD_BINARY, "bd-binary"),
            (ENV_ACTOR, "actor"),
            (ENV_SESSION_ID, "session-id"),
            (ENV_WRITE_MODE, "write-mode"),
            (ENV_ALLOW_STALE, "allow-stale"),
        ] {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                layer.values.insert(key.to_string(), value);
            }
        }
        layer
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace('_', "-")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Location of the user config file.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(ENV_CONFIG_PATH) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    env::var(ENV_HOME).ok().map(|home| {
        Path::new(&home)
            .join(".config")
            .join("bdops")
            .join("config.yaml")
    })
}

impl OpsConfig {
    /// Resolve configuration from the user config file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file is malformed or a value is invalid.
    pub fn load() -> Result<Self> {
        let mut merged = ConfigLayer::default();
        if let Some(path) = user_config_path() {
            merged.merge_from(&ConfigLayer::from_yaml(&path)?);
        }
        merged.merge_from(&ConfigLayer::from_env());
        Self::from_layer(&merged)
    }

    /// Configuration from the environment only; invalid values fall back to
    /// defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_layer(&ConfigLayer::from_env()).unwrap_or_default()
    }

    /// Build a config from a merged layer.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed.
    pub fn from_layer(layer: &ConfigLayer) -> Result<Self> {
        let mut config = Self::default();
        if let Some(binary) = layer.get("bd-binary") {
            config.bd_binary = PathBuf::from(binary);
        }
        config.actor = layer.get("actor").map(str::to_string);
        config.session_id = layer.get("session-id").map(str::to_string);
        if let Some(home) = layer.get("home") {
            config.home = Some(PathBuf::from(home));
        }
        if let Some(mode) = layer.get("write-mode") {
            config.write_mode = mode.parse()?;
        }
        if let Some(value) = layer.get("allow-stale") {
            config.allow_stale = parse_bool(value).ok_or_else(|| {
                OpsError::Config(format!("allow-stale must be a boolean, got '{value}'"))
            })?;
        }
        if let Some(value) = layer.get("max-redirect-depth") {
            config.max_redirect_depth = value.parse().map_err(|_| {
                OpsError::Config(format!("max-redirect-depth must be a number, got '{value}'"))
            })?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    #[must_use]
    pub fn with_bd_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.bd_binary = binary.into();
        self
    }

    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub const fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = OpsConfig::default();
        assert_eq!(config.bd_binary, PathBuf::from("bd"));
        assert_eq!(config.write_mode, WriteMode::Direct);
        assert!(config.allow_stale);
        assert_eq!(config.max_redirect_depth, 10);
    }

    #[test]
    fn env_layer_reads_known_vars() {
        let vars: HashMap<&str, &str> = [
            (ENV_ACTOR, "mayor"),
            (ENV_SESSION_ID, "sess-42"),
            (ENV_WRITE_MODE, "daemon"),
            (ENV_ALLOW_STALE, "no"),
            (ENV_BD_BINARY, "  "),
        ]
        .into_iter()
        .collect();
        let layer = ConfigLayer::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()));
        let config = OpsConfig::from_layer(&layer).unwrap();
        assert_eq!(config.actor.as_deref(), Some("mayor"));
        assert_eq!(config.session_id.as_deref(), Some("sess-42"));
        assert_eq!(config.write_mode, WriteMode::Daemon);
        assert!(!config.allow_stale);
        assert_eq!(config.bd_binary, PathBuf::from("bd"));
    }

    #[test]
    fn yaml_layer_and_precedence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "bd_binary: /opt/bd\nactor: witness\nmax-redirect-depth: 4\nallow_stale: false\n",
        )
        .unwrap();

        let mut merged = ConfigLayer::from_yaml(&path).unwrap();
        let mut env_layer = ConfigLayer::default();
        env_layer
            .values
            .insert("actor".to_string(), "refinery".to_string());
        merged.merge_from(&env_layer);

        let config = OpsConfig::from_layer(&merged).unwrap();
        assert_eq!(config.bd_binary, PathBuf::from("/opt/bd"));
        assert_eq!(config.actor.as_deref(), Some("refinery"));
        assert_eq!(config.max_redirect_depth, 4);
        assert!(!config.allow_stale);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let mut layer = ConfigLayer::default();
        layer
            .values
            .insert("write-mode".to_string(), "sometimes".to_string());
        assert!(matches!(
            OpsConfig::from_layer(&layer),
            Err(OpsError::Config(_))
        ));
    }

    #[test]
    fn missing_yaml_is_empty() {
        let dir = TempDir::new().unwrap();
        let layer = ConfigLayer::from_yaml(&dir.path().join("nope.yaml")).unwrap();
        assert!(layer.values.is_empty());
    }
}
