//! Configuration management

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::loop_impl::DEFAULT_MAX_ROUNDS;
use crate::agent::profiles::{
    default_temperature, default_timeout_secs, ModelProfile, LEGACY_PROFILE_ID,
};
use crate::error::Error;
use crate::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Selectable model backends
    #[serde(default)]
    pub profiles: Vec<ModelProfile>,

    /// Profile used when a session selects none (or an invalid one)
    #[serde(default = "default_profile_id")]
    pub default_profile: String,

    /// Maximum decide/execute rounds per turn
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Prior turns loaded into each transcript
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Capacity of each turn's event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// MCP tool servers by group name
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

/// One MCP server endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub url: String,

    #[serde(default = "default_server_timeout")]
    pub timeout_secs: u64,
}

fn default_profile_id() -> String {
    LEGACY_PROFILE_ID.to_string()
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}

fn default_history_limit() -> usize {
    10
}

fn default_event_buffer() -> usize {
    64
}

fn default_server_timeout() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profiles: Vec::new(),
            default_profile: default_profile_id(),
            max_rounds: default_max_rounds(),
            history_limit: default_history_limit(),
            event_buffer: default_event_buffer(),
            servers: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Build a configuration from environment variables alone.
    pub fn from_env_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::default().with_env_overlay(lookup)
    }

    /// Overlay environment settings onto this configuration.
    ///
    /// - `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `OPENAI_MODEL` (or
    ///   `OPENAI_MODEL_NAME`), `OPENAI_TEMPERATURE`, `OPENAI_TIMEOUT` and
    ///   `LLM_DEFAULT_LABEL` describe the legacy `default` profile.
    /// - `LLM_PROFILES=a,b` adds profiles read from `LLM_<ID>_*`; one
    ///   without both `API_KEY` and `MODEL` is skipped.
    /// - `LLM_DEFAULT` picks the default profile, `LLM_MAX_ROUNDS` the
    ///   round limit.
    ///
    /// Environment profiles replace file profiles with the same id.
    pub fn with_env_overlay<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let base_temperature = get("OPENAI_TEMPERATURE");
        let base_timeout = get("OPENAI_TIMEOUT");
        let legacy_key = get("OPENAI_API_KEY");

        if legacy_key.is_some() || self.profiles.is_empty() {
            let legacy = ModelProfile {
                id: LEGACY_PROFILE_ID.to_string(),
                label: get("LLM_DEFAULT_LABEL").unwrap_or_else(|| "Default".to_string()),
                api_key: legacy_key.unwrap_or_default(),
                endpoint: get("OPENAI_BASE_URL").unwrap_or_default(),
                model_name: get("OPENAI_MODEL")
                    .or_else(|| get("OPENAI_MODEL_NAME"))
                    .unwrap_or_else(|| "deepseek-chat".to_string()),
                temperature: parse_or(base_temperature.as_deref(), default_temperature()),
                timeout_secs: parse_or(base_timeout.as_deref(), default_timeout_secs()),
            };
            self.upsert_profile(legacy);
        }

        let ids = get("LLM_PROFILES").unwrap_or_default();
        for id in ids.split(',').map(str::trim).filter(|id| !id.is_empty()) {
            let var = |suffix: &str| get(&format!("LLM_{}_{}", id.to_uppercase(), suffix));

            let (Some(api_key), Some(model_name)) = (var("API_KEY"), var("MODEL")) else {
                debug!("Skipping profile '{}': missing API key or model", id);
                continue;
            };
            let temperature = var("TEMPERATURE").or_else(|| base_temperature.clone());
            let timeout = var("TIMEOUT").or_else(|| base_timeout.clone());

            self.upsert_profile(ModelProfile {
                id: id.to_string(),
                label: var("LABEL").unwrap_or_else(|| id.to_string()),
                api_key,
                endpoint: var("BASE_URL").unwrap_or_default(),
                model_name,
                temperature: parse_or(temperature.as_deref(), default_temperature()),
                timeout_secs: parse_or(timeout.as_deref(), default_timeout_secs()),
            });
        }

        if let Some(default_id) = get("LLM_DEFAULT") {
            self.default_profile = if self.profiles.iter().any(|p| p.id == default_id) {
                default_id
            } else {
                LEGACY_PROFILE_ID.to_string()
            };
        }

        if let Some(rounds) = get("LLM_MAX_ROUNDS").and_then(|v| v.parse().ok()) {
            self.max_rounds = rounds;
        }

        self
    }

    fn upsert_profile(&mut self, profile: ModelProfile) {
        match self.profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(Error::Configuration(
                "max_rounds must be at least 1".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(Error::Configuration(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        if let Some((name, _)) = self.servers.iter().find(|(_, s)| s.url.trim().is_empty()) {
            return Err(Error::Configuration(format!(
                "server '{name}' has no url"
            )));
        }
        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<&str>, fallback: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(fallback)
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolrelay")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from a file
pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(Error::Configuration(format!(
            "Config not found at {:?}. Run 'toolrelay init' first.",
            path
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}

/// Load the file configuration if present, then overlay the environment.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let default_path = config_path();
    let path = path.unwrap_or(&default_path);

    let config = if path.exists() {
        load_from(path)?
    } else {
        debug!("No config file at {:?}, using environment only", path);
        Config::default()
    };

    let config = config.with_env_overlay(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_to(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// A starter configuration for `toolrelay init`.
pub fn template() -> Config {
    let mut config = Config::default();
    config.profiles.push(ModelProfile {
        label: "DeepSeek Chat".to_string(),
        endpoint: "https://api.deepseek.com/v1".to_string(),
        ..ModelProfile::new(LEGACY_PROFILE_ID, "", "deepseek-chat")
    });
    config.servers.insert(
        "local".to_string(),
        ServerConfig {
            url: "http://127.0.0.1:8000/mcp".to_string(),
            timeout_secs: default_server_timeout(),
        },
    );
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.default_profile, "default");
        assert_eq!(config.max_rounds, 25);
        assert_eq!(config.history_limit, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: Config = serde_json::from_str(r#"{"servers":{"web":{"url":"http://x/mcp"}}}"#).unwrap();
        assert_eq!(config.event_buffer, 64);
        assert_eq!(config.servers["web"].timeout_secs, 60);
    }

    #[test]
    fn test_legacy_profile_from_openai_vars() {
        let config = Config::from_env_lookup(env(&[
            ("OPENAI_API_KEY", " sk-1 "),
            ("OPENAI_BASE_URL", "https://api.deepseek.com"),
            ("OPENAI_TEMPERATURE", "0.7"),
            ("OPENAI_TIMEOUT", "not-a-number"),
        ]));

        let legacy = &config.profiles[0];
        assert_eq!(legacy.id, "default");
        assert_eq!(legacy.label, "Default");
        assert_eq!(legacy.api_key, "sk-1");
        assert_eq!(legacy.model_name, "deepseek-chat");
        assert_eq!(legacy.temperature, 0.7);
        assert_eq!(legacy.timeout_secs, 60);
    }

    #[test]
    fn test_named_profiles_and_default() {
        let config = Config::from_env_lookup(env(&[
            ("OPENAI_TEMPERATURE", "0.5"),
            ("LLM_PROFILES", "fast, smart,broken"),
            ("LLM_FAST_API_KEY", "k1"),
            ("LLM_FAST_MODEL", "deepseek-chat"),
            ("LLM_FAST_LABEL", "Fast"),
            ("LLM_SMART_API_KEY", "k2"),
            ("LLM_SMART_MODEL", "deepseek-reasoner"),
            ("LLM_SMART_TIMEOUT", "120"),
            ("LLM_BROKEN_API_KEY", "k3"),
            ("LLM_DEFAULT", "smart"),
            ("LLM_MAX_ROUNDS", "8"),
        ]));

        let ids: Vec<&str> = config.profiles.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["default", "fast", "smart"]);
        assert_eq!(config.profiles[1].label, "Fast");
        assert_eq!(config.profiles[1].temperature, 0.5);
        assert_eq!(config.profiles[2].label, "smart");
        assert_eq!(config.profiles[2].timeout_secs, 120);
        assert_eq!(config.default_profile, "smart");
        assert_eq!(config.max_rounds, 8);
    }

    #[test]
    fn test_unknown_default_falls_back_to_legacy() {
        let config = Config::from_env_lookup(env(&[("LLM_DEFAULT", "ghost")]));
        assert_eq!(config.default_profile, "default");
    }

    #[test]
    fn test_env_overrides_file_profile_with_same_id() {
        let mut file = Config::default();
        file.profiles.push(ModelProfile::new("fast", "old", "old-model"));

        let config = file.with_env_overlay(env(&[
            ("LLM_PROFILES", "fast"),
            ("LLM_FAST_API_KEY", "new"),
            ("LLM_FAST_MODEL", "new-model"),
        ]));
        assert_eq!(config.profiles.len(), 1);
        assert_eq!(config.profiles[0].api_key, "new");
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = Config {
            max_rounds: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = Config {
            event_buffer: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        save_to(&path, &template()).unwrap();
        let loaded = load_from(&path).unwrap();

        assert_eq!(loaded.profiles[0].model_name, "deepseek-chat");
        assert_eq!(loaded.servers["local"].url, "http://127.0.0.1:8000/mcp");
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("toolrelay init"));
    }
}
