use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub tiers: TierModels,
    #[serde(default)]
    pub mappings: MappingsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Env var holding an API key. When unset or empty, inbound credentials are forwarded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_anthropic_version")]
    pub anthropic_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Outbound identifiers for each tier the model mapper can classify into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierModels {
    #[serde(default = "default_high_model")]
    pub high: String,
    #[serde(default = "default_default_model")]
    pub default: String,
    #[serde(default = "default_low_model")]
    pub low: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingsConfig {
    #[serde(default = "default_mappings_file")]
    pub file: PathBuf,
    #[serde(default)]
    pub reload: ReloadMode,
    #[serde(default = "default_override_env")]
    pub override_env: String,
}

/// When the custom mappings file is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadMode {
    /// Re-read on every resolution so edits take effect immediately.
    #[default]
    PerRequest,
    /// Read once when the router starts.
    Startup,
}

impl ReloadMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerRequest => "per_request",
            Self::Startup => "startup",
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_anthropic_version() -> String {
    "2023-06-01".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_high_model() -> String {
    "claude-opus-4-5".to_string()
}

fn default_default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_low_model() -> String {
    "claude-haiku-4-5".to_string()
}

fn default_mappings_file() -> PathBuf {
    PathBuf::from(".router-mappings.json")
}

fn default_override_env() -> String {
    "ANTHROPIC_DEFAULT_MODEL".to_string()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            upstream: UpstreamConfig::default(),
            tiers: TierModels::default(),
            mappings: MappingsConfig::default(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: None,
            anthropic_version: default_anthropic_version(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for TierModels {
    fn default() -> Self {
        Self {
            high: default_high_model(),
            default: default_default_model(),
            low: default_low_model(),
        }
    }
}

impl Default for MappingsConfig {
    fn default() -> Self {
        Self {
            file: default_mappings_file(),
            reload: ReloadMode::default(),
            override_env: default_override_env(),
        }
    }
}

impl RouterConfig {
    /// Load config from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Reject settings that would only fail later, on the first request.
    pub fn validate(&self) -> Result<()> {
        let base_url = &self.upstream.base_url;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ProxyError::config(format!(
                "upstream.base_url must be an http(s) URL, got '{}'",
                base_url
            )));
        }

        for (name, model) in [
            ("high", &self.tiers.high),
            ("default", &self.tiers.default),
            ("low", &self.tiers.low),
        ] {
            if model.trim().is_empty() {
                return Err(ProxyError::config(format!("tiers.{} must not be empty", name)));
            }
        }

        if self.upstream.timeout_secs == 0 {
            return Err(ProxyError::config("upstream.timeout_secs must be positive"));
        }

        Ok(())
    }

    /// The upstream API key, if an env var is configured and holds a value.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.upstream
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty())
    }

    /// Read the process-wide default model override. Empty values count as unset.
    pub fn resolve_model_override(&self) -> Option<String> {
        std::env::var(&self.mappings.override_env)
            .ok()
            .filter(|value| !value.is_empty())
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("max-router.toml"));

    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("max-router")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("max-router").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("max-router").join("config.toml"));
        }
    }

    if let Some(home) = dirs_path() {
        paths.push(home.join(".max-router.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
