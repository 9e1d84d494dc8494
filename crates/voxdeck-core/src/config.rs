//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default realtime API base used for the SDP exchange.
pub const DEFAULT_REALTIME_BASE_URL: &str = "https://api.openai.com/v1/realtime";

/// Default realtime model id.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2025-06-03";

/// Top-level VoxDeck configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime: Option<RealtimeConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Realtime session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Backend endpoint that mints ephemeral session credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_url: Option<String>,

    /// Base URL for the realtime SDP exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Realtime model id, appended as `?model=` to the exchange URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Default voice selector passed to the credential endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Direct API key fallback when no session endpoint is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// STUN servers for ICE (empty means host candidates only).
    #[serde(default)]
    pub stun_servers: Vec<String>,
}

impl RealtimeConfig {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_REALTIME_BASE_URL)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_REALTIME_MODEL)
    }

    /// Resolve the direct API key: `api_key` field first, then `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Audio capture and level-meter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Input device name substring (default device when unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,

    /// Level-meter sensitivity threshold (default 0.08).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<f32>,

    /// Level-meter smoothing factor (default 0.85).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "voxdeck_realtime=debug").
    #[serde(default)]
    pub filters: Vec<String>,
}

fn default_log_format() -> String {
    "plain".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::VoxDeckError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::VoxDeckError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location: `~/.voxdeck/voxdeck.json`
    pub fn default_path() -> PathBuf {
        data_dir().join("voxdeck.json")
    }

    pub fn realtime(&self) -> RealtimeConfig {
        self.realtime.clone().unwrap_or_default()
    }

    pub fn audio(&self) -> AudioConfig {
        self.audio.clone().unwrap_or_default()
    }
}

/// Resolve the VoxDeck data directory: `~/.voxdeck/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voxdeck")
}
