use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Complete configuration for models and their transport
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub requests: RequestConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

/// Transport configuration (shared REST client)
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Headers sent with every request (e.g. Authorization)
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_timeout_seconds(),
            headers: HashMap::new(),
        }
    }
}

/// Request coordination limits
#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    /// Fetches started sooner than this after the previous one are skipped
    #[serde(default = "default_min_fetch_interval_ms")]
    pub min_fetch_interval_ms: u64,
    /// Debounce applied when a fetch doesn't ask for one (0 = none)
    #[serde(default)]
    pub default_debounce_ms: u64,
}

fn default_min_fetch_interval_ms() -> u64 {
    100
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            min_fetch_interval_ms: default_min_fetch_interval_ms(),
            default_debounce_ms: 0,
        }
    }
}

/// Per-model defaults applied to every kind built from config
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_id_attribute")]
    pub id_attribute: String,
    #[serde(default = "default_requires_id")]
    pub requires_id: bool,
    #[serde(default)]
    pub timestamps: bool,
}

fn default_id_attribute() -> String {
    "id".to_string()
}

fn default_requires_id() -> bool {
    true
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id_attribute: default_id_attribute(),
            requires_id: default_requires_id(),
            timestamps: false,
        }
    }
}

impl CoreConfig {
    /// Overlay MOJO_* environment variables onto this config.
    pub fn with_env(mut self) -> Self {
        if let Ok(v) = std::env::var("MOJO_BASE_URL") {
            self.transport.base_url = v;
        }
        if let Ok(v) = std::env::var("MOJO_TIMEOUT_SECONDS") {
            if let Ok(n) = v.parse::<u64>() {
                self.transport.timeout_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("MOJO_MIN_FETCH_INTERVAL_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.requests.min_fetch_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("MOJO_AUTH_TOKEN") {
            self.transport
                .headers
                .insert("Authorization".to_string(), format!("Bearer {}", v));
        }
        self
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }
}

/// Load configuration from TOML file
pub fn load_config(path: impl AsRef<Path>) -> Result<CoreConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: CoreConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}
