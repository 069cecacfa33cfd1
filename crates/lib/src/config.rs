//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.coach/config.json`) and environment.
//! Every field has a default, so an empty `{}` file is a valid config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Webhook base used when neither config nor environment names one.
pub const DEFAULT_API_BASE_URL: &str = "https://coachbot-n8n-01.fly.dev/webhook";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Webhook API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Explore catalog defaults.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Where the session credential is persisted.
    #[serde(default)]
    pub session: SessionConfig,
}

/// Webhook API base address and request timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Base URL of the webhook API. Overridden by COACH_API_BASE_URL env.
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds (default 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Category shown before the tab list has arrived.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogConfig {
    #[serde(default = "default_category_id")]
    pub default_category_id: i64,

    #[serde(default = "default_category_name")]
    pub default_category_name: String,
}

/// Credential persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Credential file. Relative paths are resolved against the config file's parent.
    /// Omit to use `auth.json` next to the config file.
    #[serde(default)]
    pub credential_path: Option<PathBuf>,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_category_id() -> i64 {
    1
}

fn default_category_name() -> String {
    "Pengembangan Diri".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            default_category_id: default_category_id(),
            default_category_name: default_category_name(),
        }
    }
}

/// Resolve the API base URL: env COACH_API_BASE_URL overrides config. Trailing slashes are dropped.
pub fn resolve_api_base_url(config: &Config) -> String {
    std::env::var("COACH_API_BASE_URL")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            let t = config.api.base_url.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .unwrap_or_else(default_api_base_url)
        .trim_end_matches('/')
        .to_string()
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("COACH_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".coach").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the credential file: `session.credentialPath` if set (relative paths resolved against the
/// config file's parent), otherwise `auth.json` beside the config file.
pub fn resolve_credential_path(config: &Config, config_path: &Path) -> PathBuf {
    let parent = config_parent(config_path);
    match &config.session.credential_path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                parent.join(p)
            }
        }
        _ => parent.join("auth.json"),
    }
}

/// Load config from the given path (or the default / COACH_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving sibling files).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
