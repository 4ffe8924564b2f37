//! Runtime configuration management.
//!
//! The configuration names the runtime's scope, deploy version and origin,
//! the manifests used at install/activate, and the patterns the classifier
//! matches against. It is stored at `~/.config/offline-cache/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::classifier::ResourceClass;
use crate::expiry::DEFAULT_API_TTL_SECS;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "offline-cache";

/// Longest accepted api-short-cache lifetime (one year)
const MAX_API_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Bounded network timeouts, in seconds, per strategy.
/// Cache-backed strategies fail over sooner than pass-through requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub critical_secs: u64,
    pub api_secs: u64,
    pub standard_secs: u64,
    pub passthrough_secs: u64,
    pub install_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            critical_secs: 10,
            api_secs: 8,
            standard_secs: 15,
            passthrough_secs: 30,
            install_secs: 30,
        }
    }
}

impl Timeouts {
    pub fn for_class(&self, class: ResourceClass) -> Duration {
        let secs = match class {
            ResourceClass::Critical => self.critical_secs,
            ResourceClass::ApiShortCache => self.api_secs,
            ResourceClass::Standard => self.standard_secs,
            ResourceClass::NeverCache => self.passthrough_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Owner of the stores; `CLEAR_CACHES` only deletes stores of this scope
    pub scope: String,
    pub version: String,
    /// The runtime's own URL; its port gates cacheability
    pub origin: Url,
    pub baseline_manifest: Vec<String>,
    pub critical_manifest: Vec<String>,
    /// Warmed into the critical store after activation, best-effort
    pub preload: Vec<String>,
    pub sensitive_paths: Vec<String>,
    pub critical_suffixes: Vec<String>,
    pub api_hosts: Vec<String>,
    pub api_paths: Vec<String>,
    pub api_ttl_secs: i64,
    pub timeouts: Timeouts,
    pub cache_dir: Option<PathBuf>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scope: "app".to_string(),
            version: "v1".to_string(),
            origin: Url::parse("https://localhost/").expect("static origin URL is valid"),
            baseline_manifest: strings(&["/", "/favicon.ico", "/robots.txt"]),
            critical_manifest: strings(&[
                "/index.html",
                "/manifest.json",
                "/assets/index.css",
                "/assets/index.js",
            ]),
            preload: strings(&["/offline.html", "/icons/icon-192.png"]),
            sensitive_paths: strings(&["/auth", "/login", "/logout", "/signup", "/dashboard"]),
            critical_suffixes: strings(&[
                "/index.html",
                "/manifest.json",
                "/assets/index.css",
                "/assets/index.js",
            ]),
            api_hosts: strings(&["supabase.co"]),
            api_paths: strings(&["/rest/v1/", "/functions/v1/", "/api/"]),
            api_ttl_secs: DEFAULT_API_TTL_SECS,
            timeouts: Timeouts::default(),
            cache_dir: None,
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Reject values the runtime cannot act on
    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_API_TTL_SECS).contains(&self.api_ttl_secs) {
            bail!(
                "api_ttl_secs must be between 0 and {}, got {}",
                MAX_API_TTL_SECS,
                self.api_ttl_secs
            );
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
