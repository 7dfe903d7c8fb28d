// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION EVSE Sync.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use anyhow::{Context, Result};
use async_trait::async_trait;
use evse_cloud::{AuthFailure, CredentialSupplier, Credentials, DEFAULT_BASE_URL};
use evse_sync::{SiteIdentity, SyncConfig};
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Options file written by the host add-on supervisor
const ADDON_OPTIONS_PATH: &str = "/data/options.json";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub site: SiteConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub polling: SyncConfig,

    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Chargers to track; empty tracks every charger on the site
    #[serde(default)]
    pub serials: Vec<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: None,
            serials: Vec::new(),
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_owned()
}

/// Session material produced by the external login helper
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub cookie: String,

    #[serde(default)]
    pub eauth_token: Option<String>,

    #[serde(default)]
    pub email: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("cookie", &"[redacted]")
            .field("eauth_token", &self.eauth_token.as_ref().map(|_| "[redacted]"))
            .field("email", &self.email)
            .finish()
    }
}

impl CredentialsConfig {
    pub fn to_credentials(&self) -> Credentials {
        Credentials::new(self.cookie.trim(), self.eauth_token.clone())
    }

    fn is_empty(&self) -> bool {
        self.cookie.trim().is_empty()
            && self
                .eauth_token
                .as_deref()
                .is_none_or(|token| token.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl AppConfig {
    /// Load configuration from an explicit path, or from the add-on options and the
    /// development files in the working directory. Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::discover()?,
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn discover() -> Result<Self> {
        for candidate in [ADDON_OPTIONS_PATH, "config.toml", "config.json"] {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::from_file(path);
            }
        }

        warn!("No configuration file found, using defaults with environment overrides");
        Ok(Self::default())
    }

    /// Parse one file; the extension picks TOML, anything else is JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let config: AppConfig = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        };
        info!(path = %path.display(), "✅ Loaded configuration");
        Ok(config)
    }

    /// Apply `EVSE_*` overrides resolved through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("EVSE_SITE_ID") {
            self.site.id = id;
        }
        if let Some(cookie) = lookup("EVSE_COOKIE") {
            self.credentials.cookie = cookie;
        }
        if let Some(token) = lookup("EVSE_EAUTH_TOKEN") {
            self.credentials.eauth_token = Some(token);
        }
        if let Some(url) = lookup("EVSE_BASE_URL") {
            self.site.base_url = url;
        }
        if let Some(level) = lookup("EVSE_LOG_LEVEL") {
            self.system.log_level = level.to_ascii_lowercase();
        }
        if let Some(timezone) = lookup("EVSE_TIMEZONE") {
            self.polling.timezone = timezone;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.site.id.trim().is_empty() {
            anyhow::bail!("site.id cannot be empty (set it in the config file or EVSE_SITE_ID)");
        }

        if !self.site.base_url.starts_with("http://") && !self.site.base_url.starts_with("https://")
        {
            anyhow::bail!(
                "site.base_url must be an http(s) URL, got '{}'",
                self.site.base_url
            );
        }

        if self.site.serials.iter().any(|sn| sn.trim().is_empty()) {
            anyhow::bail!("site.serials must not contain empty entries");
        }

        if !LOG_LEVELS.contains(&self.system.log_level.as_str()) {
            anyhow::bail!(
                "system.log_level must be one of {LOG_LEVELS:?}, got '{}'",
                self.system.log_level
            );
        }

        self.polling
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid polling configuration: {e}"))?;

        if self.credentials.is_empty() {
            warn!("⚠️ No cookie or e-auth token configured, cloud calls will be rejected");
        }

        Ok(())
    }

    pub fn site_identity(&self) -> SiteIdentity {
        SiteIdentity {
            site_id: self.site.id.trim().to_owned(),
            site_name: self.site.name.clone(),
            serials: self.site.serials.clone(),
        }
    }
}

/// Re-reads the configuration source whenever the cloud rejects the session, so an
/// external login helper can rotate the cookie and token without a restart.
#[derive(Debug)]
pub struct ConfigCredentialSupplier {
    source: Option<PathBuf>,
    last: Mutex<Credentials>,
}

impl ConfigCredentialSupplier {
    pub fn new(source: Option<PathBuf>, current: Credentials) -> Self {
        Self {
            source,
            last: Mutex::new(current),
        }
    }
}

#[async_trait]
impl CredentialSupplier for ConfigCredentialSupplier {
    async fn refresh(&self) -> Result<Credentials, AuthFailure> {
        let source = self.source.clone();
        let config = tokio::task::spawn_blocking(move || AppConfig::load(source.as_deref()))
            .await
            .map_err(|_| AuthFailure::TokenUnavailable)?
            .map_err(|e| {
                warn!(error = %e, "🔑 Failed to reload credentials");
                AuthFailure::TokenUnavailable
            })?;

        if config.credentials.is_empty() {
            return Err(AuthFailure::InvalidCredentials);
        }

        let fresh = config.credentials.to_credentials();
        let mut last = self.last.lock();
        // Same material as the rejected session cannot succeed
        if *last == fresh {
            return Err(AuthFailure::InvalidCredentials);
        }
        *last = fresh.clone();
        info!("🔑 Credentials reloaded from configuration");
        Ok(fresh)
    }
}
