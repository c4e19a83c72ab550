//! Portal Configuration
//!
//! Loaded from a TOML file (defaults when the file is absent), then
//! overridden from `RALLY_*` environment variables.

use rally_tenant::{EntitlementConfig, ExtractorConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub bind_addr: String,
    /// Seconds between subscription expiry sweeps
    pub expiry_sweep_secs: u64,
    pub identity: ExtractorConfig,
    pub entitlements: EntitlementConfig,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            expiry_sweep_secs: 300,
            identity: ExtractorConfig::default(),
            entitlements: EntitlementConfig::default(),
        }
    }
}

impl PortalConfig {
    /// Load `path`, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("RALLY_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(secret) = lookup("RALLY_TOKEN_SECRET") {
            self.identity.token_secret = secret;
        }
        if let Some(flag) = lookup("RALLY_DEV_OVERRIDE") {
            self.identity.dev_override_enabled =
                matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.token_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "identity.token_secret must be set (or RALLY_TOKEN_SECRET)".into(),
            ));
        }
        if self.expiry_sweep_secs == 0 {
            return Err(ConfigError::Invalid("expiry_sweep_secs must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0}")]
    Invalid(String),
}
