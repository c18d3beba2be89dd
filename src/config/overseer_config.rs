//! Overseer configuration file handling
//!
//! Loads and saves ~/.config/overseer/config.yaml. Every section is optional
//! and falls back to its defaults.

use super::account::AccountConfig;
use crate::pool::PoolConfig;
use crate::quota::{ModelDescriptor, QuotaPolicy};
use crate::routing::{Credential, RouterConfig};
use crate::supervisor::SupervisorConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Overseer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverseerConfig {
    /// Billing accounts candidates are charged to
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    /// Routable (account, model) pairs
    #[serde(default)]
    pub candidates: Vec<ModelDescriptor>,

    #[serde(default)]
    pub quota: QuotaPolicy,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl OverseerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A starting configuration with one account and a fast and a pro model
    pub fn sample() -> Self {
        Self {
            accounts: vec![AccountConfig::new("primary").with_key_env("OVERSEER_PRIMARY_API_KEY")],
            candidates: vec![
                ModelDescriptor::new("primary", "gemini-2.0-flash", 1).with_limits(15, 1500),
                ModelDescriptor::new("primary", "gemini-2.5-pro", 2).with_limits(5, 100),
            ],
            ..Self::default()
        }
    }

    /// Load configuration from the default path (~/.config/overseer/config.yaml)
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(crate::OverseerError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading Overseer configuration");
        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            accounts = config.accounts.len(),
            candidates = config.candidates.len(),
            max_agents = config.pool.max_agents,
            "Configuration loaded successfully"
        );
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving Overseer configuration");
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Get the default config path (~/.config/overseer/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("overseer");
        path.push("config.yaml");
        path
    }

    pub fn get_account(&self, id: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.id == id)
    }

    /// Credentials for every configured account
    pub fn credentials(&self) -> Vec<Credential> {
        self.accounts.iter().map(AccountConfig::credential).collect()
    }
}
