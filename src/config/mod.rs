//! Configuration management for planchat

use crate::utils::errors::{ConfigError, PlanchatError};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Currently active LLM provider
    pub active_provider: String,
    /// Currently active model
    pub active_model: String,
    /// Cache directory override; defaults to the platform cache dir
    pub cache_dir: Option<PathBuf>,
    /// Planfix account settings
    pub planfix: PlanfixConfig,
    /// Provider configurations
    pub providers: HashMap<String, ProviderConfig>,
    /// Cache refresh settings
    pub refresh: RefreshConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Planfix API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanfixConfig {
    /// Account name, the `{account}` in `{account}.planfix.com`
    pub account: String,
    /// REST API bearer token
    pub api_token: Option<String>,
    /// Records per page for listing endpoints
    pub page_size: u32,
    /// Per-request timeout (seconds)
    pub request_timeout_seconds: u64,
}

/// Configuration for an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    /// API key for the provider
    pub api_key: Option<String>,
    /// Base URL override for the provider API
    pub base_url: Option<String>,
    /// Default model to use with this provider
    pub default_model: Option<String>,
}

/// Cache refresh settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Cache entries older than this are refreshed on access (minutes)
    pub max_age_minutes: u64,
    /// Interval between forced refreshes in watch mode (minutes)
    pub interval_minutes: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            active_provider: "claude".to_string(),
            active_model: "claude-3-opus-20240229".to_string(),
            cache_dir: None,
            planfix: PlanfixConfig::default(),
            providers: HashMap::new(),
            refresh: RefreshConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PlanfixConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            api_token: None,
            page_size: 100,
            request_timeout_seconds: 30,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_age_minutes: 60,
            interval_minutes: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PlanfixConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Configuration manager for loading, saving, and managing application configuration
pub struct ConfigManager {
    config: Config,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a manager over the default config path, writing a default
    /// file on first run
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// Create a manager over an explicit config path
    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            Self::load_config(&config_path)?
        } else {
            let default_config = Config::default();
            Self::save_config(&config_path, &default_config)?;
            default_config
        };

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Get the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the configuration
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> Result<()> {
        Self::save_config(&self.config_path, &self.config)
    }

    /// Reload configuration from disk
    pub fn reload(&mut self) -> Result<()> {
        if self.config_path.exists() {
            self.config = Self::load_config(&self.config_path)?;
        }
        Ok(())
    }

    /// Update the active provider
    pub fn set_active_provider(&mut self, provider: String) -> Result<()> {
        self.config.active_provider = provider;
        self.save()
    }

    /// Update the active model
    pub fn set_active_model(&mut self, model: String) -> Result<()> {
        self.config.active_model = model;
        self.save()
    }

    /// Add or update a provider configuration
    pub fn set_provider_config(
        &mut self,
        name: String,
        provider_config: ProviderConfig,
    ) -> Result<()> {
        self.config.providers.insert(name, provider_config);
        self.save()
    }

    /// Get a provider configuration
    pub fn get_provider_config(&self, name: &str) -> Option<&ProviderConfig> {
        self.config.providers.get(name)
    }

    /// Get the configuration file path
    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::FileNotFound {
            path: PathBuf::from("config directory"),
        })?;

        let app_config_dir = config_dir.join("planchat");
        if !app_config_dir.exists() {
            fs::create_dir_all(&app_config_dir)
                .map_err(|e| ConfigError::WriteError { source: e })?;
        }

        Ok(app_config_dir.join("config.toml"))
    }

    /// Load configuration from file
    fn load_config(path: &Path) -> Result<Config> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError { source: e })?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError { source: e })
            .map_err(Into::into)
    }

    /// Save configuration to file
    fn save_config(path: &Path, config: &Config) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
            }
        }

        let content =
            toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(path, content).map_err(|e| ConfigError::WriteError { source: e })?;

        Ok(())
    }
}

impl Config {
    /// Get the active provider configuration
    pub fn get_active_provider_config(&self) -> Option<&ProviderConfig> {
        self.providers.get(&self.active_provider)
    }

    /// Get a provider configuration by name
    pub fn get_provider_config(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// The directory cache files live in
    pub fn resolved_cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        let base = dirs::cache_dir().ok_or_else(|| ConfigError::FileNotFound {
            path: PathBuf::from("cache directory"),
        })?;
        Ok(base.join("planchat"))
    }

    /// The Planfix API token, preferring the `PLANFIX_API_TOKEN` environment
    /// variable over the config file
    pub fn planfix_token(&self) -> Option<String> {
        std::env::var("PLANFIX_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.planfix.api_token.clone())
    }

    /// Check if the configuration is valid
    pub fn validate(&self) -> Result<()> {
        if self.planfix.account.is_empty() {
            return Err(PlanchatError::validation(
                "planfix.account",
                "Planfix account name is not configured",
            ));
        }

        if self.planfix_token().is_none() {
            return Err(PlanchatError::validation(
                "planfix.api_token",
                "Planfix API token is not configured",
            ));
        }

        if !self.providers.contains_key(&self.active_provider) {
            return Err(PlanchatError::validation(
                "active_provider",
                format!(
                    "Provider '{}' not found in configuration",
                    self.active_provider
                ),
            ));
        }

        if let Some(provider_config) = self.get_active_provider_config() {
            if provider_config.api_key.is_none() {
                return Err(PlanchatError::validation(
                    "provider.api_key",
                    format!(
                        "No API key configured for provider '{}'",
                        self.active_provider
                    ),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.planfix.account = "acme".to_string();
        config.planfix.api_token = Some("token".to_string());
        config.providers.insert(
            "claude".to_string(),
            ProviderConfig {
                api_key: Some("sk-test".to_string()),
                ..Default::default()
            },
        );
        config
    }

    #[test]
    fn first_run_writes_default_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let manager = ConfigManager::with_path(path.clone()).unwrap();

        assert!(path.exists());
        assert_eq!(manager.config().active_provider, "claude");
        assert_eq!(manager.config().planfix.page_size, 100);
        assert_eq!(manager.config().refresh.max_age_minutes, 60);
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut manager = ConfigManager::with_path(path.clone()).unwrap();

        *manager.config_mut() = valid_config();
        manager.config_mut().active_model = "claude-3-5-sonnet-latest".to_string();
        manager.save().unwrap();

        let reloaded = ConfigManager::with_path(path).unwrap();
        assert_eq!(reloaded.config().active_model, "claude-3-5-sonnet-latest");
        assert_eq!(reloaded.config().planfix.account, "acme");
        assert_eq!(
            reloaded
                .config()
                .get_provider_config("claude")
                .and_then(|p| p.api_key.as_deref()),
            Some("sk-test")
        );
    }

    #[test]
    fn validate_reports_the_first_missing_piece() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("planfix.account"));

        let mut config = valid_config();
        config.active_provider = "missing".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("active_provider"));

        let mut config = valid_config();
        config.providers.get_mut("claude").unwrap().api_key = None;
        assert!(config.validate().is_err());

        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn explicit_cache_dir_wins() {
        let mut config = Config::default();
        config.cache_dir = Some(PathBuf::from("/tmp/planchat-test"));
        assert_eq!(
            config.resolved_cache_dir().unwrap(),
            PathBuf::from("/tmp/planchat-test")
        );
    }
}
