//! Configuration management for marketscrape
//!
//! All configuration is loaded from `./config/marketscrape.toml`.
//! Defaults live only in the config template embedded below.

use serde::Deserialize;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::table::parse_selector;

/// Configuration file path relative to working directory
pub const CONFIG_PATH: &str = "./config/marketscrape.toml";

/// Default configuration file content - this is the ONLY place defaults exist
pub const DEFAULT_CONFIG: &str = include_str!("../config/marketscrape.toml");

pub const ENV_STORE_PATH: &str = "MARKETSCRAPE_STORE";
pub const ENV_CHROME_PATH: &str = "CHROME_PATH";
pub const ENV_CONTAINER: &str = "MARKETSCRAPE_CONTAINER";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid CSS selector in '{field}': {error}\n  Selector: {selector}")]
    InvalidSelector {
        field: String,
        selector: String,
        error: String,
    },

    #[error("Invalid URL in '{field}': {url}")]
    InvalidUrl { field: String, url: String },

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },

    #[error("Configuration field '{field}' must be greater than zero")]
    MustBePositive { field: String },
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub browser: BrowserConfig,
    pub retry: RetryConfig,
    pub scroll: ScrollConfig,
    pub pagination: PaginationConfig,
    pub schedule: ScheduleConfig,
    pub store: StoreConfig,
}

/// Where the listing lives and how its table is shaped
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub listing_url: String,
    pub page_param: String,
    pub table_selector: String,
    pub row_selector: String,
    pub header_selector: String,
    pub ready_selector: String,
}

/// Headless Chrome launch and wait settings
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    pub user_agent: String,
    pub window_width: u32,
    pub window_height: u32,
    pub navigation_timeout_secs: u64,
    pub selector_timeout_secs: u64,
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,
}

fn default_sandbox() -> bool {
    true
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_secs(self.selector_timeout_secs)
    }
}

/// Backoff strategy between navigation attempts
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed,
    /// base * attempt
    Linear,
    /// base * 2^(attempt - 1)
    Exponential,
}

/// Navigation retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub strategy: BackoffStrategy,
}

/// Scroll-driven content realization
#[derive(Debug, Clone, Deserialize)]
pub struct ScrollConfig {
    pub step_px: u32,
    pub interval_ms: u64,
    pub max_steps: u32,
}

/// Pagination limits and pacing
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    pub max_pages: u32,
    pub rows_per_page: usize,
    pub page_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        // Safety: the embedded template is checked by test_default_config_validates.
        toml::from_str(DEFAULT_CONFIG).expect("embedded default config must parse")
    }
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(CONFIG_PATH))
    }

    /// Load configuration from a specific path, then apply environment overrides
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `MARKETSCRAPE_STORE`, `CHROME_PATH` and `MARKETSCRAPE_CONTAINER`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_STORE_PATH).filter(|v| !v.is_empty()) {
            self.store.path = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_CHROME_PATH).filter(|v| !v.is_empty()) {
            self.browser.chrome_path = Some(PathBuf::from(path));
        }
        if lookup(ENV_CONTAINER).is_some() {
            self.browser.sandbox = false;
        }
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.require_non_empty("source.listing_url", &self.source.listing_url)?;
        self.require_non_empty("source.page_param", &self.source.page_param)?;
        self.require_non_empty("browser.user_agent", &self.browser.user_agent)?;

        match url::Url::parse(&self.source.listing_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::InvalidUrl {
                    field: "source.listing_url".to_string(),
                    url: self.source.listing_url.clone(),
                })
            }
        }

        // Validate selectors compile
        parse_selector("source.table_selector", &self.source.table_selector)?;
        parse_selector("source.row_selector", &self.source.row_selector)?;
        parse_selector("source.header_selector", &self.source.header_selector)?;
        parse_selector("source.ready_selector", &self.source.ready_selector)?;

        self.require_positive("browser.navigation_timeout_secs", self.browser.navigation_timeout_secs)?;
        self.require_positive("retry.max_attempts", self.retry.max_attempts as u64)?;
        self.require_positive("scroll.step_px", self.scroll.step_px as u64)?;
        self.require_positive("pagination.max_pages", self.pagination.max_pages as u64)?;
        self.require_positive("pagination.rows_per_page", self.pagination.rows_per_page as u64)?;
        self.require_positive("schedule.interval_secs", self.schedule.interval_secs)?;

        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "store.path".to_string(),
            });
        }

        Ok(())
    }

    fn require_non_empty(&self, field: &str, value: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: field.to_string(),
            });
        }
        Ok(())
    }

    fn require_positive(&self, field: &str, value: u64) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::MustBePositive {
                field: field.to_string(),
            });
        }
        Ok(())
    }

    /// Create default configuration file at the standard location
    pub fn create_default_config() -> Result<PathBuf, ConfigError> {
        Self::create_default_config_at(Path::new(CONFIG_PATH))
    }

    pub fn create_default_config_at(path: &Path) -> Result<PathBuf, ConfigError> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;

        Ok(path.to_path_buf())
    }

    /// Check if stdin is a TTY (interactive terminal)
    pub fn is_interactive() -> bool {
        io::stdin().is_terminal()
    }

    /// Prompt user to create default config (only in interactive mode)
    pub fn prompt_create_config() -> Result<Option<PathBuf>, ConfigError> {
        if !Self::is_interactive() {
            return Ok(None);
        }

        print!("Configuration file not found. Create default config? [Y/n] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();

        if input.is_empty() || input == "y" || input == "yes" {
            let path = Self::create_default_config()?;
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }
}
