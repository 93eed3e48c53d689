use crate::api::SavingsTarget;
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

/// Values shipped in the sample configuration; treated as "not configured".
const PLACEHOLDER_API_KEY: &str = "YOUR_ACTUAL_API_KEY_HERE";
const PLACEHOLDER_BASE_URL: &str = "YOUR_ACTUAL_BETTER_API_BASE_URL_HERE";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub analysis: AnalysisDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    pub poll_interval_seconds: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisDefaults {
    pub savings_target: SavingsTarget,
    pub min_r_squared: f64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            timeout_seconds: 60,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 10,
            max_attempts: 30,
        }
    }
}

impl Default for AnalysisDefaults {
    fn default() -> Self {
        Self {
            savings_target: SavingsTarget::Nominal,
            min_r_squared: 0.6,
        }
    }
}

/// API key and endpoint root used to authenticate every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            base_url: Some(base_url.into()),
        }
    }
}

impl ApiConfig {
    /// Credentials with blank and placeholder values dropped.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            api_key: usable(self.api_key.as_deref(), PLACEHOLDER_API_KEY),
            base_url: usable(self.base_url.as_deref(), PLACEHOLDER_BASE_URL),
        }
    }
}

fn usable(value: Option<&str>, placeholder: &str) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != placeholder)
        .map(str::to_string)
}

impl Config {
    /// Get the default config file path (~/.better-explorer.toml)
    pub fn default_config_path() -> crate::Result<PathBuf> {
        let home_dir = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map_err(|_| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(PathBuf::from(home_dir).join(".better-explorer.toml"))
    }

    /// Load config from the default location, falling back to defaults if the
    /// file doesn't exist
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::default_config_path()?;

        let mut config = if config_path.exists() {
            tracing::info!(path = %config_path.display(), "loading configuration");
            Self::from_file(&config_path)?
        } else {
            tracing::info!(path = %config_path.display(), "no config file found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific file path
    pub fn from_file(path: &PathBuf) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Fill credentials the file leaves unset, blank or at their placeholder
    /// from BETTER_API_KEY / BETTER_BASE_URL
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let credentials = self.api.credentials();
        if credentials.api_key.is_none() {
            if let Some(key) = lookup("BETTER_API_KEY") {
                self.api.api_key = Some(key);
            }
        }
        if credentials.base_url.is_none() {
            if let Some(url) = lookup("BETTER_BASE_URL") {
                self.api.base_url = Some(url);
            }
        }
    }

    /// Save config to a file
    pub fn to_file(&self, path: &PathBuf) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create a config file with all available options documented
    pub fn create_documented_config() -> String {
        r#"# BETTER Explorer Configuration File
# Credentials and polling behaviour for the building analytics client

[api]
# API token (can also be set via the BETTER_API_KEY environment variable)
# api_key = "your-api-key-here"

# Root of the API, e.g. "https://better.lbl.gov/api/v1"
# (can also be set via the BETTER_BASE_URL environment variable)
# base_url = "https://better.lbl.gov/api/v1"

# Request timeout in seconds
timeout_seconds = 60

[polling]
# Seconds to wait between status queries while an analysis runs
poll_interval_seconds = 10

# Give up after this many status queries
max_attempts = 30

[analysis]
# Savings target: "NOMINAL", "CONSERVATIVE" or "AGGRESSIVE"
savings_target = "NOMINAL"

# Minimum R-squared a regression model needs to be used (0.0 to 1.0)
min_r_squared = 0.6
"#
        .to_string()
    }
}
