use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::Result;
use log::debug;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PROVIDER_URL: &str = "https://yt-api.p.rapidapi.com";
pub const DEFAULT_PROVIDER_HOST: &str = "yt-api.p.rapidapi.com";
pub const DEFAULT_QUOTA_CODE: &str = "P0429";
pub const DEFAULT_DAILY_LIMIT: u32 = 10;
pub const DEFAULT_SUMMARY_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Owner id attached to generated transcripts; unset means community content
    pub user: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub provider: ProviderConfig,
    pub store: StoreConfig,
    pub summary: SummaryConfig,
}

/// Caption provider endpoint and its static credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub host: String,
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PROVIDER_URL.to_string(),
            host: DEFAULT_PROVIDER_HOST.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Hosted backend base URL; the local JSON store is used when unset
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    /// Error code the hosted backend raises when the daily insert quota is hit
    pub quota_code: String,
    /// Limit enforced by the local store (the hosted backend enforces its own)
    pub daily_limit: u32,
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            access_token: None,
            quota_code: DEFAULT_QUOTA_CODE.to_string(),
            daily_limit: DEFAULT_DAILY_LIMIT,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_SUMMARY_MODEL.to_string(),
            api_key: None,
        }
    }
}

impl Config {
    /// Load config from ~/.config/ytscribe/config.toml if it exists
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            debug!("Loading config from {}", path.display());
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            debug!("No config file found at {}", path.display());
            Ok(Config::default())
        }
    }

    /// Overlay environment variables onto file values
    pub fn with_env(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(v) = lookup("YTSCRIBE_PROVIDER_KEY") {
            self.provider.api_key = Some(v);
        }
        if let Some(v) = lookup("YTSCRIBE_STORE_URL") {
            self.store.url = Some(v);
        }
        if let Some(v) = lookup("YTSCRIBE_STORE_KEY") {
            self.store.api_key = Some(v);
        }
        if let Some(v) = lookup("YTSCRIBE_ACCESS_TOKEN") {
            self.store.access_token = Some(v);
        }
        if let Some(v) = lookup("YTSCRIBE_USER") {
            self.user = Some(v);
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    pub fn local_store_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(|| data_dir().join("transcripts.json"))
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("ytscribe")
        .join("config.toml")
}

pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ytscribe")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
user = "user-1"
request_timeout_secs = 5

[provider]
api_key = "abc"

[store]
url = "https://example.supabase.co"
api_key = "anon"
quota_code = "QUOTA"

[summary]
model = "gpt-4o"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.user.as_deref(), Some("user-1"));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.provider.api_key.as_deref(), Some("abc"));
        assert_eq!(config.provider.host, DEFAULT_PROVIDER_HOST);
        assert_eq!(config.store.url.as_deref(), Some("https://example.supabase.co"));
        assert_eq!(config.store.quota_code, "QUOTA");
        assert_eq!(config.store.daily_limit, DEFAULT_DAILY_LIMIT);
        assert_eq!(config.summary.model, "gpt-4o");
    }

    #[test]
    fn test_parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.user.is_none());
        assert!(config.store.url.is_none());
        assert_eq!(config.provider.base_url, DEFAULT_PROVIDER_URL);
        assert_eq!(config.store.quota_code, DEFAULT_QUOTA_CODE);
        assert_eq!(config.summary.model, DEFAULT_SUMMARY_MODEL);
        assert_eq!(config.request_timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let config: Config = toml::from_str(
            r#"
user = "from-file"
[provider]
api_key = "file-key"
"#,
        )
        .unwrap();
        let config = config.with_overrides(|name| match name {
            "YTSCRIBE_PROVIDER_KEY" => Some("env-key".to_string()),
            "YTSCRIBE_USER" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.provider.api_key.as_deref(), Some("env-key"));
        assert_eq!(config.user.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert!(config.provider.api_key.is_none());
    }

    #[test]
    fn test_local_store_path_override() {
        let config: Config = toml::from_str("[store]\npath = \"/tmp/t.json\"").unwrap();
        assert_eq!(config.local_store_path(), PathBuf::from("/tmp/t.json"));
    }
}
