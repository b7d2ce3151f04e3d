// Configuration for the AI request layer.
// Read from a JSON file in the user config directory, then overridden by
// TUTOR_AI_* environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::CacheConfig;
use crate::error::{Result, TutorError};
use crate::request::{DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_RETRIES};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000/api/ai";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the AI backend; feature endpoints hang off it.
    pub backend_url: String,
    pub request_timeout_secs: u64,
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: DEFAULT_MAX_RETRIES,
            cache: CacheConfig::default(),
        }
    }
}

/// Path to the config file (~/.config/tutor-ai/config.json on Linux).
pub fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "tutor-ai").map(|dirs| dirs.config_dir().join("config.json"))
}

impl Config {
    /// Load from the default location and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from a file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Apply `TUTOR_AI_*` overrides. Unparseable values are skipped.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("TUTOR_AI_BASE_URL") {
            self.backend_url = url;
        }
        if let Some(max) = parse_env(&lookup, "TUTOR_AI_MAX_CONCURRENT") {
            self.max_concurrent = max;
        }
        if let Some(retries) = parse_env(&lookup, "TUTOR_AI_MAX_RETRIES") {
            self.max_retries = retries;
        }
        if let Some(enabled) = parse_env(&lookup, "TUTOR_AI_CACHE_ENABLED") {
            self.cache.enabled = enabled;
        }
        if let Some(secs) = parse_env::<u64>(&lookup, "TUTOR_AI_CACHE_TTL_SECS") {
            self.cache.default_ttl_ms = secs.saturating_mul(1000);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.backend_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(TutorError::Config(format!(
                "backend_url must be an http(s) URL, got {:?}",
                self.backend_url
            )));
        }
        if self.max_concurrent == 0 {
            return Err(TutorError::Config("max_concurrent must be at least 1".to_string()));
        }
        if self.cache.max_entries == 0 {
            return Err(TutorError::Config("cache.max_entries must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(name, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
