use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{LedgerError, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_MS: u64 = 2000;
pub const DEFAULT_MODEL: &str = "gpt-4o-2024-08-06";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_STORAGE_BUCKET: &str = "financial-statements";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_attempts: u32,
    /// Wait before retry `n` is `backoff_base_ms * n`.
    pub backoff_base_ms: u64,
    /// Active jobs untouched for longer than this are failed and replaced.
    ///
    /// A running job refreshes its record before every attempt, so the limit must
    /// exceed the longest backoff plus one generation call.
    pub stale_after_secs: Option<u64>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_MS,
            stale_after_secs: None,
        }
    }
}

impl GenerationSettings {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub generation: GenerationSettings,
    pub openai: Option<OpenAiSettings>,
    pub storage_bucket: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            generation: GenerationSettings::default(),
            openai: None,
            storage_bucket: DEFAULT_STORAGE_BUCKET.to_string(),
        }
    }
}

impl AppConfig {
    /// Build a configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(raw) = lookup("LEDGER_MAX_ATTEMPTS") {
            config.generation.max_attempts = parse_number("LEDGER_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("LEDGER_BACKOFF_MS") {
            config.generation.backoff_base_ms = parse_number("LEDGER_BACKOFF_MS", &raw)?;
        }
        if let Some(raw) = lookup("LEDGER_STALE_AFTER_SECS") {
            config.generation.stale_after_secs =
                Some(parse_number("LEDGER_STALE_AFTER_SECS", &raw)?);
        }
        if let Some(bucket) = lookup("LEDGER_STORAGE_BUCKET") {
            config.storage_bucket = bucket;
        }

        if let Some(api_key) = lookup("OPENAI_API_KEY") {
            let defaults = OpenAiSettings::default();
            config.openai = Some(OpenAiSettings {
                api_key,
                model: lookup("OPENAI_MODEL").unwrap_or(defaults.model),
                base_url: lookup("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            });
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| LedgerError::Config(format!("{} must be a number, got '{}'", key, raw)))
}
