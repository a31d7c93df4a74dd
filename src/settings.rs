use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:7171";
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "meta-llama/llama-4-maverick-17b-128e-instruct";
pub const API_KEY_ENV: &str = "GROQ_API_KEY";
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 24 * 60 * 60;

pub fn default_exclusions() -> Vec<String> {
    ["anushka", "melinda", "vikas", "bill", "dalai"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("parsing config {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProviderParams {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub detect_temperature: Option<f32>,
    pub detect_max_tokens: Option<u32>,
    pub qa_temperature: Option<f32>,
    pub qa_max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Secrets {
    pub groq_api_key: Option<String>,
}

/// Contents of the optional TOML config file. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FileConfig {
    pub listen: Option<String>,
    pub samples_dir: Option<PathBuf>,
    pub sample_exclusions: Option<Vec<String>>,
    /// Sessions with no action for this long are dropped.
    pub session_idle_secs: Option<u64>,
    pub provider: ProviderParams,
    pub secrets: Secrets,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }
}

/// Values picked up from the process environment (after `.env` is loaded).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub samples_dir: Option<PathBuf>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        let non_empty = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        Self {
            api_key: non_empty(API_KEY_ENV),
            base_url: non_empty("CELEBQA_BASE_URL"),
            samples_dir: non_empty("CELEBQA_SAMPLES_DIR").map(PathBuf::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CliOverrides {
    pub listen: Option<String>,
    pub samples_dir: Option<PathBuf>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderSettings {
    pub base_url: String,
    pub model: String,
    pub detect_temperature: f32,
    pub detect_max_tokens: u32,
    pub qa_temperature: f32,
    pub qa_max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub listen: String,
    pub samples_dir: PathBuf,
    pub sample_exclusions: Vec<String>,
    pub session_idle_ttl: Duration,
    pub provider: ProviderSettings,
    pub api_key: Option<String>,
}

impl AppConfig {
    pub fn api_key_missing(&self) -> bool {
        self.api_key.is_none()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        resolve_app_config(&CliOverrides::default(), &FileConfig::default(), &EnvConfig::default())
    }
}

/// Merges the layers: CLI over file over environment over defaults.
/// The file's `[secrets]` key wins over the environment key.
pub fn resolve_app_config(cli: &CliOverrides, file: &FileConfig, env: &EnvConfig) -> AppConfig {
    let listen = cli
        .listen
        .clone()
        .or_else(|| file.listen.clone())
        .unwrap_or_else(|| DEFAULT_LISTEN.into());

    let samples_dir = cli
        .samples_dir
        .clone()
        .or_else(|| file.samples_dir.clone())
        .or_else(|| env.samples_dir.clone())
        .unwrap_or_else(|| PathBuf::from("samples"));

    let p = &file.provider;
    let provider = ProviderSettings {
        base_url: p
            .base_url
            .clone()
            .or_else(|| env.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
        model: cli
            .model
            .clone()
            .or_else(|| p.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.into()),
        detect_temperature: p.detect_temperature.unwrap_or(0.3),
        detect_max_tokens: p.detect_max_tokens.unwrap_or(1024),
        qa_temperature: p.qa_temperature.unwrap_or(0.5),
        qa_max_tokens: p.qa_max_tokens.unwrap_or(512),
    };

    let api_key = file
        .secrets
        .groq_api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| env.api_key.clone());

    AppConfig {
        listen,
        samples_dir,
        sample_exclusions: file.sample_exclusions.clone().unwrap_or_else(default_exclusions),
        session_idle_ttl: Duration::from_secs(
            file.session_idle_secs.filter(|s| *s > 0).unwrap_or(DEFAULT_SESSION_IDLE_SECS),
        ),
        provider,
        api_key,
    }
}
