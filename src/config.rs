use crate::constants::{
    DEFAULT_ANALYSIS_MODEL, DEFAULT_API_BASE_URL, DEFAULT_OUTPUT_ADDR, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_SPEECH_MODEL, DEFAULT_SPEED_MS, DEFAULT_VOICE_NAME,
};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tokio::fs::read_to_string;

const CONFIG_FILE: &str = "Config.toml";
const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GeminiConfig {
    /// API key for the Gemini API. Falls back to `GEMINI_API_KEY` / `API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Model producing the execution trace
    #[serde(default = "default_analysis_model")]
    pub analysis_model: String,

    /// Model producing narration audio
    #[serde(default = "default_speech_model")]
    pub speech_model: String,

    /// Prebuilt voice used for narration
    #[serde(default = "default_voice_name")]
    pub voice_name: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl GeminiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        GeminiConfig {
            api_key: None,
            api_base_url: default_api_base_url(),
            analysis_model: default_analysis_model(),
            speech_model: default_speech_model(),
            voice_name: default_voice_name(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PlaybackConfig {
    /// Auto-advance period in milliseconds
    #[serde(default = "default_speed_ms")]
    pub speed_ms: u64,

    /// Whether narration starts enabled
    #[serde(default)]
    pub narration: bool,

    /// Address of the narration WAV stream, `None` disables the listener
    #[serde(default = "default_output_addr")]
    pub output_addr: Option<String>,
}

impl PlaybackConfig {
    /// Listener address for the narration stream; an empty string disables it.
    pub fn output_addr(&self) -> Option<&str> {
        self.output_addr.as_deref().filter(|addr| !addr.trim().is_empty())
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        PlaybackConfig {
            speed_ms: default_speed_ms(),
            narration: false,
            output_addr: default_output_addr(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub gemini: GeminiConfig,

    #[serde(flatten)]
    pub playback: PlaybackConfig,
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.playback.speed_ms == 0 {
            bail!("speed_ms must be a positive number of milliseconds");
        }

        Ok(())
    }

    /// Fills in the API key from the environment if the file didn't set one.
    fn with_env_api_key(mut self) -> Self {
        let has_key = self
            .gemini
            .api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());

        if !has_key {
            self.gemini.api_key = API_KEY_ENV_VARS
                .iter()
                .filter_map(|var| std::env::var(var).ok())
                .find(|key| !key.trim().is_empty());
        }

        self
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_analysis_model() -> String {
    DEFAULT_ANALYSIS_MODEL.to_string()
}

fn default_speech_model() -> String {
    DEFAULT_SPEECH_MODEL.to_string()
}

fn default_voice_name() -> String {
    DEFAULT_VOICE_NAME.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_speed_ms() -> u64 {
    DEFAULT_SPEED_MS
}

fn default_output_addr() -> Option<String> {
    Some(DEFAULT_OUTPUT_ADDR.to_string())
}

pub async fn load() -> Result<Config> {
    if !Path::new(CONFIG_FILE).exists() {
        info!("No {CONFIG_FILE} found, using default configuration");
        return Ok(Config::default().with_env_api_key());
    }

    load_from(CONFIG_FILE).await
}

pub async fn load_from(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let config = read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: Config = toml::from_str(&config)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    Ok(config.with_env_api_key())
}
