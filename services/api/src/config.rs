//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

use crate::adapters::blob_store::MEDIA_ROUTE;
use crate::adapters::image_source::DEFAULT_MAX_IMAGE_BYTES;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub memu_api_key: Option<String>,
    pub memu_agent_id: String,
    pub stt_model: String,
    pub tts_voice: String,
    pub chat_model: String,
    pub vision_model: String,
    pub media_root: PathBuf,
    pub public_base_url: String,
    pub reward_card_base_url: String,
    /// URL prefixes remote homework images may be fetched from. Always includes our own media.
    pub trusted_image_urls: Vec<String>,
    pub max_image_bytes: usize,
    pub free_homework_limit: u32,
    pub cors_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        // Blank keys count as unset so an empty line in `.env` does not enable a service.
        let secret = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // --- Server and Database Settings ---
        let bind_address = var("BIND_ADDRESS", "0.0.0.0:3000")
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = var("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- API Keys (optional until a collaborator needs one) ---
        let openai_api_key = secret("OPENAI_API_KEY");
        let gemini_api_key = secret("GEMINI_API_KEY");
        let memu_api_key = secret("MEMU_API_KEY");

        // --- Adapter-specific Settings ---
        let public_base_url = var("PUBLIC_BASE_URL", "http://localhost:3000")
            .trim_end_matches('/')
            .to_string();
        let reward_card_base_url = lookup("REWARD_CARD_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("{}/cards", public_base_url));

        let mut trusted_image_urls = vec![format!("{}{}", public_base_url, MEDIA_ROUTE)];
        trusted_image_urls.extend(
            var("TRUSTED_IMAGE_URLS", "")
                .split(',')
                .map(|url| url.trim().trim_end_matches('/'))
                .filter(|url| !url.is_empty())
                .map(str::to_string),
        );

        let max_bytes_str = var("MAX_IMAGE_BYTES", &DEFAULT_MAX_IMAGE_BYTES.to_string());
        let max_image_bytes = max_bytes_str
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "MAX_IMAGE_BYTES".to_string(),
                    format!("'{}' is not a positive number", max_bytes_str),
                )
            })?;

        let limit_str = var("FREE_HOMEWORK_LIMIT", "5");
        let free_homework_limit = limit_str.parse::<u32>().map_err(|_| {
            ConfigError::InvalidValue(
                "FREE_HOMEWORK_LIMIT".to_string(),
                format!("'{}' is not a non-negative number", limit_str),
            )
        })?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            gemini_api_key,
            memu_api_key,
            memu_agent_id: var("MEMU_AGENT_ID", "amibuddy_agent"),
            stt_model: var("STT_MODEL", "whisper-1"),
            tts_voice: var("TTS_VOICE", "alloy"),
            chat_model: var("CHAT_MODEL", "gpt-4o-mini"),
            vision_model: var("VISION_MODEL", "gemini-2.5-flash"),
            media_root: PathBuf::from(var("MEDIA_ROOT", "./media")),
            public_base_url,
            reward_card_base_url,
            trusted_image_urls,
            max_image_bytes,
            free_homework_limit,
            cors_origin: var("CORS_ORIGIN", "http://localhost:8081"),
        })
    }

    /// The OpenAI key is needed for transcription, replies and speech.
    pub fn require_openai_key(&self) -> Result<&str, ConfigError> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))
    }

    /// The Gemini key is needed for homework analysis and review.
    pub fn require_gemini_key(&self) -> Result<&str, ConfigError> {
        self.gemini_api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))
    }
}
