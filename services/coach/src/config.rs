//! Application Configuration Module
//!
//! Loads settings for the coach from environment variables (and `.env`)
//! into a single struct that is passed to the wiring in `main`.

use coach_core::openai::DEFAULT_BASE_URL;
use coach_core::transcription::DEFAULT_TRANSCRIPTION_MODEL;
use std::env;
use tracing::Level;

/// Where assistant replies and feedback come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayConfig {
    /// Talk to an OpenAI-compatible chat completions API directly.
    OpenAi { api_key: String },
    /// Use the backend's `/ai-reply` and `/ai-feedback` endpoints.
    Http { api_url: String },
}

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    /// Backend base URL. Sessions are persisted only when this is set.
    pub api_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub chat_model: String,
    pub transcription_model: String,
    pub locale: String,
    pub input_device: Option<String>,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value {value:?} for {var}")]
    InvalidValue { var: String, value: String },
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `COACH_GATEWAY`: "openai" (default) or "http".
    // *   `COACH_API_URL`: Backend base URL. Required for the "http" gateway; enables persistence.
    // *   `OPENAI_API_KEY`: Required for the "openai" gateway and for voice input.
    // *   `OPENAI_BASE_URL`: (Optional) OpenAI-compatible API base. Defaults to the public API.
    // *   `CHAT_MODEL`: (Optional) Defaults to "gpt-4o".
    // *   `TRANSCRIPTION_MODEL`: (Optional) Defaults to "whisper-1".
    // *   `COACH_LOCALE`: (Optional) Narration locale. Defaults to "en-US".
    // *   `COACH_INPUT_DEVICE`: (Optional) Microphone name. Defaults to the system default.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_url = var("COACH_API_URL");
        let openai_api_key = var("OPENAI_API_KEY");

        let gateway_str = var("COACH_GATEWAY").unwrap_or_else(|| "openai".to_string());
        let gateway = match gateway_str.to_lowercase().as_str() {
            "openai" => GatewayConfig::OpenAi {
                api_key: openai_api_key.clone().ok_or_else(|| {
                    ConfigError::MissingVar("OPENAI_API_KEY must be set for the openai gateway".into())
                })?,
            },
            "http" => GatewayConfig::Http {
                api_url: api_url.clone().ok_or_else(|| {
                    ConfigError::MissingVar("COACH_API_URL must be set for the http gateway".into())
                })?,
            },
            _ => {
                return Err(ConfigError::InvalidValue {
                    var: "COACH_GATEWAY".into(),
                    value: gateway_str,
                });
            }
        };

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            gateway,
            api_url,
            openai_api_key,
            openai_base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            chat_model: var("CHAT_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            transcription_model: var("TRANSCRIPTION_MODEL")
                .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            locale: var("COACH_LOCALE").unwrap_or_else(|| "en-US".to_string()),
            input_device: var("COACH_INPUT_DEVICE"),
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn openai_gateway_is_the_default() {
        let config = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(
            config.gateway,
            GatewayConfig::OpenAi {
                api_key: "sk-test".into()
            }
        );
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.transcription_model, "whisper-1");
        assert_eq!(config.locale, "en-US");
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.api_url.is_none());
    }

    #[test]
    fn openai_gateway_needs_a_key() {
        let err = load(&[("OPENAI_API_KEY", "   ")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(_)));
    }

    #[test]
    fn http_gateway_needs_a_url() {
        assert!(matches!(
            load(&[("COACH_GATEWAY", "http")]),
            Err(ConfigError::MissingVar(_))
        ));

        let config = load(&[
            ("COACH_GATEWAY", "HTTP"),
            ("COACH_API_URL", "http://localhost:3000/api"),
        ])
        .unwrap();
        assert_eq!(
            config.gateway,
            GatewayConfig::Http {
                api_url: "http://localhost:3000/api".into()
            }
        );
        assert!(config.openai_api_key.is_none());
    }

    #[test]
    fn unknown_gateway_is_rejected() {
        let err = load(&[("COACH_GATEWAY", "carrier-pigeon")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn bad_log_level_is_rejected() {
        let err = load(&[("OPENAI_API_KEY", "k"), ("RUST_LOG", "chatty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel(level) if level == "chatty"));
    }
}
