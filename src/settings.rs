use serde::{Deserialize, Serialize};

use crate::prompt::DEFAULT_HISTORY_WINDOW;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_MAX_TOKENS: u32 = 500;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is not set; the completion endpoint cannot start without it")]
    MissingApiKey,
    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelParams {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Fully resolved parameters for one completion request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub history_window: usize,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl CompletionSettings {
    /// Overrides win over the built-in defaults, field by field.
    pub fn resolve(overrides: &ModelParams) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let settings = Self {
            model: overrides.model.clone().unwrap_or(defaults.model),
            temperature: overrides.temperature.unwrap_or(defaults.temperature),
            max_tokens: overrides.max_tokens.unwrap_or(defaults.max_tokens),
            history_window: defaults.history_window,
        };
        if !(0.0..=2.0).contains(&settings.temperature) {
            return Err(ConfigError::Invalid {
                name: "temperature",
                reason: format!("{} is outside 0.0..=2.0", settings.temperature),
            });
        }
        if settings.max_tokens == 0 {
            return Err(ConfigError::Invalid { name: "max_tokens", reason: "must be positive".into() });
        }
        if settings.model.trim().is_empty() {
            return Err(ConfigError::Invalid { name: "model", reason: "must not be empty".into() });
        }
        Ok(settings)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub completion: CompletionSettings,
}

impl ServerSettings {
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey),
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }
}
