use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const KNOWN_PROVIDERS: &[&str] = &["openai", "gemini", "mistral", "anthropic"];

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub id: i64,
    pub provider: String,
    pub api_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewApiConfig {
    pub provider: String,
    pub api_key: String,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
}

fn default_is_active() -> bool {
    true
}

impl NewApiConfig {
    pub fn validate(&self) -> Result<()> {
        validate_provider(&self.provider)?;
        if self.api_key.trim().is_empty() {
            return Err(AppError::Validation("apiKey must not be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfigPatch {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub is_active: Option<bool>,
}

impl ApiConfigPatch {
    pub fn validate(&self) -> Result<()> {
        if let Some(provider) = &self.provider {
            validate_provider(provider)?;
        }
        if matches!(&self.api_key, Some(key) if key.trim().is_empty()) {
            return Err(AppError::Validation("apiKey must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn apply(&self, config: &mut ApiConfig) {
        if let Some(provider) = &self.provider {
            config.provider = provider.clone();
        }
        if let Some(api_key) = &self.api_key {
            config.api_key = api_key.clone();
        }
        if let Some(is_active) = self.is_active {
            config.is_active = is_active;
        }
    }
}

pub(crate) fn validate_provider(provider: &str) -> Result<()> {
    if KNOWN_PROVIDERS.contains(&provider) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "unknown provider '{provider}', expected one of {}",
            KNOWN_PROVIDERS.join(", ")
        )))
    }
}

/// What the API hands back for a stored config: the key itself never leaves
/// the server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfigView {
    pub id: i64,
    pub provider: String,
    pub masked_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ApiConfig> for ApiConfigView {
    fn from(config: &ApiConfig) -> Self {
        Self {
            id: config.id,
            provider: config.provider.clone(),
            masked_key: mask_key(&config.api_key),
            is_active: config.is_active,
            created_at: config.created_at,
            updated_at: config.updated_at,
        }
    }
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
