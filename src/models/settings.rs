use serde::{Deserialize, Serialize};

use super::api_config::validate_provider;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub id: i64,
    pub user_id: i64,
    pub enable_self_learning: bool,
    pub store_question_effectiveness: bool,
    pub improve_questions_based_on_answers: bool,
    pub theme: String,
    pub language: String,
    pub version: String,
    pub preferred_provider: String,
    pub openai_model: String,
    pub gemini_model: String,
    pub mistral_model: String,
    pub anthropic_model: String,
}

/// Insertable settings row. Every default for a user's settings lives here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSettings {
    pub user_id: i64,
    pub enable_self_learning: bool,
    pub store_question_effectiveness: bool,
    pub improve_questions_based_on_answers: bool,
    pub theme: String,
    pub language: String,
    pub version: String,
    pub preferred_provider: String,
    pub openai_model: String,
    pub gemini_model: String,
    pub mistral_model: String,
    pub anthropic_model: String,
}

impl NewSettings {
    pub fn defaults_for(user_id: i64) -> Self {
        Self {
            user_id,
            enable_self_learning: true,
            store_question_effectiveness: true,
            improve_questions_based_on_answers: true,
            theme: "light".to_string(),
            language: "en".to_string(),
            version: "1.0.0".to_string(),
            preferred_provider: "openai".to_string(),
            openai_model: "gpt-4o".to_string(),
            gemini_model: "gemini-pro".to_string(),
            mistral_model: "mistral-large".to_string(),
            anthropic_model: "claude-3-opus".to_string(),
        }
    }

    pub fn into_settings(self, id: i64) -> Settings {
        Settings {
            id,
            user_id: self.user_id,
            enable_self_learning: self.enable_self_learning,
            store_question_effectiveness: self.store_question_effectiveness,
            improve_questions_based_on_answers: self.improve_questions_based_on_answers,
            theme: self.theme,
            language: self.language,
            version: self.version,
            preferred_provider: self.preferred_provider,
            openai_model: self.openai_model,
            gemini_model: self.gemini_model,
            mistral_model: self.mistral_model,
            anthropic_model: self.anthropic_model,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub enable_self_learning: Option<bool>,
    pub store_question_effectiveness: Option<bool>,
    pub improve_questions_based_on_answers: Option<bool>,
    pub theme: Option<String>,
    pub language: Option<String>,
    pub version: Option<String>,
    pub preferred_provider: Option<String>,
    pub openai_model: Option<String>,
    pub gemini_model: Option<String>,
    pub mistral_model: Option<String>,
    pub anthropic_model: Option<String>,
}

impl SettingsPatch {
    pub fn validate(&self) -> Result<()> {
        if let Some(provider) = &self.preferred_provider {
            validate_provider(provider)?;
        }
        Ok(())
    }

    pub fn apply(&self, settings: &mut Settings) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        set(&mut settings.enable_self_learning, &self.enable_self_learning);
        set(
            &mut settings.store_question_effectiveness,
            &self.store_question_effectiveness,
        );
        set(
            &mut settings.improve_questions_based_on_answers,
            &self.improve_questions_based_on_answers,
        );
        set(&mut settings.theme, &self.theme);
        set(&mut settings.language, &self.language);
        set(&mut settings.version, &self.version);
        set(&mut settings.preferred_provider, &self.preferred_provider);
        set(&mut settings.openai_model, &self.openai_model);
        set(&mut settings.gemini_model, &self.gemini_model);
        set(&mut settings.mistral_model, &self.mistral_model);
        set(&mut settings.anthropic_model, &self.anthropic_model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_patch_rejects_unknown_provider() {
        let patch = SettingsPatch {
            preferred_provider: Some("skynet".to_string()),
            ..Default::default()
        };
        assert!(matches!(patch.validate(), Err(AppError::Validation(_))));

        let patch = SettingsPatch {
            preferred_provider: Some("mistral".to_string()),
            theme: Some("dark".to_string()),
            ..Default::default()
        };
        assert!(patch.validate().is_ok());
    }
}
