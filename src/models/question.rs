use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const MAX_EFFECTIVENESS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: i64,
    pub text: String,
    pub category_id: Option<i64>,
    pub effectiveness: i64,
    pub is_generic: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuestion {
    pub text: String,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub effectiveness: i64,
    #[serde(default = "default_is_generic")]
    pub is_generic: bool,
}

fn default_is_generic() -> bool {
    true
}

impl NewQuestion {
    pub fn generic(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category_id: None,
            effectiveness: 0,
            is_generic: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(AppError::Validation("question text must not be empty".to_string()));
        }
        if !(0..=MAX_EFFECTIVENESS).contains(&self.effectiveness) {
            return Err(AppError::Validation(format!(
                "effectiveness must be between 0 and {MAX_EFFECTIVENESS}"
            )));
        }
        Ok(())
    }
}
