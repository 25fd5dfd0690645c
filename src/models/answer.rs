use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub id: i64,
    pub idea_id: i64,
    pub question_id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnswer {
    pub idea_id: i64,
    pub question_id: i64,
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPatch {
    pub text: Option<String>,
}

impl AnswerPatch {
    pub fn validate(&self) -> Result<()> {
        if self.text.is_none() {
            return Err(AppError::Validation("text is required".to_string()));
        }
        Ok(())
    }
}

/// An answer joined with the text of the question it responds to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerWithQuestion {
    #[serde(flatten)]
    pub answer: Answer,
    pub question_text: String,
}
