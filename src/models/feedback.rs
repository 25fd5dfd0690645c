use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionFeedback {
    pub id: i64,
    pub question_id: i64,
    pub user_id: Option<i64>,
    pub helpful: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuestionFeedback {
    pub question_id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    pub helpful: bool,
}
