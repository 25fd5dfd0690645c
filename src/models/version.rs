use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSnapshot {
    pub question_id: i64,
    pub question_text: String,
    pub answer_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaVersion {
    pub id: i64,
    pub idea_id: i64,
    pub title: String,
    pub description: String,
    pub answers_snapshot: Vec<AnswerSnapshot>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIdeaVersion {
    pub idea_id: i64,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub answers_snapshot: Vec<AnswerSnapshot>,
}
