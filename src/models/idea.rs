use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdeaStatus {
    #[default]
    Draft,
    InProgress,
    Completed,
}

impl IdeaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdeaStatus::Draft => "draft",
            IdeaStatus::InProgress => "in_progress",
            IdeaStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(IdeaStatus::Draft),
            "in_progress" => Some(IdeaStatus::InProgress),
            "completed" => Some(IdeaStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Idea {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub category_id: Option<i64>,
    pub user_id: i64,
    pub status: IdeaStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub media_urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIdea {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub category_id: Option<i64>,
    pub user_id: i64,
    #[serde(default)]
    pub status: IdeaStatus,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

impl NewIdea {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("title must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Partial update for an idea. `category_id` distinguishes "leave alone"
/// (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "super::double_option")]
    pub category_id: Option<Option<i64>>,
    pub status: Option<IdeaStatus>,
    pub media_urls: Option<Vec<String>>,
}

impl IdeaPatch {
    pub fn validate(&self) -> Result<()> {
        if matches!(&self.title, Some(title) if title.trim().is_empty()) {
            return Err(AppError::Validation("title must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn apply(&self, idea: &mut Idea) {
        if let Some(title) = &self.title {
            idea.title = title.clone();
        }
        if let Some(description) = &self.description {
            idea.description = description.clone();
        }
        if let Some(category_id) = self.category_id {
            idea.category_id = category_id;
        }
        if let Some(status) = self.status {
            idea.status = status;
        }
        if let Some(media_urls) = &self.media_urls {
            idea.media_urls = media_urls.clone();
        }
    }
}
