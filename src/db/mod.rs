mod memory;
mod repository;
mod schema;

pub use memory::{MemStorage, MemTables};
pub use repository::Repository;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::Result;
use crate::models::{
    Answer, AnswerPatch, ApiConfig, ApiConfigPatch, Category, Idea, IdeaPatch, IdeaVersion,
    NewAnswer, NewApiConfig, NewCategory, NewIdea, NewIdeaVersion, NewQuestion,
    NewQuestionFeedback, NewSettings, NewUser, Question, QuestionFeedback, Settings,
    SettingsPatch, User,
};

/// Entity-level storage primitives.
///
/// Implementations run inside a [`Storage::transaction`], so every method is
/// synchronous and sees the writes made earlier in the same transaction.
/// Lookups by id return `Ok(None)` for a missing row; patch and delete
/// methods do the same (`Ok(None)` / `Ok(false)`) instead of erroring.
pub trait Tables {
    // Users
    fn get_user(&self, id: i64) -> Result<Option<User>>;
    fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;
    /// Fails with `Conflict` when the username is taken.
    fn insert_user(&mut self, user: NewUser) -> Result<User>;

    // Categories
    /// Global categories, plus the user's own when `user_id` is given.
    fn list_categories(&self, user_id: Option<i64>) -> Result<Vec<Category>>;
    fn get_category(&self, id: i64) -> Result<Option<Category>>;
    fn insert_category(&mut self, category: NewCategory) -> Result<Category>;

    // Ideas
    fn list_ideas(&self, user_id: i64) -> Result<Vec<Idea>>;
    fn get_idea(&self, id: i64) -> Result<Option<Idea>>;
    fn insert_idea(&mut self, idea: NewIdea) -> Result<Idea>;
    /// Applies the patch and bumps `updated_at`, even for an empty patch.
    fn update_idea(&mut self, id: i64, patch: &IdeaPatch) -> Result<Option<Idea>>;
    /// Removes the idea together with its answers and versions.
    fn delete_idea(&mut self, id: i64) -> Result<bool>;

    // Questions
    fn list_questions(&self) -> Result<Vec<Question>>;
    fn get_question(&self, id: i64) -> Result<Option<Question>>;
    /// First question (lowest id) whose text matches exactly.
    fn find_question_by_text(&self, text: &str) -> Result<Option<Question>>;
    /// Questions of the category plus every generic question, id ascending.
    fn list_question_pool(&self, category_id: Option<i64>) -> Result<Vec<Question>>;
    fn count_questions(&self) -> Result<i64>;
    fn insert_question(&mut self, question: NewQuestion) -> Result<Question>;
    fn set_question_effectiveness(
        &mut self,
        id: i64,
        effectiveness: i64,
    ) -> Result<Option<Question>>;

    // Answers
    fn list_answers(&self, idea_id: i64) -> Result<Vec<Answer>>;
    fn get_answer(&self, id: i64) -> Result<Option<Answer>>;
    fn insert_answer(&mut self, answer: NewAnswer) -> Result<Answer>;
    fn update_answer(&mut self, id: i64, patch: &AnswerPatch) -> Result<Option<Answer>>;

    // Versions
    /// Newest first: `created_at` descending, then id descending.
    fn list_versions(&self, idea_id: i64) -> Result<Vec<IdeaVersion>>;
    fn insert_version(&mut self, version: NewIdeaVersion) -> Result<IdeaVersion>;

    // Feedback
    fn list_feedback(&self, question_id: i64) -> Result<Vec<QuestionFeedback>>;
    fn insert_feedback(&mut self, feedback: NewQuestionFeedback) -> Result<QuestionFeedback>;

    // Settings
    fn get_settings(&self, user_id: i64) -> Result<Option<Settings>>;
    /// Fails with `Conflict` when the user already has settings.
    fn insert_settings(&mut self, settings: NewSettings) -> Result<Settings>;
    fn update_settings(&mut self, user_id: i64, patch: &SettingsPatch)
        -> Result<Option<Settings>>;

    // API configs
    fn list_api_configs(&self) -> Result<Vec<ApiConfig>>;
    fn get_api_config(&self, id: i64) -> Result<Option<ApiConfig>>;
    fn find_active_api_config(&self, provider: &str) -> Result<Option<ApiConfig>>;
    /// Fails with `Conflict` if it would leave two active configs for one provider.
    fn insert_api_config(&mut self, config: NewApiConfig) -> Result<ApiConfig>;
    /// Same `Conflict` rule as [`Tables::insert_api_config`].
    fn update_api_config(&mut self, id: i64, patch: &ApiConfigPatch)
        -> Result<Option<ApiConfig>>;
    fn delete_api_config(&mut self, id: i64) -> Result<bool>;
}

/// A persistence backend.
///
/// `transaction` runs `f` atomically: either every write made through the
/// `Tables` handle is kept, or (when `f` returns an error) none is.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Tables) -> Result<R> + Send + 'static,
        R: Send + 'static;
}

/// Timestamp format shared by both backends. Fixed-width microseconds keep
/// the stored text sortable.
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56.123456Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

/// Current time truncated to the stored precision, so values read back from
/// either backend compare equal to what was written.
pub(crate) fn now() -> DateTime<Utc> {
    let now = Utc::now();
    parse_timestamp(&format_timestamp(&now)).unwrap_or(now)
}
