use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::ai::{self, ConnectionCheck};
use crate::db::{Storage, Tables};
use crate::error::{AppError, Result};
use crate::ideas::{self, RestoreOutcome};
use crate::models::{
    hash_password, Answer, AnswerPatch, AnswerWithQuestion, ApiConfigPatch, ApiConfigView,
    Category, Credentials, Idea, IdeaPatch, IdeaVersion, NewAnswer, NewApiConfig, NewCategory,
    NewIdea, NewIdeaVersion, NewQuestion, NewQuestionFeedback, NewSettings, Question,
    QuestionFeedback, Settings, SettingsPatch, UserProfile,
};

/// A saved answer plus the assistant's read on how substantial it is.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedAnswer {
    #[serde(flatten)]
    pub answer: Answer,
    pub quality: u8,
}

/// Application operations. Each public method runs as a single storage
/// transaction.
pub struct App<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> Clone for App<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: Storage> App<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }

    // Accounts

    pub async fn register(&self, credentials: Credentials) -> Result<UserProfile> {
        credentials.validate()?;
        let new_user = credentials.into_new_user();
        let profile = self
            .storage
            .transaction(move |tables| {
                if tables.find_user_by_username(&new_user.username)?.is_some() {
                    return Err(AppError::Conflict(format!(
                        "Username '{}' is already taken",
                        new_user.username
                    )));
                }
                let user = tables.insert_user(new_user)?;
                tables.insert_settings(NewSettings::defaults_for(user.id))?;
                Ok(UserProfile::from(&user))
            })
            .await?;
        info!(user_id = profile.id, username = %profile.username, "registered user");
        Ok(profile)
    }

    pub async fn login(&self, credentials: Credentials) -> Result<UserProfile> {
        credentials.validate()?;
        self.storage
            .transaction(move |tables| {
                let digest = hash_password(&credentials.password);
                match tables.find_user_by_username(credentials.username.trim())? {
                    Some(user) if user.password_hash == digest => Ok(UserProfile::from(&user)),
                    _ => Err(AppError::Unauthorized(
                        "Invalid username or password".to_string(),
                    )),
                }
            })
            .await
    }

    // Categories

    pub async fn list_categories(&self, user_id: Option<i64>) -> Result<Vec<Category>> {
        self.storage
            .transaction(move |tables| tables.list_categories(user_id))
            .await
    }

    pub async fn create_category(&self, category: NewCategory) -> Result<Category> {
        category.validate()?;
        self.storage
            .transaction(move |tables| {
                if let Some(user_id) = category.user_id {
                    require_user(tables, user_id)?;
                }
                tables.insert_category(category)
            })
            .await
    }

    // Ideas

    pub async fn list_ideas(&self, user_id: i64) -> Result<Vec<Idea>> {
        self.storage
            .transaction(move |tables| tables.list_ideas(user_id))
            .await
    }

    pub async fn get_idea(&self, id: i64) -> Result<Idea> {
        self.storage
            .transaction(move |tables| require_idea(tables, id))
            .await
    }

    /// Creates the idea together with its first, answer-less version.
    pub async fn create_idea(&self, idea: NewIdea) -> Result<Idea> {
        idea.validate()?;
        let idea = self
            .storage
            .transaction(move |tables| {
                require_user(tables, idea.user_id)?;
                if let Some(category_id) = idea.category_id {
                    require_category(tables, category_id)?;
                }
                let idea = tables.insert_idea(idea)?;
                ideas::versions::create_version(
                    tables,
                    idea.id,
                    idea.title.clone(),
                    idea.description.clone(),
                    Vec::new(),
                )?;
                Ok(idea)
            })
            .await?;
        info!(idea_id = idea.id, user_id = idea.user_id, "created idea");
        Ok(idea)
    }

    /// Applies the patch and snapshots the result as a new version.
    pub async fn update_idea(&self, id: i64, patch: IdeaPatch) -> Result<Idea> {
        patch.validate()?;
        self.storage
            .transaction(move |tables| {
                if let Some(Some(category_id)) = patch.category_id {
                    require_category(tables, category_id)?;
                }
                let idea = tables
                    .update_idea(id, &patch)?
                    .ok_or_else(|| AppError::not_found("Idea", id))?;
                ideas::record_current_state(tables, &idea)?;
                Ok(idea)
            })
            .await
    }

    pub async fn delete_idea(&self, id: i64) -> Result<()> {
        let deleted = self
            .storage
            .transaction(move |tables| tables.delete_idea(id))
            .await?;
        if !deleted {
            return Err(AppError::not_found("Idea", id));
        }
        info!(idea_id = id, "deleted idea");
        Ok(())
    }

    // Questions

    /// Every question, or the pool an idea of `category_id` would draw from.
    pub async fn list_questions(&self, category_id: Option<i64>) -> Result<Vec<Question>> {
        self.storage
            .transaction(move |tables| match category_id {
                Some(category_id) => tables.list_question_pool(Some(category_id)),
                None => tables.list_questions(),
            })
            .await
    }

    pub async fn create_question(&self, question: NewQuestion) -> Result<Question> {
        question.validate()?;
        self.storage
            .transaction(move |tables| {
                if let Some(category_id) = question.category_id {
                    require_category(tables, category_id)?;
                }
                tables.insert_question(question)
            })
            .await
    }

    /// Inserts the built-in generic questions into an empty question table.
    /// Returns how many were added.
    pub async fn seed_default_questions(&self) -> Result<usize> {
        let seeded = self
            .storage
            .transaction(|tables| {
                if tables.count_questions()? > 0 {
                    return Ok(0);
                }
                for text in ai::BASE_QUESTIONS {
                    tables.insert_question(NewQuestion::generic(*text))?;
                }
                Ok(ai::BASE_QUESTIONS.len())
            })
            .await?;
        if seeded > 0 {
            info!(count = seeded, "seeded default questions");
        }
        Ok(seeded)
    }

    // Answers

    pub async fn list_answers(&self, idea_id: i64) -> Result<Vec<AnswerWithQuestion>> {
        self.storage
            .transaction(move |tables| {
                let mut joined = Vec::new();
                for answer in tables.list_answers(idea_id)? {
                    let question_text = tables
                        .get_question(answer.question_id)?
                        .map(|q| q.text)
                        .unwrap_or_else(|| "Unknown question".to_string());
                    joined.push(AnswerWithQuestion {
                        answer,
                        question_text,
                    });
                }
                Ok(joined)
            })
            .await
    }

    /// Saves the idea's answer to a question, overwriting an earlier answer
    /// to the same question. The idea's `updated_at` is bumped.
    pub async fn save_answer(&self, answer: NewAnswer) -> Result<SavedAnswer> {
        let answer = self
            .storage
            .transaction(move |tables| {
                require_idea(tables, answer.idea_id)?;
                if tables.get_question(answer.question_id)?.is_none() {
                    return Err(AppError::not_found("Question", answer.question_id));
                }

                let existing = tables
                    .list_answers(answer.idea_id)?
                    .into_iter()
                    .find(|a| a.question_id == answer.question_id);
                let idea_id = answer.idea_id;
                let saved = match existing {
                    Some(previous) => {
                        let patch = AnswerPatch {
                            text: Some(answer.text),
                        };
                        tables
                            .update_answer(previous.id, &patch)?
                            .ok_or_else(|| AppError::not_found("Answer", previous.id))?
                    }
                    None => tables.insert_answer(answer)?,
                };
                tables.update_idea(idea_id, &IdeaPatch::default())?;
                Ok(saved)
            })
            .await?;

        let quality = ai::answer_quality(&answer.text);
        Ok(SavedAnswer { answer, quality })
    }

    pub async fn update_answer(&self, id: i64, patch: AnswerPatch) -> Result<Answer> {
        patch.validate()?;
        self.storage
            .transaction(move |tables| {
                let answer = tables
                    .update_answer(id, &patch)?
                    .ok_or_else(|| AppError::not_found("Answer", id))?;
                tables.update_idea(answer.idea_id, &IdeaPatch::default())?;
                Ok(answer)
            })
            .await
    }

    // Versions

    pub async fn list_versions(&self, idea_id: i64) -> Result<Vec<IdeaVersion>> {
        self.storage
            .transaction(move |tables| ideas::list_versions(tables, idea_id))
            .await
    }

    /// Manual checkpoint with caller-supplied content.
    pub async fn create_version(&self, version: NewIdeaVersion) -> Result<IdeaVersion> {
        self.storage
            .transaction(move |tables| {
                require_idea(tables, version.idea_id)?;
                tables.insert_version(version)
            })
            .await
    }

    pub async fn restore_version(&self, idea_id: i64, version_id: i64) -> Result<RestoreOutcome> {
        let outcome = self
            .storage
            .transaction(move |tables| ideas::restore(tables, idea_id, version_id))
            .await?;
        info!(
            idea_id,
            version_id,
            new_version_id = outcome.version.id,
            skipped = outcome.skipped,
            "restored idea"
        );
        Ok(outcome)
    }

    // Question rounds

    pub async fn generate_questions(&self, idea_id: i64) -> Result<Vec<Question>> {
        self.storage
            .transaction(move |tables| ideas::select_questions(tables, idea_id))
            .await
    }

    pub async fn suggest_questions(&self, idea_id: i64) -> Result<Vec<String>> {
        self.storage
            .transaction(move |tables| {
                let idea = require_idea(tables, idea_id)?;
                let category_name = match idea.category_id {
                    Some(id) => tables.get_category(id)?.map(|c| c.name),
                    None => None,
                };
                Ok(ai::suggest_follow_ups(
                    &idea.title,
                    &idea.description,
                    category_name.as_deref(),
                ))
            })
            .await
    }

    pub async fn record_feedback(&self, feedback: NewQuestionFeedback) -> Result<QuestionFeedback> {
        self.storage
            .transaction(move |tables| ideas::record_feedback(tables, feedback))
            .await
    }

    // Settings

    pub async fn get_settings(&self, user_id: i64) -> Result<Settings> {
        self.storage
            .transaction(move |tables| {
                tables
                    .get_settings(user_id)?
                    .ok_or_else(|| settings_not_found(user_id))
            })
            .await
    }

    pub async fn update_settings(&self, user_id: i64, patch: SettingsPatch) -> Result<Settings> {
        patch.validate()?;
        self.storage
            .transaction(move |tables| {
                tables
                    .update_settings(user_id, &patch)?
                    .ok_or_else(|| settings_not_found(user_id))
            })
            .await
    }

    // Provider configs

    pub async fn list_api_configs(&self) -> Result<Vec<ApiConfigView>> {
        let configs = self
            .storage
            .transaction(|tables| tables.list_api_configs())
            .await?;
        Ok(configs.iter().map(ApiConfigView::from).collect())
    }

    /// Stores a provider key. An active config for the same provider gets its
    /// key replaced instead of a second active row being added.
    pub async fn save_api_config(&self, config: NewApiConfig) -> Result<ApiConfigView> {
        config.validate()?;
        let stored = self
            .storage
            .transaction(move |tables| {
                let active = if config.is_active {
                    tables.find_active_api_config(&config.provider)?
                } else {
                    None
                };
                match active {
                    Some(existing) => {
                        let patch = ApiConfigPatch {
                            api_key: Some(config.api_key),
                            ..Default::default()
                        };
                        tables
                            .update_api_config(existing.id, &patch)?
                            .ok_or_else(|| AppError::not_found("API config", existing.id))
                    }
                    None => tables.insert_api_config(config),
                }
            })
            .await?;
        info!(config_id = stored.id, provider = %stored.provider, "saved API config");
        Ok(ApiConfigView::from(&stored))
    }

    pub async fn update_api_config(&self, id: i64, patch: ApiConfigPatch) -> Result<ApiConfigView> {
        patch.validate()?;
        let stored = self
            .storage
            .transaction(move |tables| {
                tables
                    .update_api_config(id, &patch)?
                    .ok_or_else(|| AppError::not_found("API config", id))
            })
            .await?;
        Ok(ApiConfigView::from(&stored))
    }

    pub async fn delete_api_config(&self, id: i64) -> Result<()> {
        let deleted = self
            .storage
            .transaction(move |tables| tables.delete_api_config(id))
            .await?;
        if !deleted {
            return Err(AppError::not_found("API config", id));
        }
        info!(config_id = id, "deleted API config");
        Ok(())
    }

    pub async fn test_connection(&self, provider: String) -> Result<ConnectionCheck> {
        let config = self
            .storage
            .transaction(move |tables| {
                tables.find_active_api_config(&provider)?.ok_or_else(|| {
                    AppError::NotFound(format!("No active API config for provider '{provider}'"))
                })
            })
            .await?;
        Ok(ai::check_connection(&config))
    }
}

fn require_user(tables: &dyn Tables, id: i64) -> Result<()> {
    match tables.get_user(id)? {
        Some(_) => Ok(()),
        None => Err(AppError::not_found("User", id)),
    }
}

fn require_category(tables: &dyn Tables, id: i64) -> Result<()> {
    match tables.get_category(id)? {
        Some(_) => Ok(()),
        None => Err(AppError::not_found("Category", id)),
    }
}

fn settings_not_found(user_id: i64) -> AppError {
    AppError::NotFound(format!("Settings for user {user_id} not found"))
}

fn require_idea(tables: &dyn Tables, id: i64) -> Result<Idea> {
    tables
        .get_idea(id)?
        .ok_or_else(|| AppError::not_found("Idea", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemStorage, Repository};
    use crate::models::IdeaStatus;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    fn credentials(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
            email: None,
        }
    }

    fn new_idea(user_id: i64, title: &str, description: &str) -> NewIdea {
        NewIdea {
            title: title.to_string(),
            description: description.to_string(),
            category_id: None,
            user_id,
            status: IdeaStatus::default(),
            media_urls: Vec::new(),
        }
    }

    async fn seeded_app() -> (App<MemStorage>, UserProfile) {
        let app = App::new(MemStorage::new());
        app.seed_default_questions().await.unwrap();
        let user = app.register(credentials("ada", "secret")).await.unwrap();
        (app, user)
    }

    #[tokio::test]
    async fn test_register_login_and_default_settings() {
        let (app, user) = seeded_app().await;

        let settings = app.get_settings(user.id).await.unwrap();
        assert!(settings.enable_self_learning);
        assert_eq!(settings.preferred_provider, "openai");

        assert_eq!(app.login(credentials("ada", "secret")).await.unwrap(), user);
        assert!(matches!(
            app.login(credentials("ada", "wrong")).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            app.register(credentials("ada", "other")).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_settings_patch_validates_provider() {
        let (app, user) = seeded_app().await;
        let bad = SettingsPatch {
            preferred_provider: Some("skynet".to_string()),
            ..Default::default()
        };
        assert_err!(app.update_settings(user.id, bad).await);

        let good = SettingsPatch {
            preferred_provider: Some("gemini".to_string()),
            ..Default::default()
        };
        let settings = assert_ok!(app.update_settings(user.id, good).await);
        assert_eq!(settings.preferred_provider, "gemini");
        assert!(settings.enable_self_learning);
    }

    #[tokio::test]
    async fn test_create_idea_records_empty_version() {
        let (app, user) = seeded_app().await;
        let idea = app.create_idea(new_idea(user.id, "X", "Y")).await.unwrap();

        assert_eq!(idea.status, IdeaStatus::Draft);
        let versions = app.list_versions(idea.id).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].title, "X");
        assert!(versions[0].answers_snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_create_idea_for_unknown_user() {
        let app = App::new(MemStorage::new());
        assert!(matches!(
            app.create_idea(new_idea(9, "X", "Y")).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_answer_update_restore_round_trip() {
        let (app, user) = seeded_app().await;
        let idea = app.create_idea(new_idea(user.id, "X", "Y")).await.unwrap();

        let saved = app
            .save_answer(NewAnswer {
                idea_id: idea.id,
                question_id: 7,
                text: "Nobody does it with solar yet".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(saved.answer.question_id, 7);

        app.update_idea(
            idea.id,
            IdeaPatch {
                title: Some("X v2".to_string()),
                description: Some("Y v2".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let versions = app.list_versions(idea.id).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0]
            .answers_snapshot
            .iter()
            .any(|entry| entry.question_id == 7));

        let first = versions[1].id;
        let outcome = app.restore_version(idea.id, first).await.unwrap();
        assert_eq!(outcome.idea.title, "X");
        assert_eq!(outcome.idea.description, "Y");
        assert_eq!(app.list_versions(idea.id).await.unwrap().len(), 3);

        let answers = app.list_answers(idea.id).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].answer.question_id, 7);
        assert_eq!(answers[0].question_text, ai::BASE_QUESTIONS[6]);
    }

    #[tokio::test]
    async fn test_save_answer_overwrites_same_question() {
        let (app, user) = seeded_app().await;
        let idea = app.create_idea(new_idea(user.id, "X", "Y")).await.unwrap();

        let first = app
            .save_answer(NewAnswer {
                idea_id: idea.id,
                question_id: 1,
                text: "hikers".to_string(),
            })
            .await
            .unwrap();
        let second = app
            .save_answer(NewAnswer {
                idea_id: idea.id,
                question_id: 1,
                text: "campers".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(first.answer.id, second.answer.id);
        let answers = app.list_answers(idea.id).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].answer.text, "campers");

        let bumped = app.get_idea(idea.id).await.unwrap();
        assert!(bumped.updated_at >= idea.updated_at);
    }

    #[tokio::test]
    async fn test_save_answer_rejects_unknown_question() {
        let (app, user) = seeded_app().await;
        let idea = app.create_idea(new_idea(user.id, "X", "Y")).await.unwrap();
        let result = app
            .save_answer(NewAnswer {
                idea_id: idea.id,
                question_id: 404,
                text: "?".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(app.list_answers(idea.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seeding_only_fills_an_empty_table() {
        let app = App::new(MemStorage::new());
        assert_eq!(assert_ok!(app.seed_default_questions().await), 8);
        assert_eq!(assert_ok!(app.seed_default_questions().await), 0);
        assert_eq!(app.list_questions(None).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_feedback_moves_generated_order() {
        let (app, user) = seeded_app().await;
        let idea = app.create_idea(new_idea(user.id, "X", "Y")).await.unwrap();

        for helpful in [true, true, false, true] {
            app.record_feedback(NewQuestionFeedback {
                question_id: 8,
                user_id: Some(user.id),
                helpful,
            })
            .await
            .unwrap();
        }

        let questions = app.generate_questions(idea.id).await.unwrap();
        assert_eq!(questions.len(), 5);
        assert_eq!(questions[0].id, 8);
        assert_eq!(questions[0].effectiveness, 4);
    }

    async fn assert_unknown_feedback_user_rejected<S: Storage>(app: App<S>) {
        app.seed_default_questions().await.unwrap();
        let result = app
            .record_feedback(NewQuestionFeedback {
                question_id: 1,
                user_id: Some(999),
                helpful: true,
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)), "{err}");
        assert_eq!(err.status(), 404);
        let questions = app.list_questions(None).await.unwrap();
        assert_eq!(questions[0].effectiveness, 0);
    }

    #[tokio::test]
    async fn test_feedback_from_unknown_user_is_not_found_on_both_backends() {
        assert_unknown_feedback_user_rejected(App::new(MemStorage::new())).await;

        let dir = tempdir().unwrap();
        let db_path = dir.path().join("ideas.db");
        let repo = Repository::new(db_path.to_str().unwrap()).await.unwrap();
        assert_unknown_feedback_user_rejected(App::new(repo)).await;
    }

    #[tokio::test]
    async fn test_api_config_save_replaces_active_key() {
        let app = App::new(MemStorage::new());
        let first = app
            .save_api_config(NewApiConfig {
                provider: "openai".to_string(),
                api_key: "sk-first-key-0001".to_string(),
                is_active: true,
            })
            .await
            .unwrap();
        let second = app
            .save_api_config(NewApiConfig {
                provider: "openai".to_string(),
                api_key: "sk-second-key-0002".to_string(),
                is_active: true,
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.masked_key, "sk-...0002");
        assert_eq!(app.list_api_configs().await.unwrap().len(), 1);
        assert!(app.test_connection("openai".to_string()).await.unwrap().ok);
        assert!(matches!(
            app.test_connection("gemini".to_string()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sqlite_backend_end_to_end() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("ideas.db");
        let repo = Repository::new(db_path.to_str().unwrap()).await.unwrap();
        let app = App::new(repo);

        app.seed_default_questions().await.unwrap();
        let user = app.register(credentials("grace", "pw")).await.unwrap();
        let idea = app.create_idea(new_idea(user.id, "X", "Y")).await.unwrap();
        app.save_answer(NewAnswer {
            idea_id: idea.id,
            question_id: 7,
            text: "cheaper".to_string(),
        })
        .await
        .unwrap();
        app.update_idea(
            idea.id,
            IdeaPatch {
                title: Some("Z".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let versions = app.list_versions(idea.id).await.unwrap();
        let outcome = app
            .restore_version(idea.id, versions[1].id)
            .await
            .unwrap();
        assert_eq!(outcome.idea.title, "X");
        assert_eq!(app.list_versions(idea.id).await.unwrap().len(), 3);

        assert!(matches!(
            app.register(credentials("grace", "again")).await,
            Err(AppError::Conflict(_))
        ));

        assert_ok!(app.delete_idea(idea.id).await);
        assert_err!(app.delete_idea(idea.id).await);
        assert!(matches!(
            app.get_idea(idea.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(app.list_versions(idea.id).await.unwrap().is_empty());
    }
}
