use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection as SqliteConnection, ErrorCode, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{
    Answer, AnswerPatch, ApiConfig, ApiConfigPatch, Category, Idea, IdeaPatch, IdeaStatus,
    IdeaVersion, NewAnswer, NewApiConfig, NewCategory, NewIdea, NewIdeaVersion, NewQuestion,
    NewQuestionFeedback, NewSettings, NewUser, Question, QuestionFeedback, Settings,
    SettingsPatch, User,
};

use super::schema::SCHEMA;
use super::{format_timestamp, now, parse_timestamp, Storage, Tables};

const IDEA_COLUMNS: &str =
    "id, title, description, category_id, user_id, status, created_at, updated_at, media_urls";
const QUESTION_COLUMNS: &str = "id, text, category_id, effectiveness, is_generic";
const ANSWER_COLUMNS: &str = "id, idea_id, question_id, text, created_at";
const VERSION_COLUMNS: &str = "id, idea_id, title, description, answers_snapshot, created_at";
const FEEDBACK_COLUMNS: &str = "id, question_id, user_id, helpful, created_at";
const SETTINGS_COLUMNS: &str = "id, user_id, enable_self_learning, store_question_effectiveness, \
     improve_questions_based_on_answers, theme, language, version, preferred_provider, \
     openai_model, gemini_model, mistral_model, anthropic_model";
const API_CONFIG_COLUMNS: &str = "id, provider, api_key, is_active, created_at, updated_at";

/// Durable SQLite backend.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl Storage for Repository {
    async fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Tables) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let outcome = {
                    let mut tables = SqliteTables { conn: &tx };
                    f(&mut tables)
                };
                // Dropping an uncommitted transaction rolls it back.
                if outcome.is_ok() {
                    tx.commit()?;
                }
                Ok(outcome)
            })
            .await?;
        outcome
    }
}

/// `Tables` over one open SQLite transaction.
struct SqliteTables<'c> {
    conn: &'c SqliteConnection,
}

impl SqliteTables<'_> {
    fn query_all<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: fn(&Row) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, map)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn query_one<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: fn(&Row) -> rusqlite::Result<T>,
    ) -> Result<Option<T>> {
        let row = self.conn.query_row(sql, params, map).optional()?;
        Ok(row)
    }
}

impl Tables for SqliteTables<'_> {
    // User operations

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.query_one(
            "SELECT id, username, password_hash, email FROM users WHERE id = ?1",
            params![id],
            user_from_row,
        )
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.query_one(
            "SELECT id, username, password_hash, email FROM users WHERE username = ?1",
            params![username],
            user_from_row,
        )
    }

    fn insert_user(&mut self, user: NewUser) -> Result<User> {
        self.conn
            .execute(
                "INSERT INTO users (username, password_hash, email) VALUES (?1, ?2, ?3)",
                params![user.username, user.password_hash, user.email],
            )
            .map_err(|e| conflict_on_constraint(e, "Username already exists"))?;
        Ok(User {
            id: self.conn.last_insert_rowid(),
            username: user.username,
            password_hash: user.password_hash,
            email: user.email,
        })
    }

    // Category operations

    fn list_categories(&self, user_id: Option<i64>) -> Result<Vec<Category>> {
        self.query_all(
            "SELECT id, name, user_id FROM categories
             WHERE user_id IS NULL OR user_id = ?1
             ORDER BY id",
            params![user_id],
            category_from_row,
        )
    }

    fn get_category(&self, id: i64) -> Result<Option<Category>> {
        self.query_one(
            "SELECT id, name, user_id FROM categories WHERE id = ?1",
            params![id],
            category_from_row,
        )
    }

    fn insert_category(&mut self, category: NewCategory) -> Result<Category> {
        self.conn.execute(
            "INSERT INTO categories (name, user_id) VALUES (?1, ?2)",
            params![category.name, category.user_id],
        )?;
        Ok(Category {
            id: self.conn.last_insert_rowid(),
            name: category.name,
            user_id: category.user_id,
        })
    }

    // Idea operations

    fn list_ideas(&self, user_id: i64) -> Result<Vec<Idea>> {
        self.query_all(
            &format!("SELECT {IDEA_COLUMNS} FROM ideas WHERE user_id = ?1 ORDER BY id"),
            params![user_id],
            idea_from_row,
        )
    }

    fn get_idea(&self, id: i64) -> Result<Option<Idea>> {
        self.query_one(
            &format!("SELECT {IDEA_COLUMNS} FROM ideas WHERE id = ?1"),
            params![id],
            idea_from_row,
        )
    }

    fn insert_idea(&mut self, idea: NewIdea) -> Result<Idea> {
        let created_at = now();
        let media_urls = serde_json::to_string(&idea.media_urls)?;
        self.conn.execute(
            "INSERT INTO ideas (title, description, category_id, user_id, status,
                                created_at, updated_at, media_urls)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)",
            params![
                idea.title,
                idea.description,
                idea.category_id,
                idea.user_id,
                idea.status.as_str(),
                format_timestamp(&created_at),
                media_urls,
            ],
        )?;
        Ok(Idea {
            id: self.conn.last_insert_rowid(),
            title: idea.title,
            description: idea.description,
            category_id: idea.category_id,
            user_id: idea.user_id,
            status: idea.status,
            created_at,
            updated_at: created_at,
            media_urls: idea.media_urls,
        })
    }

    fn update_idea(&mut self, id: i64, patch: &IdeaPatch) -> Result<Option<Idea>> {
        let Some(mut idea) = self.get_idea(id)? else {
            return Ok(None);
        };
        patch.apply(&mut idea);
        idea.updated_at = now();
        self.conn.execute(
            "UPDATE ideas SET title = ?1, description = ?2, category_id = ?3, status = ?4,
                    media_urls = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                idea.title,
                idea.description,
                idea.category_id,
                idea.status.as_str(),
                serde_json::to_string(&idea.media_urls)?,
                format_timestamp(&idea.updated_at),
                id,
            ],
        )?;
        Ok(Some(idea))
    }

    fn delete_idea(&mut self, id: i64) -> Result<bool> {
        // Delete related data first
        self.conn
            .execute("DELETE FROM answers WHERE idea_id = ?1", params![id])?;
        self.conn
            .execute("DELETE FROM idea_versions WHERE idea_id = ?1", params![id])?;
        let deleted = self
            .conn
            .execute("DELETE FROM ideas WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    // Question operations

    fn list_questions(&self) -> Result<Vec<Question>> {
        self.query_all(
            &format!("SELECT {QUESTION_COLUMNS} FROM questions ORDER BY id"),
            [],
            question_from_row,
        )
    }

    fn get_question(&self, id: i64) -> Result<Option<Question>> {
        self.query_one(
            &format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ?1"),
            params![id],
            question_from_row,
        )
    }

    fn find_question_by_text(&self, text: &str) -> Result<Option<Question>> {
        self.query_one(
            &format!(
                "SELECT {QUESTION_COLUMNS} FROM questions WHERE text = ?1 ORDER BY id LIMIT 1"
            ),
            params![text],
            question_from_row,
        )
    }

    fn list_question_pool(&self, category_id: Option<i64>) -> Result<Vec<Question>> {
        // A NULL category never equals anything, leaving only generic questions.
        self.query_all(
            &format!(
                "SELECT {QUESTION_COLUMNS} FROM questions
                 WHERE category_id = ?1 OR is_generic = 1
                 ORDER BY id"
            ),
            params![category_id],
            question_from_row,
        )
    }

    fn count_questions(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))?;
        Ok(count)
    }

    fn insert_question(&mut self, question: NewQuestion) -> Result<Question> {
        self.conn.execute(
            "INSERT INTO questions (text, category_id, effectiveness, is_generic)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                question.text,
                question.category_id,
                question.effectiveness,
                question.is_generic,
            ],
        )?;
        Ok(Question {
            id: self.conn.last_insert_rowid(),
            text: question.text,
            category_id: question.category_id,
            effectiveness: question.effectiveness,
            is_generic: question.is_generic,
        })
    }

    fn set_question_effectiveness(
        &mut self,
        id: i64,
        effectiveness: i64,
    ) -> Result<Option<Question>> {
        self.conn.execute(
            "UPDATE questions SET effectiveness = ?1 WHERE id = ?2",
            params![effectiveness, id],
        )?;
        self.get_question(id)
    }

    // Answer operations

    fn list_answers(&self, idea_id: i64) -> Result<Vec<Answer>> {
        self.query_all(
            &format!("SELECT {ANSWER_COLUMNS} FROM answers WHERE idea_id = ?1 ORDER BY id"),
            params![idea_id],
            answer_from_row,
        )
    }

    fn get_answer(&self, id: i64) -> Result<Option<Answer>> {
        self.query_one(
            &format!("SELECT {ANSWER_COLUMNS} FROM answers WHERE id = ?1"),
            params![id],
            answer_from_row,
        )
    }

    fn insert_answer(&mut self, answer: NewAnswer) -> Result<Answer> {
        let created_at = now();
        self.conn.execute(
            "INSERT INTO answers (idea_id, question_id, text, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                answer.idea_id,
                answer.question_id,
                answer.text,
                format_timestamp(&created_at),
            ],
        )?;
        Ok(Answer {
            id: self.conn.last_insert_rowid(),
            idea_id: answer.idea_id,
            question_id: answer.question_id,
            text: answer.text,
            created_at,
        })
    }

    fn update_answer(&mut self, id: i64, patch: &AnswerPatch) -> Result<Option<Answer>> {
        if let Some(text) = &patch.text {
            self.conn.execute(
                "UPDATE answers SET text = ?1 WHERE id = ?2",
                params![text, id],
            )?;
        }
        self.get_answer(id)
    }

    // Version operations

    fn list_versions(&self, idea_id: i64) -> Result<Vec<IdeaVersion>> {
        self.query_all(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM idea_versions
                 WHERE idea_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ),
            params![idea_id],
            version_from_row,
        )
    }

    fn insert_version(&mut self, version: NewIdeaVersion) -> Result<IdeaVersion> {
        let created_at = now();
        let snapshot = serde_json::to_string(&version.answers_snapshot)?;
        self.conn.execute(
            "INSERT INTO idea_versions (idea_id, title, description, answers_snapshot, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                version.idea_id,
                version.title,
                version.description,
                snapshot,
                format_timestamp(&created_at),
            ],
        )?;
        Ok(IdeaVersion {
            id: self.conn.last_insert_rowid(),
            idea_id: version.idea_id,
            title: version.title,
            description: version.description,
            answers_snapshot: version.answers_snapshot,
            created_at,
        })
    }

    // Feedback operations

    fn list_feedback(&self, question_id: i64) -> Result<Vec<QuestionFeedback>> {
        self.query_all(
            &format!(
                "SELECT {FEEDBACK_COLUMNS} FROM question_feedback
                 WHERE question_id = ?1 ORDER BY id"
            ),
            params![question_id],
            feedback_from_row,
        )
    }

    fn insert_feedback(&mut self, feedback: NewQuestionFeedback) -> Result<QuestionFeedback> {
        let created_at = now();
        self.conn.execute(
            "INSERT INTO question_feedback (question_id, user_id, helpful, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                feedback.question_id,
                feedback.user_id,
                feedback.helpful,
                format_timestamp(&created_at),
            ],
        )?;
        Ok(QuestionFeedback {
            id: self.conn.last_insert_rowid(),
            question_id: feedback.question_id,
            user_id: feedback.user_id,
            helpful: feedback.helpful,
            created_at,
        })
    }

    // Settings operations

    fn get_settings(&self, user_id: i64) -> Result<Option<Settings>> {
        self.query_one(
            &format!("SELECT {SETTINGS_COLUMNS} FROM settings WHERE user_id = ?1"),
            params![user_id],
            settings_from_row,
        )
    }

    fn insert_settings(&mut self, settings: NewSettings) -> Result<Settings> {
        self.conn
            .execute(
                "INSERT INTO settings (user_id, enable_self_learning, store_question_effectiveness,
                        improve_questions_based_on_answers, theme, language, version,
                        preferred_provider, openai_model, gemini_model, mistral_model,
                        anthropic_model)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    settings.user_id,
                    settings.enable_self_learning,
                    settings.store_question_effectiveness,
                    settings.improve_questions_based_on_answers,
                    settings.theme,
                    settings.language,
                    settings.version,
                    settings.preferred_provider,
                    settings.openai_model,
                    settings.gemini_model,
                    settings.mistral_model,
                    settings.anthropic_model,
                ],
            )
            .map_err(|e| {
                let message = format!("settings for user {} already exist", settings.user_id);
                conflict_on_constraint(e, &message)
            })?;
        Ok(settings.into_settings(self.conn.last_insert_rowid()))
    }

    fn update_settings(
        &mut self,
        user_id: i64,
        patch: &SettingsPatch,
    ) -> Result<Option<Settings>> {
        let Some(mut settings) = self.get_settings(user_id)? else {
            return Ok(None);
        };
        patch.apply(&mut settings);
        self.conn.execute(
            "UPDATE settings SET enable_self_learning = ?1, store_question_effectiveness = ?2,
                    improve_questions_based_on_answers = ?3, theme = ?4, language = ?5,
                    version = ?6, preferred_provider = ?7, openai_model = ?8,
                    gemini_model = ?9, mistral_model = ?10, anthropic_model = ?11
             WHERE user_id = ?12",
            params![
                settings.enable_self_learning,
                settings.store_question_effectiveness,
                settings.improve_questions_based_on_answers,
                settings.theme,
                settings.language,
                settings.version,
                settings.preferred_provider,
                settings.openai_model,
                settings.gemini_model,
                settings.mistral_model,
                settings.anthropic_model,
                user_id,
            ],
        )?;
        Ok(Some(settings))
    }

    // API config operations

    fn list_api_configs(&self) -> Result<Vec<ApiConfig>> {
        self.query_all(
            &format!("SELECT {API_CONFIG_COLUMNS} FROM api_configs ORDER BY id"),
            [],
            api_config_from_row,
        )
    }

    fn get_api_config(&self, id: i64) -> Result<Option<ApiConfig>> {
        self.query_one(
            &format!("SELECT {API_CONFIG_COLUMNS} FROM api_configs WHERE id = ?1"),
            params![id],
            api_config_from_row,
        )
    }

    fn find_active_api_config(&self, provider: &str) -> Result<Option<ApiConfig>> {
        self.query_one(
            &format!(
                "SELECT {API_CONFIG_COLUMNS} FROM api_configs WHERE provider = ?1 AND is_active = 1"
            ),
            params![provider],
            api_config_from_row,
        )
    }

    fn insert_api_config(&mut self, config: NewApiConfig) -> Result<ApiConfig> {
        let created_at = now();
        self.conn
            .execute(
                "INSERT INTO api_configs (provider, api_key, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![
                    config.provider,
                    config.api_key,
                    config.is_active,
                    format_timestamp(&created_at),
                ],
            )
            .map_err(|e| active_provider_conflict(e, &config.provider))?;
        Ok(ApiConfig {
            id: self.conn.last_insert_rowid(),
            provider: config.provider,
            api_key: config.api_key,
            is_active: config.is_active,
            created_at,
            updated_at: created_at,
        })
    }

    fn update_api_config(
        &mut self,
        id: i64,
        patch: &ApiConfigPatch,
    ) -> Result<Option<ApiConfig>> {
        let Some(mut config) = self.get_api_config(id)? else {
            return Ok(None);
        };
        patch.apply(&mut config);
        config.updated_at = now();
        self.conn
            .execute(
                "UPDATE api_configs SET provider = ?1, api_key = ?2, is_active = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    config.provider,
                    config.api_key,
                    config.is_active,
                    format_timestamp(&config.updated_at),
                    id,
                ],
            )
            .map_err(|e| active_provider_conflict(e, &config.provider))?;
        Ok(Some(config))
    }

    fn delete_api_config(&mut self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM api_configs WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}

fn conflict_on_constraint(err: rusqlite::Error, message: &str) -> AppError {
    match err {
        rusqlite::Error::SqliteFailure(ref failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            AppError::Conflict(message.to_string())
        }
        other => other.into(),
    }
}

fn active_provider_conflict(err: rusqlite::Error, provider: &str) -> AppError {
    conflict_on_constraint(
        err,
        &format!("an active configuration for provider '{provider}' already exists"),
    )
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| conversion_error(idx, format!("bad timestamp '{raw}'")))
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        email: row.get(3)?,
    })
}

fn category_from_row(row: &Row) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        user_id: row.get(2)?,
    })
}

fn idea_from_row(row: &Row) -> rusqlite::Result<Idea> {
    let status: String = row.get(5)?;
    Ok(Idea {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        category_id: row.get(3)?,
        user_id: row.get(4)?,
        status: IdeaStatus::parse(&status)
            .ok_or_else(|| conversion_error(5, format!("unknown idea status '{status}'")))?,
        created_at: timestamp_column(row, 6)?,
        updated_at: timestamp_column(row, 7)?,
        media_urls: json_column(row, 8)?,
    })
}

fn question_from_row(row: &Row) -> rusqlite::Result<Question> {
    Ok(Question {
        id: row.get(0)?,
        text: row.get(1)?,
        category_id: row.get(2)?,
        effectiveness: row.get(3)?,
        is_generic: row.get(4)?,
    })
}

fn answer_from_row(row: &Row) -> rusqlite::Result<Answer> {
    Ok(Answer {
        id: row.get(0)?,
        idea_id: row.get(1)?,
        question_id: row.get(2)?,
        text: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
    })
}

fn version_from_row(row: &Row) -> rusqlite::Result<IdeaVersion> {
    Ok(IdeaVersion {
        id: row.get(0)?,
        idea_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        answers_snapshot: json_column(row, 4)?,
        created_at: timestamp_column(row, 5)?,
    })
}

fn feedback_from_row(row: &Row) -> rusqlite::Result<QuestionFeedback> {
    Ok(QuestionFeedback {
        id: row.get(0)?,
        question_id: row.get(1)?,
        user_id: row.get(2)?,
        helpful: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
    })
}

fn settings_from_row(row: &Row) -> rusqlite::Result<Settings> {
    Ok(Settings {
        id: row.get(0)?,
        user_id: row.get(1)?,
        enable_self_learning: row.get(2)?,
        store_question_effectiveness: row.get(3)?,
        improve_questions_based_on_answers: row.get(4)?,
        theme: row.get(5)?,
        language: row.get(6)?,
        version: row.get(7)?,
        preferred_provider: row.get(8)?,
        openai_model: row.get(9)?,
        gemini_model: row.get(10)?,
        mistral_model: row.get(11)?,
        anthropic_model: row.get(12)?,
    })
}

fn api_config_from_row(row: &Row) -> rusqlite::Result<ApiConfig> {
    Ok(ApiConfig {
        id: row.get(0)?,
        provider: row.get(1)?,
        api_key: row.get(2)?,
        is_active: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
        updated_at: timestamp_column(row, 5)?,
    })
}
