use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{
    Answer, AnswerPatch, ApiConfig, ApiConfigPatch, Category, Idea, IdeaPatch, IdeaVersion,
    NewAnswer, NewApiConfig, NewCategory, NewIdea, NewIdeaVersion, NewQuestion,
    NewQuestionFeedback, NewSettings, NewUser, Question, QuestionFeedback, Settings,
    SettingsPatch, User,
};

use super::{now, Storage, Tables};

/// Transient backend: everything lives for the lifetime of the process.
pub struct MemStorage {
    tables: Mutex<MemTables>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(MemTables::default()),
        }
    }

    fn run<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Tables) -> Result<R>,
    {
        let mut live = self
            .tables
            .lock()
            .map_err(|_| anyhow::anyhow!("in-memory storage lock poisoned"))?;
        let mut overlay = Overlay::new(&live);
        let result = f(&mut overlay)?;
        if let Some(working) = overlay.working {
            *live = working;
        }
        Ok(result)
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Tables) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.run(f)
    }
}

/// One transaction's view of the tables. Reads go to the live tables until
/// the first write, which copies them; the copy replaces the live tables only
/// when the transaction succeeds.
struct Overlay<'a> {
    live: &'a MemTables,
    working: Option<MemTables>,
}

impl<'a> Overlay<'a> {
    fn new(live: &'a MemTables) -> Self {
        Self {
            live,
            working: None,
        }
    }

    fn read(&self) -> &MemTables {
        self.working.as_ref().unwrap_or(self.live)
    }

    fn write(&mut self) -> &mut MemTables {
        let live = self.live;
        self.working.get_or_insert_with(|| live.clone())
    }
}

impl Tables for Overlay<'_> {
    fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.read().get_user(id)
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.read().find_user_by_username(username)
    }

    fn insert_user(&mut self, user: NewUser) -> Result<User> {
        self.write().insert_user(user)
    }

    fn list_categories(&self, user_id: Option<i64>) -> Result<Vec<Category>> {
        self.read().list_categories(user_id)
    }

    fn get_category(&self, id: i64) -> Result<Option<Category>> {
        self.read().get_category(id)
    }

    fn insert_category(&mut self, category: NewCategory) -> Result<Category> {
        self.write().insert_category(category)
    }

    fn list_ideas(&self, user_id: i64) -> Result<Vec<Idea>> {
        self.read().list_ideas(user_id)
    }

    fn get_idea(&self, id: i64) -> Result<Option<Idea>> {
        self.read().get_idea(id)
    }

    fn insert_idea(&mut self, idea: NewIdea) -> Result<Idea> {
        self.write().insert_idea(idea)
    }

    fn update_idea(&mut self, id: i64, patch: &IdeaPatch) -> Result<Option<Idea>> {
        self.write().update_idea(id, patch)
    }

    fn delete_idea(&mut self, id: i64) -> Result<bool> {
        self.write().delete_idea(id)
    }

    fn list_questions(&self) -> Result<Vec<Question>> {
        self.read().list_questions()
    }

    fn get_question(&self, id: i64) -> Result<Option<Question>> {
        self.read().get_question(id)
    }

    fn find_question_by_text(&self, text: &str) -> Result<Option<Question>> {
        self.read().find_question_by_text(text)
    }

    fn list_question_pool(&self, category_id: Option<i64>) -> Result<Vec<Question>> {
        self.read().list_question_pool(category_id)
    }

    fn count_questions(&self) -> Result<i64> {
        self.read().count_questions()
    }

    fn insert_question(&mut self, question: NewQuestion) -> Result<Question> {
        self.write().insert_question(question)
    }

    fn set_question_effectiveness(
        &mut self,
        id: i64,
        effectiveness: i64,
    ) -> Result<Option<Question>> {
        self.write().set_question_effectiveness(id, effectiveness)
    }

    fn list_answers(&self, idea_id: i64) -> Result<Vec<Answer>> {
        self.read().list_answers(idea_id)
    }

    fn get_answer(&self, id: i64) -> Result<Option<Answer>> {
        self.read().get_answer(id)
    }

    fn insert_answer(&mut self, answer: NewAnswer) -> Result<Answer> {
        self.write().insert_answer(answer)
    }

    fn update_answer(&mut self, id: i64, patch: &AnswerPatch) -> Result<Option<Answer>> {
        self.write().update_answer(id, patch)
    }

    fn list_versions(&self, idea_id: i64) -> Result<Vec<IdeaVersion>> {
        self.read().list_versions(idea_id)
    }

    fn insert_version(&mut self, version: NewIdeaVersion) -> Result<IdeaVersion> {
        self.write().insert_version(version)
    }

    fn list_feedback(&self, question_id: i64) -> Result<Vec<QuestionFeedback>> {
        self.read().list_feedback(question_id)
    }

    fn insert_feedback(&mut self, feedback: NewQuestionFeedback) -> Result<QuestionFeedback> {
        self.write().insert_feedback(feedback)
    }

    fn get_settings(&self, user_id: i64) -> Result<Option<Settings>> {
        self.read().get_settings(user_id)
    }

    fn insert_settings(&mut self, settings: NewSettings) -> Result<Settings> {
        self.write().insert_settings(settings)
    }

    fn update_settings(
        &mut self,
        user_id: i64,
        patch: &SettingsPatch,
    ) -> Result<Option<Settings>> {
        self.write().update_settings(user_id, patch)
    }

    fn list_api_configs(&self) -> Result<Vec<ApiConfig>> {
        self.read().list_api_configs()
    }

    fn get_api_config(&self, id: i64) -> Result<Option<ApiConfig>> {
        self.read().get_api_config(id)
    }

    fn find_active_api_config(&self, provider: &str) -> Result<Option<ApiConfig>> {
        self.read().find_active_api_config(provider)
    }

    fn insert_api_config(&mut self, config: NewApiConfig) -> Result<ApiConfig> {
        self.write().insert_api_config(config)
    }

    fn update_api_config(
        &mut self,
        id: i64,
        patch: &ApiConfigPatch,
    ) -> Result<Option<ApiConfig>> {
        self.write().update_api_config(id, patch)
    }

    fn delete_api_config(&mut self, id: i64) -> Result<bool> {
        self.write().delete_api_config(id)
    }
}

/// Per-entity maps keyed by id. `BTreeMap` keeps iteration in id order,
/// which is insertion order since ids only grow.
#[derive(Debug, Clone, Default)]
pub struct MemTables {
    users: BTreeMap<i64, User>,
    categories: BTreeMap<i64, Category>,
    ideas: BTreeMap<i64, Idea>,
    questions: BTreeMap<i64, Question>,
    answers: BTreeMap<i64, Answer>,
    versions: BTreeMap<i64, IdeaVersion>,
    feedback: BTreeMap<i64, QuestionFeedback>,
    settings: BTreeMap<i64, Settings>,
    api_configs: BTreeMap<i64, ApiConfig>,
    ids: IdCounters,
}

#[derive(Debug, Clone, Default)]
struct IdCounters {
    user: i64,
    category: i64,
    idea: i64,
    question: i64,
    answer: i64,
    version: i64,
    feedback: i64,
    settings: i64,
    api_config: i64,
}

fn next(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

impl MemTables {
    fn check_single_active(&self, provider: &str, skip_id: Option<i64>) -> Result<()> {
        let clash = self.api_configs.values().any(|c| {
            c.is_active && c.provider == provider && Some(c.id) != skip_id
        });
        if clash {
            return Err(AppError::Conflict(format!(
                "an active configuration for provider '{provider}' already exists"
            )));
        }
        Ok(())
    }
}

impl Tables for MemTables {
    fn get_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.users.get(&id).cloned())
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.users.values().find(|u| u.username == username).cloned())
    }

    fn insert_user(&mut self, user: NewUser) -> Result<User> {
        if self.users.values().any(|u| u.username == user.username) {
            return Err(AppError::Conflict("Username already exists".to_string()));
        }
        let id = next(&mut self.ids.user);
        let user = User {
            id,
            username: user.username,
            password_hash: user.password_hash,
            email: user.email,
        };
        self.users.insert(id, user.clone());
        Ok(user)
    }

    fn list_categories(&self, user_id: Option<i64>) -> Result<Vec<Category>> {
        Ok(self
            .categories
            .values()
            .filter(|c| c.user_id.is_none() || (user_id.is_some() && c.user_id == user_id))
            .cloned()
            .collect())
    }

    fn get_category(&self, id: i64) -> Result<Option<Category>> {
        Ok(self.categories.get(&id).cloned())
    }

    fn insert_category(&mut self, category: NewCategory) -> Result<Category> {
        let id = next(&mut self.ids.category);
        let category = Category {
            id,
            name: category.name,
            user_id: category.user_id,
        };
        self.categories.insert(id, category.clone());
        Ok(category)
    }

    fn list_ideas(&self, user_id: i64) -> Result<Vec<Idea>> {
        Ok(self
            .ideas
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect())
    }

    fn get_idea(&self, id: i64) -> Result<Option<Idea>> {
        Ok(self.ideas.get(&id).cloned())
    }

    fn insert_idea(&mut self, idea: NewIdea) -> Result<Idea> {
        let id = next(&mut self.ids.idea);
        let created_at = now();
        let idea = Idea {
            id,
            title: idea.title,
            description: idea.description,
            category_id: idea.category_id,
            user_id: idea.user_id,
            status: idea.status,
            created_at,
            updated_at: created_at,
            media_urls: idea.media_urls,
        };
        self.ideas.insert(id, idea.clone());
        Ok(idea)
    }

    fn update_idea(&mut self, id: i64, patch: &IdeaPatch) -> Result<Option<Idea>> {
        let Some(idea) = self.ideas.get_mut(&id) else {
            return Ok(None);
        };
        patch.apply(idea);
        idea.updated_at = now();
        Ok(Some(idea.clone()))
    }

    fn delete_idea(&mut self, id: i64) -> Result<bool> {
        if self.ideas.remove(&id).is_none() {
            return Ok(false);
        }
        self.answers.retain(|_, a| a.idea_id != id);
        self.versions.retain(|_, v| v.idea_id != id);
        Ok(true)
    }

    fn list_questions(&self) -> Result<Vec<Question>> {
        Ok(self.questions.values().cloned().collect())
    }

    fn get_question(&self, id: i64) -> Result<Option<Question>> {
        Ok(self.questions.get(&id).cloned())
    }

    fn find_question_by_text(&self, text: &str) -> Result<Option<Question>> {
        Ok(self.questions.values().find(|q| q.text == text).cloned())
    }

    fn list_question_pool(&self, category_id: Option<i64>) -> Result<Vec<Question>> {
        Ok(self
            .questions
            .values()
            .filter(|q| q.is_generic || (category_id.is_some() && q.category_id == category_id))
            .cloned()
            .collect())
    }

    fn count_questions(&self) -> Result<i64> {
        Ok(self.questions.len() as i64)
    }

    fn insert_question(&mut self, question: NewQuestion) -> Result<Question> {
        let id = next(&mut self.ids.question);
        let question = Question {
            id,
            text: question.text,
            category_id: question.category_id,
            effectiveness: question.effectiveness,
            is_generic: question.is_generic,
        };
        self.questions.insert(id, question.clone());
        Ok(question)
    }

    fn set_question_effectiveness(
        &mut self,
        id: i64,
        effectiveness: i64,
    ) -> Result<Option<Question>> {
        Ok(self.questions.get_mut(&id).map(|q| {
            q.effectiveness = effectiveness;
            q.clone()
        }))
    }

    fn list_answers(&self, idea_id: i64) -> Result<Vec<Answer>> {
        Ok(self
            .answers
            .values()
            .filter(|a| a.idea_id == idea_id)
            .cloned()
            .collect())
    }

    fn get_answer(&self, id: i64) -> Result<Option<Answer>> {
        Ok(self.answers.get(&id).cloned())
    }

    fn insert_answer(&mut self, answer: NewAnswer) -> Result<Answer> {
        let id = next(&mut self.ids.answer);
        let answer = Answer {
            id,
            idea_id: answer.idea_id,
            question_id: answer.question_id,
            text: answer.text,
            created_at: now(),
        };
        self.answers.insert(id, answer.clone());
        Ok(answer)
    }

    fn update_answer(&mut self, id: i64, patch: &AnswerPatch) -> Result<Option<Answer>> {
        Ok(self.answers.get_mut(&id).map(|a| {
            if let Some(text) = &patch.text {
                a.text = text.clone();
            }
            a.clone()
        }))
    }

    fn list_versions(&self, idea_id: i64) -> Result<Vec<IdeaVersion>> {
        let mut versions: Vec<IdeaVersion> = self
            .versions
            .values()
            .filter(|v| v.idea_id == idea_id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(versions)
    }

    fn insert_version(&mut self, version: NewIdeaVersion) -> Result<IdeaVersion> {
        let id = next(&mut self.ids.version);
        let version = IdeaVersion {
            id,
            idea_id: version.idea_id,
            title: version.title,
            description: version.description,
            answers_snapshot: version.answers_snapshot,
            created_at: now(),
        };
        self.versions.insert(id, version.clone());
        Ok(version)
    }

    fn list_feedback(&self, question_id: i64) -> Result<Vec<QuestionFeedback>> {
        Ok(self
            .feedback
            .values()
            .filter(|f| f.question_id == question_id)
            .cloned()
            .collect())
    }

    fn insert_feedback(&mut self, feedback: NewQuestionFeedback) -> Result<QuestionFeedback> {
        let id = next(&mut self.ids.feedback);
        let feedback = QuestionFeedback {
            id,
            question_id: feedback.question_id,
            user_id: feedback.user_id,
            helpful: feedback.helpful,
            created_at: now(),
        };
        self.feedback.insert(id, feedback.clone());
        Ok(feedback)
    }

    fn get_settings(&self, user_id: i64) -> Result<Option<Settings>> {
        Ok(self.settings.values().find(|s| s.user_id == user_id).cloned())
    }

    fn insert_settings(&mut self, settings: NewSettings) -> Result<Settings> {
        if self.settings.values().any(|s| s.user_id == settings.user_id) {
            return Err(AppError::Conflict(format!(
                "settings for user {} already exist",
                settings.user_id
            )));
        }
        let id = next(&mut self.ids.settings);
        let settings = settings.into_settings(id);
        self.settings.insert(id, settings.clone());
        Ok(settings)
    }

    fn update_settings(
        &mut self,
        user_id: i64,
        patch: &SettingsPatch,
    ) -> Result<Option<Settings>> {
        Ok(self
            .settings
            .values_mut()
            .find(|s| s.user_id == user_id)
            .map(|s| {
                patch.apply(s);
                s.clone()
            }))
    }

    fn list_api_configs(&self) -> Result<Vec<ApiConfig>> {
        Ok(self.api_configs.values().cloned().collect())
    }

    fn get_api_config(&self, id: i64) -> Result<Option<ApiConfig>> {
        Ok(self.api_configs.get(&id).cloned())
    }

    fn find_active_api_config(&self, provider: &str) -> Result<Option<ApiConfig>> {
        Ok(self
            .api_configs
            .values()
            .find(|c| c.is_active && c.provider == provider)
            .cloned())
    }

    fn insert_api_config(&mut self, config: NewApiConfig) -> Result<ApiConfig> {
        if config.is_active {
            self.check_single_active(&config.provider, None)?;
        }
        let id = next(&mut self.ids.api_config);
        let created_at = now();
        let config = ApiConfig {
            id,
            provider: config.provider,
            api_key: config.api_key,
            is_active: config.is_active,
            created_at,
            updated_at: created_at,
        };
        self.api_configs.insert(id, config.clone());
        Ok(config)
    }

    fn update_api_config(
        &mut self,
        id: i64,
        patch: &ApiConfigPatch,
    ) -> Result<Option<ApiConfig>> {
        let Some(mut config) = self.api_configs.get(&id).cloned() else {
            return Ok(None);
        };
        patch.apply(&mut config);
        if config.is_active {
            self.check_single_active(&config.provider, Some(id))?;
        }
        config.updated_at = now();
        self.api_configs.insert(id, config.clone());
        Ok(Some(config))
    }

    fn delete_api_config(&mut self, id: i64) -> Result<bool> {
        Ok(self.api_configs.remove(&id).is_some())
    }
}
