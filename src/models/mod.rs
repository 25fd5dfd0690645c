mod answer;
mod api_config;
mod category;
mod feedback;
mod idea;
mod question;
mod settings;
mod user;
mod version;

pub use answer::{Answer, AnswerPatch, AnswerWithQuestion, NewAnswer};
pub use api_config::{ApiConfig, ApiConfigPatch, ApiConfigView, NewApiConfig};
pub use category::{Category, NewCategory};
pub use feedback::{NewQuestionFeedback, QuestionFeedback};
pub use idea::{Idea, IdeaPatch, IdeaStatus, NewIdea};
pub use question::{NewQuestion, Question, MAX_EFFECTIVENESS};
pub use settings::{NewSettings, Settings, SettingsPatch};
pub use user::{hash_password, Credentials, NewUser, User, UserProfile};
pub use version::{AnswerSnapshot, IdeaVersion, NewIdeaVersion};

use serde::{Deserialize, Deserializer};

/// Lets a patch tell a missing field apart from an explicit `null`.
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
