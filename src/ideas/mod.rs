pub mod scorer;
pub mod selector;
pub mod versions;

pub use scorer::record_feedback;
pub use selector::{select_questions, MAX_SUGGESTED_QUESTIONS};
pub use versions::{list_versions, record_current_state, restore, RestoreOutcome};
