pub mod assistant;

pub use assistant::{
    answer_quality, check_connection, suggest_follow_ups, ConnectionCheck, BASE_QUESTIONS,
};
