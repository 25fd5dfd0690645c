use tracing::debug;

use crate::db::Tables;
use crate::error::{AppError, Result};
use crate::models::{NewQuestionFeedback, QuestionFeedback, MAX_EFFECTIVENESS};

/// `round(5 * positive / total)` with halves rounded up; `None` when there is
/// no feedback at all.
pub fn effectiveness(positive: usize, total: usize) -> Option<i64> {
    if total == 0 {
        return None;
    }
    let positive = positive.min(total) as i64;
    let total = total as i64;
    Some((2 * MAX_EFFECTIVENESS * positive + total) / (2 * total))
}

/// Stores the feedback and recomputes the question's effectiveness from its
/// whole feedback history. The question, and the user when one is named,
/// must exist.
pub fn record_feedback(
    tables: &mut dyn Tables,
    feedback: NewQuestionFeedback,
) -> Result<QuestionFeedback> {
    let question_id = feedback.question_id;
    if tables.get_question(question_id)?.is_none() {
        return Err(AppError::not_found("Question", question_id));
    }
    if let Some(user_id) = feedback.user_id {
        if tables.get_user(user_id)?.is_none() {
            return Err(AppError::not_found("User", user_id));
        }
    }

    let stored = tables.insert_feedback(feedback)?;
    rescore(tables, question_id)?;
    Ok(stored)
}

fn rescore(tables: &mut dyn Tables, question_id: i64) -> Result<()> {
    let history = tables.list_feedback(question_id)?;
    let positive = history.iter().filter(|f| f.helpful).count();
    let Some(score) = effectiveness(positive, history.len()) else {
        return Ok(());
    };
    debug!(question_id, positive, total = history.len(), score, "rescored question");
    tables.set_question_effectiveness(question_id, score)?;
    Ok(())
}
