use std::collections::HashSet;

use crate::db::Tables;
use crate::error::{AppError, Result};
use crate::models::Question;

pub const MAX_SUGGESTED_QUESTIONS: usize = 5;

/// Picks the next round of questions for an idea.
///
/// The pool is every question of the idea's category plus all generic ones,
/// minus anything already answered. When the owner has self-learning on, the
/// pool is ordered by effectiveness (highest first, ties keep pool order).
pub fn select_questions(tables: &dyn Tables, idea_id: i64) -> Result<Vec<Question>> {
    let idea = tables
        .get_idea(idea_id)?
        .ok_or_else(|| AppError::not_found("Idea", idea_id))?;

    let answered: HashSet<i64> = tables
        .list_answers(idea_id)?
        .into_iter()
        .map(|a| a.question_id)
        .collect();
    let pool = tables.list_question_pool(idea.category_id)?;
    let self_learning = tables
        .get_settings(idea.user_id)?
        .is_some_and(|s| s.enable_self_learning);

    Ok(rank_candidates(pool, &answered, self_learning))
}

fn rank_candidates(
    pool: Vec<Question>,
    answered: &HashSet<i64>,
    self_learning: bool,
) -> Vec<Question> {
    let mut candidates: Vec<Question> = pool
        .into_iter()
        .filter(|q| !answered.contains(&q.id))
        .collect();
    if self_learning {
        // sort_by is stable
        candidates.sort_by(|a, b| b.effectiveness.cmp(&a.effectiveness));
    }
    candidates.truncate(MAX_SUGGESTED_QUESTIONS);
    candidates
}
