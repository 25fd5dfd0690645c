//! Point-in-time snapshots of an idea and restoring from them.
//!
//! A version stores the idea's title, description and every answer together
//! with the question text as it read when the snapshot was taken, so history
//! stays readable after questions change.

use serde::Serialize;
use tracing::debug;

use crate::db::Tables;
use crate::error::{AppError, Result};
use crate::models::{
    AnswerPatch, AnswerSnapshot, Idea, IdeaPatch, IdeaVersion, NewAnswer, NewIdeaVersion,
    Question,
};

/// Snapshot of the idea's current answers, each joined to its question text.
/// Answers whose question no longer exists are left out.
pub fn snapshot_answers(tables: &dyn Tables, idea_id: i64) -> Result<Vec<AnswerSnapshot>> {
    let mut snapshot = Vec::new();
    for answer in tables.list_answers(idea_id)? {
        if let Some(question) = tables.get_question(answer.question_id)? {
            snapshot.push(AnswerSnapshot {
                question_id: answer.question_id,
                question_text: question.text,
                answer_text: answer.text,
            });
        }
    }
    Ok(snapshot)
}

pub fn create_version(
    tables: &mut dyn Tables,
    idea_id: i64,
    title: String,
    description: String,
    answers_snapshot: Vec<AnswerSnapshot>,
) -> Result<IdeaVersion> {
    tables.insert_version(NewIdeaVersion {
        idea_id,
        title,
        description,
        answers_snapshot,
    })
}

/// Records the idea exactly as it stands now, answers included.
pub fn record_current_state(tables: &mut dyn Tables, idea: &Idea) -> Result<IdeaVersion> {
    let snapshot = snapshot_answers(tables, idea.id)?;
    create_version(
        tables,
        idea.id,
        idea.title.clone(),
        idea.description.clone(),
        snapshot,
    )
}

pub fn list_versions(tables: &dyn Tables, idea_id: i64) -> Result<Vec<IdeaVersion>> {
    tables.list_versions(idea_id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub idea: Idea,
    /// The new history entry marking the restore point.
    pub version: IdeaVersion,
    /// Snapshot entries that matched no live question and were skipped.
    pub skipped: usize,
}

/// Rolls the idea back to `version_id`.
///
/// Title and description are overwritten (status is not). Each snapshot
/// answer is written onto the live question it resolves to, updating the
/// idea's existing answer or adding one. Answers to questions the snapshot
/// does not mention are kept. The post-restore state is recorded as a new
/// version.
pub fn restore(tables: &mut dyn Tables, idea_id: i64, version_id: i64) -> Result<RestoreOutcome> {
    if tables.get_idea(idea_id)?.is_none() {
        return Err(AppError::not_found("Idea", idea_id));
    }
    let version = tables
        .list_versions(idea_id)?
        .into_iter()
        .find(|v| v.id == version_id)
        .ok_or_else(|| AppError::not_found("Version", version_id))?;

    let patch = IdeaPatch {
        title: Some(version.title.clone()),
        description: Some(version.description.clone()),
        ..Default::default()
    };
    tables
        .update_idea(idea_id, &patch)?
        .ok_or_else(|| AppError::not_found("Idea", idea_id))?;

    let mut existing = tables.list_answers(idea_id)?;
    let mut skipped = 0;
    for entry in &version.answers_snapshot {
        let Some(question) = resolve_question(tables, entry)? else {
            debug!(
                idea_id,
                question_id = entry.question_id,
                "snapshot answer matches no live question, skipping"
            );
            skipped += 1;
            continue;
        };

        match existing.iter_mut().find(|a| a.question_id == question.id) {
            Some(answer) => {
                let patch = AnswerPatch {
                    text: Some(entry.answer_text.clone()),
                };
                tables.update_answer(answer.id, &patch)?;
                answer.text = entry.answer_text.clone();
            }
            None => {
                let answer = tables.insert_answer(NewAnswer {
                    idea_id,
                    question_id: question.id,
                    text: entry.answer_text.clone(),
                })?;
                existing.push(answer);
            }
        }
    }

    let idea = tables
        .get_idea(idea_id)?
        .ok_or_else(|| AppError::not_found("Idea", idea_id))?;
    let version = record_current_state(tables, &idea)?;
    Ok(RestoreOutcome {
        idea,
        version,
        skipped,
    })
}

/// Finds the live question a snapshot entry refers to: by id first, then by
/// exact text for snapshots taken before question ids were reassigned.
fn resolve_question(tables: &dyn Tables, entry: &AnswerSnapshot) -> Result<Option<Question>> {
    if let Some(question) = resolve_by_id(tables, entry)? {
        return Ok(Some(question));
    }
    resolve_by_text(tables, entry)
}

fn resolve_by_id(tables: &dyn Tables, entry: &AnswerSnapshot) -> Result<Option<Question>> {
    tables.get_question(entry.question_id)
}

fn resolve_by_text(tables: &dyn Tables, entry: &AnswerSnapshot) -> Result<Option<Question>> {
    tables.find_question_by_text(&entry.question_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemTables;
    use crate::models::{IdeaStatus, NewIdea, NewQuestion};

    fn seed_idea(tables: &mut MemTables) -> Idea {
        let idea = tables
            .insert_idea(NewIdea {
                title: "X".to_string(),
                description: "Y".to_string(),
                category_id: None,
                user_id: 1,
                status: IdeaStatus::Draft,
                media_urls: Vec::new(),
            })
            .unwrap();
        record_current_state(tables, &idea).unwrap();
        idea
    }

    fn answer(tables: &mut MemTables, idea_id: i64, question_id: i64, text: &str) {
        tables
            .insert_answer(NewAnswer {
                idea_id,
                question_id,
                text: text.to_string(),
            })
            .unwrap();
    }

    fn answer_text(tables: &MemTables, idea_id: i64, question_id: i64) -> Option<String> {
        tables
            .list_answers(idea_id)
            .unwrap()
            .into_iter()
            .find(|a| a.question_id == question_id)
            .map(|a| a.text)
    }

    #[test]
    fn test_snapshot_joins_question_text() {
        let mut tables = MemTables::default();
        let idea = seed_idea(&mut tables);
        let q = tables.insert_question(NewQuestion::generic("Who is it for?")).unwrap();
        answer(&mut tables, idea.id, q.id, "Hikers");

        let snapshot = snapshot_answers(&tables, idea.id).unwrap();
        assert_eq!(
            snapshot,
            vec![AnswerSnapshot {
                question_id: q.id,
                question_text: "Who is it for?".to_string(),
                answer_text: "Hikers".to_string(),
            }]
        );
    }

    #[test]
    fn test_restore_overwrites_and_keeps_unmentioned_answers() {
        let mut tables = MemTables::default();
        let idea = seed_idea(&mut tables);
        let q1 = tables.insert_question(NewQuestion::generic("Q1")).unwrap();
        let q2 = tables.insert_question(NewQuestion::generic("Q2")).unwrap();

        answer(&mut tables, idea.id, q1.id, "old one");
        let checkpoint = record_current_state(&mut tables, &idea).unwrap();

        tables
            .update_idea(
                idea.id,
                &IdeaPatch {
                    title: Some("X2".to_string()),
                    status: Some(IdeaStatus::Completed),
                    ..Default::default()
                },
            )
            .unwrap();
        let a1 = tables.list_answers(idea.id).unwrap()[0].clone();
        tables
            .update_answer(a1.id, &AnswerPatch { text: Some("new one".to_string()) })
            .unwrap();
        answer(&mut tables, idea.id, q2.id, "extra");

        let before = tables.list_versions(idea.id).unwrap().len();
        let outcome = restore(&mut tables, idea.id, checkpoint.id).unwrap();

        assert_eq!(outcome.idea.title, "X");
        assert_eq!(outcome.idea.description, "Y");
        assert_eq!(outcome.idea.status, IdeaStatus::Completed);
        assert_eq!(answer_text(&tables, idea.id, q1.id).as_deref(), Some("old one"));
        assert_eq!(answer_text(&tables, idea.id, q2.id).as_deref(), Some("extra"));
        assert_eq!(tables.list_versions(idea.id).unwrap().len(), before + 1);
        assert_eq!(outcome.version.answers_snapshot.len(), 2);
    }

    #[test]
    fn test_restore_falls_back_to_question_text() {
        let mut tables = MemTables::default();
        let idea = seed_idea(&mut tables);
        let live = tables
            .insert_question(NewQuestion::generic("What problem does this solve?"))
            .unwrap();
        let version = create_version(
            &mut tables,
            idea.id,
            "X".to_string(),
            "Y".to_string(),
            vec![AnswerSnapshot {
                question_id: 999,
                question_text: "What problem does this solve?".to_string(),
                answer_text: "Cold tea".to_string(),
            }],
        )
        .unwrap();

        let outcome = restore(&mut tables, idea.id, version.id).unwrap();
        assert_eq!(outcome.skipped, 0);
        assert_eq!(answer_text(&tables, idea.id, live.id).as_deref(), Some("Cold tea"));
    }

    #[test]
    fn test_restore_skips_unresolvable_entries() {
        let mut tables = MemTables::default();
        let idea = seed_idea(&mut tables);
        let version = create_version(
            &mut tables,
            idea.id,
            "X".to_string(),
            "Y".to_string(),
            vec![AnswerSnapshot {
                question_id: 42,
                question_text: "Deleted question".to_string(),
                answer_text: "lost".to_string(),
            }],
        )
        .unwrap();

        let outcome = restore(&mut tables, idea.id, version.id).unwrap();
        assert_eq!(outcome.skipped, 1);
        assert!(tables.list_answers(idea.id).unwrap().is_empty());
    }

    #[test]
    fn test_restore_missing_idea_or_version() {
        let mut tables = MemTables::default();
        let idea = seed_idea(&mut tables);
        let other = seed_idea(&mut tables);
        let foreign = tables.list_versions(other.id).unwrap()[0].id;

        assert!(matches!(
            restore(&mut tables, 77, 1),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            restore(&mut tables, idea.id, 12345),
            Err(AppError::NotFound(_))
        ));
        // A version of another idea does not count.
        assert!(matches!(
            restore(&mut tables, idea.id, foreign),
            Err(AppError::NotFound(_))
        ));
    }
}
