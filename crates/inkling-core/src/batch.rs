//! Batch fragment updates.
//!
//! One request applies a single [`BatchAction`] to up to [`MAX_BATCH_IDS`]
//! fragments. Request validation ([`validate_request`]) runs before the
//! caller authenticates; [`apply_batch`] then performs the action against a
//! [`Store`] for one owner.
//!
//! Per-fragment mutation failures are counted in [`BatchOutcome::failed`]
//! instead of aborting the batch. Ownership and lookup errors are not
//! swallowed: they propagate as [`BatchError::Store`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AnalysisError;
use crate::store::Store;

pub const MAX_BATCH_IDS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchAction {
    MoveToStory,
    AddTags,
    RemoveTags,
}

impl BatchAction {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchAction::MoveToStory => "move_to_story",
            BatchAction::AddTags => "add_tags",
            BatchAction::RemoveTags => "remove_tags",
        }
    }
}

impl fmt::Display for BatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchAction {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, AnalysisError> {
        match s {
            "move_to_story" => Ok(BatchAction::MoveToStory),
            "add_tags" => Ok(BatchAction::AddTags),
            "remove_tags" => Ok(BatchAction::RemoveTags),
            other => Err(AnalysisError::InvalidAction(other.to_string())),
        }
    }
}

/// Wire shape of a batch update request. Every field is optional so that
/// missing values surface as domain errors rather than decode failures.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BatchUpdateRequest {
    #[serde(default)]
    pub ids: Option<Vec<String>>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub story_id: Option<String>,
    #[serde(default)]
    pub tag_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub updated: usize,
    pub failed: usize,
    pub action: BatchAction,
    pub total: usize,
    /// Messages of mutation errors counted in `failed`.
    #[serde(skip)]
    pub errors: Vec<String>,
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Rejected(#[from] AnalysisError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Checks the request shape: ids present, within bounds, and a known action.
///
/// Story and tag requirements are checked by [`apply_batch`], after the
/// caller has authenticated.
pub fn validate_request(req: &BatchUpdateRequest) -> Result<BatchAction, AnalysisError> {
    let ids = match req.ids.as_deref() {
        Some(ids) if !ids.is_empty() => ids,
        _ => return Err(AnalysisError::MissingIds),
    };
    if ids.len() > MAX_BATCH_IDS {
        return Err(AnalysisError::TooManyIds {
            max: MAX_BATCH_IDS,
            got: ids.len(),
        });
    }
    match req.action.as_deref() {
        Some(action) => action.parse(),
        None => Err(AnalysisError::InvalidAction(String::new())),
    }
}

fn required_tag_ids(req: &BatchUpdateRequest) -> Result<&[String], AnalysisError> {
    match req.tag_ids.as_deref() {
        Some(tags) if !tags.is_empty() => Ok(tags),
        _ => Err(AnalysisError::MissingTagIds),
    }
}

/// Applies an already validated batch action for `owner`.
pub async fn apply_batch(
    store: &dyn Store,
    owner: &str,
    action: BatchAction,
    req: &BatchUpdateRequest,
) -> Result<BatchOutcome, BatchError> {
    let ids = req.ids.as_deref().unwrap_or_default();
    let total = ids.len();
    let mut outcome = BatchOutcome {
        updated: 0,
        failed: 0,
        action,
        total,
        errors: Vec::new(),
    };

    match action {
        BatchAction::MoveToStory => {
            let story_id = req.story_id.as_deref().filter(|s| !s.is_empty());
            if let Some(story_id) = story_id {
                if !store.story_exists(owner, story_id).await? {
                    return Err(AnalysisError::StoryNotFound.into());
                }
            }
            match store.set_story(owner, ids, story_id).await {
                Ok(changed) => {
                    outcome.updated = changed;
                    outcome.failed = total.saturating_sub(changed);
                }
                Err(e) => {
                    outcome.failed = total;
                    outcome.errors.push(format!("{:#}", e));
                }
            }
        }
        BatchAction::AddTags => {
            let tag_ids = required_tag_ids(req)?;
            let valid: HashSet<String> =
                store.owned_tag_ids(owner, tag_ids).await?.into_iter().collect();
            let owned: HashSet<String> = store
                .fragments_by_ids(owner, ids)
                .await?
                .into_iter()
                .map(|f| f.id)
                .collect();

            for fragment_id in ids {
                if !owned.contains(fragment_id) {
                    outcome.failed += 1;
                    continue;
                }
                let existing: HashSet<String> = match store.fragment_tag_ids(fragment_id).await {
                    Ok(tags) => tags.into_iter().collect(),
                    Err(e) => {
                        outcome.failed += 1;
                        outcome.errors.push(format!("{:#}", e));
                        continue;
                    }
                };
                let new_tags: Vec<String> = tag_ids
                    .iter()
                    .filter(|t| valid.contains(*t) && !existing.contains(*t))
                    .cloned()
                    .collect();
                if new_tags.is_empty() {
                    outcome.updated += 1;
                    continue;
                }
                match store.attach_tags(fragment_id, &new_tags).await {
                    Ok(()) => outcome.updated += 1,
                    Err(e) => {
                        outcome.failed += 1;
                        outcome.errors.push(format!("{:#}", e));
                    }
                }
            }
        }
        BatchAction::RemoveTags => {
            let tag_ids = required_tag_ids(req)?;
            match store.detach_tags(owner, ids, tag_ids).await {
                // Deletes report no row count; every id counts as updated.
                Ok(()) => outcome.updated = total,
                Err(e) => {
                    outcome.failed = total;
                    outcome.errors.push(format!("{:#}", e));
                }
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn request(ids: &[&str], action: &str) -> BatchUpdateRequest {
        BatchUpdateRequest {
            ids: Some(ids.iter().map(|s| s.to_string()).collect()),
            action: Some(action.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_request_order() {
        let empty = BatchUpdateRequest::default();
        assert_eq!(validate_request(&empty), Err(AnalysisError::MissingIds));

        let ids: Vec<String> = (0..101).map(|i| i.to_string()).collect();
        let too_many = BatchUpdateRequest {
            ids: Some(ids),
            action: Some("bogus".into()),
            ..Default::default()
        };
        assert_eq!(
            validate_request(&too_many).map_err(|e| e.code()),
            Err("TOO_MANY_IDS")
        );

        assert_eq!(
            validate_request(&request(&["a"], "archive")).map_err(|e| e.code()),
            Err("INVALID_ACTION")
        );
        let mut no_action = request(&["a"], "");
        no_action.action = None;
        assert_eq!(
            validate_request(&no_action).map_err(|e| e.code()),
            Err("INVALID_ACTION")
        );
        assert_eq!(
            validate_request(&request(&["a"], "add_tags")),
            Ok(BatchAction::AddTags)
        );
    }

    #[tokio::test]
    async fn test_move_to_story_counts_unowned_as_failed() {
        let store = InMemoryStore::new();
        let story = store.create_story("u1", "Harbor", None, None).await.unwrap();
        let a = store.create_fragment("u1", "gulls", None).await.unwrap();
        let other = store.create_fragment("u2", "not mine", None).await.unwrap();

        let mut req = request(&[a.id.as_str(), other.id.as_str()], "move_to_story");
        req.story_id = Some(story.id.clone());
        let out = apply_batch(&store, "u1", BatchAction::MoveToStory, &req)
            .await
            .unwrap();
        assert_eq!((out.updated, out.failed, out.total), (1, 1, 2));
        assert_eq!(
            store.list_fragments("u1").await.unwrap()[0].story_id.as_deref(),
            Some(story.id.as_str())
        );
    }

    #[tokio::test]
    async fn test_move_to_unknown_story_is_rejected() {
        let store = InMemoryStore::new();
        let mut req = request(&["a"], "move_to_story");
        req.story_id = Some("missing".into());
        let err = apply_batch(&store, "u1", BatchAction::MoveToStory, &req)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Rejected(AnalysisError::StoryNotFound)));
    }

    #[tokio::test]
    async fn test_move_without_story_clears_it() {
        let store = InMemoryStore::new();
        let story = store.create_story("u1", "Harbor", None, None).await.unwrap();
        let a = store.create_fragment("u1", "gulls", Some(story.id.as_str())).await.unwrap();

        let req = request(&[a.id.as_str()], "move_to_story");
        let out = apply_batch(&store, "u1", BatchAction::MoveToStory, &req)
            .await
            .unwrap();
        assert_eq!(out.updated, 1);
        assert_eq!(store.list_fragments("u1").await.unwrap()[0].story_id, None);
    }

    #[tokio::test]
    async fn test_add_tags_only_attaches_owned_tags() {
        let store = InMemoryStore::new();
        let mine = store.create_tag("u1", "sea", None).await.unwrap();
        let theirs = store.create_tag("u2", "city", None).await.unwrap();
        let a = store.create_fragment("u1", "gulls", None).await.unwrap();
        let b = store.create_fragment("u1", "salt", None).await.unwrap();
        store.attach_tags(&b.id, &[mine.id.clone()]).await.unwrap();

        let mut req = request(&[a.id.as_str(), b.id.as_str(), "ghost"], "add_tags");
        req.tag_ids = Some(vec![mine.id.clone(), theirs.id.clone()]);
        let out = apply_batch(&store, "u1", BatchAction::AddTags, &req)
            .await
            .unwrap();

        // `b` already had the tag: still counted as updated.
        assert_eq!((out.updated, out.failed, out.total), (2, 1, 3));
        assert_eq!(store.fragment_tag_ids(&a.id).await.unwrap(), vec![mine.id.clone()]);
        assert_eq!(store.fragment_tag_ids(&b.id).await.unwrap(), vec![mine.id]);
    }

    #[tokio::test]
    async fn test_tag_actions_require_tag_ids() {
        let store = InMemoryStore::new();
        for action in [BatchAction::AddTags, BatchAction::RemoveTags] {
            let req = request(&["a"], action.as_str());
            let err = apply_batch(&store, "u1", action, &req).await.unwrap_err();
            assert!(matches!(err, BatchError::Rejected(AnalysisError::MissingTagIds)));
        }
    }

    #[tokio::test]
    async fn test_remove_tags_counts_every_id() {
        let store = InMemoryStore::new();
        let tag = store.create_tag("u1", "sea", None).await.unwrap();
        let a = store.create_fragment("u1", "gulls", None).await.unwrap();
        store.attach_tags(&a.id, &[tag.id.clone()]).await.unwrap();

        let mut req = request(&[a.id.as_str(), "ghost"], "remove_tags");
        req.tag_ids = Some(vec![tag.id]);
        let out = apply_batch(&store, "u1", BatchAction::RemoveTags, &req)
            .await
            .unwrap();
        assert_eq!((out.updated, out.failed), (2, 0));
        assert!(store.fragment_tag_ids(&a.id).await.unwrap().is_empty());
    }
}
