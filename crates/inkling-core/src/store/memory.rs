//! In-memory [`Store`] implementation for tests.
//!
//! Everything lives in one `Inner` behind a `std::sync::RwLock`. Records are
//! kept in insertion order, so "newest first" is a reverse scan.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{
    preview, Fragment, FragmentRelation, HistoryRecord, NewHistoryRecord, NewRelation,
    NewSuggestion, RelationType, Story, StoredSuggestion, SuggestionStatus, Tag, DEFAULT_COLOR,
};

use super::{new_id, now_timestamp, Store, DEFAULT_RELATION_STRENGTH};

struct Owned<T> {
    owner: String,
    value: T,
}

struct SuggestionRow {
    owner: String,
    suggestion: NewSuggestion,
    id: String,
    status: SuggestionStatus,
}

#[derive(Default)]
struct Inner {
    fragments: Vec<Owned<Fragment>>,
    stories: Vec<Owned<Story>>,
    tags: Vec<Owned<Tag>>,
    fragment_tags: HashMap<String, Vec<String>>,
    history: Vec<Owned<HistoryRecord>>,
    suggestions: Vec<SuggestionRow>,
    relations: Vec<Owned<FragmentRelation>>,
}

impl Inner {
    fn owns_fragment(&self, owner: &str, id: &str) -> bool {
        self.fragments
            .iter()
            .any(|f| f.owner == owner && f.value.id == id)
    }

    fn fragment_content(&self, id: &str) -> Option<&str> {
        self.fragments
            .iter()
            .find(|f| f.value.id == id)
            .map(|f| f.value.content.as_str())
    }

    fn relation_exists(&self, source: &str, target: &str, kind: RelationType) -> bool {
        self.relations.iter().any(|r| {
            r.value.source_fragment_id == source
                && r.value.target_fragment_id == target
                && r.value.relation_type == kind
        })
    }

    fn suggestion_exists(&self, source: &str, target: &str, kind: RelationType) -> bool {
        self.suggestions.iter().any(|s| {
            s.suggestion.source_fragment_id == source
                && s.suggestion.target_fragment_id == target
                && s.suggestion.relation_type == kind
        })
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_fragment(
        &self,
        owner: &str,
        content: &str,
        story_id: Option<&str>,
    ) -> Result<Fragment> {
        let mut inner = self.write()?;
        let sort_order = inner.fragments.iter().filter(|f| f.owner == owner).count() as i64;
        let fragment = Fragment {
            id: new_id(),
            content: content.to_string(),
            story_id: story_id.map(str::to_string),
            sort_order,
            created_at: now_timestamp(),
        };
        inner.fragments.push(Owned {
            owner: owner.to_string(),
            value: fragment.clone(),
        });
        Ok(fragment)
    }

    async fn list_fragments(&self, owner: &str) -> Result<Vec<Fragment>> {
        let inner = self.read()?;
        let mut out: Vec<Fragment> = inner
            .fragments
            .iter()
            .filter(|f| f.owner == owner)
            .map(|f| f.value.clone())
            .collect();
        out.sort_by_key(|f| f.sort_order);
        Ok(out)
    }

    async fn fragments_by_ids(&self, owner: &str, ids: &[String]) -> Result<Vec<Fragment>> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let inner = self.read()?;
        Ok(inner
            .fragments
            .iter()
            .filter(|f| f.owner == owner && wanted.contains(f.value.id.as_str()))
            .map(|f| f.value.clone())
            .collect())
    }

    async fn create_story(
        &self,
        owner: &str,
        title: &str,
        description: Option<&str>,
        color: Option<&str>,
    ) -> Result<Story> {
        let story = Story {
            id: new_id(),
            title: title.to_string(),
            description: description.map(str::to_string),
            color: color.unwrap_or(DEFAULT_COLOR).to_string(),
            created_at: now_timestamp(),
        };
        self.write()?.stories.push(Owned {
            owner: owner.to_string(),
            value: story.clone(),
        });
        Ok(story)
    }

    async fn story_exists(&self, owner: &str, story_id: &str) -> Result<bool> {
        Ok(self
            .read()?
            .stories
            .iter()
            .any(|s| s.owner == owner && s.value.id == story_id))
    }

    async fn create_tag(&self, owner: &str, name: &str, color: Option<&str>) -> Result<Tag> {
        let tag = Tag {
            id: new_id(),
            name: name.to_string(),
            color: color.unwrap_or(DEFAULT_COLOR).to_string(),
            created_at: now_timestamp(),
        };
        self.write()?.tags.push(Owned {
            owner: owner.to_string(),
            value: tag.clone(),
        });
        Ok(tag)
    }

    async fn owned_tag_ids(&self, owner: &str, tag_ids: &[String]) -> Result<Vec<String>> {
        let inner = self.read()?;
        Ok(tag_ids
            .iter()
            .filter(|id| {
                inner
                    .tags
                    .iter()
                    .any(|t| t.owner == owner && &t.value.id == *id)
            })
            .cloned()
            .collect())
    }

    async fn set_story(
        &self,
        owner: &str,
        ids: &[String],
        story_id: Option<&str>,
    ) -> Result<usize> {
        let mut inner = self.write()?;
        let mut changed = 0;
        for f in inner
            .fragments
            .iter_mut()
            .filter(|f| f.owner == owner && ids.contains(&f.value.id))
        {
            f.value.story_id = story_id.map(str::to_string);
            changed += 1;
        }
        Ok(changed)
    }

    async fn fragment_tag_ids(&self, fragment_id: &str) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .fragment_tags
            .get(fragment_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn attach_tags(&self, fragment_id: &str, tag_ids: &[String]) -> Result<()> {
        let mut inner = self.write()?;
        let attached = inner
            .fragment_tags
            .entry(fragment_id.to_string())
            .or_default();
        for id in tag_ids {
            if !attached.contains(id) {
                attached.push(id.clone());
            }
        }
        Ok(())
    }

    async fn detach_tags(
        &self,
        owner: &str,
        fragment_ids: &[String],
        tag_ids: &[String],
    ) -> Result<()> {
        let mut inner = self.write()?;
        let owned: Vec<String> = fragment_ids
            .iter()
            .filter(|id| inner.owns_fragment(owner, id))
            .cloned()
            .collect();
        for id in owned {
            if let Some(attached) = inner.fragment_tags.get_mut(&id) {
                attached.retain(|t| !tag_ids.contains(t));
            }
        }
        Ok(())
    }

    async fn search_fragments(
        &self,
        owner: &str,
        text: &str,
        story_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Fragment>, i64)> {
        let needle = text.to_lowercase();
        let inner = self.read()?;
        let matched: Vec<&Fragment> = inner
            .fragments
            .iter()
            .rev()
            .filter(|f| f.owner == owner)
            .map(|f| &f.value)
            .filter(|f| story_id.is_none() || f.story_id.as_deref() == story_id)
            .filter(|f| f.content.to_lowercase().contains(&needle))
            .collect();
        let page = matched
            .iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|f| (*f).clone())
            .collect();
        Ok((page, matched.len() as i64))
    }

    async fn fragments_in_matching_stories(
        &self,
        owner: &str,
        text: &str,
        exclude: &[String],
        limit: i64,
    ) -> Result<Vec<Fragment>> {
        let needle = text.to_lowercase();
        let inner = self.read()?;
        let stories: HashSet<&str> = inner
            .stories
            .iter()
            .filter(|s| s.owner == owner && s.value.title.to_lowercase().contains(&needle))
            .map(|s| s.value.id.as_str())
            .collect();
        Ok(inner
            .fragments
            .iter()
            .filter(|f| f.owner == owner && !exclude.contains(&f.value.id))
            .filter(|f| {
                f.value
                    .story_id
                    .as_deref()
                    .is_some_and(|id| stories.contains(id))
            })
            .take(limit.max(0) as usize)
            .map(|f| f.value.clone())
            .collect())
    }

    async fn search_stories(&self, owner: &str, text: &str, limit: i64) -> Result<Vec<Story>> {
        let needle = text.to_lowercase();
        Ok(self
            .read()?
            .stories
            .iter()
            .filter(|s| s.owner == owner && s.value.title.to_lowercase().contains(&needle))
            .take(limit.max(0) as usize)
            .map(|s| s.value.clone())
            .collect())
    }

    async fn search_tags(&self, owner: &str, text: &str, limit: i64) -> Result<Vec<Tag>> {
        let needle = text.to_lowercase();
        Ok(self
            .read()?
            .tags
            .iter()
            .filter(|t| t.owner == owner && t.value.name.to_lowercase().contains(&needle))
            .take(limit.max(0) as usize)
            .map(|t| t.value.clone())
            .collect())
    }

    async fn insert_history(
        &self,
        owner: &str,
        record: &NewHistoryRecord,
    ) -> Result<HistoryRecord> {
        let stored = HistoryRecord {
            id: new_id(),
            fragment_ids: record.fragment_ids.clone(),
            target_fragment_id: record.target_fragment_id.clone(),
            result: record.result.clone(),
            raw_text: record.raw_text.clone(),
            created_at: now_timestamp(),
        };
        self.write()?.history.push(Owned {
            owner: owner.to_string(),
            value: stored.clone(),
        });
        Ok(stored)
    }

    async fn list_history(&self, owner: &str, limit: i64) -> Result<Vec<HistoryRecord>> {
        let inner = self.read()?;
        Ok(inner
            .history
            .iter()
            .rev()
            .filter(|h| h.owner == owner)
            .take(limit.max(0) as usize)
            .map(|h| h.value.clone())
            .collect())
    }

    async fn get_history(&self, owner: &str, id: &str) -> Result<Option<HistoryRecord>> {
        Ok(self
            .read()?
            .history
            .iter()
            .find(|h| h.owner == owner && h.value.id == id)
            .map(|h| h.value.clone()))
    }

    async fn delete_history(&self, owner: &str, id: &str) -> Result<bool> {
        let mut inner = self.write()?;
        let before = inner.history.len();
        inner
            .history
            .retain(|h| !(h.owner == owner && h.value.id == id));
        Ok(inner.history.len() != before)
    }

    async fn save_suggestions(
        &self,
        owner: &str,
        suggestions: &[NewSuggestion],
    ) -> Result<usize> {
        let mut inner = self.write()?;
        let mut saved = 0;
        for s in suggestions {
            if inner.suggestion_exists(&s.source_fragment_id, &s.target_fragment_id, s.relation_type)
            {
                continue;
            }
            inner.suggestions.push(SuggestionRow {
                owner: owner.to_string(),
                suggestion: s.clone(),
                id: new_id(),
                status: SuggestionStatus::Pending,
            });
            saved += 1;
        }
        Ok(saved)
    }

    async fn pending_suggestions(
        &self,
        owner: &str,
        limit: i64,
    ) -> Result<Vec<StoredSuggestion>> {
        let inner = self.read()?;
        let mut pending: Vec<&SuggestionRow> = inner
            .suggestions
            .iter()
            .filter(|s| s.owner == owner && s.status == SuggestionStatus::Pending)
            .collect();
        pending.sort_by(|a, b| b.suggestion.confidence.total_cmp(&a.suggestion.confidence));

        Ok(pending
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|row| {
                let s = &row.suggestion;
                StoredSuggestion {
                    id: row.id.clone(),
                    source_fragment_id: s.source_fragment_id.clone(),
                    target_fragment_id: s.target_fragment_id.clone(),
                    source_preview: preview(
                        inner.fragment_content(&s.source_fragment_id).unwrap_or(""),
                    ),
                    target_preview: preview(
                        inner.fragment_content(&s.target_fragment_id).unwrap_or(""),
                    ),
                    relation_type: s.relation_type,
                    confidence: s.confidence,
                    reason: s.reason.clone(),
                    status: row.status,
                }
            })
            .collect())
    }

    async fn count_pending_suggestions(&self, owner: &str) -> Result<i64> {
        Ok(self
            .read()?
            .suggestions
            .iter()
            .filter(|s| s.owner == owner && s.status == SuggestionStatus::Pending)
            .count() as i64)
    }

    async fn accept_suggestion(&self, owner: &str, id: &str) -> Result<Option<FragmentRelation>> {
        let mut inner = self.write()?;
        let Some(row) = inner
            .suggestions
            .iter_mut()
            .find(|s| s.owner == owner && s.id == id && s.status == SuggestionStatus::Pending)
        else {
            return Ok(None);
        };
        row.status = SuggestionStatus::Accepted;
        let s = row.suggestion.clone();

        if let Some(existing) = inner.relations.iter().find(|r| {
            r.value.source_fragment_id == s.source_fragment_id
                && r.value.target_fragment_id == s.target_fragment_id
                && r.value.relation_type == s.relation_type
        }) {
            return Ok(Some(existing.value.clone()));
        }

        let relation = FragmentRelation {
            id: new_id(),
            source_fragment_id: s.source_fragment_id,
            target_fragment_id: s.target_fragment_id,
            relation_type: s.relation_type,
            strength: s.confidence,
            description: Some(s.reason).filter(|r| !r.is_empty()),
            ai_generated: true,
            created_at: now_timestamp(),
        };
        inner.relations.push(Owned {
            owner: owner.to_string(),
            value: relation.clone(),
        });
        Ok(Some(relation))
    }

    async fn reject_suggestion(&self, owner: &str, id: &str) -> Result<bool> {
        let mut inner = self.write()?;
        match inner
            .suggestions
            .iter_mut()
            .find(|s| s.owner == owner && s.id == id && s.status == SuggestionStatus::Pending)
        {
            Some(row) => {
                row.status = SuggestionStatus::Rejected;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_relations(
        &self,
        owner: &str,
        fragment_id: Option<&str>,
    ) -> Result<Vec<FragmentRelation>> {
        let inner = self.read()?;
        Ok(inner
            .relations
            .iter()
            .rev()
            .filter(|r| r.owner == owner)
            .filter(|r| match fragment_id {
                Some(id) => r.value.source_fragment_id == id || r.value.target_fragment_id == id,
                None => true,
            })
            .map(|r| r.value.clone())
            .collect())
    }

    async fn create_relation(
        &self,
        owner: &str,
        relation: &NewRelation,
    ) -> Result<Option<FragmentRelation>> {
        let mut inner = self.write()?;
        if inner.relation_exists(
            &relation.source_fragment_id,
            &relation.target_fragment_id,
            relation.relation_type,
        ) {
            return Ok(None);
        }
        let stored = FragmentRelation {
            id: new_id(),
            source_fragment_id: relation.source_fragment_id.clone(),
            target_fragment_id: relation.target_fragment_id.clone(),
            relation_type: relation.relation_type,
            strength: relation.strength.unwrap_or(DEFAULT_RELATION_STRENGTH),
            description: relation.description.clone(),
            ai_generated: false,
            created_at: now_timestamp(),
        };
        inner.relations.push(Owned {
            owner: owner.to_string(),
            value: stored.clone(),
        });
        Ok(Some(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion(source: &str, target: &str, kind: RelationType, confidence: f64) -> NewSuggestion {
        NewSuggestion {
            source_fragment_id: source.into(),
            target_fragment_id: target.into(),
            relation_type: kind,
            confidence,
            reason: "shared imagery".into(),
        }
    }

    #[tokio::test]
    async fn test_fragments_scoped_to_owner() {
        let store = InMemoryStore::new();
        let a = store.create_fragment("u1", "rain on the tin roof", None).await.unwrap();
        let b = store.create_fragment("u2", "someone else's note", None).await.unwrap();

        let found = store
            .fragments_by_ids("u1", &[a.id.clone(), b.id.clone()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);
        assert_eq!(store.list_fragments("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_newest_first_and_delete() {
        let store = InMemoryStore::new();
        for i in 0..3 {
            store
                .insert_history(
                    "u1",
                    &NewHistoryRecord {
                        fragment_ids: vec![format!("f{}", i)],
                        target_fragment_id: None,
                        result: serde_json::json!({}),
                        raw_text: None,
                    },
                )
                .await
                .unwrap();
        }
        let listed = store.list_history("u1", 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].fragment_ids, vec!["f2"]);

        assert!(store.get_history("u2", &listed[0].id).await.unwrap().is_none());
        assert_eq!(
            store.get_history("u1", &listed[0].id).await.unwrap(),
            Some(listed[0].clone())
        );

        assert!(!store.delete_history("u2", &listed[0].id).await.unwrap());
        assert!(store.delete_history("u1", &listed[0].id).await.unwrap());
        assert_eq!(store.list_history("u1", 20).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_suggestions_ignore_duplicates_and_order_by_confidence() {
        let store = InMemoryStore::new();
        let a = store.create_fragment("u1", "a".repeat(60).as_str(), None).await.unwrap();
        let b = store.create_fragment("u1", "short", None).await.unwrap();

        let batch = vec![
            suggestion(&a.id, &b.id, RelationType::Causal, 0.75),
            suggestion(&a.id, &b.id, RelationType::Thematic, 0.9),
            suggestion(&a.id, &b.id, RelationType::Causal, 0.99),
        ];
        assert_eq!(store.save_suggestions("u1", &batch).await.unwrap(), 2);
        assert_eq!(store.save_suggestions("u1", &batch).await.unwrap(), 0);

        let pending = store.pending_suggestions("u1", 10).await.unwrap();
        assert_eq!(pending[0].relation_type, RelationType::Thematic);
        assert_eq!(pending[0].source_preview, format!("{}...", "a".repeat(50)));
        assert_eq!(pending[0].target_preview, "short...");
        assert_eq!(store.count_pending_suggestions("u1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_accept_creates_ai_relation_once() {
        let store = InMemoryStore::new();
        store
            .save_suggestions("u1", &[suggestion("a", "b", RelationType::Sequence, 0.8)])
            .await
            .unwrap();
        let id = store.pending_suggestions("u1", 10).await.unwrap()[0].id.clone();

        let relation = store.accept_suggestion("u1", &id).await.unwrap().unwrap();
        assert!(relation.ai_generated);
        assert_eq!(relation.strength, 0.8);
        assert_eq!(store.accept_suggestion("u1", &id).await.unwrap(), None);
        assert!(!store.reject_suggestion("u1", &id).await.unwrap());
        assert_eq!(store.count_pending_suggestions("u1").await.unwrap(), 0);
        assert_eq!(store.list_relations("u1", Some("b")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_relation_rejects_duplicate_triple() {
        let store = InMemoryStore::new();
        let rel = NewRelation {
            source_fragment_id: "a".into(),
            target_fragment_id: "b".into(),
            relation_type: RelationType::Contrast,
            strength: None,
            description: None,
        };
        let created = store.create_relation("u1", &rel).await.unwrap().unwrap();
        assert_eq!(created.strength, DEFAULT_RELATION_STRENGTH);
        assert!(!created.ai_generated);
        assert_eq!(store.create_relation("u1", &rel).await.unwrap(), None);
        assert!(store.list_relations("u1", Some("zzz")).await.unwrap().is_empty());
    }
}
