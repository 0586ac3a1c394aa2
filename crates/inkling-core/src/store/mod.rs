//! Storage abstraction for Inkling.
//!
//! The [`Store`] trait is the datastore boundary: fragment lookup by id-set
//! filtered by owner, write-once history records, and relation suggestions
//! and relations keyed by a uniqueness constraint on
//! (source fragment, target fragment, relation type).
//!
//! Every operation takes the owning user id explicitly and returns a
//! `Result`. Lookups never swallow errors into an empty default; the
//! caller decides whether a partial answer is acceptable.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Fragment, FragmentRelation, HistoryRecord, NewHistoryRecord, NewRelation, NewSuggestion,
    Story, StoredSuggestion, Tag,
};

/// Abstract storage backend.
///
/// # Operations
///
/// | Group | Methods |
/// |-------|---------|
/// | Fragments | [`create_fragment`](Store::create_fragment), [`list_fragments`](Store::list_fragments), [`fragments_by_ids`](Store::fragments_by_ids) |
/// | Stories & tags | [`create_story`](Store::create_story), [`story_exists`](Store::story_exists), [`create_tag`](Store::create_tag), [`owned_tag_ids`](Store::owned_tag_ids) |
/// | Batch updates | [`set_story`](Store::set_story), [`fragment_tag_ids`](Store::fragment_tag_ids), [`attach_tags`](Store::attach_tags), [`detach_tags`](Store::detach_tags) |
/// | Search | [`search_fragments`](Store::search_fragments), [`fragments_in_matching_stories`](Store::fragments_in_matching_stories), [`search_stories`](Store::search_stories), [`search_tags`](Store::search_tags) |
/// | History | [`insert_history`](Store::insert_history), [`list_history`](Store::list_history), [`get_history`](Store::get_history), [`delete_history`](Store::delete_history) |
/// | Suggestions | [`save_suggestions`](Store::save_suggestions), [`pending_suggestions`](Store::pending_suggestions), [`count_pending_suggestions`](Store::count_pending_suggestions), [`accept_suggestion`](Store::accept_suggestion), [`reject_suggestion`](Store::reject_suggestion) |
/// | Relations | [`list_relations`](Store::list_relations), [`create_relation`](Store::create_relation) |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_fragment(
        &self,
        owner: &str,
        content: &str,
        story_id: Option<&str>,
    ) -> Result<Fragment>;

    /// All of the owner's fragments, in sort order then creation order.
    async fn list_fragments(&self, owner: &str) -> Result<Vec<Fragment>>;

    /// The owner's fragments among `ids`. Order is unspecified and ids the
    /// owner does not own are silently absent.
    async fn fragments_by_ids(&self, owner: &str, ids: &[String]) -> Result<Vec<Fragment>>;

    async fn create_story(
        &self,
        owner: &str,
        title: &str,
        description: Option<&str>,
        color: Option<&str>,
    ) -> Result<Story>;

    async fn story_exists(&self, owner: &str, story_id: &str) -> Result<bool>;

    async fn create_tag(&self, owner: &str, name: &str, color: Option<&str>) -> Result<Tag>;

    /// The subset of `tag_ids` owned by `owner`.
    async fn owned_tag_ids(&self, owner: &str, tag_ids: &[String]) -> Result<Vec<String>>;

    /// Moves the owner's fragments among `ids` into `story_id`, or out of
    /// any story when `None`. Returns the number of fragments changed.
    async fn set_story(&self, owner: &str, ids: &[String], story_id: Option<&str>)
        -> Result<usize>;

    /// Tag ids currently attached to a fragment.
    async fn fragment_tag_ids(&self, fragment_id: &str) -> Result<Vec<String>>;

    /// Attaches tags to a fragment, skipping ones already attached.
    async fn attach_tags(&self, fragment_id: &str, tag_ids: &[String]) -> Result<()>;

    /// Detaches tags from the owner's fragments among `fragment_ids`.
    async fn detach_tags(
        &self,
        owner: &str,
        fragment_ids: &[String],
        tag_ids: &[String],
    ) -> Result<()>;

    /// One page of the owner's fragments whose content contains `text`,
    /// case-insensitively and newest first, plus the total match count.
    async fn search_fragments(
        &self,
        owner: &str,
        text: &str,
        story_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Fragment>, i64)>;

    /// Up to `limit` of the owner's fragments in stories whose title
    /// contains `text`, skipping ids in `exclude`.
    async fn fragments_in_matching_stories(
        &self,
        owner: &str,
        text: &str,
        exclude: &[String],
        limit: i64,
    ) -> Result<Vec<Fragment>>;

    async fn search_stories(&self, owner: &str, text: &str, limit: i64) -> Result<Vec<Story>>;

    async fn search_tags(&self, owner: &str, text: &str, limit: i64) -> Result<Vec<Tag>>;

    async fn insert_history(&self, owner: &str, record: &NewHistoryRecord)
        -> Result<HistoryRecord>;

    /// The owner's most recent history records, newest first.
    async fn list_history(&self, owner: &str, limit: i64) -> Result<Vec<HistoryRecord>>;

    async fn get_history(&self, owner: &str, id: &str) -> Result<Option<HistoryRecord>>;

    /// Deletes one record. Returns `false` when it does not exist or
    /// belongs to someone else.
    async fn delete_history(&self, owner: &str, id: &str) -> Result<bool>;

    /// Stores suggestions as pending, ignoring any that duplicate an
    /// existing (source, target, type) triple. Returns the number inserted.
    async fn save_suggestions(&self, owner: &str, suggestions: &[NewSuggestion])
        -> Result<usize>;

    /// Pending suggestions by descending confidence, with previews.
    async fn pending_suggestions(&self, owner: &str, limit: i64)
        -> Result<Vec<StoredSuggestion>>;

    async fn count_pending_suggestions(&self, owner: &str) -> Result<i64>;

    /// Marks a pending suggestion accepted and records the relation it
    /// describes. Returns `None` when no such pending suggestion exists.
    async fn accept_suggestion(&self, owner: &str, id: &str) -> Result<Option<FragmentRelation>>;

    /// Marks a pending suggestion rejected. Returns `false` when nothing
    /// changed.
    async fn reject_suggestion(&self, owner: &str, id: &str) -> Result<bool>;

    /// The owner's relations, newest first, optionally only those touching
    /// `fragment_id` on either end.
    async fn list_relations(
        &self,
        owner: &str,
        fragment_id: Option<&str>,
    ) -> Result<Vec<FragmentRelation>>;

    /// Creates a user-authored relation. Returns `None` when the
    /// (source, target, type) triple already exists.
    async fn create_relation(
        &self,
        owner: &str,
        relation: &NewRelation,
    ) -> Result<Option<FragmentRelation>>;
}

/// Default strength for relations created without one.
pub const DEFAULT_RELATION_STRENGTH: f64 = 0.5;

/// Current time as an RFC 3339 string, the timestamp format of every record.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
