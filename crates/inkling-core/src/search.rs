//! Fragment search and search-box suggestions.
//!
//! [`search`] matches fragment content case-insensitively, newest first.
//! When a page comes back short it is topped up with fragments from stories
//! whose title matches, so a query naming a story finds its fragments even
//! when their text does not mention it. A search scoped to one story is not
//! topped up.

use serde::Serialize;

use crate::error::AnalysisError;
use crate::models::{Fragment, Story, Tag};
use crate::store::Store;

pub const MAX_QUERY_CHARS: usize = 200;
pub const MAX_SUGGESTION_QUERY_CHARS: usize = 50;
pub const DEFAULT_SEARCH_LIMIT: i64 = 20;
pub const MAX_SEARCH_LIMIT: i64 = 100;
pub const SUGGESTION_LIMIT: i64 = 5;

/// A validated search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub story_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl SearchQuery {
    /// Trims the query and clamps paging. `limit` falls back to
    /// [`DEFAULT_SEARCH_LIMIT`] and never exceeds [`MAX_SEARCH_LIMIT`].
    pub fn new(
        q: Option<&str>,
        story_id: Option<String>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Self, AnalysisError> {
        let text = q.map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return Err(AnalysisError::MissingQuery);
        }
        if text.chars().count() > MAX_QUERY_CHARS {
            return Err(AnalysisError::QueryTooLong {
                max: MAX_QUERY_CHARS,
            });
        }
        Ok(Self {
            text: text.to_string(),
            story_id: story_id.filter(|id| !id.is_empty()),
            limit: limit
                .unwrap_or(DEFAULT_SEARCH_LIMIT)
                .clamp(1, MAX_SEARCH_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPage {
    pub fragments: Vec<Fragment>,
    /// Content matches across all pages, or the page size when there were
    /// none and the page holds only story-title matches.
    pub total: i64,
    pub query: String,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchSuggestions {
    pub stories: Vec<Story>,
    pub tags: Vec<Tag>,
}

/// Validates a suggestion query. `Ok(None)` means the box is empty and the
/// answer is an empty suggestion list.
pub fn suggestion_query(q: Option<&str>) -> Result<Option<String>, AnalysisError> {
    let text = q.map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return Ok(None);
    }
    if text.chars().count() > MAX_SUGGESTION_QUERY_CHARS {
        return Err(AnalysisError::QueryTooLong {
            max: MAX_SUGGESTION_QUERY_CHARS,
        });
    }
    Ok(Some(text.to_string()))
}

pub async fn search(
    store: &dyn Store,
    owner: &str,
    query: &SearchQuery,
) -> anyhow::Result<SearchPage> {
    let (mut fragments, matched) = store
        .search_fragments(
            owner,
            &query.text,
            query.story_id.as_deref(),
            query.limit,
            query.offset,
        )
        .await?;

    let room = query.limit - fragments.len() as i64;
    if room > 0 && query.story_id.is_none() {
        let found: Vec<String> = fragments.iter().map(|f| f.id.clone()).collect();
        let related = store
            .fragments_in_matching_stories(owner, &query.text, &found, room)
            .await?;
        fragments.extend(related);
    }

    let total = if matched > 0 {
        matched
    } else {
        fragments.len() as i64
    };
    Ok(SearchPage {
        fragments,
        total,
        query: query.text.clone(),
        has_more: matched > query.offset + query.limit,
    })
}

pub async fn suggest(
    store: &dyn Store,
    owner: &str,
    text: &str,
) -> anyhow::Result<SearchSuggestions> {
    Ok(SearchSuggestions {
        stories: store.search_stories(owner, text, SUGGESTION_LIMIT).await?,
        tags: store.search_tags(owner, text, SUGGESTION_LIMIT).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[test]
    fn test_query_validation() {
        assert_eq!(
            SearchQuery::new(Some("   "), None, None, None),
            Err(AnalysisError::MissingQuery)
        );
        assert_eq!(
            SearchQuery::new(None, None, None, None),
            Err(AnalysisError::MissingQuery)
        );
        let long = "a".repeat(MAX_QUERY_CHARS + 1);
        assert_eq!(
            SearchQuery::new(Some(&long), None, None, None).unwrap_err().code(),
            "QUERY_TOO_LONG"
        );

        let q = SearchQuery::new(Some("  tide "), Some(String::new()), Some(500), Some(-3)).unwrap();
        assert_eq!(q.text, "tide");
        assert_eq!(q.story_id, None);
        assert_eq!(q.limit, MAX_SEARCH_LIMIT);
        assert_eq!(q.offset, 0);
        assert_eq!(
            SearchQuery::new(Some("x"), None, None, None).unwrap().limit,
            DEFAULT_SEARCH_LIMIT
        );
    }

    #[test]
    fn test_suggestion_query_validation() {
        assert_eq!(suggestion_query(Some(" ")), Ok(None));
        assert_eq!(suggestion_query(Some(" sea ")), Ok(Some("sea".to_string())));
        let long = "b".repeat(MAX_SUGGESTION_QUERY_CHARS + 1);
        assert_eq!(
            suggestion_query(Some(&long)),
            Err(AnalysisError::QueryTooLong {
                max: MAX_SUGGESTION_QUERY_CHARS
            })
        );
    }

    #[tokio::test]
    async fn test_search_matches_content_case_insensitively() {
        let store = InMemoryStore::new();
        store.create_fragment("u1", "The Tide came in", None).await.unwrap();
        store.create_fragment("u1", "dry land", None).await.unwrap();
        store.create_fragment("u2", "tide pools", None).await.unwrap();

        let q = SearchQuery::new(Some("tide"), None, None, None).unwrap();
        let page = search(&store, "u1", &q).await.unwrap();
        assert_eq!(page.fragments.len(), 1);
        assert_eq!(page.fragments[0].content, "The Tide came in");
        assert_eq!(page.total, 1);
        assert_eq!(page.query, "tide");
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_short_page_is_topped_up_from_matching_stories() {
        let store = InMemoryStore::new();
        let story = store.create_story("u1", "Harbour", None, None).await.unwrap();
        let direct = store
            .create_fragment("u1", "the harbour lights", Some(&story.id))
            .await
            .unwrap();
        store.create_fragment("u1", "a gull", Some(&story.id)).await.unwrap();
        store.create_fragment("u1", "unrelated", None).await.unwrap();

        let q = SearchQuery::new(Some("harbour"), None, None, None).unwrap();
        let page = search(&store, "u1", &q).await.unwrap();
        let contents: Vec<&str> = page.fragments.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(contents, vec!["the harbour lights", "a gull"]);
        assert_eq!(page.fragments[0].id, direct.id);
        assert_eq!(page.total, 1);

        let scoped = SearchQuery::new(Some("harbour"), Some(story.id.clone()), None, None).unwrap();
        let page = search(&store, "u1", &scoped).await.unwrap();
        assert_eq!(page.fragments.len(), 1);
    }

    #[tokio::test]
    async fn test_paging_reports_more() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .create_fragment("u1", &format!("rain {}", i), None)
                .await
                .unwrap();
        }
        let q = SearchQuery::new(Some("RAIN"), None, Some(2), Some(2)).unwrap();
        let page = search(&store, "u1", &q).await.unwrap();
        assert_eq!(page.fragments.len(), 2);
        assert_eq!(page.total, 5);
        assert!(page.has_more);

        let last = SearchQuery::new(Some("rain"), None, Some(2), Some(4)).unwrap();
        let page = search(&store, "u1", &last).await.unwrap();
        assert_eq!(page.fragments.len(), 1);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_suggest_lists_matching_stories_and_tags() {
        let store = InMemoryStore::new();
        for i in 0..7 {
            store
                .create_story("u1", &format!("Sea story {}", i), None, None)
                .await
                .unwrap();
        }
        store.create_tag("u1", "seaside", None).await.unwrap();
        store.create_tag("u1", "forest", None).await.unwrap();
        store.create_tag("u2", "sea", None).await.unwrap();

        let found = suggest(&store, "u1", "SEA").await.unwrap();
        assert_eq!(found.stories.len(), SUGGESTION_LIMIT as usize);
        assert_eq!(found.tags.len(), 1);
        assert_eq!(found.tags[0].name, "seaside");
    }
}
