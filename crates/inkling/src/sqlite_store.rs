//! SQLite-backed [`Store`] implementation.
//!
//! Every query filters on `user_id`, so one owner never sees another's
//! rows. Id-set lookups expand to an `IN (?, ?, ...)` placeholder list.
//! JSON columns (`fragment_ids`, `result`) are stored as text.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use inkling_core::models::{
    preview, Fragment, FragmentRelation, HistoryRecord, NewHistoryRecord, NewRelation,
    NewSuggestion, RelationType, Story, StoredSuggestion, SuggestionStatus, Tag, DEFAULT_COLOR,
};
use inkling_core::store::{new_id, now_timestamp, Store, DEFAULT_RELATION_STRENGTH};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// `%text%` with LIKE wildcards in `text` escaped by a backslash. SQLite folds
/// case for ASCII only.
fn contains_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn fragment_from_row(row: &SqliteRow) -> Fragment {
    Fragment {
        id: row.get("id"),
        content: row.get("content"),
        story_id: row.get("story_id"),
        sort_order: row.get("sort_order"),
        created_at: row.get("created_at"),
    }
}

fn relation_from_row(row: &SqliteRow) -> FragmentRelation {
    let kind: String = row.get("relation_type");
    let ai_generated: i64 = row.get("ai_generated");
    FragmentRelation {
        id: row.get("id"),
        source_fragment_id: row.get("source_fragment_id"),
        target_fragment_id: row.get("target_fragment_id"),
        relation_type: kind.parse::<RelationType>().unwrap_or_default(),
        strength: row.get("strength"),
        description: row.get("description"),
        ai_generated: ai_generated != 0,
        created_at: row.get("created_at"),
    }
}

fn history_from_row(row: &SqliteRow) -> Result<HistoryRecord> {
    let fragment_ids: String = row.get("fragment_ids");
    let result: String = row.get("result");
    Ok(HistoryRecord {
        id: row.get("id"),
        fragment_ids: serde_json::from_str(&fragment_ids)
            .context("corrupt fragment_ids in history record")?,
        target_fragment_id: row.get("target_fragment_id"),
        result: serde_json::from_str(&result).context("corrupt result in history record")?,
        raw_text: row.get("raw_text"),
        created_at: row.get("created_at"),
    })
}

fn story_from_row(row: &SqliteRow) -> Story {
    Story {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        color: row.get("color"),
        created_at: row.get("created_at"),
    }
}

fn tag_from_row(row: &SqliteRow) -> Tag {
    Tag {
        id: row.get("id"),
        name: row.get("name"),
        color: row.get("color"),
        created_at: row.get("created_at"),
    }
}

const RELATION_COLUMNS: &str = "id, source_fragment_id, target_fragment_id, relation_type, \
     strength, description, ai_generated, created_at";

#[async_trait]
impl Store for SqliteStore {
    async fn create_fragment(
        &self,
        owner: &str,
        content: &str,
        story_id: Option<&str>,
    ) -> Result<Fragment> {
        let id = new_id();
        let created_at = now_timestamp();
        let sort_order: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM fragments WHERE user_id = ?")
                .bind(owner)
                .fetch_one(&self.pool)
                .await?;

        sqlx::query(
            "INSERT INTO fragments (id, user_id, content, story_id, sort_order, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(owner)
        .bind(content)
        .bind(story_id)
        .bind(sort_order)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        Ok(Fragment {
            id,
            content: content.to_string(),
            story_id: story_id.map(str::to_string),
            sort_order,
            created_at,
        })
    }

    async fn list_fragments(&self, owner: &str) -> Result<Vec<Fragment>> {
        let rows = sqlx::query(
            "SELECT id, content, story_id, sort_order, created_at FROM fragments \
             WHERE user_id = ? ORDER BY sort_order ASC, created_at ASC",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(fragment_from_row).collect())
    }

    async fn fragments_by_ids(&self, owner: &str, ids: &[String]) -> Result<Vec<Fragment>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, content, story_id, sort_order, created_at FROM fragments \
             WHERE user_id = ? AND id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql).bind(owner);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(fragment_from_row).collect())
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
        sqlx::query(
            "INSERT INTO stories (id, user_id, title, description, color, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&story.id)
        .bind(owner)
        .bind(&story.title)
        .bind(&story.description)
        .bind(&story.color)
        .bind(&story.created_at)
        .execute(&self.pool)
        .await?;
        Ok(story)
    }

    async fn story_exists(&self, owner: &str, story_id: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM stories WHERE id = ? AND user_id = ?")
                .bind(story_id)
                .bind(owner)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn create_tag(&self, owner: &str, name: &str, color: Option<&str>) -> Result<Tag> {
        let tag = Tag {
            id: new_id(),
            name: name.to_string(),
            color: color.unwrap_or(DEFAULT_COLOR).to_string(),
            created_at: now_timestamp(),
        };
        sqlx::query(
            "INSERT INTO tags (id, user_id, name, color, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&tag.id)
        .bind(owner)
        .bind(&tag.name)
        .bind(&tag.color)
        .bind(&tag.created_at)
        .execute(&self.pool)
        .await?;
        Ok(tag)
    }

    async fn owned_tag_ids(&self, owner: &str, tag_ids: &[String]) -> Result<Vec<String>> {
        if tag_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id FROM tags WHERE user_id = ? AND id IN ({})",
            placeholders(tag_ids.len())
        );
        let mut query = sqlx::query_scalar::<_, String>(&sql).bind(owner);
        for id in tag_ids {
            query = query.bind(id);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn set_story(
        &self,
        owner: &str,
        ids: &[String],
        story_id: Option<&str>,
    ) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE fragments SET story_id = ? WHERE user_id = ? AND id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql).bind(story_id).bind(owner);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn fragment_tag_ids(&self, fragment_id: &str) -> Result<Vec<String>> {
        Ok(
            sqlx::query_scalar("SELECT tag_id FROM fragment_tags WHERE fragment_id = ?")
                .bind(fragment_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn attach_tags(&self, fragment_id: &str, tag_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for tag_id in tag_ids {
            sqlx::query("INSERT OR IGNORE INTO fragment_tags (fragment_id, tag_id) VALUES (?, ?)")
                .bind(fragment_id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn detach_tags(
        &self,
        owner: &str,
        fragment_ids: &[String],
        tag_ids: &[String],
    ) -> Result<()> {
        if fragment_ids.is_empty() || tag_ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "DELETE FROM fragment_tags \
             WHERE fragment_id IN (SELECT id FROM fragments WHERE user_id = ? AND id IN ({})) \
             AND tag_id IN ({})",
            placeholders(fragment_ids.len()),
            placeholders(tag_ids.len())
        );
        let mut query = sqlx::query(&sql).bind(owner);
        for id in fragment_ids.iter().chain(tag_ids) {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
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
        let pattern = contains_pattern(text);
        let matched: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM fragments \
             WHERE user_id = ? AND content LIKE ? ESCAPE '\\' AND (? IS NULL OR story_id = ?)",
        )
        .bind(owner)
        .bind(&pattern)
        .bind(story_id)
        .bind(story_id)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            "SELECT id, content, story_id, sort_order, created_at FROM fragments \
             WHERE user_id = ? AND content LIKE ? ESCAPE '\\' AND (? IS NULL OR story_id = ?) \
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        )
        .bind(owner)
        .bind(&pattern)
        .bind(story_id)
        .bind(story_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok((rows.iter().map(fragment_from_row).collect(), matched))
    }

    async fn fragments_in_matching_stories(
        &self,
        owner: &str,
        text: &str,
        exclude: &[String],
        limit: i64,
    ) -> Result<Vec<Fragment>> {
        let skip = if exclude.is_empty() {
            String::new()
        } else {
            format!("AND f.id NOT IN ({})", placeholders(exclude.len()))
        };
        let sql = format!(
            "SELECT f.id, f.content, f.story_id, f.sort_order, f.created_at \
             FROM fragments f JOIN stories s ON s.id = f.story_id AND s.user_id = f.user_id \
             WHERE f.user_id = ? AND s.title LIKE ? ESCAPE '\\' {} \
             ORDER BY f.sort_order ASC, f.created_at ASC LIMIT ?",
            skip
        );
        let mut query = sqlx::query(&sql).bind(owner).bind(contains_pattern(text));
        for id in exclude {
            query = query.bind(id);
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(fragment_from_row).collect())
    }

    async fn search_stories(&self, owner: &str, text: &str, limit: i64) -> Result<Vec<Story>> {
        let rows = sqlx::query(
            "SELECT id, title, description, color, created_at FROM stories \
             WHERE user_id = ? AND title LIKE ? ESCAPE '\\' ORDER BY created_at ASC LIMIT ?",
        )
        .bind(owner)
        .bind(contains_pattern(text))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(story_from_row).collect())
    }

    async fn search_tags(&self, owner: &str, text: &str, limit: i64) -> Result<Vec<Tag>> {
        let rows = sqlx::query(
            "SELECT id, name, color, created_at FROM tags \
             WHERE user_id = ? AND name LIKE ? ESCAPE '\\' ORDER BY created_at ASC LIMIT ?",
        )
        .bind(owner)
        .bind(contains_pattern(text))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(tag_from_row).collect())
    }

    async fn insert_history(
        &self,
        owner: &str,
        record: &NewHistoryRecord,
    ) -> Result<HistoryRecord> {
        let id = new_id();
        let created_at = now_timestamp();
        sqlx::query(
            r#"
            INSERT INTO ai_analysis_history
                (id, seq, user_id, fragment_ids, target_fragment_id, result, raw_text, created_at)
            VALUES (?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM ai_analysis_history), ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(owner)
        .bind(serde_json::to_string(&record.fragment_ids)?)
        .bind(&record.target_fragment_id)
        .bind(serde_json::to_string(&record.result)?)
        .bind(&record.raw_text)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        Ok(HistoryRecord {
            id,
            fragment_ids: record.fragment_ids.clone(),
            target_fragment_id: record.target_fragment_id.clone(),
            result: record.result.clone(),
            raw_text: record.raw_text.clone(),
            created_at,
        })
    }

    async fn list_history(&self, owner: &str, limit: i64) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            "SELECT id, fragment_ids, target_fragment_id, result, raw_text, created_at \
             FROM ai_analysis_history WHERE user_id = ? ORDER BY seq DESC LIMIT ?",
        )
        .bind(owner)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(history_from_row).collect()
    }

    async fn get_history(&self, owner: &str, id: &str) -> Result<Option<HistoryRecord>> {
        let row = sqlx::query(
            "SELECT id, fragment_ids, target_fragment_id, result, raw_text, created_at \
             FROM ai_analysis_history WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(history_from_row).transpose()
    }

    async fn delete_history(&self, owner: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ai_analysis_history WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_suggestions(
        &self,
        owner: &str,
        suggestions: &[NewSuggestion],
    ) -> Result<usize> {
        let now = now_timestamp();
        let mut saved = 0;
        let mut tx = self.pool.begin().await?;
        for s in suggestions {
            let result = sqlx::query(
                r#"
                INSERT INTO fragment_relation_suggestions
                    (id, user_id, source_fragment_id, target_fragment_id, relation_type,
                     confidence, reason, status, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?)
                ON CONFLICT(source_fragment_id, target_fragment_id, relation_type) DO NOTHING
                "#,
            )
            .bind(new_id())
            .bind(owner)
            .bind(&s.source_fragment_id)
            .bind(&s.target_fragment_id)
            .bind(s.relation_type.as_str())
            .bind(s.confidence)
            .bind(&s.reason)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            saved += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(saved)
    }

    async fn pending_suggestions(
        &self,
        owner: &str,
        limit: i64,
    ) -> Result<Vec<StoredSuggestion>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.source_fragment_id, s.target_fragment_id, s.relation_type,
                   s.confidence, s.reason, s.status,
                   COALESCE(src.content, '') AS source_content,
                   COALESCE(tgt.content, '') AS target_content
            FROM fragment_relation_suggestions s
            LEFT JOIN fragments src ON src.id = s.source_fragment_id
            LEFT JOIN fragments tgt ON tgt.id = s.target_fragment_id
            WHERE s.user_id = ? AND s.status = 'pending'
            ORDER BY s.confidence DESC
            LIMIT ?
            "#,
        )
        .bind(owner)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<StoredSuggestion> {
                let kind: String = row.get("relation_type");
                let status: String = row.get("status");
                let source_content: String = row.get("source_content");
                let target_content: String = row.get("target_content");
                Ok(StoredSuggestion {
                    id: row.get("id"),
                    source_fragment_id: row.get("source_fragment_id"),
                    target_fragment_id: row.get("target_fragment_id"),
                    source_preview: preview(&source_content),
                    target_preview: preview(&target_content),
                    relation_type: kind.parse::<RelationType>().unwrap_or_default(),
                    confidence: row.get("confidence"),
                    reason: row.get("reason"),
                    status: status.parse::<SuggestionStatus>()?,
                })
            })
            .collect()
    }

    async fn count_pending_suggestions(&self, owner: &str) -> Result<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM fragment_relation_suggestions \
             WHERE user_id = ? AND status = 'pending'",
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn accept_suggestion(&self, owner: &str, id: &str) -> Result<Option<FragmentRelation>> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query(
            "SELECT source_fragment_id, target_fragment_id, relation_type, confidence, reason \
             FROM fragment_relation_suggestions \
             WHERE id = ? AND user_id = ? AND status = 'pending'",
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        let source: String = row.get("source_fragment_id");
        let target: String = row.get("target_fragment_id");
        let kind: String = row.get("relation_type");
        let confidence: f64 = row.get("confidence");
        let reason: String = row.get("reason");

        sqlx::query("UPDATE fragment_relation_suggestions SET status = 'accepted' WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO fragment_relations
                (id, seq, user_id, source_fragment_id, target_fragment_id, relation_type,
                 strength, description, ai_generated, created_at)
            VALUES (?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM fragment_relations),
                    ?, ?, ?, ?, ?, ?, 1, ?)
            ON CONFLICT(source_fragment_id, target_fragment_id, relation_type) DO NOTHING
            "#,
        )
        .bind(new_id())
        .bind(owner)
        .bind(&source)
        .bind(&target)
        .bind(&kind)
        .bind(confidence)
        .bind(Some(reason).filter(|r| !r.is_empty()))
        .bind(now_timestamp())
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            "SELECT {} FROM fragment_relations \
             WHERE source_fragment_id = ? AND target_fragment_id = ? AND relation_type = ?",
            RELATION_COLUMNS
        );
        let relation = sqlx::query(&sql)
            .bind(&source)
            .bind(&target)
            .bind(&kind)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(relation_from_row(&relation)))
    }

    async fn reject_suggestion(&self, owner: &str, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE fragment_relation_suggestions SET status = 'rejected' \
             WHERE id = ? AND user_id = ? AND status = 'pending'",
        )
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_relations(
        &self,
        owner: &str,
        fragment_id: Option<&str>,
    ) -> Result<Vec<FragmentRelation>> {
        let rows = match fragment_id {
            Some(fragment_id) => {
                let sql = format!(
                    "SELECT {} FROM fragment_relations WHERE user_id = ? \
                     AND (source_fragment_id = ? OR target_fragment_id = ?) ORDER BY seq DESC",
                    RELATION_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(owner)
                    .bind(fragment_id)
                    .bind(fragment_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM fragment_relations WHERE user_id = ? ORDER BY seq DESC",
                    RELATION_COLUMNS
                );
                sqlx::query(&sql).bind(owner).fetch_all(&self.pool).await?
            }
        };
        Ok(rows.iter().map(relation_from_row).collect())
    }

    async fn create_relation(
        &self,
        owner: &str,
        relation: &NewRelation,
    ) -> Result<Option<FragmentRelation>> {
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

        let result = sqlx::query(
            r#"
            INSERT INTO fragment_relations
                (id, seq, user_id, source_fragment_id, target_fragment_id, relation_type,
                 strength, description, ai_generated, created_at)
            VALUES (?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM fragment_relations),
                    ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(source_fragment_id, target_fragment_id, relation_type) DO NOTHING
            "#,
        )
        .bind(&stored.id)
        .bind(owner)
        .bind(&stored.source_fragment_id)
        .bind(&stored.target_fragment_id)
        .bind(stored.relation_type.as_str())
        .bind(stored.strength)
        .bind(&stored.description)
        .bind(&stored.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    #[tokio::test]
    async fn test_history_round_trips_json_columns() {
        let store = memory_store().await;
        let record = NewHistoryRecord {
            fragment_ids: vec!["a".into(), "b".into()],
            target_fragment_id: Some("a".into()),
            result: serde_json::json!({"groups": [], "suggestions": ["x"]}),
            raw_text: Some("raw".into()),
        };
        store.insert_history("u1", &record).await.unwrap();
        store.insert_history("u1", &record).await.unwrap();
        store.insert_history("u2", &record).await.unwrap();

        let listed = store.list_history("u1", 20).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].fragment_ids, vec!["a", "b"]);
        assert_eq!(listed[0].result["suggestions"][0], "x");
        assert!(store.delete_history("u1", &listed[1].id).await.unwrap());
        assert!(!store.delete_history("u1", &listed[1].id).await.unwrap());
    }

    #[tokio::test]
    async fn test_fragments_by_ids_filters_owner() {
        let store = memory_store().await;
        let a = store.create_fragment("u1", "lantern", None).await.unwrap();
        let b = store.create_fragment("u2", "not yours", None).await.unwrap();
        let found = store
            .fragments_by_ids("u1", &[a.id.clone(), b.id.clone(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(found, vec![a]);
    }

    #[tokio::test]
    async fn test_suggestion_lifecycle() {
        let store = memory_store().await;
        let a = store.create_fragment("u1", "the bridge at dusk", None).await.unwrap();
        let b = store.create_fragment("u1", "a letter never sent", None).await.unwrap();
        let s = NewSuggestion {
            source_fragment_id: a.id.clone(),
            target_fragment_id: b.id.clone(),
            relation_type: RelationType::Emotional,
            confidence: 0.85,
            reason: "both ache".into(),
        };
        assert_eq!(store.save_suggestions("u1", &[s.clone(), s]).await.unwrap(), 1);

        let pending = store.pending_suggestions("u1", 10).await.unwrap();
        assert_eq!(pending[0].source_preview, "the bridge at dusk...");
        assert_eq!(store.count_pending_suggestions("u1").await.unwrap(), 1);

        let relation = store
            .accept_suggestion("u1", &pending[0].id)
            .await
            .unwrap()
            .unwrap();
        assert!(relation.ai_generated);
        assert_eq!(relation.relation_type, RelationType::Emotional);
        assert_eq!(store.accept_suggestion("u1", &pending[0].id).await.unwrap(), None);
        assert_eq!(store.list_relations("u1", Some(&b.id)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_tag_queries() {
        let store = memory_store().await;
        let tag = store.create_tag("u1", "night", None).await.unwrap();
        let a = store.create_fragment("u1", "neon", None).await.unwrap();
        assert_eq!(
            store
                .owned_tag_ids("u2", &[tag.id.clone()])
                .await
                .unwrap(),
            Vec::<String>::new()
        );
        store.attach_tags(&a.id, &[tag.id.clone()]).await.unwrap();
        store.attach_tags(&a.id, &[tag.id.clone()]).await.unwrap();
        assert_eq!(store.fragment_tag_ids(&a.id).await.unwrap(), vec![tag.id.clone()]);
        store
            .detach_tags("u1", &[a.id.clone()], &[tag.id])
            .await
            .unwrap();
        assert!(store.fragment_tag_ids(&a.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_is_scoped_and_escapes_wildcards() {
        let store = memory_store().await;
        let story = store.create_story("u1", "Harbour Nights", None, None).await.unwrap();
        let direct = store
            .create_fragment("u1", "100% of the HARBOUR", Some(&story.id))
            .await
            .unwrap();
        let in_story = store.create_fragment("u1", "a gull", Some(&story.id)).await.unwrap();
        store.create_fragment("u1", "100 boats", None).await.unwrap();
        store.create_fragment("u2", "harbour too", None).await.unwrap();

        let (page, matched) = store
            .search_fragments("u1", "harbour", None, 20, 0)
            .await
            .unwrap();
        assert_eq!(matched, 1);
        assert_eq!(page[0].id, direct.id);

        let (page, matched) = store.search_fragments("u1", "100%", None, 20, 0).await.unwrap();
        assert_eq!((page.len(), matched), (1, 1));

        let (_, matched) = store
            .search_fragments("u1", "harbour", Some("elsewhere"), 20, 0)
            .await
            .unwrap();
        assert_eq!(matched, 0);

        let related = store
            .fragments_in_matching_stories("u1", "nights", &[direct.id.clone()], 10)
            .await
            .unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, in_story.id);
        assert_eq!(
            store
                .fragments_in_matching_stories("u1", "nights", &[], 10)
                .await
                .unwrap()
                .len(),
            2
        );

        let stories = store.search_stories("u1", "NIGHT", 5).await.unwrap();
        assert_eq!(stories[0].title, "Harbour Nights");
        assert!(store.search_stories("u2", "night", 5).await.unwrap().is_empty());
        store.create_tag("u1", "night_shift", None).await.unwrap();
        store.create_tag("u1", "nightXshift", None).await.unwrap();
        let tags = store.search_tags("u1", "t_s", 5).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "night_shift");
    }

    #[tokio::test]
    async fn test_get_history_is_owner_scoped() {
        let store = memory_store().await;
        let record = NewHistoryRecord {
            fragment_ids: vec!["a".into()],
            target_fragment_id: None,
            result: serde_json::json!({"themes": [{"heat_score": 3.0}]}),
            raw_text: Some("{}".into()),
        };
        let stored = store.insert_history("u1", &record).await.unwrap();
        assert_eq!(store.get_history("u1", &stored.id).await.unwrap(), Some(stored.clone()));
        assert_eq!(store.get_history("u2", &stored.id).await.unwrap(), None);
        assert_eq!(store.get_history("u1", "missing").await.unwrap(), None);
    }
}
