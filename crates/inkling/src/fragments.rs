//! Local fragment commands.
//!
//! `ink fragment add`, `list` and `search` work directly against the
//! database as the user the configured client token maps to, so fragments
//! can be seeded before a server is running.

use anyhow::{bail, Result};

use inkling_core::models::preview;
use inkling_core::search::{search, SearchQuery};
use inkling_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_add(config: &Config, content: &str, story: Option<&str>) -> Result<()> {
    if content.trim().is_empty() {
        bail!("fragment content must not be empty");
    }
    let owner = config.local_owner()?;
    let store = SqliteStore::new(db::connect(config).await?);

    if let Some(story_id) = story {
        if !store.story_exists(&owner, story_id).await? {
            bail!("story not found: {}", story_id);
        }
    }

    let fragment = store.create_fragment(&owner, content, story).await?;
    println!("{}", fragment.id);

    store.pool().close().await;
    Ok(())
}

pub async fn run_list(config: &Config) -> Result<()> {
    let owner = config.local_owner()?;
    let store = SqliteStore::new(db::connect(config).await?);
    let fragments = store.list_fragments(&owner).await?;

    if fragments.is_empty() {
        println!("No fragments.");
    }
    for fragment in &fragments {
        let story = fragment.story_id.as_deref().unwrap_or("-");
        println!("{}  [{}]  {}", fragment.id, story, preview(&fragment.content));
    }

    store.pool().close().await;
    Ok(())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    story: Option<&str>,
    limit: i64,
) -> Result<()> {
    let query = SearchQuery::new(Some(query), story.map(str::to_string), Some(limit), None)?;
    let owner = config.local_owner()?;
    let store = SqliteStore::new(db::connect(config).await?);
    let page = search(&store, &owner, &query).await?;

    if page.fragments.is_empty() {
        println!("No fragments match \"{}\".", page.query);
    }
    for fragment in &page.fragments {
        let story = fragment.story_id.as_deref().unwrap_or("-");
        println!("{}  [{}]  {}", fragment.id, story, preview(&fragment.content));
    }
    if page.has_more {
        println!("... {} matches in total", page.total);
    }

    store.pool().close().await;
    Ok(())
}
