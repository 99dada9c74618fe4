use std::sync::Arc;

use chrono::{Duration, Utc};
use deadpool_postgres::Pool;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::RwLock;
use tokio_postgres::Row;

use crate::models::{error::ModelError, snippet::Snippet};

/// How many snippets the home page lists.
pub const LATEST_LIMIT: usize = 10;

/// Storage for snippets. Expired snippets are never returned.
pub trait SnippetRepository: Send + Sync {
    /// Stores a snippet expiring `expires_days` from now and returns its id.
    fn insert<'a>(
        &'a self,
        title: &'a str,
        content: &'a str,
        expires_days: i32,
    ) -> BoxFuture<'a, Result<i64, ModelError>>;

    /// Fetches an unexpired snippet, or `NoRecord`.
    fn get(&self, id: i64) -> BoxFuture<'_, Result<Snippet, ModelError>>;

    /// The most recently created unexpired snippets, newest first.
    fn latest(&self) -> BoxFuture<'_, Result<Vec<Snippet>, ModelError>>;
}

fn check_expiry(expires_days: i32) -> Result<(), ModelError> {
    if expires_days < 1 {
        return Err(ModelError::Invalid(format!(
            "snippet must expire at least one day after creation, got {expires_days}"
        )));
    }
    Ok(())
}

fn row_to_snippet(row: &Row) -> Result<Snippet, ModelError> {
    Ok(Snippet {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        created: row.try_get("created")?,
        expires: row.try_get("expires")?,
    })
}

/// PostgreSQL-backed snippets.
#[derive(Clone)]
pub struct PgSnippetRepository {
    pool: Pool,
}

impl PgSnippetRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

impl SnippetRepository for PgSnippetRepository {
    fn insert<'a>(
        &'a self,
        title: &'a str,
        content: &'a str,
        expires_days: i32,
    ) -> BoxFuture<'a, Result<i64, ModelError>> {
        async move {
            check_expiry(expires_days)?;

            let client = self.pool.get().await?;
            let row = client
                .query_one(
                    r#"
                    INSERT INTO snippets (title, content, created, expires)
                    VALUES ($1, $2, NOW(), NOW() + make_interval(days => $3))
                    RETURNING id
                    "#,
                    &[&title, &content, &expires_days],
                )
                .await?;

            Ok(row.try_get("id")?)
        }
        .boxed()
    }

    fn get(&self, id: i64) -> BoxFuture<'_, Result<Snippet, ModelError>> {
        async move {
            let client = self.pool.get().await?;
            let row = client
                .query_opt(
                    r#"
                    SELECT id, title, content, created, expires
                    FROM snippets
                    WHERE expires > NOW() AND id = $1
                    "#,
                    &[&id],
                )
                .await?
                .ok_or(ModelError::NoRecord)?;

            row_to_snippet(&row)
        }
        .boxed()
    }

    fn latest(&self) -> BoxFuture<'_, Result<Vec<Snippet>, ModelError>> {
        async move {
            let client = self.pool.get().await?;
            let limit = LATEST_LIMIT as i64;
            let rows = client
                .query(
                    r#"
                    SELECT id, title, content, created, expires
                    FROM snippets
                    WHERE expires > NOW()
                    ORDER BY created DESC, id DESC
                    LIMIT $1
                    "#,
                    &[&limit],
                )
                .await?;

            rows.iter().map(row_to_snippet).collect()
        }
        .boxed()
    }
}

/// In-memory snippets, for tests and database-less runs.
#[derive(Clone, Default)]
pub struct MemorySnippetRepository {
    snippets: Arc<RwLock<Vec<Snippet>>>,
}

impl MemorySnippetRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnippetRepository for MemorySnippetRepository {
    fn insert<'a>(
        &'a self,
        title: &'a str,
        content: &'a str,
        expires_days: i32,
    ) -> BoxFuture<'a, Result<i64, ModelError>> {
        async move {
            check_expiry(expires_days)?;

            let mut snippets = self.snippets.write().await;
            let id = snippets.last().map_or(1, |s| s.id + 1);
            let created = Utc::now();
            snippets.push(Snippet {
                id,
                title: title.to_owned(),
                content: content.to_owned(),
                created,
                expires: created + Duration::days(i64::from(expires_days)),
            });
            Ok(id)
        }
        .boxed()
    }

    fn get(&self, id: i64) -> BoxFuture<'_, Result<Snippet, ModelError>> {
        async move {
            let now = Utc::now();
            let snippets = self.snippets.read().await;
            snippets
                .iter()
                .find(|s| s.id == id && !s.is_expired(now))
                .cloned()
                .ok_or(ModelError::NoRecord)
        }
        .boxed()
    }

    fn latest(&self) -> BoxFuture<'_, Result<Vec<Snippet>, ModelError>> {
        async move {
            let now = Utc::now();
            let snippets = self.snippets.read().await;
            Ok(snippets
                .iter()
                .rev()
                .filter(|s| !s.is_expired(now))
                .take(LATEST_LIMIT)
                .cloned()
                .collect())
        }
        .boxed()
    }
}
