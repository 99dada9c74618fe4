use std::sync::Arc;

use redis::aio::ConnectionManager;

use crate::config::Config;
use crate::crypto::password::Argon2Hasher;
use crate::repositories::{
    snippet::{MemorySnippetRepository, PgSnippetRepository, SnippetRepository},
    user::{MemoryUserRepository, PgUserRepository, UserRepository},
};
use crate::services::credentials::Credentials;
use crate::session::{
    SessionStore, memory::MemorySessionStore, redis::RedisSessionStore,
};

/// The application's state.
///
/// Every storage capability is chosen once, here, and handed to the rest of
/// the service explicitly.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// Account creation and authentication.
    pub credentials: Credentials,
    /// Snippet storage.
    pub snippets: Arc<dyn SnippetRepository>,
    /// Session storage.
    pub sessions: Arc<dyn SessionStore>,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// PostgreSQL and Redis are used when configured; otherwise the
    /// corresponding in-memory backend takes their place.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let hasher = Argon2Hasher::new(config.hash_cost, config.hash_workers)?;

        let (users, snippets): (Arc<dyn UserRepository>, Arc<dyn SnippetRepository>) =
            match &config.database_url {
                Some(url) => {
                    let pool = crate::db::create_pool(url)?;
                    crate::db::ensure_schema(&pool).await?;
                    tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");
                    (
                        Arc::new(PgUserRepository::new(pool.clone())),
                        Arc::new(PgSnippetRepository::new(pool)),
                    )
                }
                None => {
                    tracing::warn!("DATABASE_URL not set, users and snippets are kept in memory");
                    (
                        Arc::new(MemoryUserRepository::new()),
                        Arc::new(MemorySnippetRepository::new()),
                    )
                }
            };

        let sessions: Arc<dyn SessionStore> = match &config.redis_url {
            Some(url) => {
                let redis_client = redis::Client::open(url.as_str())?;
                let redis = ConnectionManager::new(redis_client).await?;
                tracing::info!("✅ Redis Connection Manager initialized (sessions)");
                Arc::new(RedisSessionStore::new(redis, config.session_lifetime()))
            }
            None => {
                tracing::warn!("REDIS_URL not set, sessions are kept in memory");
                Arc::new(MemorySessionStore::new(config.session_lifetime()))
            }
        };

        Ok(Self {
            config: config.clone(),
            credentials: Credentials::new(users, hasher),
            snippets,
            sessions,
        })
    }

    /// Creates an `AppState` backed entirely by in-memory storage.
    pub fn in_memory(config: &Config) -> anyhow::Result<Self> {
        let hasher = Argon2Hasher::new(config.hash_cost, config.hash_workers)?;

        Ok(Self {
            config: config.clone(),
            credentials: Credentials::new(Arc::new(MemoryUserRepository::new()), hasher),
            snippets: Arc::new(MemorySnippetRepository::new()),
            sessions: Arc::new(MemorySessionStore::new(config.session_lifetime())),
        })
    }
}
