use std::sync::Arc;

use chrono::Utc;
use deadpool_postgres::Pool;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::RwLock;
use tokio_postgres::Row;

use crate::models::{error::ModelError, user::User};

/// Name of the unique constraint guarding `users.email`.
const EMAIL_CONSTRAINT: &str = "users_uc_email";

/// Storage for user accounts.
///
/// Implementations only persist what they are given; hashing and credential
/// checks live in [`crate::services::credentials::Credentials`].
pub trait UserRepository: Send + Sync {
    /// Creates a user and returns its id, or `DuplicateEmail`.
    fn create<'a>(
        &'a self,
        name: &'a str,
        email: &'a str,
        hashed_password: &'a str,
    ) -> BoxFuture<'a, Result<i64, ModelError>>;

    /// Finds a user by their email address, active or not.
    fn find_by_email<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Option<User>, ModelError>>;

    /// Finds a user by their ID.
    fn find_by_id(&self, id: i64) -> BoxFuture<'_, Result<Option<User>, ModelError>>;

    /// Replaces a user's password hash, or `NoRecord`.
    fn update_password<'a>(
        &'a self,
        id: i64,
        hashed_password: &'a str,
    ) -> BoxFuture<'a, Result<(), ModelError>>;
}

/// A helper function to map a `tokio_postgres::Row` to a `User`.
fn row_to_user(row: &Row) -> Result<User, ModelError> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        hashed_password: row.try_get("hashed_password")?,
        created: row.try_get("created")?,
        active: row.try_get("active")?,
    })
}

/// PostgreSQL-backed users.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: Pool,
}

impl PgUserRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

impl UserRepository for PgUserRepository {
    fn create<'a>(
        &'a self,
        name: &'a str,
        email: &'a str,
        hashed_password: &'a str,
    ) -> BoxFuture<'a, Result<i64, ModelError>> {
        async move {
            let client = self.pool.get().await?;
            let row = client
                .query_one(
                    r#"
                    INSERT INTO users (name, email, hashed_password, created)
                    VALUES ($1, $2, $3, NOW())
                    RETURNING id
                    "#,
                    &[&name, &email, &hashed_password],
                )
                .await
                .map_err(|e| {
                    let duplicate = e
                        .as_db_error()
                        .and_then(|db| db.constraint())
                        .is_some_and(|constraint| constraint == EMAIL_CONSTRAINT);
                    if duplicate {
                        ModelError::DuplicateEmail
                    } else {
                        ModelError::from(e)
                    }
                })?;

            Ok(row.try_get("id")?)
        }
        .boxed()
    }

    fn find_by_email<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Option<User>, ModelError>> {
        async move {
            let client = self.pool.get().await?;
            let row = client
                .query_opt(
                    r#"
                    SELECT id, name, email, hashed_password, created, active
                    FROM users
                    WHERE email = $1
                    "#,
                    &[&email],
                )
                .await?;
            row.map(|r| row_to_user(&r)).transpose()
        }
        .boxed()
    }

    fn find_by_id(&self, id: i64) -> BoxFuture<'_, Result<Option<User>, ModelError>> {
        async move {
            let client = self.pool.get().await?;
            let row = client
                .query_opt(
                    r#"
                    SELECT id, name, email, hashed_password, created, active
                    FROM users
                    WHERE id = $1
                    "#,
                    &[&id],
                )
                .await?;
            row.map(|r| row_to_user(&r)).transpose()
        }
        .boxed()
    }

    fn update_password<'a>(
        &'a self,
        id: i64,
        hashed_password: &'a str,
    ) -> BoxFuture<'a, Result<(), ModelError>> {
        async move {
            let client = self.pool.get().await?;
            let updated = client
                .execute(
                    "UPDATE users SET hashed_password = $1 WHERE id = $2",
                    &[&hashed_password, &id],
                )
                .await?;

            if updated == 0 {
                return Err(ModelError::NoRecord);
            }
            Ok(())
        }
        .boxed()
    }
}

/// In-memory users, for tests and database-less runs.
#[derive(Clone, Default)]
pub struct MemoryUserRepository {
    users: Arc<RwLock<Vec<User>>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the `active` flag of a user.
    pub async fn set_active(&self, id: i64, active: bool) -> Result<(), ModelError> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(ModelError::NoRecord)?;
        user.active = active;
        Ok(())
    }
}

impl UserRepository for MemoryUserRepository {
    fn create<'a>(
        &'a self,
        name: &'a str,
        email: &'a str,
        hashed_password: &'a str,
    ) -> BoxFuture<'a, Result<i64, ModelError>> {
        async move {
            let mut users = self.users.write().await;
            if users.iter().any(|u| u.email == email) {
                return Err(ModelError::DuplicateEmail);
            }

            let id = users.last().map_or(1, |u| u.id + 1);
            users.push(User {
                id,
                name: name.to_owned(),
                email: email.to_owned(),
                hashed_password: hashed_password.to_owned(),
                created: Utc::now(),
                active: true,
            });
            Ok(id)
        }
        .boxed()
    }

    fn find_by_email<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Option<User>, ModelError>> {
        async move {
            let users = self.users.read().await;
            Ok(users.iter().find(|u| u.email == email).cloned())
        }
        .boxed()
    }

    fn find_by_id(&self, id: i64) -> BoxFuture<'_, Result<Option<User>, ModelError>> {
        async move {
            let users = self.users.read().await;
            Ok(users.iter().find(|u| u.id == id).cloned())
        }
        .boxed()
    }

    fn update_password<'a>(
        &'a self,
        id: i64,
        hashed_password: &'a str,
    ) -> BoxFuture<'a, Result<(), ModelError>> {
        async move {
            let mut users = self.users.write().await;
            let user = users
                .iter_mut()
                .find(|u| u.id == id)
                .ok_or(ModelError::NoRecord)?;
            user.hashed_password = hashed_password.to_owned();
            Ok(())
        }
        .boxed()
    }
}
