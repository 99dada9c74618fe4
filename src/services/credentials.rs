use std::sync::Arc;

use crate::crypto::password::Argon2Hasher;
use crate::models::{error::ModelError, user::User};
use crate::repositories::user::UserRepository;

/// Canonical form of an email address for storage and lookup.
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Account creation, authentication and password changes over a
/// [`UserRepository`]. Raw passwords only ever reach the hasher.
#[derive(Clone)]
pub struct Credentials {
    users: Arc<dyn UserRepository>,
    hasher: Argon2Hasher,
}

impl Credentials {
    /// Creates a new `Credentials` service.
    pub fn new(users: Arc<dyn UserRepository>, hasher: Argon2Hasher) -> Self {
        Self { users, hasher }
    }

    /// Creates a user with a hashed password.
    ///
    /// # Returns
    ///
    /// The new user's id, or `DuplicateEmail` if the address is taken.
    pub async fn insert(&self, name: &str, email: &str, password: &str) -> Result<i64, ModelError> {
        let email = normalize_email(email);
        let hashed_password = self.hasher.hash(password).await?;

        let id = self.users.create(name.trim(), &email, &hashed_password).await?;
        tracing::info!("✅ User created with ID: {}", id);
        Ok(id)
    }

    /// Authenticates a user.
    ///
    /// Unknown emails, inactive accounts and wrong passwords all fail with
    /// `InvalidCredentials` after the same amount of hashing work.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<i64, ModelError> {
        let email = normalize_email(email);

        let Some(user) = self.users.find_by_email(&email).await? else {
            self.hasher.verify_dummy(password).await?;
            return Err(ModelError::InvalidCredentials);
        };

        let matches = self.hasher.verify(password, &user.hashed_password).await?;
        if !matches || !user.active {
            tracing::debug!("Authentication rejected");
            return Err(ModelError::InvalidCredentials);
        }

        tracing::info!("✅ User authenticated: {}", user.id);
        Ok(user.id)
    }

    /// Fetches a user by id, or `NoRecord`.
    pub async fn get(&self, id: i64) -> Result<User, ModelError> {
        self.users.find_by_id(id).await?.ok_or(ModelError::NoRecord)
    }

    /// Changes a user's password after re-verifying the current one.
    pub async fn change_password(
        &self,
        id: i64,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ModelError> {
        let user = self.get(id).await?;

        if !self.hasher.verify(current_password, &user.hashed_password).await? {
            return Err(ModelError::InvalidCredentials);
        }

        let hashed_password = self.hasher.hash(new_password).await?;
        self.users.update_password(id, &hashed_password).await?;

        tracing::info!("✅ Password changed for user: {}", id);
        Ok(())
    }
}
