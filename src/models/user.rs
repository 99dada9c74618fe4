use chrono::{DateTime, Utc};
use serde::Serialize;

/// Represents a user in the system.
#[derive(Clone, Debug, Serialize)]
pub struct User {
    /// The unique identifier for the user.
    pub id: i64,
    /// The user's display name.
    pub name: String,
    /// The user's email address, unique across users.
    pub email: String,
    /// The user's Argon2id hash in PHC format.
    #[serde(skip)]
    pub hashed_password: String,
    /// The timestamp when the user was created.
    pub created: DateTime<Utc>,
    /// Whether the user may sign in.
    pub active: bool,
}
