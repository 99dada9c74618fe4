use thiserror::Error;

use crate::crypto::password::HashError;

/// Errors surfaced by the data-access layer.
///
/// `InvalidCredentials` covers both "no such email" and "wrong password";
/// callers must not be able to tell the two apart.
#[derive(Error, Debug)]
pub enum ModelError {
    /// No matching record was found.
    #[error("models: no matching record found")]
    NoRecord,

    /// The supplied credentials do not match an active account.
    #[error("models: invalid credentials")]
    InvalidCredentials,

    /// The email address is already registered.
    #[error("models: duplicate email")]
    DuplicateEmail,

    /// The input breaks a model invariant.
    #[error("models: invalid input: {0}")]
    Invalid(String),

    /// Password hashing failed.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
}
