use std::collections::HashMap;
use std::fmt;

use futures::future::{BoxFuture, FutureExt};
use thiserror::Error;

use crate::crypto::token;

/// Attributes held by one session.
pub type SessionData = HashMap<String, String>;

/// Errors raised by a session backend.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Stored data could not be interpreted.
    #[error("Malformed session: {0}")]
    Malformed(String),
}

/// Opaque per-client session token, as carried by the session cookie.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generates a fresh random token.
    pub fn generate() -> Self {
        Self(token::generate_token())
    }

    /// Accepts a client-supplied value only if it looks like one of ours.
    pub fn parse(value: &str) -> Option<Self> {
        token::is_well_formed(value).then(|| Self(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Tokens are credentials; keep them out of debug logs.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({}…)", &self.0[..6.min(self.0.len())])
    }
}

/// One buffered mutation of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Put(String, String),
    Remove(String),
    /// Move the data to a fresh token and retire the old one.
    Renew,
    /// Drop all data and retire the token; later changes start a new session.
    Destroy,
}

/// Server-side session storage.
///
/// Every method is scoped to one token. Operations on the same token are
/// serialized; operations on different tokens do not wait on each other.
pub trait SessionStore: Send + Sync {
    /// Loads a session's attributes and refreshes its idle expiry.
    /// Unknown or expired tokens yield `None`.
    fn load<'a>(&'a self, token: &'a SessionToken) -> BoxFuture<'a, Result<Option<SessionData>, SessionError>>;

    /// Applies `changes` in order as one atomic step.
    ///
    /// A token whose data was moved away or emptied is never written to
    /// again; changes sent to it start a new session under a fresh token.
    ///
    /// # Returns
    ///
    /// The token the data now lives under, or `None` when no data remains.
    fn apply<'a>(
        &'a self,
        token: &'a SessionToken,
        changes: Vec<Change>,
    ) -> BoxFuture<'a, Result<Option<SessionToken>, SessionError>>;

    /// Reads and removes one attribute in a single step.
    fn take<'a>(
        &'a self,
        token: &'a SessionToken,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, SessionError>>;

    /// Purges expired sessions and returns how many were removed.
    fn sweep(&self) -> BoxFuture<'_, Result<usize, SessionError>>;

    /// Sets one attribute.
    fn put<'a>(
        &'a self,
        token: &'a SessionToken,
        key: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<(), SessionError>> {
        self.apply(token, vec![Change::Put(key.to_owned(), value.to_owned())])
            .map(|result| result.map(|_| ()))
            .boxed()
    }

    /// Moves the session to a fresh token, which is returned.
    fn renew<'a>(&'a self, token: &'a SessionToken) -> BoxFuture<'a, Result<SessionToken, SessionError>> {
        self.apply(token, vec![Change::Renew])
            .map(|result| result.map(|renewed| renewed.unwrap_or_else(SessionToken::generate)))
            .boxed()
    }

    /// Deletes the session.
    fn destroy<'a>(&'a self, token: &'a SessionToken) -> BoxFuture<'a, Result<(), SessionError>> {
        self.apply(token, vec![Change::Destroy])
            .map(|result| result.map(|_| ()))
            .boxed()
    }
}

/// Replays `changes` over `data`, starting from `token`.
///
/// Returns the token the data ends up under and whether it differs from
/// `token`. Shared by the backends so they agree on what a change set means.
pub(crate) fn replay(
    token: &SessionToken,
    data: &mut SessionData,
    changes: Vec<Change>,
) -> (SessionToken, bool) {
    let mut current = token.clone();
    let mut moved = false;

    for change in changes {
        match change {
            Change::Put(key, value) => {
                data.insert(key, value);
            }
            Change::Remove(key) => {
                data.remove(&key);
            }
            Change::Renew => {
                current = SessionToken::generate();
                moved = true;
            }
            Change::Destroy => {
                data.clear();
                current = SessionToken::generate();
                moved = true;
            }
        }
    }

    (current, moved)
}
