use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{extract::FromRequestParts, http::request::Parts};

use super::store::{Change, SessionData, SessionError, SessionStore, SessionToken};
use crate::crypto::token;
use crate::error::AppError;

/// Session key holding the signed-in user's id.
pub const AUTH_USER_ID: &str = "authenticated_user_id";
/// Session key holding the forgery-prevention token.
pub const CSRF_TOKEN: &str = "csrf_token";
/// Session key holding a one-shot message for the next page.
pub const FLASH: &str = "flash";
/// Session key holding where to send the user after logging in.
pub const REDIRECT_AFTER_LOGIN: &str = "redirect_after_login";

/// Result of writing a request's session changes back to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    /// Nothing was changed.
    Unchanged,
    /// Data is stored under this token.
    Saved(SessionToken),
    /// No data remains; the client should forget its token.
    Ended,
}

struct Inner {
    token: SessionToken,
    data: SessionData,
    changes: Vec<Change>,
    /// Whether `token` exists in the store.
    stored: bool,
}

/// The session attached to one request.
///
/// Reads come from the snapshot taken when the request started. Writes are
/// buffered and only reach the store through [`Session::commit`], which the
/// session middleware calls once the handler has returned.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn SessionStore>,
    inner: Arc<Mutex<Inner>>,
}

impl Session {
    /// Resolves the session for a presented token.
    ///
    /// Never fails: an absent, unknown or unreadable token yields a fresh,
    /// empty session under a new token.
    pub async fn load(store: Arc<dyn SessionStore>, presented: Option<SessionToken>) -> Self {
        let loaded = match presented {
            Some(token) => match store.load(&token).await {
                Ok(Some(data)) => Some((token, data)),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!("❌ Session load failed, starting a fresh one: {}", e);
                    None
                }
            },
            None => None,
        };

        let inner = match loaded {
            Some((token, data)) => Inner {
                token,
                data,
                changes: Vec::new(),
                stored: true,
            },
            None => Inner {
                token: SessionToken::generate(),
                data: SessionData::new(),
                changes: Vec::new(),
                stored: false,
            },
        };

        Self {
            store,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The token this session was loaded under.
    pub fn token(&self) -> SessionToken {
        self.lock().token.clone()
    }

    /// Whether the store already held this session when the request began.
    pub fn is_stored(&self) -> bool {
        self.lock().stored
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().data.get(key).cloned()
    }

    pub fn put(&self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let mut inner = self.lock();
        inner.data.insert(key.to_owned(), value.clone());
        inner.changes.push(Change::Put(key.to_owned(), value));
    }

    pub fn remove(&self, key: &str) {
        let mut inner = self.lock();
        inner.data.remove(key);
        inner.changes.push(Change::Remove(key.to_owned()));
    }

    /// Reads a value and clears it, so it is seen by exactly one request.
    ///
    /// For values that already live in the store this goes to the store
    /// straight away instead of waiting for the commit.
    pub async fn pop(&self, key: &str) -> Result<Option<String>, SessionError> {
        let (token, local, remote) = {
            let mut inner = self.lock();
            let written_here = inner
                .changes
                .iter()
                .any(|change| matches!(change, Change::Put(k, _) if k == key));
            let local = inner.data.remove(key);
            if local.is_some() {
                inner.changes.push(Change::Remove(key.to_owned()));
            }
            (inner.token.clone(), local, inner.stored && !written_here)
        };

        if !remote {
            return Ok(local);
        }
        self.store.take(&token, key).await
    }

    /// Moves the session to a new token when the commit happens.
    pub fn renew(&self) {
        self.lock().changes.push(Change::Renew);
    }

    /// Drops all data when the commit happens.
    pub fn destroy(&self) {
        let mut inner = self.lock();
        inner.data.clear();
        inner.changes.push(Change::Destroy);
    }

    /// The signed-in user's id, if any.
    pub fn user_id(&self) -> Option<i64> {
        self.get(AUTH_USER_ID).and_then(|id| id.parse().ok())
    }

    /// The session's forgery-prevention token, created on first use.
    pub fn csrf_token(&self) -> String {
        if let Some(existing) = self.get(CSRF_TOKEN) {
            return existing;
        }

        let fresh = token::generate_token();
        self.put(CSRF_TOKEN, fresh.clone());
        fresh
    }

    /// Writes the buffered changes to the store in one step.
    pub async fn commit(&self) -> Result<Commit, SessionError> {
        let (token, changes) = {
            let mut inner = self.lock();
            if inner.changes.is_empty() {
                return Ok(Commit::Unchanged);
            }
            (inner.token.clone(), std::mem::take(&mut inner.changes))
        };

        let outcome = match self.store.apply(&token, changes).await? {
            Some(saved) => Commit::Saved(saved),
            None => Commit::Ended,
        };

        let mut inner = self.lock();
        match &outcome {
            Commit::Saved(saved) => {
                inner.token = saved.clone();
                inner.stored = true;
            }
            _ => inner.stored = false,
        }
        Ok(outcome)
    }
}

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| AppError::Internal("session layer is not installed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::memory::MemorySessionStore;
    use chrono::Duration;

    fn store() -> Arc<MemorySessionStore> {
        Arc::new(MemorySessionStore::new(Duration::hours(12)))
    }

    #[tokio::test]
    async fn fresh_session_commits_nothing_until_touched() {
        let store = store();
        let session = Session::load(store.clone(), None).await;

        assert!(!session.is_stored());
        assert_eq!(session.commit().await.unwrap(), Commit::Unchanged);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_token_is_replaced() {
        let store = store();
        let forged = SessionToken::generate();
        let session = Session::load(store.clone(), Some(forged.clone())).await;

        assert_ne!(session.token(), forged);
        assert!(!session.is_stored());
    }

    #[tokio::test]
    async fn changes_are_invisible_until_commit() {
        let store = store();
        let session = Session::load(store.clone(), None).await;
        session.put(FLASH, "hello");

        assert!(store.load(&session.token()).await.unwrap().is_none());

        let Commit::Saved(token) = session.commit().await.unwrap() else {
            panic!("expected the session to be saved");
        };
        let data = store.load(&token).await.unwrap().unwrap();
        assert_eq!(data.get(FLASH).map(String::as_str), Some("hello"));
    }

    #[tokio::test]
    async fn dropped_session_commits_nothing() {
        let store = store();
        let session = Session::load(store.clone(), None).await;
        session.put(AUTH_USER_ID, "1");
        drop(session);

        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn renew_issues_a_new_token() {
        let store = store();
        let first = Session::load(store.clone(), None).await;
        first.put(CSRF_TOKEN, "t");
        let Commit::Saved(before) = first.commit().await.unwrap() else {
            panic!("expected save");
        };

        let second = Session::load(store.clone(), Some(before.clone())).await;
        second.renew();
        second.put(AUTH_USER_ID, "9");
        let Commit::Saved(after) = second.commit().await.unwrap() else {
            panic!("expected save");
        };

        assert_ne!(before, after);
        assert!(store.load(&before).await.unwrap().is_none());
        let third = Session::load(store.clone(), Some(after)).await;
        assert_eq!(third.user_id(), Some(9));
        assert_eq!(third.get(CSRF_TOKEN).as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn pop_is_one_shot_across_requests() {
        let store = store();
        let writer = Session::load(store.clone(), None).await;
        writer.put(FLASH, "Saved!");
        let Commit::Saved(token) = writer.commit().await.unwrap() else {
            panic!("expected save");
        };

        let a = Session::load(store.clone(), Some(token.clone())).await;
        let b = Session::load(store.clone(), Some(token.clone())).await;

        let first = a.pop(FLASH).await.unwrap();
        let second = b.pop(FLASH).await.unwrap();
        assert_eq!(first.as_deref(), Some("Saved!"));
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn pop_of_value_written_in_same_request() {
        let session = Session::load(store(), None).await;
        session.put(FLASH, "local");

        assert_eq!(session.pop(FLASH).await.unwrap().as_deref(), Some("local"));
        assert_eq!(session.get(FLASH), None);
    }

    #[tokio::test]
    async fn destroy_ends_the_session() {
        let store = store();
        let first = Session::load(store.clone(), None).await;
        first.put(AUTH_USER_ID, "3");
        let Commit::Saved(token) = first.commit().await.unwrap() else {
            panic!("expected save");
        };

        let second = Session::load(store.clone(), Some(token.clone())).await;
        second.destroy();

        assert_eq!(second.commit().await.unwrap(), Commit::Ended);
        assert!(store.load(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn csrf_token_is_stable_within_a_session() {
        let session = Session::load(store(), None).await;
        let first = session.csrf_token();
        let second = session.csrf_token();

        assert_eq!(first, second);
        assert_eq!(session.get(CSRF_TOKEN), Some(first));
    }
}
