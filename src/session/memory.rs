use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{Mutex, RwLock};

use super::store::{Change, SessionData, SessionError, SessionStore, SessionToken, replay};

struct Record {
    data: SessionData,
    expires_at: DateTime<Utc>,
    /// Cleared once the token has been retired or swept.
    live: bool,
}

impl Record {
    fn new(data: SessionData, expires_at: DateTime<Utc>) -> Self {
        Self {
            data,
            expires_at,
            live: true,
        }
    }

    fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.live && self.expires_at > now
    }
}

type Slot = Arc<Mutex<Record>>;

/// Process-local session storage.
///
/// Each token owns its own mutex, so requests sharing a token are serialized
/// while other tokens proceed untouched. The map lock is only held to look a
/// record up or to re-key it, never while waiting on a record.
///
/// Retired tokens keep an empty tombstone until they would have expired, so a
/// commit that arrives late cannot bring them back.
#[derive(Clone)]
pub struct MemorySessionStore {
    records: Arc<RwLock<HashMap<SessionToken, Slot>>>,
    lifetime: Duration,
}

impl MemorySessionStore {
    /// Creates a store whose sessions expire after `lifetime` of inactivity.
    pub fn new(lifetime: Duration) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            lifetime,
        }
    }

    /// Number of sessions that can still be loaded.
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot> = self.records.read().await.values().cloned().collect();
        let now = Utc::now();

        let mut live = 0;
        for slot in slots {
            if slot.lock().await.is_usable(now) {
                live += 1;
            }
        }
        live
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn slot(&self, token: &SessionToken) -> Option<Slot> {
        self.records.read().await.get(token).cloned()
    }

    async fn slot_or_insert(&self, token: &SessionToken) -> Slot {
        if let Some(slot) = self.slot(token).await {
            return slot;
        }

        let expires_at = Utc::now() + self.lifetime;
        self.records
            .write()
            .await
            .entry(token.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Record::new(SessionData::new(), expires_at))))
            .clone()
    }

    /// Leaves a tombstone behind so the token is never written to again.
    fn retire(&self, record: &mut Record, now: DateTime<Utc>) {
        record.live = false;
        record.data.clear();
        record.expires_at = now + self.lifetime;
    }
}

impl SessionStore for MemorySessionStore {
    fn load<'a>(&'a self, token: &'a SessionToken) -> BoxFuture<'a, Result<Option<SessionData>, SessionError>> {
        async move {
            let Some(slot) = self.slot(token).await else {
                return Ok(None);
            };

            let now = Utc::now();
            let mut record = slot.lock().await;
            if !record.is_usable(now) {
                return Ok(None);
            }

            record.expires_at = now + self.lifetime;
            Ok(Some(record.data.clone()))
        }
        .boxed()
    }

    fn apply<'a>(
        &'a self,
        token: &'a SessionToken,
        changes: Vec<Change>,
    ) -> BoxFuture<'a, Result<Option<SessionToken>, SessionError>> {
        async move {
            let slot = self.slot_or_insert(token).await;
            let mut record = slot.lock().await;
            let now = Utc::now();

            // A retired or lapsed token stays dead; late writers get a new session.
            let usable = record.is_usable(now);
            let (origin, mut data) = if usable {
                (token.clone(), record.data.clone())
            } else {
                record.live = false;
                record.data.clear();
                (SessionToken::generate(), SessionData::new())
            };

            let (next, moved) = replay(&origin, &mut data, changes);

            if usable && !moved && !data.is_empty() {
                record.data = data;
                record.expires_at = now + self.lifetime;
                return Ok(Some(next));
            }

            if usable {
                self.retire(&mut record, now);
            }

            if data.is_empty() {
                return Ok(None);
            }

            let renewed = Arc::new(Mutex::new(Record::new(data, now + self.lifetime)));
            self.records.write().await.insert(next.clone(), renewed);
            Ok(Some(next))
        }
        .boxed()
    }

    fn take<'a>(
        &'a self,
        token: &'a SessionToken,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, SessionError>> {
        async move {
            let Some(slot) = self.slot(token).await else {
                return Ok(None);
            };

            let mut record = slot.lock().await;
            if !record.is_usable(Utc::now()) {
                return Ok(None);
            }
            Ok(record.data.remove(key))
        }
        .boxed()
    }

    fn sweep(&self) -> BoxFuture<'_, Result<usize, SessionError>> {
        async move {
            let now = Utc::now();
            let mut records = self.records.write().await;
            let before = records.len();

            // Busy records are in use, so they are not idle.
            records.retain(|_, slot| match slot.try_lock() {
                Ok(mut record) if record.expires_at <= now => {
                    record.live = false;
                    false
                }
                _ => true,
            });

            Ok(before - records.len())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemorySessionStore {
        MemorySessionStore::new(Duration::hours(12))
    }

    #[tokio::test]
    async fn put_then_load() {
        let store = store();
        let token = SessionToken::generate();

        store.put(&token, "authenticated_user_id", "7").await.unwrap();

        let data = store.load(&token).await.unwrap().unwrap();
        assert_eq!(data.get("authenticated_user_id").map(String::as_str), Some("7"));
    }

    #[tokio::test]
    async fn unknown_token_loads_nothing() {
        let store = store();
        assert!(store.load(&SessionToken::generate()).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn take_reads_exactly_once() {
        let store = store();
        let token = SessionToken::generate();
        store.put(&token, "flash", "Saved!").await.unwrap();
        store.put(&token, "csrf_token", "abc").await.unwrap();

        assert_eq!(store.take(&token, "flash").await.unwrap().as_deref(), Some("Saved!"));
        assert_eq!(store.take(&token, "flash").await.unwrap(), None);
    }

    #[tokio::test]
    async fn renew_moves_data_and_retires_old_token() {
        let store = store();
        let token = SessionToken::generate();
        store.put(&token, "csrf_token", "abc").await.unwrap();

        let renewed = store.renew(&token).await.unwrap();

        assert_ne!(renewed, token);
        assert!(store.load(&token).await.unwrap().is_none());
        let data = store.load(&renewed).await.unwrap().unwrap();
        assert_eq!(data.get("csrf_token").map(String::as_str), Some("abc"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn destroy_removes_session() {
        let store = store();
        let token = SessionToken::generate();
        store.put(&token, "authenticated_user_id", "1").await.unwrap();

        store.destroy(&token).await.unwrap();

        assert!(store.load(&token).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn removing_last_attribute_drops_the_record() {
        let store = store();
        let token = SessionToken::generate();
        store.put(&token, "flash", "x").await.unwrap();

        let result = store
            .apply(&token, vec![Change::Remove("flash".into())])
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn late_writes_to_a_renewed_token_start_over() {
        let store = store();
        let token = SessionToken::generate();
        store.put(&token, "authenticated_user_id", "7").await.unwrap();
        let renewed = store.renew(&token).await.unwrap();

        // Step 1: a request still holding the old token commits afterwards
        let late = store
            .apply(&token, vec![Change::Put("flash".into(), "late".into())])
            .await
            .unwrap()
            .unwrap();

        // Step 2: the write lands under a brand-new token, without the user
        assert_ne!(late, token);
        assert_ne!(late, renewed);
        assert!(store.load(&token).await.unwrap().is_none());
        let data = store.load(&late).await.unwrap().unwrap();
        assert_eq!(data.get("flash").map(String::as_str), Some("late"));
        assert!(!data.contains_key("authenticated_user_id"));

        // Step 3: the renewed session is untouched
        let data = store.load(&renewed).await.unwrap().unwrap();
        assert_eq!(data.get("authenticated_user_id").map(String::as_str), Some("7"));
        assert!(!data.contains_key("flash"));
    }

    #[tokio::test]
    async fn destroyed_token_is_not_revived() {
        let store = store();
        let token = SessionToken::generate();
        store.put(&token, "authenticated_user_id", "7").await.unwrap();
        store.destroy(&token).await.unwrap();

        let late = store.put(&token, "csrf_token", "abc").await;

        assert!(late.is_ok());
        assert!(store.load(&token).await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_writes_to_one_token_are_not_lost() {
        let store = store();
        let token = SessionToken::generate();
        store.put(&token, "seed", "0").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            let token = token.clone();
            tasks.push(tokio::spawn(async move {
                store.put(&token, &format!("key-{i}"), "v").await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let data = store.load(&token).await.unwrap().unwrap();
        assert_eq!(data.len(), 33);
    }

    #[tokio::test]
    async fn a_held_token_does_not_block_others() {
        let store = store();
        let busy = SessionToken::generate();
        let other = SessionToken::generate();
        store.put(&busy, "k", "v").await.unwrap();

        let slot = store.slot(&busy).await.unwrap();
        let _guard = slot.lock().await;

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            store.put(&other, "k", "v"),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn expired_sessions_vanish_and_are_swept() {
        let store = MemorySessionStore::new(Duration::milliseconds(20));
        let token = SessionToken::generate();
        store.put(&token, "k", "v").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(store.load(&token).await.unwrap().is_none());
        assert_eq!(store.sweep().await.unwrap(), 1);
        assert!(store.is_empty().await);
    }
}
