use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::Duration;
use futures::future::{BoxFuture, FutureExt};
use redis::{Script, aio::ConnectionManager};

use super::store::{Change, SessionData, SessionError, SessionStore, SessionToken};

/// Applies a change set to `KEYS[1]` and moves the result to `KEYS[2]`.
///
/// ARGV[1] is the TTL in seconds, followed by `put key value`, `del key` and
/// `clear` operations. A token that was moved or emptied gets a marker at
/// `KEYS[4]`; later change sets against it start over under the spare token
/// `KEYS[3]`. Returns 0 when no data remains, 1 for `KEYS[2]` and 2 for
/// `KEYS[3]`.
static APPLY_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local src, dst, spare, retired = KEYS[1], KEYS[2], KEYS[3], KEYS[4]
        local ttl = ARGV[1]
        local work, result = src, 1
        if redis.call('EXISTS', retired) == 1 then
            work = spare
            if dst == src then
                dst, result = spare, 2
            end
        end
        local had = redis.call('EXISTS', work)
        local i = 2
        while i <= #ARGV do
            local op = ARGV[i]
            if op == 'put' then
                redis.call('HSET', work, ARGV[i + 1], ARGV[i + 2])
                i = i + 3
            elseif op == 'del' then
                redis.call('HDEL', work, ARGV[i + 1])
                i = i + 2
            else
                redis.call('DEL', work)
                i = i + 1
            end
        end
        if redis.call('EXISTS', work) == 0 then
            if had == 1 then
                redis.call('SET', retired, 1, 'EX', ttl)
            end
            return 0
        end
        if work ~= dst then
            redis.call('RENAME', work, dst)
            if work == src then
                redis.call('SET', retired, 1, 'EX', ttl)
            end
        end
        redis.call('EXPIRE', dst, ttl)
        return result
        "#,
    )
});

fn session_key(token: &SessionToken) -> String {
    format!("session:{}", token)
}

fn retired_key(token: &SessionToken) -> String {
    format!("session-retired:{}", token)
}

/// Redis-backed session storage: one hash per token, expiring through TTL.
#[derive(Clone)]
pub struct RedisSessionStore {
    redis: ConnectionManager,
    ttl_seconds: i64,
}

impl RedisSessionStore {
    /// Creates a store whose sessions expire after `lifetime` of inactivity.
    pub fn new(redis: ConnectionManager, lifetime: Duration) -> Self {
        Self {
            redis,
            ttl_seconds: lifetime.num_seconds().max(1),
        }
    }
}

impl SessionStore for RedisSessionStore {
    fn load<'a>(&'a self, token: &'a SessionToken) -> BoxFuture<'a, Result<Option<SessionData>, SessionError>> {
        async move {
            let key = session_key(token);
            let mut redis = self.redis.clone();

            let (data,): (HashMap<String, String>,) = redis::pipe()
                .atomic()
                .hgetall(&key)
                .expire(&key, self.ttl_seconds)
                .ignore()
                .query_async(&mut redis)
                .await?;

            Ok((!data.is_empty()).then_some(data))
        }
        .boxed()
    }

    fn apply<'a>(
        &'a self,
        token: &'a SessionToken,
        changes: Vec<Change>,
    ) -> BoxFuture<'a, Result<Option<SessionToken>, SessionError>> {
        async move {
            let mut target = token.clone();
            let mut invocation = APPLY_SCRIPT.prepare_invoke();
            invocation.arg(self.ttl_seconds);

            for change in changes {
                match change {
                    Change::Put(key, value) => {
                        invocation.arg("put").arg(key).arg(value);
                    }
                    Change::Remove(key) => {
                        invocation.arg("del").arg(key);
                    }
                    Change::Renew => target = SessionToken::generate(),
                    Change::Destroy => {
                        invocation.arg("clear");
                        target = SessionToken::generate();
                    }
                }
            }
            let spare = SessionToken::generate();
            invocation
                .key(session_key(token))
                .key(session_key(&target))
                .key(session_key(&spare))
                .key(retired_key(token));

            let mut redis = self.redis.clone();
            let stored: i32 = invocation.invoke_async(&mut redis).await?;
            tracing::debug!("Session change set applied (stored: {})", stored);

            Ok(match stored {
                0 => None,
                2 => Some(spare),
                _ => Some(target),
            })
        }
        .boxed()
    }

    fn take<'a>(
        &'a self,
        token: &'a SessionToken,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, SessionError>> {
        async move {
            let session_key = session_key(token);
            let mut redis = self.redis.clone();

            let (value, _removed): (Option<String>, i64) = redis::pipe()
                .atomic()
                .hget(&session_key, key)
                .hdel(&session_key, key)
                .query_async(&mut redis)
                .await?;

            Ok(value)
        }
        .boxed()
    }

    fn sweep(&self) -> BoxFuture<'_, Result<usize, SessionError>> {
        // Redis expires keys on its own.
        async { Ok(0) }.boxed()
    }
}
