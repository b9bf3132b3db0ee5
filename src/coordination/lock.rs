//! Best-effort distributed lock.
//!
//! Acquisition is a single `SET NX EX` with a per-holder token; release is a
//! single Lua compare-and-delete, so a holder can never release a lock that
//! expired and was re-acquired by someone else in the meantime.
//!
//! This is advisory mutual exclusion: "not acquired" is a normal outcome and
//! callers must skip or retry the guarded action, never assume exclusivity.

use std::time::Duration;

use uuid::Uuid;

use super::{CoordinationError, Coordinator};

/// Lua script for atomic conditional release: delete the key only while it
/// still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// A held lock. The key self-expires after its TTL even if `release` is
/// never called, so a crashed holder cannot wedge other processes.
pub struct LockGuard {
    coordinator: Coordinator,
    key: String,
    token: String,
}

impl LockGuard {
    /// Releases the lock if this guard still holds it.
    ///
    /// Returns `true` if the lock was released, `false` if it had already
    /// expired (and possibly been taken over by another holder).
    pub async fn release(self) -> Result<bool, CoordinationError> {
        let mut conn = self.coordinator.connection();
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    /// The holder token, unique per acquisition.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Coordinator {
    /// Attempts to acquire a named lock with the given TTL.
    ///
    /// Returns `None` when another holder currently owns the lock.
    pub async fn try_lock(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<LockGuard>, CoordinationError> {
        let suffix = format!("lock:{}", name);
        let token = Uuid::new_v4().to_string();

        if self.set_nx_ex_raw(&suffix, &token, ttl).await? {
            Ok(Some(LockGuard {
                coordinator: self.clone(),
                key: self.key(&suffix),
                token,
            }))
        } else {
            Ok(None)
        }
    }
}
