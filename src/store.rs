//! The coordination store adapter.
//!
//! The protocol needs very little from its store: atomic set-if-absent with
//! expiry, TTL inspection, atomic counters, and an atomic
//! compare-and-delete. Anything providing those primitives works;
//! [`RedisStore`] is the production adapter and [`MemoryStore`] implements
//! the same contract in-process for tests and single-process embedders.
//!
//! Values are decoded strings throughout so that owner-token comparison is
//! string equality rather than byte-buffer equality with encoding baggage.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use redis::Commands;

use crate::config::StoreEndpoint;
use crate::error::StoreError;

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key exists and expires after the contained duration.
    Remaining(Duration),
    /// Key exists but carries no expiry.
    NoExpiry,
    /// Key does not exist.
    Missing,
}

/// Contract the protocol places on its coordination store.
pub trait Store: Send + Sync {
    /// Atomically set `key` to `value` with expiry `ttl`, only if the key
    /// does not exist. Returns whether the set happened.
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining lifetime of `key`.
    fn ttl(&self, key: &str) -> Result<Ttl, StoreError>;

    /// Assign a TTL to an existing key. Returns false if the key is absent.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically add `delta` to the integer at `key` (absent reads as
    /// zero). Returns the post-image.
    fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Atomically subtract `delta` from the integer at `key`. Returns the
    /// post-image.
    fn decr(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Atomically delete `key` iff its current value equals `expected`.
    /// Implementations must retry transient optimistic-transaction conflicts
    /// until one of the two definite outcomes is reached.
    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Keys matching a glob-style pattern. Used by the termination handler
    /// and the admin utilities, never by the protocol sequences.
    fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Unconditional delete. Admin utilities only.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// Stores shared behind an `Arc` are stores too; this is how several
/// coordinators in one process (or a coordinator and a test harness) can
/// observe the same keys.
impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        (**self).set_if_absent(key, value, ttl)
    }

    fn ttl(&self, key: &str) -> Result<Ttl, StoreError> {
        (**self).ttl(key)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        (**self).expire(key, ttl)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        (**self).incr(key, delta)
    }

    fn decr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        (**self).decr(key, delta)
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        (**self).compare_and_delete(key, expected)
    }

    fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        (**self).keys_matching(pattern)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key)
    }
}

/// Redis-backed store. One connection, shared behind a mutex, the way the
/// coordinator is meant to be held: one instance per process.
pub struct RedisStore {
    conn: Mutex<redis::Connection>,
}

impl RedisStore {
    /// Connect to the store at `endpoint`.
    pub fn connect(endpoint: &StoreEndpoint) -> Result<RedisStore, StoreError> {
        let client = redis::Client::open(endpoint.url().as_str())?;
        let conn = client.get_connection()?;
        Ok(RedisStore {
            conn: Mutex::new(conn),
        })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX rejects 0.
    (ttl.as_millis() as u64).max(1)
}

impl Store for RedisStore {
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        // SET NX PX is the atomic form; the historical two-step
        // SETNX-then-EXPIRE leaves a window where a crash strands a key
        // without expiry.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query(&mut *conn)?;
        Ok(reply.is_some())
    }

    fn ttl(&self, key: &str) -> Result<Ttl, StoreError> {
        let mut conn = self.conn.lock();
        let ms: i64 = redis::cmd("PTTL").arg(key).query(&mut *conn)?;
        Ok(match ms {
            -2 => Ttl::Missing,
            -1 => Ttl::NoExpiry,
            ms => Ttl::Remaining(Duration::from_millis(ms.max(0) as u64)),
        })
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        let set: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query(&mut *conn)?;
        Ok(set == 1)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.lock();
        Ok(conn.get(key)?)
    }

    fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock();
        Ok(conn.incr(key, delta)?)
    }

    fn decr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock();
        Ok(conn.decr(key, delta)?)
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        // WATCH/MULTI/EXEC; `transaction` retries for us whenever EXEC
        // reports the watched key changed underneath the read.
        let deleted: bool = redis::transaction(&mut *conn, &[key], |conn, pipe| {
            let current: Option<String> = conn.get(key)?;
            if current.as_deref() == Some(expected) {
                pipe.del(key)
                    .ignore()
                    .query::<Option<()>>(conn)
                    .map(|exec| exec.map(|_| true))
            } else {
                Ok(Some(false))
            }
        })?;
        Ok(deleted)
    }

    fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.lock();
        Ok(conn.keys(pattern)?)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        let removed: i64 = conn.del(key)?;
        Ok(removed > 0)
    }
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.map_or(false, |at| Instant::now() >= at)
    }
}

/// In-process implementation of the store contract with redis-compatible
/// semantics: integer-string counters, lazily enforced expiry, and the
/// missing/no-expiry TTL distinction.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn drop_if_expired(entries: &mut HashMap<String, Entry>, key: &str) {
        if entries.get(key).map_or(false, Entry::expired) {
            entries.remove(key);
        }
    }
}

impl Store for MemoryStore {
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock();
        Self::drop_if_expired(&mut entries, key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    fn ttl(&self, key: &str) -> Result<Ttl, StoreError> {
        let mut entries = self.entries.lock();
        Self::drop_if_expired(&mut entries, key);
        Ok(match entries.get(key) {
            None => Ttl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => Ttl::NoExpiry,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => Ttl::Remaining(at.saturating_duration_since(Instant::now())),
        })
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock();
        Self::drop_if_expired(&mut entries, key);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock();
        Self::drop_if_expired(&mut entries, key);
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock();
        Self::drop_if_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: "0".to_string(),
            expires_at: None,
        });
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| StoreError::InvalidInteger {
                key: key.to_string(),
            })?;
        let next = current + delta;
        entry.value = next.to_string();
        Ok(next)
    }

    fn decr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.incr(key, -delta)
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock();
        Self::drop_if_expired(&mut entries, key);
        match entries.get(key) {
            Some(entry) if entry.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        // Only the trailing-star form the coordinator uses is supported.
        let entries = self.entries.lock();
        let matches = |key: &str| match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == pattern,
        };
        Ok(entries
            .iter()
            .filter(|(key, entry)| !entry.expired() && matches(key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock();
        Self::drop_if_expired(&mut entries, key);
        Ok(entries.remove(key).is_some())
    }
}
