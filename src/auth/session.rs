//! Session store
//!
//! Opaque session tokens mapped to the identity that logged in. A record
//! past its `expires_at` is never returned; it is dropped on sight.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::HashMap;
use tracing::debug;

use super::Identity;

/// Stored session
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub identity: Identity,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(identity: Identity, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            identity,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Token → session mapping. Safe to call from many requests at once.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Live record for `token`, or `None` if absent or expired
    async fn get(&self, token: &str) -> Option<SessionRecord>;

    /// Store `identity` under `token` for `ttl`
    async fn set(&self, token: &str, identity: Identity, ttl: Duration);

    /// Forget `token`
    async fn clear(&self, token: &str);
}

/// Generate a fresh 256-bit session token (hex)
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// In-process session store
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired record, returning how many were removed
    pub fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, record| !record.is_expired_at(now));
        let removed = before - sessions.len();
        if removed > 0 {
            debug!("Pruned {} expired sessions", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, token: &str) -> Option<SessionRecord> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read();
            match sessions.get(token) {
                None => return None,
                Some(record) if !record.is_expired_at(now) => return Some(record.clone()),
                Some(_) => {}
            }
        }

        let mut sessions = self.sessions.write();
        if sessions.get(token).is_some_and(|r| r.is_expired_at(now)) {
            sessions.remove(token);
        }
        None
    }

    async fn set(&self, token: &str, identity: Identity, ttl: Duration) {
        let record = SessionRecord::new(identity, ttl);
        self.sessions.write().insert(token.to_string(), record);
    }

    async fn clear(&self, token: &str) {
        self.sessions.write().remove(token);
    }
}
