//! TTL-keyed cache for authenticated session tokens

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Session tokens keyed by account name, shared by every spout instance of a run
/// (and of later runs in the same process) so a login is reused until it expires.
pub struct SessionCache {
    entries: RwLock<HashMap<String, CachedToken>>,
    ttl: Duration,
}

struct CachedToken {
    token: String,
    inserted_at: Instant,
}

impl SessionCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Returns None if not found or expired
    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(key)?;

        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }

        Some(entry.token.clone())
    }

    pub fn insert(&self, key: &str, token: &str) {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(_) => return,
        };

        entries.retain(|_, entry| entry.inserted_at.elapsed() <= self.ttl);
        entries.insert(
            key.to_string(),
            CachedToken {
                token: token.to_string(),
                inserted_at: Instant::now(),
            },
        );
    }
}
