//! Cross-run deduplication of harvested proxy strings

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::SessionKey;
use crate::repository::DedupStore;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a; stable across processes, unlike `DefaultHasher`
pub fn fnv1a(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ *byte as u64).wrapping_mul(FNV_PRIME)
    })
}

/// Content hash of a raw proxy string, as 16 hex digits
pub fn content_hash(raw: &str) -> String {
    format!("{:016x}", fnv1a(raw.as_bytes()))
}

/// When a cycle counts as exhausted and every session is dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupResetPolicy {
    pub enabled: bool,
    /// Reset when a cycle's new-item total is at or below this
    pub threshold: usize,
}

impl Default for DedupResetPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0,
        }
    }
}

pub struct DedupSessionStore {
    sessions: Mutex<HashMap<SessionKey, HashSet<String>>>,
    store: Arc<dyn DedupStore>,
    policy: DedupResetPolicy,
}

impl DedupSessionStore {
    pub fn new(store: Arc<dyn DedupStore>, policy: DedupResetPolicy) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            store,
            policy,
        }
    }

    pub async fn load(&self) -> Result<usize> {
        let stored = self.store.load_all().await?;
        let mut sessions = self.sessions.lock();
        let mut total = 0;
        for (key, hashes) in stored {
            total += hashes.len();
            sessions.entry(key).or_default().extend(hashes);
        }
        info!(hashes = total, "Loaded dedup sessions");
        Ok(total)
    }

    /// Keep only items not delivered before for `key`, and remember them
    pub async fn filter_new(&self, key: &SessionKey, candidates: Vec<String>) -> Vec<String> {
        let (fresh, hashes) = {
            let mut sessions = self.sessions.lock();
            let seen = sessions.entry(key.clone()).or_default();

            let mut fresh = Vec::new();
            let mut hashes = Vec::new();
            for candidate in candidates {
                let hash = content_hash(&candidate);
                if seen.insert(hash.clone()) {
                    hashes.push(hash);
                    fresh.push(candidate);
                }
            }
            (fresh, hashes)
        };

        if !hashes.is_empty() {
            if let Err(e) = self.store.add_hashes(key, &hashes).await {
                warn!(session = %key, error = %e, "Failed to persist dedup hashes");
            }
        }

        debug!(session = %key, new = fresh.len(), "Filtered candidates");
        fresh
    }

    /// Apply the reset policy to a finished cycle; returns whether sessions were cleared
    pub async fn end_cycle(&self, total_new: usize) -> bool {
        if !self.policy.enabled || total_new > self.policy.threshold {
            return false;
        }

        info!(total_new, "No fresh proxies this cycle, resetting dedup sessions");
        self.sessions.lock().clear();
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear persisted dedup sessions");
        }
        true
    }

    pub fn session_len(&self, key: &SessionKey) -> usize {
        self.sessions.lock().get(key).map(HashSet::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryDedupStore;

    fn items(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn store() -> DedupSessionStore {
        DedupSessionStore::new(Arc::new(MemoryDedupStore::new()), DedupResetPolicy::default())
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash(""), "cbf29ce484222325");
        assert_eq!(content_hash("a"), "af63dc4c8601ec8c");
        assert_eq!(content_hash("1.2.3.4:80"), content_hash("1.2.3.4:80"));
        assert_ne!(content_hash("1.2.3.4:80"), content_hash("1.2.3.4:81"));
    }

    #[tokio::test]
    async fn test_filter_new_is_idempotent() {
        let dedup = store();
        let key = SessionKey::new("http", 0);
        let batch = items(&["a", "b", "c"]);

        assert_eq!(dedup.filter_new(&key, batch.clone()).await, batch);
        assert!(dedup.filter_new(&key, batch).await.is_empty());
    }

    #[tokio::test]
    async fn test_previously_seen_item_is_dropped() {
        let dedup = store();
        let key = SessionKey::new("socks5", 2);
        dedup.filter_new(&key, items(&["10.0.0.2:1080"])).await;

        let fresh = dedup
            .filter_new(
                &key,
                items(&["10.0.0.1:1080", "10.0.0.2:1080", "10.0.0.3:1080"]),
            )
            .await;
        assert_eq!(fresh, items(&["10.0.0.1:1080", "10.0.0.3:1080"]));
    }

    #[tokio::test]
    async fn test_sessions_are_independent_and_dedup_within_call() {
        let dedup = store();
        let a = SessionKey::new("http", 0);
        let b = SessionKey::new("http", 1);

        assert_eq!(dedup.filter_new(&a, items(&["x", "x", "y"])).await, items(&["x", "y"]));
        assert_eq!(dedup.filter_new(&b, items(&["x"])).await, items(&["x"]));
    }

    #[tokio::test]
    async fn test_zero_new_cycle_clears_every_session() {
        let backing = Arc::new(MemoryDedupStore::new());
        let dedup = DedupSessionStore::new(backing.clone(), DedupResetPolicy::default());
        let a = SessionKey::new("http", 0);
        let b = SessionKey::new("socks4", 3);
        dedup.filter_new(&a, items(&["x"])).await;
        dedup.filter_new(&b, items(&["y"])).await;

        assert!(!dedup.end_cycle(2).await);
        assert_eq!(dedup.session_len(&a), 1);

        assert!(dedup.end_cycle(0).await);
        assert_eq!(dedup.session_len(&a), 0);
        assert_eq!(dedup.session_len(&b), 0);
        assert!(backing.load_all().await.unwrap().is_empty());
        assert_eq!(dedup.filter_new(&a, items(&["x"])).await, items(&["x"]));
    }

    #[tokio::test]
    async fn test_reset_can_be_disabled() {
        let dedup = DedupSessionStore::new(
            Arc::new(MemoryDedupStore::new()),
            DedupResetPolicy {
                enabled: false,
                threshold: 0,
            },
        );
        let key = SessionKey::new("http", 0);
        dedup.filter_new(&key, items(&["x"])).await;

        assert!(!dedup.end_cycle(0).await);
        assert_eq!(dedup.session_len(&key), 1);
    }

    #[tokio::test]
    async fn test_load_restores_persisted_hashes() {
        let backing = Arc::new(MemoryDedupStore::new());
        let key = SessionKey::new("https", 1);
        store_with(backing.clone()).filter_new(&key, items(&["a"])).await;

        let restored = store_with(backing);
        assert_eq!(restored.load().await.unwrap(), 1);
        assert!(restored.filter_new(&key, items(&["a"])).await.is_empty());
    }

    fn store_with(backing: Arc<MemoryDedupStore>) -> DedupSessionStore {
        DedupSessionStore::new(backing, DedupResetPolicy::default())
    }
}
