//! Idempotency keys and a de-duplication store.
//!
//! Keys are a pure function of `(run_id, stage)` so every attempt of a stage
//! reuses the same key. Side-effecting executors (notify) claim
//! `scoped_key(key, channel)` before delivering; only the first claim wins.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Derives the idempotency key for one stage (or node) of one run.
#[must_use]
pub fn idempotency_key(run_id: Uuid, step: &str) -> String {
    let combined = format!("{run_id}:{step}");
    let mut hasher = Sha256::new();
    hasher.update(combined.as_bytes());
    let result = hasher.finalize();
    format!("idem:{}", hex::encode(&result[..16]))
}

/// Narrows a stage key to one side effect (e.g. one notification channel).
#[must_use]
pub fn scoped_key(key: &str, scope: &str) -> String {
    format!("{key}:{scope}")
}

/// Cached side-effect result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    /// The recorded result.
    pub value: serde_json::Value,
}

/// Storage backend for idempotency claims and cached results.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Claims `key`. Returns true only for the first claimant while the
    /// claim is live.
    async fn claim(&self, key: &str) -> bool;

    /// Releases a claim so the side effect may be attempted again
    /// (e.g. after the delivery itself failed).
    async fn release(&self, key: &str);

    /// Records the result of a side effect performed under `key`.
    async fn record(&self, key: &str, value: serde_json::Value);

    /// Returns the recorded result for `key`, if any.
    async fn get(&self, key: &str) -> Option<CachedResult>;
}

struct Entry {
    result: Option<CachedResult>,
    created_at: Instant,
}

/// In-memory idempotency store with a TTL.
pub struct InMemoryIdempotencyStore {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl InMemoryIdempotencyStore {
    /// Creates a new store.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.created_at.elapsed() < self.ttl)
            .count()
    }

    /// Returns true if no live entries exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 3600))
    }
}

impl std::fmt::Debug for InMemoryIdempotencyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryIdempotencyStore")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn claim(&self, key: &str) -> bool {
        let ttl = self.ttl;
        let mut claimed = false;
        self.entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.created_at.elapsed() >= ttl {
                    *entry = Entry {
                        result: None,
                        created_at: Instant::now(),
                    };
                    claimed = true;
                }
            })
            .or_insert_with(|| {
                claimed = true;
                Entry {
                    result: None,
                    created_at: Instant::now(),
                }
            });
        claimed
    }

    async fn release(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn record(&self, key: &str, value: serde_json::Value) {
        self.entries
            .entry(key.to_string())
            .and_modify(|entry| entry.result = Some(CachedResult { value: value.clone() }))
            .or_insert_with(|| Entry {
                result: Some(CachedResult { value: value.clone() }),
                created_at: Instant::now(),
            });
    }

    async fn get(&self, key: &str) -> Option<CachedResult> {
        let entry = self.entries.get(key)?;
        if entry.created_at.elapsed() >= self.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        entry.result.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_key_is_deterministic_per_run_and_stage() {
        let run = Uuid::new_v4();
        let other = Uuid::new_v4();

        let k1 = idempotency_key(run, "notify");
        assert!(k1.starts_with("idem:"));
        assert_eq!(k1, idempotency_key(run, "notify"));
        assert_ne!(k1, idempotency_key(run, "analyze"));
        assert_ne!(k1, idempotency_key(other, "notify"));
    }

    #[test]
    fn test_scoped_key() {
        assert_eq!(scoped_key("idem:abc", "slack"), "idem:abc:slack");
    }

    #[tokio::test]
    async fn test_claim_only_once() {
        let store = InMemoryIdempotencyStore::default();
        assert!(store.claim("k").await);
        assert!(!store.claim("k").await);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_release_allows_reclaim() {
        let store = InMemoryIdempotencyStore::default();
        assert!(store.claim("k").await);
        store.release("k").await;
        assert!(store.claim("k").await);
    }

    #[tokio::test]
    async fn test_expired_claim_can_be_reclaimed() {
        let store = InMemoryIdempotencyStore::new(Duration::ZERO);
        assert!(store.claim("k").await);
        assert!(store.claim("k").await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_record_and_get() {
        let store = InMemoryIdempotencyStore::default();
        assert!(store.get("k").await.is_none());

        store.record("k", serde_json::json!({"message_id": "m-1"})).await;
        let cached = store.get("k").await.unwrap();
        assert_eq!(cached.value["message_id"], "m-1");
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let store = Arc::new(InMemoryIdempotencyStore::default());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.claim("shared").await }));
        }
        let wins = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        assert_eq!(wins, 1);
    }
}
