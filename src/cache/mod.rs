use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::exception::{EngineError, EngineResult};
use crate::report::ReportSnapshot;

/// Deterministic digest of the logical inputs behind a fetch or analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash any canonical, deterministic encoding of the inputs.
    pub fn digest<T: Serialize>(parts: &T) -> Self {
        let encoded = serde_json::to_vec(parts).unwrap_or_default();
        let mut hasher = blake3::Hasher::new();
        hasher.update(&encoded);
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

struct CacheEntry {
    snapshot: Arc<ReportSnapshot>,
    created_at: Instant,
    last_access: Instant,
}

type FetchResult = Result<Arc<ReportSnapshot>, EngineError>;

struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    inflight: HashMap<Fingerprint, broadcast::Sender<FetchResult>>,
}

enum Plan {
    Wait(broadcast::Receiver<FetchResult>),
    Run(broadcast::Sender<FetchResult>),
}

/// Bounded in-memory snapshot cache with single-flight fetch coalescing.
///
/// Concurrent misses on one fingerprint share a single upstream fetch; every
/// waiter receives the same snapshot or the same error. Errors are never
/// cached. Capacity is enforced by last-access LRU eviction, freshness by a
/// soft TTL; expired entries are served only when revalidation is disabled.
pub struct SnapshotCache {
    capacity: usize,
    ttl: Duration,
    revalidate: bool,
    state: Mutex<CacheState>,
}

impl SnapshotCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            revalidate: true,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                inflight: HashMap::new(),
            }),
        }
    }

    /// Serve expired entries instead of refetching.
    pub fn without_revalidation(mut self) -> Self {
        self.revalidate = false;
        self
    }

    /// Synchronous probe used at admission: returns the snapshot if present
    /// and fresh, touching its LRU slot.
    pub async fn peek(&self, fingerprint: &Fingerprint) -> Option<Arc<ReportSnapshot>> {
        let mut state = self.state.lock().await;
        let entry = state.entries.get_mut(fingerprint)?;
        if self.revalidate && entry.created_at.elapsed() > self.ttl {
            state.entries.remove(fingerprint);
            return None;
        }
        entry.last_access = Instant::now();
        Some(Arc::clone(&entry.snapshot))
    }

    /// Look up `fingerprint`, coalescing concurrent misses into one `fetch`
    /// call. With `fresh`, the cached entry is invalidated and the read
    /// bypasses the cache (the fetch result is still written back).
    pub async fn get_or_fetch<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        fresh: bool,
        fetch: F,
    ) -> EngineResult<Arc<ReportSnapshot>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<ReportSnapshot>>,
    {
        let plan = {
            let mut state = self.state.lock().await;
            if fresh {
                state.entries.remove(&fingerprint);
            } else if let Some(entry) = state.entries.get_mut(&fingerprint) {
                if !self.revalidate || entry.created_at.elapsed() <= self.ttl {
                    entry.last_access = Instant::now();
                    return Ok(Arc::clone(&entry.snapshot));
                }
                state.entries.remove(&fingerprint);
            }

            if let Some(tx) = state.inflight.get(&fingerprint) {
                Plan::Wait(tx.subscribe())
            } else {
                let (tx, _) = broadcast::channel(1);
                state.inflight.insert(fingerprint.clone(), tx.clone());
                Plan::Run(tx)
            }
        };

        match plan {
            Plan::Wait(mut rx) => rx
                .recv()
                .await
                .map_err(|_| EngineError::internal("in-flight fetch was abandoned"))?,
            Plan::Run(tx) => {
                let result = fetch().await.map(Arc::new);
                {
                    let mut state = self.state.lock().await;
                    state.inflight.remove(&fingerprint);
                    if let Ok(snapshot) = &result {
                        let now = Instant::now();
                        state.entries.insert(
                            fingerprint.clone(),
                            CacheEntry {
                                snapshot: Arc::clone(snapshot),
                                created_at: now,
                                last_access: now,
                            },
                        );
                        evict_over_capacity(&mut state.entries, self.capacity);
                    }
                }
                // Waiters may be gone already; that is fine.
                let _ = tx.send(result.clone());
                result
            }
        }
    }

    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        self.state.lock().await.entries.remove(fingerprint);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn evict_over_capacity(entries: &mut HashMap<Fingerprint, CacheEntry>, capacity: usize) {
    while entries.len() > capacity {
        let victim = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(fp, _)| fp.clone());
        match victim {
            Some(fp) => {
                debug!(fingerprint = %fp, "evicting LRU snapshot");
                entries.remove(&fp);
            }
            None => break,
        }
    }
}
