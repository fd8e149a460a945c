//! Per-key counting semaphores with dynamic limits, and a multi-registry,
//! multi-key acquirer with all-or-nothing rollback semantics.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::Semaphore as TokioSemaphore;
use tokio_util::sync::CancellationToken;

use crate::error::AcquireError;

struct Entry {
    sem: TokioSemaphore,
    limit: AtomicUsize,
    /// Permits that must be "eaten" (not returned to the pool) on the next
    /// `release` calls, the result of a `set_limit` decrease racing with
    /// permits already on loan.
    shrink_debt: AtomicUsize,
}

impl Entry {
    fn new(limit: usize) -> Self {
        Self {
            sem: TokioSemaphore::new(limit),
            limit: AtomicUsize::new(limit),
            shrink_debt: AtomicUsize::new(0),
        }
    }
}

/// A named collection of counting semaphores, one bucket per key.
///
/// Unknown keys have no limit: `acquire` on a key nobody called `set_limit`
/// for is a no-op, per the contract.
#[derive(Default)]
pub struct SemaphoreRegistry {
    entries: DashMap<String, Arc<Entry>>,
}

impl SemaphoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjust `key`'s limit. Raising drains queued waiters (handled for free
    /// by `tokio::sync::Semaphore::add_permits` waking them FIFO); lowering
    /// reclaims permits opportunistically and records the remainder as debt
    /// that future `release` calls pay down instead of returning a slot.
    pub fn set_limit(&self, key: impl Into<String>, n: usize) {
        let key = key.into();
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(Entry::new(n)));
        let old = entry.limit.swap(n, Ordering::SeqCst);
        if n > old {
            entry.sem.add_permits(n - old);
        } else if n < old {
            let delta = old - n;
            let mut reclaimed = 0usize;
            while reclaimed < delta {
                match entry.sem.try_acquire() {
                    Ok(permit) => {
                        permit.forget();
                        reclaimed += 1;
                    }
                    Err(_) => break,
                }
            }
            if reclaimed < delta {
                entry
                    .shrink_debt
                    .fetch_add(delta - reclaimed, Ordering::SeqCst);
            }
        }
    }

    /// Acquire one slot of `key`, waiting if the bucket is at its limit.
    /// A no-op for keys with no configured limit.
    pub async fn acquire(&self, key: &str) -> Result<(), AcquireError> {
        let Some(entry) = self.entries.get(key).map(|e| Arc::clone(&e)) else {
            return Ok(());
        };
        let permit = entry
            .sem
            .acquire()
            .await
            .map_err(|_| AcquireError::Cancelled)?;
        // We manage availability ourselves via explicit `release`, not RAII.
        std::mem::forget(permit);
        Ok(())
    }

    /// Release one slot of `key`. A no-op for unknown keys. Idempotent-safe
    /// to call once per successful `acquire`; double-release is undefined.
    pub fn release(&self, key: &str) {
        let Some(entry) = self.entries.get(key).map(|e| Arc::clone(&e)) else {
            return;
        };
        loop {
            let debt = entry.shrink_debt.load(Ordering::SeqCst);
            if debt == 0 {
                entry.sem.add_permits(1);
                return;
            }
            if entry
                .shrink_debt
                .compare_exchange(debt, debt - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    /// In-flight acquisitions currently outstanding for `key` (0 for unknown
    /// keys). Used by tests to assert rollback restores pre-call counts.
    pub fn current(&self, key: &str) -> usize {
        let Some(entry) = self.entries.get(key).map(|e| Arc::clone(&e)) else {
            return 0;
        };
        let limit = entry.limit.load(Ordering::SeqCst);
        let available = entry.sem.available_permits();
        limit.saturating_sub(available)
    }
}

/// Releases every acquisition made by a single [`acquire_semaphores`] call.
/// Safe to call (or drop) exactly once; additional calls are a no-op.
pub struct MultiReleaser {
    acquired: Vec<(Arc<SemaphoreRegistry>, String)>,
}

impl MultiReleaser {
    pub fn release_all(&mut self) {
        for (registry, key) in self.acquired.drain(..) {
            registry.release(&key);
        }
    }
}

impl Drop for MultiReleaser {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Acquire `key` on every supplied registry. Correctness requirement: if any
/// acquisition fails (cancellation), every already-completed acquisition in
/// this call is released before the error surfaces. Acquisitions start
/// concurrently; a late-completing acquisition after the failure flag is
/// raised releases itself immediately.
pub async fn acquire_semaphores(
    registries: &[Arc<SemaphoreRegistry>],
    key: &str,
    cancel: &CancellationToken,
) -> Result<MultiReleaser, AcquireError> {
    if registries.is_empty() {
        return Ok(MultiReleaser {
            acquired: Vec::new(),
        });
    }

    let failed = Arc::new(AtomicBool::new(false));
    let mut pending = FuturesUnordered::new();

    for registry in registries {
        let registry = Arc::clone(registry);
        let key = key.to_string();
        let failed = Arc::clone(&failed);
        let cancel = cancel.clone();
        pending.push(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AcquireError::Cancelled),
                result = registry.acquire(&key) => result,
            };
            match outcome {
                Ok(()) => {
                    if failed.load(Ordering::SeqCst) {
                        // A sibling failed after we started; release at once.
                        registry.release(&key);
                        None
                    } else {
                        Some((registry, key))
                    }
                }
                Err(_) => {
                    failed.store(true, Ordering::SeqCst);
                    None
                }
            }
        });
    }

    let mut acquired = Vec::with_capacity(registries.len());
    while let Some(outcome) = pending.next().await {
        if let Some(entry) = outcome {
            acquired.push(entry);
        }
    }

    if failed.load(Ordering::SeqCst) || acquired.len() != registries.len() {
        let mut releaser = MultiReleaser { acquired };
        releaser.release_all();
        return Err(AcquireError::Cancelled);
    }

    Ok(MultiReleaser { acquired })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_key_is_unlimited() {
        let registry = SemaphoreRegistry::new();
        registry.acquire("ghost").await.unwrap();
        assert_eq!(registry.current("ghost"), 0);
    }

    #[tokio::test]
    async fn set_limit_raises_and_lowers() {
        let registry = SemaphoreRegistry::new();
        registry.set_limit("k", 2);
        registry.acquire("k").await.unwrap();
        registry.acquire("k").await.unwrap();
        assert_eq!(registry.current("k"), 2);
        registry.release("k");
        assert_eq!(registry.current("k"), 1);
        registry.set_limit("k", 4);
        registry.acquire("k").await.unwrap();
        registry.acquire("k").await.unwrap();
        registry.acquire("k").await.unwrap();
        assert_eq!(registry.current("k"), 4);
    }

    #[tokio::test]
    async fn multi_registry_acquire_releases_all_on_rollback() {
        let a = Arc::new(SemaphoreRegistry::new());
        let b = Arc::new(SemaphoreRegistry::new());
        a.set_limit("k", 1);
        b.set_limit("k", 1);

        // Exhaust `b` so the multi-acquire cannot complete on it.
        b.acquire("k").await.unwrap();

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let before_a = a.current("k");
        let result = acquire_semaphores(&[a.clone(), b.clone()], "k", &cancel).await;
        assert!(result.is_err());
        assert_eq!(a.current("k"), before_a);
    }
}
