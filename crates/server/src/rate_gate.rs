//! Per-caller spacing of upstream requests.
//!
//! Every caller key gets a reserved time slot. A call to [`RateGate::wait`]
//! claims the next slot at least `min_interval` after the previous one for
//! the same key, then sleeps until it arrives. Slots are reserved under the
//! map's entry lock, so concurrent callers sharing a key queue up one
//! interval apart instead of all firing together.
//!
//! # Memory Safety
//!
//! - Entries idle for longer than `entry_ttl` are evicted by [`RateGate::cleanup`]
//! - A background task runs the cleanup periodically
//! - When `max_entries` is reached a sweep runs inline; if nothing is stale
//!   the least recently used caller is dropped

use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::time::Instant;
use viewfinder_core::config::RateGateConfig;

/// Shared rate gate. Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct RateGate {
    inner: Arc<RateGateInner>,
}

struct RateGateInner {
    /// Last reserved slot per caller key.
    slots: DashMap<String, Instant>,
    min_interval: Duration,
    entry_ttl: Duration,
    max_entries: usize,
    warned_at_capacity: AtomicBool,
}

impl RateGate {
    pub fn new(config: &RateGateConfig) -> Self {
        Self {
            inner: Arc::new(RateGateInner {
                slots: DashMap::new(),
                min_interval: config.min_interval(),
                entry_ttl: config.entry_ttl(),
                max_entries: config.max_entries.max(1),
                warned_at_capacity: AtomicBool::new(false),
            }),
        }
    }

    /// Wait until `key` may make its next upstream request.
    /// Returns how long the caller was held back.
    pub async fn wait(&self, key: &str) -> Duration {
        let now = Instant::now();
        let slot = self.reserve(key, now);
        let delay = slot.saturating_duration_since(now);

        if !delay.is_zero() {
            tracing::debug!(
                client_id = key,
                delay_ms = delay.as_millis() as u64,
                "Rate gate delaying upstream request"
            );
            tokio::time::sleep_until(slot).await;
        }

        delay
    }

    /// Claim the next slot for `key` and return when it starts.
    fn reserve(&self, key: &str, now: Instant) -> Instant {
        let inner = &self.inner;

        // Make room before taking the entry lock; the sweep iterates the map.
        if !inner.slots.contains_key(key) && inner.slots.len() >= inner.max_entries {
            self.make_room(now);
        }

        match inner.slots.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let next = (*entry.get() + inner.min_interval).max(now);
                entry.insert(next);
                next
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                now
            }
        }
    }

    fn make_room(&self, now: Instant) {
        let inner = &self.inner;
        let evicted = self.evict_stale(now);
        if evicted > 0 {
            inner.warned_at_capacity.store(false, Ordering::Relaxed);
            return;
        }

        if !inner.warned_at_capacity.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                current_entries = inner.slots.len(),
                max_entries = inner.max_entries,
                "Rate gate at capacity with no stale entries, evicting least recently used"
            );
        }

        let oldest = inner
            .slots
            .iter()
            .min_by_key(|entry| *entry.value())
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            inner.slots.remove(&key);
        }
    }

    /// Evict entries whose last slot is older than the TTL.
    /// Returns the number of entries evicted.
    pub fn cleanup(&self) -> usize {
        self.evict_stale(Instant::now())
    }

    fn evict_stale(&self, now: Instant) -> usize {
        let inner = &self.inner;
        let ttl = inner.entry_ttl;

        let stale: Vec<String> = inner
            .slots
            .iter()
            .filter(|entry| now.saturating_duration_since(*entry.value()) > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for key in stale {
            // Re-check under the entry lock; the caller may have come back.
            if inner
                .slots
                .remove_if(&key, |_, slot| now.saturating_duration_since(*slot) > ttl)
                .is_some()
            {
                evicted += 1;
            }
        }
        evicted
    }

    /// Number of tracked callers.
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }
}

/// Spawn a background task that periodically evicts stale rate gate entries.
pub fn spawn_cleanup_task(gate: RateGate, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let evicted = gate.cleanup();
            if evicted > 0 {
                tracing::info!(
                    evicted = evicted,
                    remaining = gate.len(),
                    "Rate gate cleanup evicted stale entries"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(min_interval_ms: u64, entry_ttl_secs: u64, max_entries: usize) -> RateGate {
        RateGate::new(&RateGateConfig {
            min_interval_ms,
            entry_ttl_secs,
            max_entries,
            cleanup_interval_secs: 60,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_is_immediate_second_waits() {
        let gate = gate(1000, 300, 100);
        let start = Instant::now();

        assert_eq!(gate.wait("alice").await, Duration::ZERO);
        assert_eq!(gate.wait("alice").await, Duration::from_secs(1));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let gate = gate(1000, 300, 100);
        gate.wait("alice").await;
        assert_eq!(gate.wait("bob").await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_interval_elapsed() {
        let gate = gate(1000, 300, 100);
        gate.wait("alice").await;
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(gate.wait("alice").await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_spaced() {
        let gate = gate(1000, 300, 100);
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move {
                    gate.wait("shared").await;
                    Instant::now()
                })
            })
            .collect();

        let mut finished = Vec::new();
        for handle in handles {
            finished.push(handle.await.unwrap().duration_since(start));
        }
        finished.sort();

        assert_eq!(
            finished,
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(2)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_evicts_idle_entries() {
        let gate = gate(0, 10, 100);
        gate.wait("alice").await;
        gate.wait("bob").await;
        assert_eq!(gate.len(), 2);

        tokio::time::advance(Duration::from_secs(5)).await;
        gate.wait("bob").await;
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(gate.cleanup(), 1);
        assert_eq!(gate.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_entries_is_enforced() {
        let gate = gate(0, 300, 2);
        gate.wait("a").await;
        tokio::time::advance(Duration::from_millis(10)).await;
        gate.wait("b").await;
        tokio::time::advance(Duration::from_millis(10)).await;
        gate.wait("c").await;

        assert_eq!(gate.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_prefers_stale_entries() {
        let gate = gate(0, 1, 2);
        gate.wait("a").await;
        tokio::time::advance(Duration::from_secs(2)).await;
        gate.wait("b").await;
        gate.wait("c").await;

        assert_eq!(gate.len(), 2);
        // "a" was stale and swept; "b" survived.
        let start = Instant::now();
        gate.wait("b").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(gate.len(), 2);
    }
}
