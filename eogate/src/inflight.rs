//! Deduplication of in-flight work.
//!
//! When several callers ask for the same deferred search job or the same
//! download at once, only the first one (the *leader*) does the work. The
//! others (*followers*) subscribe to the leader's broadcast channel and
//! receive a clone of its result.
//!
//! ```text
//! caller A ─┐                         ┌──► result ──► A
//! caller B ─┼──► InFlightTable ──► leader A ──► broadcast ──┼──► B
//! caller C ─┘                         └──► C
//! ```
//!
//! The leader's slot is owned by a [`LeaderGuard`]. Dropping the guard (the
//! leader was cancelled, or panicked) removes the slot and closes the channel,
//! so followers notice and re-register instead of waiting forever. Slots are
//! stamped with a generation so a stale guard never removes a newer slot for
//! the same key.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};

/// Broadcast capacity; exactly one value is ever sent per slot.
const CHANNEL_CAPACITY: usize = 4;

struct Slot<V> {
    generation: u64,
    sender: broadcast::Sender<V>,
}

/// Counters for monitoring deduplication.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InFlightStats {
    /// Operations actually started.
    pub started: u64,
    /// Callers that joined an operation already in flight.
    pub joined: u64,
    /// Followers that re-registered after their leader vanished.
    pub rejoined: u64,
}

/// Outcome of [`InFlightTable::register`].
pub enum Registration<'a, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Nobody is working on this key; the caller must do the work.
    Leader(LeaderGuard<'a, K, V>),
    /// Someone else is; wait on the receiver.
    Follower(broadcast::Receiver<V>),
}

/// Per-key table of in-flight operations.
pub struct InFlightTable<K, V> {
    slots: DashMap<K, Slot<V>>,
    next_generation: AtomicU64,
    started: AtomicU64,
    joined: AtomicU64,
    rejoined: AtomicU64,
}

impl<K, V> Default for InFlightTable<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> InFlightTable<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            next_generation: AtomicU64::new(0),
            started: AtomicU64::new(0),
            joined: AtomicU64::new(0),
            rejoined: AtomicU64::new(0),
        }
    }

    /// Claims the slot for `key`, or subscribes to whoever holds it.
    pub fn register(&self, key: K) -> Registration<'_, K, V> {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(slot) => {
                self.joined.fetch_add(1, Ordering::Relaxed);
                debug!(key = ?key, "joining in-flight operation");
                Registration::Follower(slot.get().sender.subscribe())
            }
            Entry::Vacant(vacant) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let (sender, _rx) = broadcast::channel(CHANNEL_CAPACITY);
                vacant.insert(Slot {
                    generation,
                    sender: sender.clone(),
                });
                self.started.fetch_add(1, Ordering::Relaxed);
                debug!(key = ?key, "starting new operation");
                Registration::Leader(LeaderGuard {
                    table: self,
                    key,
                    generation,
                    sender,
                })
            }
        }
    }

    /// Runs `work` unless an identical operation is in flight, in which case
    /// its result is awaited instead.
    pub async fn join_or_run<F, Fut>(&self, key: K, work: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        loop {
            let mut rx = match self.register(key.clone()) {
                Registration::Leader(guard) => {
                    let value = work().await;
                    guard.complete(value.clone());
                    return value;
                }
                Registration::Follower(rx) => rx,
            };
            match rx.recv().await {
                Ok(value) => return value,
                Err(_) => {
                    self.rejoined.fetch_add(1, Ordering::Relaxed);
                    debug!(key = ?key, "leader went away, re-registering");
                }
            }
        }
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> InFlightStats {
        InFlightStats {
            started: self.started.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            rejoined: self.rejoined.load(Ordering::Relaxed),
        }
    }

    fn release(&self, key: &K, generation: u64) {
        self.slots.remove_if(key, |_, slot| slot.generation == generation);
    }
}

impl<K, T> InFlightTable<K, GatewayResult<T>>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    /// Cancellable variant of [`join_or_run`](Self::join_or_run).
    ///
    /// A follower whose token fires stops waiting without disturbing the
    /// others. A leader whose work ends in `Cancelled` releases its slot
    /// without publishing, so its followers re-register and one of them
    /// takes over.
    pub async fn run_shared<F, Fut>(&self, key: K, cancel: &CancellationToken, work: F) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        loop {
            let guard = match self.register(key.clone()) {
                Registration::Leader(guard) => guard,
                Registration::Follower(mut rx) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(GatewayError::Cancelled {
                                operation: format!("waiting for {:?}", key),
                            });
                        }
                        received = rx.recv() => match received {
                            Ok(value) => return value,
                            Err(_) => {
                                self.rejoined.fetch_add(1, Ordering::Relaxed);
                                debug!(key = ?key, "leader went away, re-registering");
                                continue;
                            }
                        },
                    }
                }
            };
            let value = work().await;
            if matches!(value, Err(GatewayError::Cancelled { .. })) {
                drop(guard);
            } else {
                guard.complete(value.clone());
            }
            return value;
        }
    }
}

/// Ownership of an in-flight slot. Releases the slot on drop.
pub struct LeaderGuard<'a, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    table: &'a InFlightTable<K, V>,
    key: K,
    generation: u64,
    sender: broadcast::Sender<V>,
}

impl<K, V> LeaderGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Publishes the result to every follower and frees the slot.
    ///
    /// The slot is removed before sending: followers subscribed so far get
    /// this value, later callers start a fresh operation.
    pub fn complete(self, value: V) {
        self.table.release(&self.key, self.generation);
        let waiters = self.sender.receiver_count();
        let _ = self.sender.send(value);
        debug!(key = ?self.key, waiters, "operation completed");
    }
}

impl<K, V> Drop for LeaderGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn drop(&mut self) {
        self.table.release(&self.key, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let table: Arc<InFlightTable<String, Result<u32, String>>> = Arc::new(InFlightTable::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = table.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                table
                    .join_or_run("product-1".to_string(), || async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42)
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), Ok(42));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
        let stats = table.stats();
        assert_eq!(stats.started, 1);
        assert_eq!(stats.joined, 7);
    }

    #[tokio::test]
    async fn test_errors_are_shared_too() {
        let table: Arc<InFlightTable<u8, Result<u32, String>>> = Arc::new(InFlightTable::new());
        let t2 = table.clone();
        let leader = tokio::spawn(async move {
            t2.join_or_run(1, || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err("boom".to_string())
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let follower = table.join_or_run(1, || async { Ok(0) }).await;
        assert_eq!(follower, Err("boom".to_string()));
        assert_eq!(leader.await.unwrap(), Err("boom".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_slot() {
        let table: InFlightTable<u8, u32> = InFlightTable::new();
        let rx = {
            let guard = match table.register(1) {
                Registration::Leader(g) => g,
                Registration::Follower(_) => panic!("expected leader"),
            };
            let rx = match table.register(1) {
                Registration::Follower(rx) => rx,
                Registration::Leader(_) => panic!("expected follower"),
            };
            drop(guard);
            rx
        };
        assert!(!table.is_in_flight(&1));
        let mut rx = rx;
        assert!(rx.recv().await.is_err());
        assert!(matches!(table.register(1), Registration::Leader(_)));
    }

    #[tokio::test]
    async fn test_follower_rejoins_after_leader_cancelled() {
        let table: Arc<InFlightTable<u8, u32>> = Arc::new(InFlightTable::new());
        let t2 = table.clone();
        let leader = tokio::spawn(async move {
            t2.join_or_run(9, || async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                1
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let t3 = table.clone();
        let follower = tokio::spawn(async move { t3.join_or_run(9, || async { 2 }).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        assert_eq!(follower.await.unwrap(), 2);
        assert_eq!(table.stats().rejoined, 1);
    }

    #[test]
    fn test_stale_guard_does_not_remove_new_slot() {
        let table: InFlightTable<u8, u32> = InFlightTable::new();
        let first = match table.register(3) {
            Registration::Leader(g) => g,
            Registration::Follower(_) => panic!("expected leader"),
        };
        let generation = first.generation;
        first.complete(1);
        let _second = match table.register(3) {
            Registration::Leader(g) => g,
            Registration::Follower(_) => panic!("expected leader"),
        };
        table.release(&3, generation);
        assert!(table.is_in_flight(&3));
    }

    #[tokio::test]
    async fn test_cancelled_leader_hands_over_to_follower() {
        let table: Arc<InFlightTable<u8, GatewayResult<u32>>> = Arc::new(InFlightTable::new());
        let leader_token = CancellationToken::new();
        let t2 = table.clone();
        let token = leader_token.clone();
        let leader = tokio::spawn(async move {
            let cancel = token.clone();
            t2.run_shared(5, &token, || async move {
                cancel.cancelled().await;
                Err(GatewayError::Cancelled {
                    operation: "leader".to_string(),
                })
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let t3 = table.clone();
        let follower = tokio::spawn(async move {
            t3.run_shared(5, &CancellationToken::new(), || async { Ok(7) }).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader_token.cancel();
        assert!(matches!(leader.await.unwrap(), Err(GatewayError::Cancelled { .. })));
        assert_eq!(follower.await.unwrap().unwrap(), 7);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_follower_leaves_leader_alone() {
        let table: Arc<InFlightTable<u8, GatewayResult<u32>>> = Arc::new(InFlightTable::new());
        let t2 = table.clone();
        let leader = tokio::spawn(async move {
            t2.run_shared(6, &CancellationToken::new(), || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(1)
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let token = CancellationToken::new();
        token.cancel();
        let follower = table.run_shared(6, &token, || async { Ok(2) }).await;
        assert!(matches!(follower, Err(GatewayError::Cancelled { .. })));
        assert_eq!(leader.await.unwrap().unwrap(), 1);
    }
}
