use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

/// Keyed request coalescing: at most one in-flight producer per key, with
/// every concurrent caller awaiting the same shared result.
///
/// The map entry is removed once the producer resolves, so later callers
/// start fresh; callers that raced in while the result was still being
/// produced all observe the producer's value.
#[derive(Debug)]
pub struct SingleFlight<K: Eq + Hash, V> {
    inflight: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self
    where
        K: Eq + Hash,
    {
        Self::default()
    }

    /// Run `producer` for `key`, unless another caller is already running
    /// one, in which case await and share that caller's value.
    pub async fn run<F, Fut>(&self, key: K, producer: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let value = cell.get_or_init(producer).await.clone();

        // Only the entry that produced this cell may remove it; a concurrent
        // run for the same key after removal owns a different cell.
        self.inflight
            .remove_if(&key, |_, existing| Arc::ptr_eq(existing, &cell));

        value
    }

    /// Number of keys currently being produced.
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let flight = Arc::new(SingleFlight::<String, u64>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run("artifact".to_string(), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        42
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(flight.is_empty());
    }

    #[tokio::test]
    async fn sequential_runs_execute_again() {
        let flight = SingleFlight::<&'static str, u32>::new();
        let calls = AtomicUsize::new(0);

        let first = flight
            .run("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                1
            })
            .await;
        let second = flight
            .run("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                2
            })
            .await;

        assert_eq!((first, second), (1, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_coalesce() {
        let flight = Arc::new(SingleFlight::<u32, u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for key in 0..8u32 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run(key, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        key * 2
                    })
                    .await
            }));
        }
        for (key, handle) in (0..8u32).zip(handles) {
            assert_eq!(handle.await.unwrap(), key * 2);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }
}
