use std::future::Future;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, trace};

use crate::error::SyncResult;

/// De-duplication map for identical in-flight requests.
///
/// Keyed by an operation signature (typically the method name for
/// parameterless reads). The first caller for a key starts the underlying
/// request; callers arriving before it settles await the same shared
/// future and receive a clone of its result. The entry is removed when
/// the originating call settles, so a call made after settlement issues a
/// fresh request.
///
/// This guarantees at most one concurrent identical request. It is not a
/// cache: nothing is memoized across time.
pub struct Inflight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pending: DashMap<String, Shared<BoxFuture<'static, SyncResult<T>>>>,
    /// Debug name used in logging
    name: String,
}

impl<T> Inflight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(name = %name, "Creating in-flight request map");
        Self {
            pending: DashMap::new(),
            name,
        }
    }

    /// Run `make()` for `key`, unless an identical request is already in
    /// flight, in which case its result is shared.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> SyncResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        // The entry guard must be dropped before awaiting: it pins a shard
        // lock in the underlying map.
        let (shared, leader) = match self.pending.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                trace!(name = %self.name, key, "Joining in-flight request");
                (occupied.get().clone(), false)
            }
            Entry::Vacant(vacant) => {
                trace!(name = %self.name, key, "Starting request");
                let shared = make().boxed().shared();
                vacant.insert(shared.clone());
                (shared, true)
            }
        };

        let result = shared.await;

        // Only the caller that inserted the entry removes it; followers
        // may still be polling their clones.
        if leader {
            self.pending.remove(key);
        }

        result
    }

    /// Number of distinct requests currently in flight
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::network_timeout;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    fn counting_fetch(
        counter: Arc<AtomicUsize>,
    ) -> impl Future<Output = SyncResult<Vec<String>>> + Send + 'static {
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(50)).await;
            Ok(vec!["read".to_string(), "revisit-later".to_string()])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_share_one_request() {
        let inflight = Arc::new(Inflight::new("prefs"));
        let counter = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            inflight.run("getUserPreferences", {
                let counter = counter.clone();
                move || counting_fetch(counter)
            }),
            inflight.run("getUserPreferences", {
                let counter = counter.clone();
                move || counting_fetch(counter)
            }),
        );

        // One underlying request, both callers see the same value.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), b.unwrap());
        assert!(inflight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_calls_issue_fresh_requests() {
        let inflight = Inflight::new("prefs");
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let counter = counter.clone();
            inflight
                .run("getUserPreferences", move || counting_fetch(counter))
                .await
                .unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_shared_and_cleared() {
        let inflight = Arc::new(Inflight::<Vec<String>>::new("prefs"));
        let counter = Arc::new(AtomicUsize::new(0));

        let failing = |counter: Arc<AtomicUsize>| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(10)).await;
            Err(network_timeout("getUserPreferences"))
        };

        let (a, b) = tokio::join!(
            inflight.run("getUserPreferences", {
                let counter = counter.clone();
                move || failing(counter)
            }),
            inflight.run("getUserPreferences", {
                let counter = counter.clone();
                move || failing(counter)
            }),
        );

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(a.is_err() && b.is_err());
        // Settled entries are gone; the next call starts over.
        assert!(inflight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_do_not_share() {
        let inflight = Arc::new(Inflight::new("ops"));
        let counter = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            inflight.run("getUserPreferences", {
                let counter = counter.clone();
                move || counting_fetch(counter)
            }),
            inflight.run("getBookmarkStats", {
                let counter = counter.clone();
                move || counting_fetch(counter)
            }),
        );

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(a.is_ok() && b.is_ok());
    }
}
