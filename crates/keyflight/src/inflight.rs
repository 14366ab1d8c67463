//! Table of operations in flight, one shared future per key

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};

/// Handle to an operation in flight. Every clone resolves to the same output.
pub(crate) type Flight<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

type PendingMap<V, E> = DashMap<String, Pending<V, E>>;

struct Pending<V, E> {
    // Distinguishes this flight from a later one registered under the same
    // key after `remove`.
    id: u64,
    flight: Flight<V, E>,
}

/// What to do when no flight exists for the key
pub(crate) enum Vacancy<V, E> {
    /// Answer immediately, nothing is launched
    Ready(V),
    /// Launch this operation and register it
    Launch(BoxFuture<'static, Result<V, E>>),
}

/// Outcome of [`InFlight::admit`]
pub(crate) enum Admission<V, E> {
    Ready(V),
    Joined(Flight<V, E>),
    Launched(Flight<V, E>),
}

/// Pending-operation table shared by the coalescer and the cache
///
/// Admission runs under the DashMap shard lock of the key, so the
/// check-then-register sequence is atomic per key. Launched operations are
/// spawned on the runtime and run to completion even if every caller goes
/// away.
pub(crate) struct InFlight<V, E> {
    pending: Arc<PendingMap<V, E>>,
    next_id: Arc<AtomicU64>,
}

impl<V, E> InFlight<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Join the flight for `key`, or let `on_vacant` decide what happens.
    ///
    /// `on_vacant` runs while the key's slot is locked. It must not touch this
    /// table and must not block.
    pub(crate) fn admit<P>(&self, key: &str, on_vacant: P) -> Admission<V, E>
    where
        P: FnOnce() -> Vacancy<V, E>,
    {
        let flight = match self.pending.entry(key.to_owned()) {
            Entry::Occupied(occupied) => return Admission::Joined(occupied.get().flight.clone()),
            Entry::Vacant(vacant) => match on_vacant() {
                Vacancy::Ready(value) => return Admission::Ready(value),
                Vacancy::Launch(operation) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let guard = PendingGuard {
                        pending: Arc::downgrade(&self.pending),
                        key: key.to_owned(),
                        id,
                    };
                    let flight = async move {
                        let output = operation.await;
                        // Waiters must see a clean slot once they hold the output.
                        drop(guard);
                        output
                    }
                    .boxed()
                    .shared();
                    vacant.insert(Pending {
                        id,
                        flight: flight.clone(),
                    });
                    flight
                }
            },
        };

        tokio::spawn(flight.clone());
        Admission::Launched(flight)
    }

    /// Forget the flight for `key`. The operation keeps running; existing
    /// waiters still get its output.
    pub(crate) fn remove(&self, key: &str) -> bool {
        self.pending.remove(key).is_some()
    }

    pub(crate) fn clear(&self) {
        self.pending.clear();
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.pending.iter().map(|p| p.key().clone()).collect()
    }
}

impl<V, E> Clone for InFlight<V, E> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

/// Removes the pending entry when the flight settles, unwinds, or is dropped
struct PendingGuard<V, E> {
    pending: Weak<PendingMap<V, E>>,
    key: String,
    id: u64,
}

impl<V, E> Drop for PendingGuard<V, E> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.upgrade() {
            pending.remove_if(&self.key, |_, entry| entry.id == self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn launch(calls: Arc<AtomicUsize>, value: u32) -> impl FnOnce() -> Vacancy<u32, String> {
        move || {
            Vacancy::Launch(
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(value)
                }
                .boxed(),
            )
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_admission_joins() {
        let table = InFlight::<u32, String>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = table.admit("k", launch(calls.clone(), 1));
        let second = table.admit("k", launch(calls.clone(), 2));

        let Admission::Launched(first) = first else {
            panic!("expected launch");
        };
        let Admission::Joined(second) = second else {
            panic!("expected join");
        };

        assert_eq!(first.await, Ok(1));
        assert_eq!(second.await, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!table.contains("k"));
    }

    #[tokio::test]
    async fn test_ready_does_not_register() {
        let table = InFlight::<u32, String>::new();
        match table.admit("k", || Vacancy::Ready(7)) {
            Admission::Ready(v) => assert_eq!(v, 7),
            _ => panic!("expected ready"),
        }
        assert_eq!(table.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_flight_does_not_remove_newer_entry() {
        let table = InFlight::<u32, String>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let Admission::Launched(old) = table.admit("k", launch(calls.clone(), 1)) else {
            panic!("expected launch");
        };
        assert!(table.remove("k"));

        let newer = table.admit(
            "k",
            || Vacancy::Launch(std::future::pending::<Result<u32, String>>().boxed()),
        );
        assert!(matches!(newer, Admission::Launched(_)));

        assert_eq!(old.await, Ok(1));
        assert!(table.contains("k"));
        assert_eq!(table.keys(), vec!["k".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flight_completes_without_waiters() {
        let table = InFlight::<u32, String>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        drop(table.admit("k", launch(calls.clone(), 1)));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!table.contains("k"));
    }
}
