use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::error;

type Callback<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

/// Ordered observer list with synchronous delivery.
///
/// Callbacks run in registration order. A callback that returns an error or
/// panics is logged and skipped; the remaining callbacks still run.
pub struct SubscriberList<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

struct Registry<E> {
    next_id: u64,
    // Ids are handed out monotonically, so id order is insertion order.
    entries: HashMap<u64, Callback<E>>,
}

impl<E> Default for SubscriberList<E> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: HashMap::new(),
            })),
        }
    }
}

impl<E: 'static> SubscriberList<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. The same closure may be registered more than once;
    /// each registration gets its own handle.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = {
            let mut reg = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            let id = reg.next_id;
            reg.next_id += 1;
            reg.entries.insert(id, Arc::new(callback));
            id
        };

        let weak: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription {
            id,
            remove: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .entries
                        .remove(&id);
                }
            })),
        }
    }

    /// Deliver `event` to every callback. Returns how many callbacks failed.
    pub fn notify(&self, event: &E) -> usize {
        // Snapshot the list so callbacks may subscribe/unsubscribe re-entrantly.
        let mut callbacks: Vec<(u64, Callback<E>)> = {
            let reg = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            reg.entries
                .iter()
                .map(|(id, cb)| (*id, Arc::clone(cb)))
                .collect()
        };
        callbacks.sort_unstable_by_key(|(id, _)| *id);

        let mut failures = 0;
        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    error!(subscriber = id, error = %e, "snapshot subscriber failed");
                }
                Err(panic) => {
                    failures += 1;
                    error!(
                        subscriber = id,
                        panic = %panic_message(panic.as_ref()),
                        "snapshot subscriber panicked"
                    );
                }
            }
        }
        failures
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle returned by [`SubscriberList::subscribe`]. Dropping it keeps the
/// callback registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: u64,
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delivers_in_insertion_order() {
        let list: SubscriberList<u32> = SubscriberList::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            let _ = list.subscribe(move |n: &u32| {
                seen.lock().unwrap().push(format!("{tag}{n}"));
                Ok(())
            });
        }
        assert_eq!(list.notify(&7), 0);
        assert_eq!(*seen.lock().unwrap(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn test_order_survives_churn() {
        let list: SubscriberList<()> = SubscriberList::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for n in 0..64u32 {
            let seen = seen.clone();
            handles.push(list.subscribe(move |_| {
                seen.lock().unwrap().push(n);
                Ok(())
            }));
        }
        for (n, handle) in handles.into_iter().enumerate() {
            if n % 3 == 0 {
                handle.unsubscribe();
            }
        }

        list.notify(&());

        let expected: Vec<u32> = (0..64).filter(|n| n % 3 != 0).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_registration() {
        let list: SubscriberList<()> = SubscriberList::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = hits.clone();
        let h2 = hits.clone();
        let first = list.subscribe(move |_| {
            h1.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let _second = list.subscribe(move |_| {
            h2.fetch_add(10, Ordering::SeqCst);
            Ok(())
        });
        first.unsubscribe();
        list.notify(&());
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let list: SubscriberList<()> = SubscriberList::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _ = list.subscribe(|_| Err(anyhow::anyhow!("boom")));
        let _ = list.subscribe(|_| panic!("subscriber bug"));
        let h = hits.clone();
        let _ = list.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(list.notify(&()), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_after_list_dropped_is_noop() {
        let list: SubscriberList<()> = SubscriberList::new();
        let sub = list.subscribe(|_| Ok(()));
        drop(list);
        sub.unsubscribe();
    }

    #[test]
    fn test_duplicate_callbacks_are_allowed() {
        let list: SubscriberList<()> = SubscriberList::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let cb = {
            let hits = hits.clone();
            move |_: &()| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };
        let _a = list.subscribe(cb.clone());
        let _b = list.subscribe(cb);
        list.notify(&());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
