use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{DisplayTarget, TargetList, TargetStore};

/// In-memory store. Not durable; used by tests and by embedders that keep
/// targets elsewhere.
#[derive(Default)]
pub struct MemoryTargetStore {
    targets: Mutex<Vec<DisplayTarget>>,
    saves: AtomicUsize,
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(targets: Vec<DisplayTarget>) -> Self {
        Self {
            targets: Mutex::new(targets),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> Vec<DisplayTarget> {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn load(&self) -> TargetList {
        TargetList {
            targets: self.snapshot(),
        }
    }

    async fn save(&self, targets: &[DisplayTarget]) {
        *self.targets.lock().unwrap_or_else(PoisonError::into_inner) = targets.to_vec();
        self.saves.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_saves_are_all_counted() {
        let store = Arc::new(MemoryTargetStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.save(&[]).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.save_count(), 16);
    }
}
