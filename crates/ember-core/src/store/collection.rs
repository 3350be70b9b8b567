// ── Mirrored entity collection ──
//
// Key-addressed storage for one collection, with a snapshot rebuilt and
// broadcast on every change. Delta application is deliberately tolerant:
// an insert for a known key replaces it, a removal of an absent key does
// nothing. Nothing in here can fail.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// Storage for a single mirrored collection.
///
/// An optional comparator keeps the broadcast snapshot ordered (the pull
/// and unlock feeds are newest-first); without one, snapshot order is
/// unspecified.
pub(crate) struct MirrorCollection<T: Send + Sync + 'static> {
    by_key: DashMap<String, Arc<T>>,
    order: Option<fn(&T, &T) -> Ordering>,
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Send + Sync + 'static> MirrorCollection<T> {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_key: DashMap::new(),
            order: None,
            snapshot,
        }
    }

    pub(crate) fn with_order(order: fn(&T, &T) -> Ordering) -> Self {
        let mut collection = Self::new();
        collection.order = Some(order);
        collection
    }

    /// Insert or replace. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: String, entity: T) -> bool {
        let is_new = self.by_key.insert(key, Arc::new(entity)).is_none();
        self.rebuild_snapshot();
        is_new
    }

    /// Remove by key. Returns `true` if the entity existed. Removing an
    /// absent key is a no-op.
    pub(crate) fn remove(&self, key: &str) -> bool {
        let removed = self.by_key.remove(key).is_some();
        if removed {
            self.rebuild_snapshot();
        }
        removed
    }

    /// Full replace: upsert everything incoming, then prune keys that
    /// are not in the incoming set. Same end state as clear-then-insert,
    /// without a transient empty snapshot for observers.
    pub(crate) fn replace_all(&self, items: Vec<(String, T)>) {
        let incoming: HashSet<String> = items.iter().map(|(k, _)| k.clone()).collect();
        for (key, entity) in items {
            self.by_key.insert(key, Arc::new(entity));
        }
        let stale: Vec<String> = self
            .by_key
            .iter()
            .map(|r| r.key().clone())
            .filter(|k| !incoming.contains(k))
            .collect();
        for key in stale {
            self.by_key.remove(&key);
        }
        self.rebuild_snapshot();
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Collect all values, apply the ordering if any, and broadcast.
    fn rebuild_snapshot(&self) {
        let mut values: Vec<Arc<T>> = self.by_key.iter().map(|r| Arc::clone(r.value())).collect();
        if let Some(order) = self.order {
            values.sort_by(|a, b| order(a, b));
        }
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
