// ── Client-side table cache ──
//
// Each subscribed collection is materialized locally so consumers can
// iterate it synchronously. Delta callbacks are registered per table and
// invoked by the connection's dispatch loop, strictly in arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::protocol::{DeltaOp, Table};

/// Handle for removing a registered row callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

pub type RowCallback<R> = Arc<dyn Fn(&R) + Send + Sync + 'static>;

/// Locally materialized rows for one collection, plus its callback
/// registry.
///
/// Rows are keyed by the collection's primary key. Applying an insert
/// for a key that is already present replaces the row rather than
/// duplicating it; deleting an absent key does nothing. The service is
/// trusted not to re-deliver, but a duplicate must never corrupt the
/// cache.
pub struct ClientTable<R> {
    name: Table,
    key_of: fn(&R) -> String,
    rows: DashMap<String, Arc<R>>,
    next_callback: AtomicU64,
    on_insert: Mutex<Vec<(CallbackId, RowCallback<R>)>>,
    on_update: Mutex<Vec<(CallbackId, RowCallback<R>)>>,
    on_delete: Mutex<Vec<(CallbackId, RowCallback<R>)>>,
}

impl<R> ClientTable<R>
where
    R: DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(name: Table, key_of: fn(&R) -> String) -> Self {
        Self {
            name,
            key_of,
            rows: DashMap::new(),
            next_callback: AtomicU64::new(0),
            on_insert: Mutex::new(Vec::new()),
            on_update: Mutex::new(Vec::new()),
            on_delete: Mutex::new(Vec::new()),
        }
    }

    // ── Snapshot reads ───────────────────────────────────────────────

    /// All rows currently materialized for this collection.
    pub fn iter(&self) -> Vec<Arc<R>> {
        self.rows.iter().map(|r| Arc::clone(r.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    // ── Callback registration ────────────────────────────────────────

    pub fn on_insert(&self, cb: impl Fn(&R) + Send + Sync + 'static) -> CallbackId {
        Self::register(&self.on_insert, self.next_id(), cb)
    }

    pub fn on_update(&self, cb: impl Fn(&R) + Send + Sync + 'static) -> CallbackId {
        Self::register(&self.on_update, self.next_id(), cb)
    }

    pub fn on_delete(&self, cb: impl Fn(&R) + Send + Sync + 'static) -> CallbackId {
        Self::register(&self.on_delete, self.next_id(), cb)
    }

    pub fn remove_on_insert(&self, id: CallbackId) {
        Self::unregister(&self.on_insert, id);
    }

    pub fn remove_on_update(&self, id: CallbackId) {
        Self::unregister(&self.on_update, id);
    }

    pub fn remove_on_delete(&self, id: CallbackId) {
        Self::unregister(&self.on_delete, id);
    }

    fn next_id(&self) -> CallbackId {
        CallbackId(self.next_callback.fetch_add(1, Ordering::Relaxed))
    }

    fn register(
        slot: &Mutex<Vec<(CallbackId, RowCallback<R>)>>,
        id: CallbackId,
        cb: impl Fn(&R) + Send + Sync + 'static,
    ) -> CallbackId {
        if let Ok(mut callbacks) = slot.lock() {
            callbacks.push((id, Arc::new(cb)));
        }
        id
    }

    fn unregister(slot: &Mutex<Vec<(CallbackId, RowCallback<R>)>>, id: CallbackId) {
        if let Ok(mut callbacks) = slot.lock() {
            callbacks.retain(|(cb_id, _)| *cb_id != id);
        }
    }

    /// Snapshot the registered callbacks for one op so they can be
    /// invoked without holding the registry lock.
    fn callbacks_for(&self, op: DeltaOp) -> Vec<RowCallback<R>> {
        let slot = match op {
            DeltaOp::Insert => &self.on_insert,
            DeltaOp::Update => &self.on_update,
            DeltaOp::Delete => &self.on_delete,
        };
        slot.lock()
            .map(|callbacks| callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    // ── Mutation (dispatch loop only) ────────────────────────────────

    /// Replace the table contents with an applied snapshot.
    ///
    /// Callbacks do not fire -- the snapshot surfaces through the
    /// subscription's `on_applied`, after which consumers re-read via
    /// [`iter`](Self::iter).
    pub(crate) fn load_snapshot(&self, raw_rows: Vec<serde_json::Value>) {
        self.rows.clear();
        for raw in raw_rows {
            match serde_json::from_value::<R>(raw) {
                Ok(row) => {
                    let key = (self.key_of)(&row);
                    self.rows.insert(key, Arc::new(row));
                }
                Err(e) => {
                    debug!(table = self.name.as_str(), error = %e, "skipping undecodable snapshot row");
                }
            }
        }
    }

    /// Apply one pushed delta and invoke the matching callbacks.
    pub(crate) fn apply_delta(&self, op: DeltaOp, raw: &serde_json::Value) {
        let row: R = match serde_json::from_value(raw.clone()) {
            Ok(row) => row,
            Err(e) => {
                debug!(table = self.name.as_str(), error = %e, "skipping undecodable delta row");
                return;
            }
        };
        let key = (self.key_of)(&row);
        let row = Arc::new(row);

        match op {
            DeltaOp::Insert | DeltaOp::Update => {
                self.rows.insert(key, Arc::clone(&row));
            }
            DeltaOp::Delete => {
                self.rows.remove(&key);
            }
        }

        for cb in self.callbacks_for(op) {
            cb(&row);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::rows::PullRow;

    fn pull_table() -> ClientTable<PullRow> {
        ClientTable::new(Table::Pull, |row| row.id.to_string())
    }

    fn pull_json(id: u64, card_ref: u32) -> serde_json::Value {
        json!({
            "id": id,
            "account": "alice",
            "card_ref": card_ref,
            "pulled_at": "2026-08-01T09:00:00Z",
        })
    }

    #[test]
    fn snapshot_load_replaces_contents() {
        let table = pull_table();
        table.apply_delta(DeltaOp::Insert, &pull_json(99, 1));
        assert_eq!(table.len(), 1);

        table.load_snapshot(vec![pull_json(1, 10), pull_json(2, 11)]);
        assert_eq!(table.len(), 2);
        assert!(table.iter().iter().all(|r| r.id != 99));
    }

    #[test]
    fn duplicate_insert_does_not_duplicate() {
        let table = pull_table();
        table.apply_delta(DeltaOp::Insert, &pull_json(1, 10));
        table.apply_delta(DeltaOp::Insert, &pull_json(1, 12));

        assert_eq!(table.len(), 1);
        assert_eq!(table.iter()[0].card_ref, 12);
    }

    #[test]
    fn delete_of_unknown_key_is_noop() {
        let table = pull_table();
        table.apply_delta(DeltaOp::Insert, &pull_json(1, 10));
        table.apply_delta(DeltaOp::Delete, &pull_json(7, 0));
        table.apply_delta(DeltaOp::Delete, &pull_json(7, 0));

        assert_eq!(table.len(), 1);
    }

    #[test]
    fn callbacks_fire_per_op_and_unregister() {
        let table = pull_table();
        let inserts = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&inserts);
        let id = table.on_insert(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        table.apply_delta(DeltaOp::Insert, &pull_json(1, 10));
        table.apply_delta(DeltaOp::Update, &pull_json(1, 11));
        assert_eq!(inserts.load(Ordering::SeqCst), 1);

        table.remove_on_insert(id);
        table.apply_delta(DeltaOp::Insert, &pull_json(2, 10));
        assert_eq!(inserts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn undecodable_rows_are_skipped() {
        let table = pull_table();
        table.load_snapshot(vec![json!({"nonsense": true}), pull_json(1, 10)]);
        assert_eq!(table.len(), 1);

        table.apply_delta(DeltaOp::Insert, &json!("not an object"));
        assert_eq!(table.len(), 1);
    }
}
