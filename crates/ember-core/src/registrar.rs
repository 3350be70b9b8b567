// ── Delta callback registrar ──
//
// Binds insert/update/delete handlers for every mirrored collection,
// exactly once per live subscription lifetime. The instance-scoped
// guard is what stops a fast remount or reconnect cycle from binding
// twice and applying every remote event twice. Teardown is the only
// path back to the unregistered state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ember_remote::Connection;
use tracing::debug;

use crate::model::{AccountId, Profile, Pull, Streak, Unlock};
use crate::store::MirrorStore;

/// Which rows a consumer mirrors.
#[derive(Debug, Clone)]
pub enum Scope {
    /// Only rows belonging to one account.
    Account(AccountId),
    /// Every row (community/aggregate consumers).
    All,
}

impl Scope {
    /// Filtering is the handlers' only business logic.
    pub fn admits(&self, account: &str) -> bool {
        match self {
            Self::Account(own) => own.as_str() == account,
            Self::All => true,
        }
    }
}

type Unbind = Box<dyn FnOnce() + Send>;

/// Guarded, once-per-lifetime handler binding.
pub struct CallbackRegistrar {
    registered: AtomicBool,
    unbinders: Mutex<Vec<Unbind>>,
}

impl CallbackRegistrar {
    pub fn new() -> Self {
        Self {
            registered: AtomicBool::new(false),
            unbinders: Mutex::new(Vec::new()),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Bind handlers for all four collections. Returns `false` (and does
    /// nothing) if handlers are already bound.
    pub fn register_once(
        &self,
        conn: &Arc<Connection>,
        scope: &Scope,
        store: &Arc<MirrorStore>,
    ) -> bool {
        if self.registered.swap(true, Ordering::SeqCst) {
            debug!("handlers already bound, skipping registration");
            return false;
        }

        let mut unbinders: Vec<Unbind> = Vec::with_capacity(12);
        let db = conn.db();

        // profiles
        {
            let table = Arc::clone(db.profiles());
            let upsert = {
                let (store, scope) = (Arc::clone(store), scope.clone());
                move |row: &ember_remote::ProfileRow| {
                    if scope.admits(&row.account) {
                        store.upsert_profile(Profile::from(row));
                    }
                }
            };
            let insert_id = table.on_insert(upsert.clone());
            let update_id = table.on_update(upsert);
            let delete_id = {
                let (store, scope) = (Arc::clone(store), scope.clone());
                table.on_delete(move |row| {
                    if scope.admits(&row.account) {
                        store.remove_profile(&AccountId::new(row.account.clone()));
                    }
                })
            };
            let t = Arc::clone(&table);
            unbinders.push(Box::new(move || t.remove_on_insert(insert_id)));
            let t = Arc::clone(&table);
            unbinders.push(Box::new(move || t.remove_on_update(update_id)));
            unbinders.push(Box::new(move || table.remove_on_delete(delete_id)));
        }

        // pulls
        {
            let table = Arc::clone(db.pulls());
            let upsert = {
                let (store, scope) = (Arc::clone(store), scope.clone());
                move |row: &ember_remote::PullRow| {
                    if scope.admits(&row.account) {
                        store.upsert_pull(Pull::from(row));
                    }
                }
            };
            let insert_id = table.on_insert(upsert.clone());
            let update_id = table.on_update(upsert);
            let delete_id = {
                let (store, scope) = (Arc::clone(store), scope.clone());
                table.on_delete(move |row| {
                    if scope.admits(&row.account) {
                        store.remove_pull(row.id);
                    }
                })
            };
            let t = Arc::clone(&table);
            unbinders.push(Box::new(move || t.remove_on_insert(insert_id)));
            let t = Arc::clone(&table);
            unbinders.push(Box::new(move || t.remove_on_update(update_id)));
            unbinders.push(Box::new(move || table.remove_on_delete(delete_id)));
        }

        // unlocks
        {
            let table = Arc::clone(db.unlocks());
            let upsert = {
                let (store, scope) = (Arc::clone(store), scope.clone());
                move |row: &ember_remote::UnlockRow| {
                    if scope.admits(&row.account) {
                        store.upsert_unlock(Unlock::from(row));
                    }
                }
            };
            let insert_id = table.on_insert(upsert.clone());
            let update_id = table.on_update(upsert);
            let delete_id = {
                let (store, scope) = (Arc::clone(store), scope.clone());
                table.on_delete(move |row| {
                    if scope.admits(&row.account) {
                        store.remove_unlock(row.id);
                    }
                })
            };
            let t = Arc::clone(&table);
            unbinders.push(Box::new(move || t.remove_on_insert(insert_id)));
            let t = Arc::clone(&table);
            unbinders.push(Box::new(move || t.remove_on_update(update_id)));
            unbinders.push(Box::new(move || table.remove_on_delete(delete_id)));
        }

        // streaks
        {
            let table = Arc::clone(db.streaks());
            let upsert = {
                let (store, scope) = (Arc::clone(store), scope.clone());
                move |row: &ember_remote::StreakRow| {
                    if scope.admits(&row.account) {
                        store.upsert_streak(Streak::from(row));
                    }
                }
            };
            let insert_id = table.on_insert(upsert.clone());
            let update_id = table.on_update(upsert);
            let delete_id = {
                let (store, scope) = (Arc::clone(store), scope.clone());
                table.on_delete(move |row| {
                    if scope.admits(&row.account) {
                        store.remove_streak(&AccountId::new(row.account.clone()));
                    }
                })
            };
            let t = Arc::clone(&table);
            unbinders.push(Box::new(move || t.remove_on_insert(insert_id)));
            let t = Arc::clone(&table);
            unbinders.push(Box::new(move || t.remove_on_update(update_id)));
            unbinders.push(Box::new(move || table.remove_on_delete(delete_id)));
        }

        if let Ok(mut held) = self.unbinders.lock() {
            held.extend(unbinders);
        }

        true
    }

    /// Unbind everything and reset the guard. Idempotent; unbinding
    /// without resetting (or the reverse) is not possible by design.
    pub fn teardown(&self) {
        let unbinders: Vec<Unbind> = self
            .unbinders
            .lock()
            .map(|mut held| held.drain(..).collect())
            .unwrap_or_default();
        for unbind in unbinders {
            unbind();
        }
        self.registered.store(false, Ordering::SeqCst);
    }
}

impl Default for CallbackRegistrar {
    fn default() -> Self {
        Self::new()
    }
}
