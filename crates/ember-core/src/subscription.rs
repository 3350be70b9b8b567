// ── Subscription controller ──
//
// One controller per consumer. It never holds two live subscriptions:
// submitting a new query set always retires the previous handle first,
// so a filter change cannot produce duplicate delta delivery.

use std::sync::{Arc, Mutex};

use ember_remote::{Connection, SubscriptionHandle, Table};
use tracing::debug;

use crate::model::AccountId;

/// Query set covering one account's rows in every collection.
pub fn account_queries(account: &AccountId) -> Vec<String> {
    all_tables()
        .iter()
        .map(|t| {
            format!(
                "SELECT * FROM {} WHERE account = '{}'",
                t.as_str(),
                account
            )
        })
        .collect()
}

/// Query set covering every row in every collection.
pub fn community_queries() -> Vec<String> {
    all_tables()
        .iter()
        .map(|t| format!("SELECT * FROM {}", t.as_str()))
        .collect()
}

fn all_tables() -> [Table; 4] {
    [Table::Profile, Table::Pull, Table::Unlock, Table::Streak]
}

/// Owns at most one live subscription handle.
pub struct SubscriptionController {
    active: Mutex<Option<SubscriptionHandle>>,
}

impl SubscriptionController {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    /// Submit a query set over `conn`.
    ///
    /// `on_applied` fires exactly once when the initial result set is
    /// materialized; `on_error` any number of times. With no live
    /// connection this is a silent no-op -- callers subscribe again once
    /// connected.
    pub fn subscribe(
        &self,
        conn: Option<&Arc<Connection>>,
        queries: Vec<String>,
        on_applied: impl FnOnce() + Send + 'static,
        on_error: impl Fn(&str) + Send + Sync + 'static,
    ) {
        let Some(conn) = conn else {
            debug!("no live connection, skipping subscribe");
            return;
        };

        // Retire any previous subscription before submitting.
        self.teardown();

        let handle = conn
            .subscription_builder()
            .on_applied(on_applied)
            .on_error(on_error)
            .subscribe(queries);

        if let Ok(mut active) = self.active.lock() {
            *active = Some(handle);
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.active.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    /// Retire the live subscription, if any. Idempotent.
    pub fn teardown(&self) {
        let handle = self.active.lock().ok().and_then(|mut a| a.take());
        if let Some(handle) = handle {
            handle.unsubscribe();
        }
    }
}

impl Default for SubscriptionController {
    fn default() -> Self {
        Self::new()
    }
}
