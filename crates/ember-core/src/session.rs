// ── Consumer sessions ──
//
// The surfaces UI code holds: `PlayerSession` mirrors one account's
// rows, `CommunityBoard` mirrors everything for aggregate views. Each
// owns a private mirror store and its own subscription -- overlapping
// subscriptions across consumers duplicate data rather than share it,
// trading memory for isolation.
//
// Lifecycle per session: register a connection listener, and if the
// connection is already up, run the connected path at once (a consumer
// mounting after connect must not wait for an event that already
// happened). On connect: resubscribe; on applied: reload the mirror
// from the connection's tables, then bind delta handlers exactly once.
// On disconnect: unbind and reset, keeping whatever data was mirrored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ember_remote::Connection;
use tracing::{debug, warn};

use crate::command::{self, Command};
use crate::config::SyncConfig;
use crate::connection::{ConnectionListener, ConnectionManager, ListenerId};
use crate::error::CoreError;
use crate::model::{AccountId, Profile, Pull, Streak, Unlock};
use crate::polling::PollingFallback;
use crate::registrar::{CallbackRegistrar, Scope};
use crate::stats::{DerivedStats, StatsCell};
use crate::store::{MirrorSnapshot, MirrorStore};
use crate::stream::EntityStream;
use crate::subscription::{account_queries, community_queries, SubscriptionController};

// ── Shared session core ──────────────────────────────────────────────

struct SyncCore {
    manager: Arc<ConnectionManager>,
    store: Arc<MirrorStore>,
    controller: SubscriptionController,
    registrar: CallbackRegistrar,
    scope: Scope,
    queries: Vec<String>,
    connected: tokio::sync::watch::Sender<bool>,
    foreground: tokio::sync::watch::Sender<bool>,
    stats: StatsCell,
    listener: Mutex<Option<ListenerId>>,
    polling: Mutex<Option<PollingFallback>>,
    last_error: Mutex<Option<String>>,
    torn_down: AtomicBool,
}

impl SyncCore {
    fn start(
        manager: Arc<ConnectionManager>,
        scope: Scope,
        queries: Vec<String>,
        config: &SyncConfig,
    ) -> Arc<Self> {
        let (connected, _) = tokio::sync::watch::channel(false);
        let (foreground, _) = tokio::sync::watch::channel(true);

        let core = Arc::new(Self {
            manager,
            store: Arc::new(MirrorStore::new()),
            controller: SubscriptionController::new(),
            registrar: CallbackRegistrar::new(),
            scope,
            queries,
            connected,
            foreground,
            stats: StatsCell::new(),
            listener: Mutex::new(None),
            polling: Mutex::new(None),
            last_error: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        });

        // Fallback poller, gated on (connected AND foregrounded).
        let weak = Arc::downgrade(&core);
        let poller = PollingFallback::spawn(
            config.poll_interval,
            core.connected.subscribe(),
            core.foreground.subscribe(),
            Arc::new(move || {
                if let Some(core) = weak.upgrade() {
                    core.refresh();
                }
            }),
        );
        if let Ok(mut slot) = core.polling.lock() {
            *slot = Some(poller);
        }

        // Lifecycle listener.
        let on_connect = {
            let weak = Arc::downgrade(&core);
            move |conn: &Arc<Connection>| {
                if let Some(core) = weak.upgrade() {
                    core.activate(conn);
                }
            }
        };
        let on_disconnect = {
            let weak = Arc::downgrade(&core);
            move |reason: &str| {
                if let Some(core) = weak.upgrade() {
                    core.deactivate(reason);
                }
            }
        };
        let on_error = {
            let weak = Arc::downgrade(&core);
            move |error: &CoreError| {
                if let Some(core) = weak.upgrade() {
                    core.note_error(&error.to_string());
                }
            }
        };
        let id = core.manager.add_listener(
            ConnectionListener::new()
                .on_connect(on_connect)
                .on_disconnect(on_disconnect)
                .on_error(on_error),
        );
        if let Ok(mut slot) = core.listener.lock() {
            *slot = Some(id);
        }

        // The connection may already be up; the listener above will not
        // fire for an event that predates it.
        if let Some(conn) = core.manager.connection() {
            core.activate(&conn);
        }

        core
    }

    /// Connected path: submit this consumer's query set. Mirror reload
    /// and handler binding wait for the applied confirmation.
    fn activate(self: &Arc<Self>, conn: &Arc<Connection>) {
        let _ = self.connected.send(true);

        let on_applied = {
            let weak = Arc::downgrade(self);
            let weak_conn = Arc::downgrade(conn);
            move || {
                if let (Some(core), Some(conn)) = (weak.upgrade(), weak_conn.upgrade()) {
                    core.handle_applied(&conn);
                }
            }
        };
        let on_error = {
            let weak = Arc::downgrade(self);
            move |message: &str| {
                warn!(%message, "subscription rejected");
                if let Some(core) = weak.upgrade() {
                    core.note_error(message);
                }
            }
        };

        self.controller
            .subscribe(Some(conn), self.queries.clone(), on_applied, on_error);
    }

    /// The initial result set is materialized: reload wholesale, then
    /// bind delta handlers (idempotently) for incremental upkeep.
    fn handle_applied(self: &Arc<Self>, conn: &Arc<Connection>) {
        self.reload_from(conn);
        self.registrar.register_once(conn, &self.scope, &self.store);
    }

    /// Disconnected path: unbind handlers and reset the guard so the
    /// next connect rebinds cleanly. Mirrored data is retained -- stale
    /// but present beats empty.
    fn deactivate(&self, reason: &str) {
        debug!(reason, "session deactivating");
        let _ = self.connected.send(false);
        self.registrar.teardown();
        self.controller.teardown();
    }

    /// Full mirror reload from the connection's local iteration surface.
    fn reload_from(&self, conn: &Arc<Connection>) {
        let db = conn.db();
        let snapshot = MirrorSnapshot {
            profiles: db
                .profiles()
                .iter()
                .iter()
                .filter(|r| self.scope.admits(&r.account))
                .map(|r| Profile::from(r.as_ref()))
                .collect(),
            pulls: db
                .pulls()
                .iter()
                .iter()
                .filter(|r| self.scope.admits(&r.account))
                .map(|r| Pull::from(r.as_ref()))
                .collect(),
            unlocks: db
                .unlocks()
                .iter()
                .iter()
                .filter(|r| self.scope.admits(&r.account))
                .map(|r| Unlock::from(r.as_ref()))
                .collect(),
            streaks: db
                .streaks()
                .iter()
                .iter()
                .filter(|r| self.scope.admits(&r.account))
                .map(|r| Streak::from(r.as_ref()))
                .collect(),
        };
        self.store.load(snapshot);
    }

    /// Immediate reload, bypassing the poll interval. No-op while
    /// disconnected.
    fn refresh(&self) {
        if let Some(conn) = self.manager.connection() {
            self.reload_from(&conn);
        }
    }

    /// Silent no-op while disconnected, by contract.
    fn dispatch(&self, cmd: &Command) {
        let Some(conn) = self.manager.connection() else {
            debug!(?cmd, "not connected, dropping command");
            return;
        };
        if let Err(e) = command::dispatch(&conn, cmd) {
            debug!(error = %e, "command dispatch failed");
        }
    }

    fn note_error(&self, message: &str) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(message.to_owned());
        }
    }

    /// Single idempotent teardown: unsubscribe, unbind + reset the
    /// registration guard, cancel polling, unhook from the manager.
    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut slot) = self.listener.lock() {
            if let Some(id) = slot.take() {
                self.manager.remove_listener(id);
            }
        }
        self.controller.teardown();
        self.registrar.teardown();
        if let Ok(mut slot) = self.polling.lock() {
            if let Some(poller) = slot.take() {
                poller.shutdown();
            }
        }
        let _ = self.connected.send(false);
    }
}

// ── Shared accessors, delegated by both session types ────────────────

macro_rules! session_surface {
    () => {
        /// Whether the shared connection is currently live.
        pub fn connected(&self) -> bool {
            *self.core.connected.borrow()
        }

        /// Watch connection-state transitions.
        pub fn connected_watch(&self) -> tokio::sync::watch::Receiver<bool> {
            self.core.connected.subscribe()
        }

        /// The session's private mirror store.
        pub fn store(&self) -> &Arc<MirrorStore> {
            &self.core.store
        }

        pub fn pulls(&self) -> Arc<Vec<Arc<Pull>>> {
            self.core.store.pulls_snapshot()
        }

        pub fn unlocks(&self) -> Arc<Vec<Arc<Unlock>>> {
            self.core.store.unlocks_snapshot()
        }

        pub fn profiles(&self) -> Arc<Vec<Arc<Profile>>> {
            self.core.store.profiles_snapshot()
        }

        pub fn subscribe_pulls(&self) -> EntityStream<Pull> {
            self.core.store.subscribe_pulls()
        }

        pub fn subscribe_unlocks(&self) -> EntityStream<Unlock> {
            self.core.store.subscribe_unlocks()
        }

        /// Derived statistics, recomputed only when the mirror changed.
        pub fn stats(&self) -> Arc<DerivedStats> {
            self.core.stats.get_or_compute(&self.core.store)
        }

        /// Force an immediate full reload, bypassing the poll interval.
        pub fn refresh(&self) {
            self.core.refresh();
        }

        /// Report whether the consumer's surface is foregrounded. The
        /// fallback poller only runs while it is.
        pub fn set_foreground(&self, visible: bool) {
            let _ = self.core.foreground.send(visible);
        }

        /// The most recent connection/subscription error, if any.
        pub fn last_error(&self) -> Option<String> {
            self.core.last_error.lock().ok().and_then(|e| e.clone())
        }

        /// Tear the session down. Safe to call repeatedly; also runs on
        /// drop.
        pub fn teardown(&self) {
            self.core.teardown();
        }
    };
}

// ── PlayerSession ────────────────────────────────────────────────────

/// Per-account consumer: mirrors one account's rows and dispatches that
/// account's commands.
pub struct PlayerSession {
    core: Arc<SyncCore>,
    account: AccountId,
}

impl PlayerSession {
    /// Must be called within a tokio runtime (spawns the fallback
    /// poller).
    pub fn new(manager: Arc<ConnectionManager>, account: AccountId, config: &SyncConfig) -> Self {
        let core = SyncCore::start(
            manager,
            Scope::Account(account.clone()),
            account_queries(&account),
            config,
        );
        Self { core, account }
    }

    session_surface!();

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// This account's profile, once mirrored.
    pub fn profile(&self) -> Option<Arc<Profile>> {
        self.core.store.profile(&self.account)
    }

    /// This account's streak counters, once mirrored.
    pub fn streak(&self) -> Option<Arc<Streak>> {
        self.core.store.streak(&self.account)
    }

    // ── Command dispatchers (no-ops while disconnected) ──────────────

    pub fn create_profile(&self, display_name: &str) {
        self.core.dispatch(&Command::CreateProfile {
            display_name: display_name.to_owned(),
        });
    }

    pub fn rename_profile(&self, display_name: &str) {
        self.core.dispatch(&Command::RenameProfile {
            display_name: display_name.to_owned(),
        });
    }

    pub fn record_pull(&self, card_ref: u32) {
        self.core.dispatch(&Command::RecordPull { card_ref });
    }

    pub fn mark_unlock_seen(&self, unlock_id: u64) {
        self.core.dispatch(&Command::MarkUnlockSeen { unlock_id });
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        self.core.teardown();
    }
}

// ── CommunityBoard ───────────────────────────────────────────────────

/// Aggregate consumer: mirrors every account's rows for leaderboards
/// and the shared activity feed. Read-side only -- no command
/// dispatchers.
pub struct CommunityBoard {
    core: Arc<SyncCore>,
}

impl CommunityBoard {
    /// Must be called within a tokio runtime (spawns the fallback
    /// poller).
    pub fn new(manager: Arc<ConnectionManager>, config: &SyncConfig) -> Self {
        let core = SyncCore::start(manager, Scope::All, community_queries(), config);
        Self { core }
    }

    session_surface!();

    pub fn streaks(&self) -> Arc<Vec<Arc<Streak>>> {
        self.core.store.streaks_snapshot()
    }
}

impl Drop for CommunityBoard {
    fn drop(&mut self) {
        self.core.teardown();
    }
}
