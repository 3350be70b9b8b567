// ── Connection ──
//
// A live session with the subscription service: the table set, the
// subscription registry, and the dispatch task that applies incoming
// frames. One dispatch task per connection keeps delta application
// strictly in arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Error;
use crate::protocol::{ClientMessage, RowDelta, ServerMessage, Table, TableRows};
use crate::rows::{ProfileRow, PullRow, StreakRow, UnlockRow};
use crate::tables::ClientTable;
use crate::transport::{Credentials, TransportPair};

const LINK_EVENT_CAPACITY: usize = 16;

// ── Link lifecycle events ────────────────────────────────────────────

/// Lifecycle notifications for the owner of the connection.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The link dropped; the connection is dead and must be replaced.
    Down { reason: String },
    /// A link-level fault that did not (yet) close the connection.
    Error { message: String },
}

// ── Db: the locally materialized table set ───────────────────────────

/// Typed access to every collection the service publishes.
#[derive(Clone)]
pub struct Db {
    profiles: Arc<ClientTable<ProfileRow>>,
    pulls: Arc<ClientTable<PullRow>>,
    unlocks: Arc<ClientTable<UnlockRow>>,
    streaks: Arc<ClientTable<StreakRow>>,
}

impl Db {
    fn new() -> Self {
        Self {
            profiles: Arc::new(ClientTable::new(Table::Profile, |r| r.account.clone())),
            pulls: Arc::new(ClientTable::new(Table::Pull, |r| r.id.to_string())),
            unlocks: Arc::new(ClientTable::new(Table::Unlock, |r| r.id.to_string())),
            streaks: Arc::new(ClientTable::new(Table::Streak, |r| r.account.clone())),
        }
    }

    pub fn profiles(&self) -> &Arc<ClientTable<ProfileRow>> {
        &self.profiles
    }

    pub fn pulls(&self) -> &Arc<ClientTable<PullRow>> {
        &self.pulls
    }

    pub fn unlocks(&self) -> &Arc<ClientTable<UnlockRow>> {
        &self.unlocks
    }

    pub fn streaks(&self) -> &Arc<ClientTable<StreakRow>> {
        &self.streaks
    }

    fn load_snapshot(&self, batch: TableRows) {
        match batch.table {
            Table::Profile => self.profiles.load_snapshot(batch.rows),
            Table::Pull => self.pulls.load_snapshot(batch.rows),
            Table::Unlock => self.unlocks.load_snapshot(batch.rows),
            Table::Streak => self.streaks.load_snapshot(batch.rows),
        }
    }

    fn apply_delta(&self, delta: &RowDelta) {
        match delta.table {
            Table::Profile => self.profiles.apply_delta(delta.op, &delta.row),
            Table::Pull => self.pulls.apply_delta(delta.op, &delta.row),
            Table::Unlock => self.unlocks.apply_delta(delta.op, &delta.row),
            Table::Streak => self.streaks.apply_delta(delta.op, &delta.row),
        }
    }
}

// ── Subscription plumbing ────────────────────────────────────────────

type AppliedCallback = Box<dyn FnOnce() + Send>;
type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct PendingSubscription {
    /// Taken on the first `SubscribeApplied` -- fires exactly once.
    on_applied: Option<AppliedCallback>,
    on_error: Option<ErrorCallback>,
}

type PendingMap = Arc<Mutex<HashMap<Uuid, PendingSubscription>>>;

/// Builds a subscription with its callbacks, then submits it.
pub struct SubscriptionBuilder {
    outgoing: mpsc::Sender<ClientMessage>,
    pending: PendingMap,
    on_applied: Option<AppliedCallback>,
    on_error: Option<ErrorCallback>,
}

impl SubscriptionBuilder {
    pub fn on_applied(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_applied = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Submit the query set. Fire-and-forget: the outcome arrives through
    /// `on_applied` or `on_error`. If the link is already gone, `on_error`
    /// is invoked before this returns.
    pub fn subscribe(self, queries: Vec<String>) -> SubscriptionHandle {
        let request_id = Uuid::new_v4();
        let on_error = self.on_error.clone();

        if let Ok(mut map) = self.pending.lock() {
            map.insert(
                request_id,
                PendingSubscription {
                    on_applied: self.on_applied,
                    on_error: self.on_error,
                },
            );
        }

        let submitted = self
            .outgoing
            .try_send(ClientMessage::Subscribe {
                request_id,
                queries,
            })
            .is_ok();

        if !submitted {
            if let Ok(mut map) = self.pending.lock() {
                map.remove(&request_id);
            }
            if let Some(cb) = on_error {
                cb("link to the service is closed");
            }
        }

        SubscriptionHandle {
            request_id,
            outgoing: self.outgoing,
            pending: self.pending,
            unsubscribed: AtomicBool::new(!submitted),
        }
    }
}

/// Handle to a submitted query set.
pub struct SubscriptionHandle {
    request_id: Uuid,
    outgoing: mpsc::Sender<ClientMessage>,
    pending: PendingMap,
    unsubscribed: AtomicBool,
}

impl SubscriptionHandle {
    /// Retire the query set. Safe to call any number of times; only the
    /// first call does anything.
    pub fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut map) = self.pending.lock() {
            map.remove(&self.request_id);
        }
        let _ = self.outgoing.try_send(ClientMessage::Unsubscribe {
            request_id: self.request_id,
        });
    }
}

// ── Reducers ─────────────────────────────────────────────────────────

/// Typed fire-and-forget command dispatch. Success or failure of a call
/// surfaces only through subsequent delta frames.
#[derive(Clone)]
pub struct Reducers {
    outgoing: mpsc::Sender<ClientMessage>,
}

impl Reducers {
    pub fn create_profile(&self, display_name: &str) -> Result<(), Error> {
        self.call("create_profile", serde_json::json!({ "display_name": display_name }))
    }

    pub fn rename_profile(&self, display_name: &str) -> Result<(), Error> {
        self.call("rename_profile", serde_json::json!({ "display_name": display_name }))
    }

    pub fn record_pull(&self, card_ref: u32) -> Result<(), Error> {
        self.call("record_pull", serde_json::json!({ "card_ref": card_ref }))
    }

    pub fn mark_unlock_seen(&self, unlock_id: u64) -> Result<(), Error> {
        self.call("mark_unlock_seen", serde_json::json!({ "unlock_id": unlock_id }))
    }

    fn call(&self, reducer: &str, args: serde_json::Value) -> Result<(), Error> {
        self.outgoing
            .try_send(ClientMessage::CallReducer {
                reducer: reducer.to_owned(),
                args,
            })
            .map_err(|_| Error::LinkClosed)
    }
}

// ── Connection ───────────────────────────────────────────────────────

/// A live session with the service.
///
/// Owns the dispatch task; dropping the connection (or calling
/// [`shutdown`](Self::shutdown)) tears it down.
pub struct Connection {
    db: Db,
    outgoing: mpsc::Sender<ClientMessage>,
    pending: PendingMap,
    link_tx: broadcast::Sender<LinkEvent>,
    cancel: CancellationToken,
}

impl Connection {
    /// Dial the service and start dispatching.
    pub async fn connect(credentials: &Credentials) -> Result<Arc<Self>, Error> {
        let transport = crate::ws::connect(credentials).await?;
        Ok(Self::over(transport))
    }

    /// Run a connection over an already established transport.
    pub fn over(transport: TransportPair) -> Arc<Self> {
        let db = Db::new();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (link_tx, _) = broadcast::channel(LINK_EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        tokio::spawn(dispatch(
            db.clone(),
            transport.incoming,
            Arc::clone(&pending),
            link_tx.clone(),
            cancel.clone(),
        ));

        Arc::new(Self {
            db,
            outgoing: transport.outgoing,
            pending,
            link_tx,
            cancel,
        })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn subscription_builder(&self) -> SubscriptionBuilder {
        SubscriptionBuilder {
            outgoing: self.outgoing.clone(),
            pending: Arc::clone(&self.pending),
            on_applied: None,
            on_error: None,
        }
    }

    pub fn reducers(&self) -> Reducers {
        Reducers {
            outgoing: self.outgoing.clone(),
        }
    }

    /// Subscribe to link lifecycle events.
    pub fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.link_tx.subscribe()
    }

    /// Stop the dispatch task. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Dispatch loop ────────────────────────────────────────────────────

async fn dispatch(
    db: Db,
    mut incoming: mpsc::Receiver<Result<ServerMessage, Error>>,
    pending: PendingMap,
    link_tx: broadcast::Sender<LinkEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = incoming.recv() => {
                match frame {
                    Some(Ok(msg)) => handle_frame(&db, &pending, msg),
                    Some(Err(e)) => {
                        let _ = link_tx.send(LinkEvent::Error {
                            message: e.to_string(),
                        });
                    }
                    None => {
                        info!("service link closed");
                        let _ = link_tx.send(LinkEvent::Down {
                            reason: "link closed".into(),
                        });
                        break;
                    }
                }
            }
        }
    }

    debug!("dispatch loop exiting");
}

fn handle_frame(db: &Db, pending: &PendingMap, msg: ServerMessage) {
    match msg {
        ServerMessage::SubscribeApplied {
            request_id,
            snapshot,
        } => {
            // Take the callback first: if the subscription was retired
            // before the confirmation arrived, the snapshot is stale and
            // must not touch the tables.
            let applied = match pending.lock() {
                Ok(mut map) => match map.get_mut(&request_id) {
                    Some(sub) => sub.on_applied.take(),
                    None => {
                        debug!(%request_id, "applied for unknown subscription, ignoring");
                        return;
                    }
                },
                Err(_) => return,
            };

            for batch in snapshot {
                db.load_snapshot(batch);
            }

            // Invoked outside the lock: the callback may re-enter the
            // connection (read tables, register callbacks, unsubscribe).
            if let Some(cb) = applied {
                cb();
            }
        }

        ServerMessage::SubscribeError {
            request_id,
            message,
        } => {
            let on_error = pending
                .lock()
                .ok()
                .and_then(|map| map.get(&request_id).and_then(|sub| sub.on_error.clone()));

            match on_error {
                Some(cb) => cb(&message),
                None => debug!(%request_id, %message, "error for unknown subscription"),
            }
        }

        ServerMessage::TxUpdate { deltas } => {
            for delta in &deltas {
                db.apply_delta(delta);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use super::*;
    use crate::protocol::DeltaOp;

    fn pull_json(id: u64, account: &str, card_ref: u32) -> serde_json::Value {
        json!({
            "id": id,
            "account": account,
            "card_ref": card_ref,
            "pulled_at": "2026-08-01T09:00:00Z",
        })
    }

    async fn recv_subscribe(remote: &mut crate::transport::RemoteEnd) -> Uuid {
        let frame = timeout(Duration::from_secs(1), remote.outgoing.recv())
            .await
            .unwrap()
            .unwrap();
        match frame {
            ClientMessage::Subscribe { request_id, .. } => request_id,
            other => panic!("expected Subscribe, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn applied_fires_once_and_populates_tables() {
        let (transport, mut remote) = TransportPair::in_memory();
        let conn = Connection::over(transport);

        let (applied_tx, applied_rx) = oneshot::channel();
        let _handle = conn
            .subscription_builder()
            .on_applied(move || {
                let _ = applied_tx.send(());
            })
            .subscribe(vec!["SELECT * FROM pull".into()]);

        let request_id = recv_subscribe(&mut remote).await;

        remote
            .incoming
            .send(Ok(ServerMessage::SubscribeApplied {
                request_id,
                snapshot: vec![TableRows {
                    table: Table::Pull,
                    rows: vec![pull_json(1, "alice", 42)],
                }],
            }))
            .await
            .unwrap();

        timeout(Duration::from_secs(1), applied_rx)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(conn.db().pulls().len(), 1);
        assert_eq!(conn.db().pulls().iter()[0].card_ref, 42);
    }

    #[tokio::test]
    async fn subscribe_error_reaches_callback() {
        let (transport, mut remote) = TransportPair::in_memory();
        let conn = Connection::over(transport);

        let (err_tx, err_rx) = oneshot::channel();
        let err_tx = Mutex::new(Some(err_tx));
        let _handle = conn
            .subscription_builder()
            .on_error(move |message| {
                if let Some(tx) = err_tx.lock().unwrap().take() {
                    let _ = tx.send(message.to_owned());
                }
            })
            .subscribe(vec!["SELECT * FROM nope".into()]);

        let request_id = recv_subscribe(&mut remote).await;

        remote
            .incoming
            .send(Ok(ServerMessage::SubscribeError {
                request_id,
                message: "no such collection: nope".into(),
            }))
            .await
            .unwrap();

        let message = timeout(Duration::from_secs(1), err_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(message.contains("nope"));
    }

    #[tokio::test]
    async fn deltas_apply_in_arrival_order() {
        let (transport, mut remote) = TransportPair::in_memory();
        let conn = Connection::over(transport);

        let seen = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&seen);
        conn.db().pulls().on_delete(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let (applied_tx, applied_rx) = oneshot::channel();
        let _handle = conn
            .subscription_builder()
            .on_applied(move || {
                let _ = applied_tx.send(());
            })
            .subscribe(vec!["SELECT * FROM pull".into()]);

        let request_id = recv_subscribe(&mut remote).await;
        remote
            .incoming
            .send(Ok(ServerMessage::SubscribeApplied {
                request_id,
                snapshot: vec![],
            }))
            .await
            .unwrap();
        timeout(Duration::from_secs(1), applied_rx)
            .await
            .unwrap()
            .unwrap();

        // insert then update then delete of the same key
        remote
            .incoming
            .send(Ok(ServerMessage::TxUpdate {
                deltas: vec![
                    RowDelta {
                        table: Table::Pull,
                        op: DeltaOp::Insert,
                        row: pull_json(1, "alice", 42),
                    },
                    RowDelta {
                        table: Table::Pull,
                        op: DeltaOp::Update,
                        row: pull_json(1, "alice", 43),
                    },
                    RowDelta {
                        table: Table::Pull,
                        op: DeltaOp::Delete,
                        row: pull_json(1, "alice", 43),
                    },
                ],
            }))
            .await
            .unwrap();

        timeout(Duration::from_secs(1), async {
            while seen.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(conn.db().pulls().is_empty());
    }

    #[tokio::test]
    async fn link_close_emits_down() {
        let (transport, remote) = TransportPair::in_memory();
        let conn = Connection::over(transport);
        let mut events = conn.link_events();

        drop(remote);

        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, LinkEvent::Down { .. }));
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_discards_late_applied() {
        let (transport, mut remote) = TransportPair::in_memory();
        let conn = Connection::over(transport);

        let applied = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&applied);
        let handle = conn
            .subscription_builder()
            .on_applied(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .subscribe(vec!["SELECT * FROM pull".into()]);

        let request_id = recv_subscribe(&mut remote).await;

        handle.unsubscribe();
        handle.unsubscribe();

        // Confirmation races in after the unsubscribe: must be dropped.
        remote
            .incoming
            .send(Ok(ServerMessage::SubscribeApplied {
                request_id,
                snapshot: vec![TableRows {
                    table: Table::Pull,
                    rows: vec![pull_json(1, "alice", 42)],
                }],
            }))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(applied.load(Ordering::SeqCst), 0);
        assert!(conn.db().pulls().is_empty());
    }
}
