// ── Connection manager ──
//
// Owns the single shared connection to the service. Consumers never
// own or close the handle; they register listeners and react. There is
// deliberately no retry policy here -- an affected consumer decides
// whether and when to call `initialize` again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ember_remote::{Connection, Credentials, LinkEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::error::CoreError;

type ConnectCallback = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;
type DisconnectCallback = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&CoreError) + Send + Sync>;

/// Callbacks one consumer registers for connection lifecycle events.
///
/// A listener added while the connection is already up is NOT invoked
/// retroactively -- check [`ConnectionManager::connection`] after
/// registering and run the connected path yourself if it returns a
/// handle. This closes the gap where a consumer mounts after the
/// connection already succeeded.
#[derive(Clone, Default)]
pub struct ConnectionListener {
    on_connect: Option<ConnectCallback>,
    on_disconnect: Option<DisconnectCallback>,
    on_error: Option<ErrorCallback>,
}

impl ConnectionListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(mut self, f: impl Fn(&Arc<Connection>) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    pub fn on_disconnect(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&CoreError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

/// Handle for unregistering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Process-wide owner of the (at most one) live connection.
pub struct ConnectionManager {
    credentials: Credentials,
    handle: Mutex<Option<Arc<Connection>>>,
    listeners: Mutex<HashMap<u64, ConnectionListener>>,
    next_listener: AtomicU64,
    connecting: AtomicBool,
}

impl ConnectionManager {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            handle: Mutex::new(None),
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(0),
            connecting: AtomicBool::new(false),
        }
    }

    /// Dial the service if not already connected or connecting.
    ///
    /// Idempotent: only the first call performs the connect. Failure is
    /// reported through every listener's `on_error`; afterwards the
    /// method may be called again.
    pub async fn initialize(self: &Arc<Self>) {
        if self.connection().is_some() {
            debug!("already connected, skipping initialize");
            return;
        }
        if self.connecting.swap(true, Ordering::SeqCst) {
            debug!("connect already in flight, skipping initialize");
            return;
        }

        let result = Connection::connect(&self.credentials).await;
        self.connecting.store(false, Ordering::SeqCst);

        match result {
            Ok(conn) => self.attach(&conn),
            Err(e) => {
                warn!(error = %e, "connect failed");
                self.notify_error(&CoreError::from(e));
            }
        }
    }

    /// Adopt an already established connection.
    ///
    /// Used by `initialize` and by embedders (and tests) that dial their
    /// own transport. Spawns the link watcher and notifies listeners.
    pub fn attach(self: &Arc<Self>, conn: &Arc<Connection>) {
        {
            let Ok(mut guard) = self.handle.lock() else {
                return;
            };
            if guard.is_some() {
                warn!("already connected, ignoring attach");
                return;
            }
            *guard = Some(Arc::clone(conn));
        }

        let manager = Arc::downgrade(self);
        let mut events = conn.link_events();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "link watcher lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                match event {
                    LinkEvent::Down { reason } => {
                        manager.handle_down(&reason);
                        break;
                    }
                    LinkEvent::Error { message } => {
                        manager.notify_error(&CoreError::ConnectionFailed { reason: message });
                    }
                }
            }
        });

        info!("connected to sync service");
        self.notify_connect(conn);
    }

    /// The current handle, if connected.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.handle.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.connection().is_some()
    }

    // ── Listener registry ────────────────────────────────────────────

    pub fn add_listener(&self, listener: ConnectionListener) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.insert(id, listener);
        }
        ListenerId(id)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.remove(&id.0);
        }
    }

    // ── Notification fan-out ─────────────────────────────────────────
    //
    // Listeners are snapshotted before invocation so a callback can
    // re-enter the registry without deadlocking.

    fn snapshot_listeners(&self) -> Vec<ConnectionListener> {
        self.listeners
            .lock()
            .map(|listeners| listeners.values().cloned().collect())
            .unwrap_or_default()
    }

    fn notify_connect(&self, conn: &Arc<Connection>) {
        for listener in self.snapshot_listeners() {
            if let Some(cb) = listener.on_connect {
                cb(conn);
            }
        }
    }

    fn notify_disconnect(&self, reason: &str) {
        for listener in self.snapshot_listeners() {
            if let Some(cb) = listener.on_disconnect {
                cb(reason);
            }
        }
    }

    fn notify_error(&self, error: &CoreError) {
        for listener in self.snapshot_listeners() {
            if let Some(cb) = listener.on_error {
                cb(error);
            }
        }
    }

    fn handle_down(&self, reason: &str) {
        let dropped = self
            .handle
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if dropped.is_some() {
            info!(reason, "sync service connection lost");
            self.notify_disconnect(reason);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use ember_remote::TransportPair;
    use secrecy::SecretString;
    use tokio::time::timeout;

    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            url: "wss://sync.invalid/v1".parse().unwrap(),
            token: SecretString::from("test-token".to_owned()),
        }
    }

    #[tokio::test]
    async fn attach_notifies_existing_listeners() {
        let manager = Arc::new(ConnectionManager::new(credentials()));
        let connects = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&connects);
        manager.add_listener(ConnectionListener::new().on_connect(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let (transport, _remote) = TransportPair::in_memory();
        let conn = Connection::over(transport);
        manager.attach(&conn);

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn second_attach_is_ignored() {
        let manager = Arc::new(ConnectionManager::new(credentials()));

        let (t1, _r1) = TransportPair::in_memory();
        let first = Connection::over(t1);
        manager.attach(&first);

        let (t2, _r2) = TransportPair::in_memory();
        let second = Connection::over(t2);
        manager.attach(&second);

        assert!(Arc::ptr_eq(&manager.connection().unwrap(), &first));
    }

    #[tokio::test]
    async fn late_listener_is_not_retroactively_invoked() {
        let manager = Arc::new(ConnectionManager::new(credentials()));
        let (transport, _remote) = TransportPair::in_memory();
        manager.attach(&Connection::over(transport));

        let connects = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&connects);
        manager.add_listener(ConnectionListener::new().on_connect(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        // The manager stays silent; the caller checks for itself.
        assert_eq!(connects.load(Ordering::SeqCst), 0);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn link_drop_clears_handle_and_notifies() {
        let manager = Arc::new(ConnectionManager::new(credentials()));
        let (disconnect_tx, disconnect_rx) = tokio::sync::oneshot::channel();
        let disconnect_tx = Mutex::new(Some(disconnect_tx));
        manager.add_listener(ConnectionListener::new().on_disconnect(move |reason| {
            if let Some(tx) = disconnect_tx.lock().unwrap().take() {
                let _ = tx.send(reason.to_owned());
            }
        }));

        let (transport, remote) = TransportPair::in_memory();
        manager.attach(&Connection::over(transport));

        drop(remote);

        timeout(Duration::from_secs(1), disconnect_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn removed_listener_stays_silent() {
        let manager = Arc::new(ConnectionManager::new(credentials()));
        let connects = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&connects);
        let id = manager.add_listener(ConnectionListener::new().on_connect(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        manager.remove_listener(id);

        let (transport, _remote) = TransportPair::in_memory();
        manager.attach(&Connection::over(transport));

        assert_eq!(connects.load(Ordering::SeqCst), 0);
    }
}
