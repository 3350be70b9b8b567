// ── Polling fallback ──
//
// Periodic full-reload backstop for missed push events. Two states:
// Inactive and Polling. The poller runs only while the connection is
// live AND the consumer's surface is foregrounded, both observed via
// watch channels -- it has no liveness check of its own. Deactivation
// drops the timer entirely; reactivation starts a fresh one whose first
// reload lands on the next tick boundary, never immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type Reload = Arc<dyn Fn() + Send + Sync>;

/// Handle to a running fallback poller.
pub struct PollingFallback {
    cancel: CancellationToken,
}

impl PollingFallback {
    /// Spawn the poller task. Must be called within a tokio runtime.
    pub fn spawn(
        interval: Duration,
        connected: watch::Receiver<bool>,
        foreground: watch::Receiver<bool>,
        reload: Reload,
    ) -> Self {
        let cancel = CancellationToken::new();
        tokio::spawn(run(
            interval,
            connected,
            foreground,
            reload,
            cancel.clone(),
        ));
        Self { cancel }
    }

    /// Stop the poller permanently. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn gates_open(connected: &watch::Receiver<bool>, foreground: &watch::Receiver<bool>) -> bool {
    *connected.borrow() && *foreground.borrow()
}

async fn run(
    interval: Duration,
    mut connected: watch::Receiver<bool>,
    mut foreground: watch::Receiver<bool>,
    reload: Reload,
    cancel: CancellationToken,
) {
    loop {
        // Inactive: wait for both gates. A closed watch channel means
        // the owner is gone.
        while !gates_open(&connected, &foreground) {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                changed = connected.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                changed = foreground.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        debug!("polling active");
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                changed = connected.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !gates_open(&connected, &foreground) {
                        break;
                    }
                }
                changed = foreground.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !gates_open(&connected, &foreground) {
                        break;
                    }
                }
                _ = ticker.tick() => reload(),
            }
        }

        // Ticker dropped here: the timer is cancelled, not paused.
        debug!("polling inactive");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const INTERVAL: Duration = Duration::from_secs(30);

    struct Rig {
        connected: watch::Sender<bool>,
        foreground: watch::Sender<bool>,
        reloads: Arc<AtomicUsize>,
        poller: PollingFallback,
    }

    fn rig(connected: bool, foreground: bool) -> Rig {
        let (connected_tx, connected_rx) = watch::channel(connected);
        let (foreground_tx, foreground_rx) = watch::channel(foreground);
        let reloads = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&reloads);
        let poller = PollingFallback::spawn(
            INTERVAL,
            connected_rx,
            foreground_rx,
            Arc::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        );

        Rig {
            connected: connected_tx,
            foreground: foreground_tx,
            reloads,
            poller,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_reload_at_activation_instant() {
        let rig = rig(true, true);
        settle().await;
        assert_eq!(rig.reloads.load(Ordering::SeqCst), 0);

        tokio::time::advance(INTERVAL).await;
        settle().await;
        assert_eq!(rig.reloads.load(Ordering::SeqCst), 1);
        drop(rig);
    }

    #[tokio::test(start_paused = true)]
    async fn backgrounded_surface_never_polls() {
        let rig = rig(true, false);
        settle().await;

        for _ in 0..5 {
            tokio::time::advance(INTERVAL).await;
            settle().await;
        }
        assert_eq!(rig.reloads.load(Ordering::SeqCst), 0);
        drop(rig);
    }

    #[tokio::test(start_paused = true)]
    async fn foregrounding_polls_on_next_boundary_not_immediately() {
        let rig = rig(true, false);
        settle().await;
        tokio::time::advance(INTERVAL * 3).await;
        settle().await;

        rig.foreground.send(true).unwrap();
        settle().await;
        assert_eq!(rig.reloads.load(Ordering::SeqCst), 0, "no immediate reload");

        tokio::time::advance(INTERVAL).await;
        settle().await;
        assert_eq!(rig.reloads.load(Ordering::SeqCst), 1);
        drop(rig);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_polling() {
        let rig = rig(true, true);
        settle().await;
        tokio::time::advance(INTERVAL).await;
        settle().await;
        assert_eq!(rig.reloads.load(Ordering::SeqCst), 1);

        rig.connected.send(false).unwrap();
        settle().await;
        tokio::time::advance(INTERVAL * 4).await;
        settle().await;
        assert_eq!(rig.reloads.load(Ordering::SeqCst), 1);
        drop(rig);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_idempotent() {
        let rig = rig(true, true);
        rig.poller.shutdown();
        rig.poller.shutdown();
        settle().await;

        tokio::time::advance(INTERVAL * 2).await;
        settle().await;
        assert_eq!(rig.reloads.load(Ordering::SeqCst), 0);
    }
}
