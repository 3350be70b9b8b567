// ember-core: reactive sync layer between the ember service and UI consumers.
//
// The shape of the layer: `ConnectionManager` owns the one shared
// connection; each consumer session submits its own query set through a
// `SubscriptionController`, mirrors rows into a private `MirrorStore`,
// keeps the mirror fresh through once-bound delta handlers
// (`CallbackRegistrar`) with a periodic reload backstop
// (`PollingFallback`), and derives aggregate views (`stats`) gated by
// the store's data version.

pub mod command;
pub mod config;
pub mod connection;
pub mod convert;
pub mod error;
pub mod model;
pub mod polling;
pub mod registrar;
pub mod session;
pub mod stats;
pub mod store;
pub mod stream;
pub mod subscription;

// ── Primary re-exports ───────────────────────────────────────────────
pub use command::Command;
pub use config::{SyncConfig, DEFAULT_POLL_INTERVAL};
pub use connection::{ConnectionListener, ConnectionManager, ListenerId};
pub use error::CoreError;
pub use model::{AccountId, Profile, Pull, Streak, Unlock, UnlockKind};
pub use polling::PollingFallback;
pub use registrar::{CallbackRegistrar, Scope};
pub use session::{CommunityBoard, PlayerSession};
pub use stats::{compute_stats, DerivedStats, RecentPull, StatsCell, StreakLeader};
pub use store::{MirrorSnapshot, MirrorStore, StoreSnapshot};
pub use stream::EntityStream;
pub use subscription::SubscriptionController;

// Re-export the boundary types consumers need to construct a manager.
pub use ember_remote::{Connection, Credentials};
