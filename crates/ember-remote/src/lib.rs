// ember-remote: async Rust client for the ember subscription database service.

pub mod connection;
pub mod error;
pub mod protocol;
pub mod rows;
pub mod tables;
pub mod transport;
pub mod ws;

pub use connection::{Connection, Db, LinkEvent, Reducers, SubscriptionBuilder, SubscriptionHandle};
pub use error::Error;
pub use protocol::{ClientMessage, DeltaOp, RowDelta, ServerMessage, Table, TableRows};
pub use rows::{ProfileRow, PullRow, StreakRow, UnlockRow};
pub use tables::{CallbackId, ClientTable};
pub use transport::{Credentials, RemoteEnd, TransportPair};
