// ── Wire protocol ──
//
// JSON frames exchanged with the subscription service. The shape is
// fixed by the service; this module only mirrors it. Every frame is a
// single JSON object tagged by `type`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The collections the service publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profile,
    Pull,
    Unlock,
    Streak,
}

impl Table {
    /// Collection name as it appears in query strings.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Pull => "pull",
            Self::Unlock => "unlock",
            Self::Streak => "streak",
        }
    }
}

// ── Client -> server ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Submit a declarative query set. The service answers with exactly
    /// one `SubscribeApplied` or `SubscribeError` carrying the same id.
    Subscribe {
        request_id: Uuid,
        queries: Vec<String>,
    },
    /// Retire a previously applied query set.
    Unsubscribe { request_id: Uuid },
    /// Fire-and-forget remote command. Effects surface only as later
    /// delta frames -- the service never replies to this directly.
    CallReducer {
        reducer: String,
        args: serde_json::Value,
    },
}

// ── Server -> client ─────────────────────────────────────────────────

/// One collection's worth of rows inside an applied snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRows {
    pub table: Table,
    pub rows: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOp {
    Insert,
    Update,
    Delete,
}

/// A single-row change pushed by the service. For deletes, `row` is the
/// removed row (the client only needs its primary key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowDelta {
    pub table: Table,
    pub op: DeltaOp,
    pub row: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The query set is materialized server-side; `snapshot` holds the
    /// full initial result set per subscribed collection.
    SubscribeApplied {
        request_id: Uuid,
        snapshot: Vec<TableRows>,
    },
    /// The query set was rejected (malformed query, server-side error).
    SubscribeError { request_id: Uuid, message: String },
    /// Incremental row changes, in commit order.
    TxUpdate { deltas: Vec<RowDelta> },
}
