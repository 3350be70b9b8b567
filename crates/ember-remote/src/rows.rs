// ── Row types ──
//
// The service's row shapes, one struct per collection. Field layout is
// owned by the service; keep these in sync with the published schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user identity, keyed by wallet account id. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub account: String,
    pub display_name: String,
}

/// One daily pull: a practice card drawn by an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRow {
    pub id: u64,
    pub account: String,
    pub card_ref: u32,
    pub pulled_at: DateTime<Utc>,
}

/// An achievement unlock. May be updated in place (`seen`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockRow {
    pub id: u64,
    pub account: String,
    pub kind: String,
    pub unlocked_at: DateTime<Utc>,
    #[serde(default)]
    pub seen: bool,
}

/// Current/longest streak counters, upserted by the service per account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRow {
    pub account: String,
    pub current: u32,
    pub longest: u32,
}
