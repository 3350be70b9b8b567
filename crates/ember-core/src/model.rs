// ── Domain model ──
//
// The entities mirrored from the service, in the shape consumers work
// with. All identifiers originate remotely; this layer never mints one.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable wallet/account identifier. Primary key for profiles and streaks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A user identity. Created and renamed remotely, never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub account: AccountId,
    pub display_name: String,
}

/// One daily pull. Append-only from this layer's perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pull {
    pub id: u64,
    pub account: AccountId,
    pub card_ref: u32,
    pub pulled_at: DateTime<Utc>,
}

/// Achievement categories the service awards. Unknown tags survive as
/// `Other` so a newer server never breaks an older client.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum UnlockKind {
    FirstPull,
    WeekStreak,
    MonthStreak,
    NightOwl,
    CenturyClub,
    #[strum(default)]
    Other(String),
}

/// An achievement unlock. Updated in place when marked seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unlock {
    pub id: u64,
    pub account: AccountId,
    pub kind: UnlockKind,
    pub unlocked_at: DateTime<Utc>,
    pub seen: bool,
}

/// Streak counters, upserted per account by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Streak {
    pub account: AccountId,
    pub current: u32,
    pub longest: u32,
}
