// ── Row -> domain conversions ──

use ember_remote::{ProfileRow, PullRow, StreakRow, UnlockRow};

use crate::model::{AccountId, Profile, Pull, Streak, Unlock, UnlockKind};

impl From<&ProfileRow> for Profile {
    fn from(row: &ProfileRow) -> Self {
        Self {
            account: AccountId::new(row.account.clone()),
            display_name: row.display_name.clone(),
        }
    }
}

impl From<&PullRow> for Pull {
    fn from(row: &PullRow) -> Self {
        Self {
            id: row.id,
            account: AccountId::new(row.account.clone()),
            card_ref: row.card_ref,
            pulled_at: row.pulled_at,
        }
    }
}

impl From<&UnlockRow> for Unlock {
    fn from(row: &UnlockRow) -> Self {
        Self {
            id: row.id,
            account: AccountId::new(row.account.clone()),
            kind: row
                .kind
                .parse()
                .unwrap_or_else(|_| UnlockKind::Other(row.kind.clone())),
            unlocked_at: row.unlocked_at,
            seen: row.seen,
        }
    }
}

impl From<&StreakRow> for Streak {
    fn from(row: &StreakRow) -> Self {
        Self {
            account: AccountId::new(row.account.clone()),
            current: row.current,
            longest: row.longest,
        }
    }
}
