// ── Derived statistics ──
//
// Pure derivations over a store snapshot, recomputed only when the
// data version advances. Day bucketing uses canonical UTC calendar-day
// strings so results are identical across client timezones.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};

use crate::model::AccountId;
use crate::store::{MirrorStore, StoreSnapshot};

/// How many recent pulls the activity feed derivation keeps.
pub const RECENT_PULL_LIMIT: usize = 15;

/// How many accounts the streak leaderboard keeps.
pub const STREAK_LEADER_LIMIT: usize = 10;

/// Display name substituted when a pull or streak references an account
/// with no mirrored profile. A dangling reference degrades, it never
/// drops the record.
pub const PLACEHOLDER_NAME: &str = "wanderer";

/// Canonical UTC calendar-day key (`YYYY-MM-DD`).
pub fn utc_day_key(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

// ── Output shapes ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentPull {
    pub account: AccountId,
    pub display_name: String,
    pub card_ref: u32,
    pub pulled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakLeader {
    pub account: AccountId,
    pub display_name: String,
    pub current: u32,
    pub longest: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedStats {
    /// The store version this output was computed from.
    pub data_version: u64,
    pub total_pulls: usize,
    pub pulls_today: usize,
    pub unlocks_today: usize,
    /// Most-pulled card of the UTC day; ties break to the lowest card
    /// ref so the result is stable across platforms.
    pub most_pulled_card_today: Option<u32>,
    pub recent_pulls: Vec<RecentPull>,
    pub streak_leaders: Vec<StreakLeader>,
}

// ── Computation ──────────────────────────────────────────────────────

/// Derive stats from a snapshot. Pure: same snapshot and `now` always
/// produce the same output.
pub fn compute_stats(snap: &StoreSnapshot, now: DateTime<Utc>) -> DerivedStats {
    let today = utc_day_key(now);

    let names: HashMap<&str, &str> = snap
        .profiles
        .iter()
        .map(|p| (p.account.as_str(), p.display_name.as_str()))
        .collect();
    let name_for =
        |account: &AccountId| -> String { (*names.get(account.as_str()).unwrap_or(&PLACEHOLDER_NAME)).to_owned() };

    let pulls_today: Vec<_> = snap
        .pulls
        .iter()
        .filter(|p| utc_day_key(p.pulled_at) == today)
        .collect();

    let mut card_counts: HashMap<u32, usize> = HashMap::new();
    for pull in &pulls_today {
        *card_counts.entry(pull.card_ref).or_insert(0) += 1;
    }
    let mut ranked: Vec<(u32, usize)> = card_counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let most_pulled_card_today = ranked.first().map(|(card, _)| *card);

    // The pulls snapshot is already newest-first.
    let recent_pulls = snap
        .pulls
        .iter()
        .take(RECENT_PULL_LIMIT)
        .map(|p| RecentPull {
            account: p.account.clone(),
            display_name: name_for(&p.account),
            card_ref: p.card_ref,
            pulled_at: p.pulled_at,
        })
        .collect();

    let mut leaders: Vec<&Arc<crate::model::Streak>> = snap.streaks.iter().collect();
    leaders.sort_by(|a, b| b.longest.cmp(&a.longest).then(a.account.cmp(&b.account)));
    let streak_leaders = leaders
        .into_iter()
        .take(STREAK_LEADER_LIMIT)
        .map(|s| StreakLeader {
            account: s.account.clone(),
            display_name: name_for(&s.account),
            current: s.current,
            longest: s.longest,
        })
        .collect();

    let unlocks_today = snap
        .unlocks
        .iter()
        .filter(|u| utc_day_key(u.unlocked_at) == today)
        .count();

    DerivedStats {
        data_version: snap.data_version,
        total_pulls: snap.pulls.len(),
        pulls_today: pulls_today.len(),
        unlocks_today,
        most_pulled_card_today,
        recent_pulls,
        streak_leaders,
    }
}

// ── Version-gated cache ──────────────────────────────────────────────

/// Memoizes the latest derivation by store version.
///
/// A version bump does not promise the data actually differs -- only
/// that a real change implies a bump. The cell therefore recomputes on
/// any advance and returns the cached `Arc` untouched otherwise.
pub struct StatsCell {
    cached: ArcSwapOption<DerivedStats>,
}

impl StatsCell {
    pub fn new() -> Self {
        Self {
            cached: ArcSwapOption::const_empty(),
        }
    }

    /// Return cached stats if the store version is unchanged, otherwise
    /// recompute and cache.
    pub fn get_or_compute(&self, store: &MirrorStore) -> Arc<DerivedStats> {
        let snap = store.snapshot();

        if let Some(cached) = self.cached.load_full() {
            if cached.data_version == snap.data_version {
                return cached;
            }
        }

        let fresh = Arc::new(compute_stats(&snap, Utc::now()));
        self.cached.store(Some(Arc::clone(&fresh)));
        fresh
    }
}

impl Default for StatsCell {
    fn default() -> Self {
        Self::new()
    }
}
