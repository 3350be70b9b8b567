// ── Mirror store ──
//
// One consumer's private mirror of every subscribed collection, plus
// the data-version counter that gates derived-stat recomputation. Every
// mutation bumps the version; the counter is monotonic and never
// skipped. Collections live and die with their owning consumer -- a new
// consumer always starts from an empty store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::MirrorCollection;
use crate::model::{AccountId, Profile, Pull, Streak, Unlock};
use crate::stream::EntityStream;

/// Bulk data for a full reload, one vec per collection.
#[derive(Debug, Default)]
pub struct MirrorSnapshot {
    pub profiles: Vec<Profile>,
    pub pulls: Vec<Pull>,
    pub unlocks: Vec<Unlock>,
    pub streaks: Vec<Streak>,
}

/// Point-in-time view handed to the stats aggregator.
///
/// `data_version` is captured before the collections, so a concurrent
/// mutation can only make the labeled version stale, never future --
/// stats computed from this view are at most one tick behind.
pub struct StoreSnapshot {
    pub data_version: u64,
    pub profiles: Arc<Vec<Arc<Profile>>>,
    pub pulls: Arc<Vec<Arc<Pull>>>,
    pub unlocks: Arc<Vec<Arc<Unlock>>>,
    pub streaks: Arc<Vec<Arc<Streak>>>,
}

/// The local cache for one consumer.
pub struct MirrorStore {
    profiles: MirrorCollection<Profile>,
    pulls: MirrorCollection<Pull>,
    unlocks: MirrorCollection<Unlock>,
    streaks: MirrorCollection<Streak>,
    data_version: watch::Sender<u64>,
    last_reload: watch::Sender<Option<DateTime<Utc>>>,
}

impl MirrorStore {
    pub fn new() -> Self {
        let (data_version, _) = watch::channel(0u64);
        let (last_reload, _) = watch::channel(None);

        Self {
            profiles: MirrorCollection::new(),
            // Feeds read newest-first; ties (same instant) break by id so
            // the order is stable across rebuilds.
            pulls: MirrorCollection::with_order(|a, b| {
                b.pulled_at.cmp(&a.pulled_at).then(b.id.cmp(&a.id))
            }),
            unlocks: MirrorCollection::with_order(|a, b| {
                b.unlocked_at.cmp(&a.unlocked_at).then(b.id.cmp(&a.id))
            }),
            streaks: MirrorCollection::new(),
            data_version,
            last_reload,
        }
    }

    // ── Version ──────────────────────────────────────────────────────

    pub fn data_version(&self) -> u64 {
        *self.data_version.borrow()
    }

    pub fn subscribe_data_version(&self) -> watch::Receiver<u64> {
        self.data_version.subscribe()
    }

    fn bump_version(&self) {
        self.data_version.send_modify(|v| *v += 1);
    }

    pub fn last_reload(&self) -> Option<DateTime<Utc>> {
        *self.last_reload.borrow()
    }

    // ── Full reload ──────────────────────────────────────────────────

    /// Replace every collection with freshly read data. One version bump
    /// for the whole reload.
    pub fn load(&self, snapshot: MirrorSnapshot) {
        self.profiles.replace_all(
            snapshot
                .profiles
                .into_iter()
                .map(|p| (p.account.as_str().to_owned(), p))
                .collect(),
        );
        self.pulls.replace_all(
            snapshot
                .pulls
                .into_iter()
                .map(|p| (p.id.to_string(), p))
                .collect(),
        );
        self.unlocks.replace_all(
            snapshot
                .unlocks
                .into_iter()
                .map(|u| (u.id.to_string(), u))
                .collect(),
        );
        self.streaks.replace_all(
            snapshot
                .streaks
                .into_iter()
                .map(|s| (s.account.as_str().to_owned(), s))
                .collect(),
        );

        let _ = self.last_reload.send(Some(Utc::now()));
        self.bump_version();
    }

    // ── Delta application ────────────────────────────────────────────
    //
    // Inserts and updates share upsert semantics: a duplicate insert
    // replaces rather than duplicates, an update for an unknown key
    // lands as an insert. Removals of absent keys do nothing. None of
    // these can fail.

    pub fn upsert_profile(&self, profile: Profile) {
        self.profiles
            .upsert(profile.account.as_str().to_owned(), profile);
        self.bump_version();
    }

    pub fn remove_profile(&self, account: &AccountId) {
        if self.profiles.remove(account.as_str()) {
            self.bump_version();
        }
    }

    pub fn upsert_pull(&self, pull: Pull) {
        self.pulls.upsert(pull.id.to_string(), pull);
        self.bump_version();
    }

    pub fn remove_pull(&self, id: u64) {
        if self.pulls.remove(&id.to_string()) {
            self.bump_version();
        }
    }

    pub fn upsert_unlock(&self, unlock: Unlock) {
        self.unlocks.upsert(unlock.id.to_string(), unlock);
        self.bump_version();
    }

    pub fn remove_unlock(&self, id: u64) {
        if self.unlocks.remove(&id.to_string()) {
            self.bump_version();
        }
    }

    pub fn upsert_streak(&self, streak: Streak) {
        self.streaks
            .upsert(streak.account.as_str().to_owned(), streak);
        self.bump_version();
    }

    pub fn remove_streak(&self, account: &AccountId) {
        if self.streaks.remove(account.as_str()) {
            self.bump_version();
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn profile(&self, account: &AccountId) -> Option<Arc<Profile>> {
        self.profiles.get(account.as_str())
    }

    pub fn streak(&self, account: &AccountId) -> Option<Arc<Streak>> {
        self.streaks.get(account.as_str())
    }

    pub fn profiles_snapshot(&self) -> Arc<Vec<Arc<Profile>>> {
        self.profiles.snapshot()
    }

    pub fn pulls_snapshot(&self) -> Arc<Vec<Arc<Pull>>> {
        self.pulls.snapshot()
    }

    pub fn unlocks_snapshot(&self) -> Arc<Vec<Arc<Unlock>>> {
        self.unlocks.snapshot()
    }

    pub fn streaks_snapshot(&self) -> Arc<Vec<Arc<Streak>>> {
        self.streaks.snapshot()
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.len()
    }

    /// Coherent view for derived-stat computation.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            data_version: self.data_version(),
            profiles: self.profiles.snapshot(),
            pulls: self.pulls.snapshot(),
            unlocks: self.unlocks.snapshot(),
            streaks: self.streaks.snapshot(),
        }
    }

    // ── Reactive subscriptions ───────────────────────────────────────

    pub fn subscribe_profiles(&self) -> EntityStream<Profile> {
        EntityStream::new(self.profiles.subscribe())
    }

    pub fn subscribe_pulls(&self) -> EntityStream<Pull> {
        EntityStream::new(self.pulls.subscribe())
    }

    pub fn subscribe_unlocks(&self) -> EntityStream<Unlock> {
        EntityStream::new(self.unlocks.subscribe())
    }

    pub fn subscribe_streaks(&self) -> EntityStream<Streak> {
        EntityStream::new(self.streaks.subscribe())
    }
}

impl Default for MirrorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn pull(id: u64, account: &str, card_ref: u32, ts: &str) -> Pull {
        Pull {
            id,
            account: AccountId::from(account),
            card_ref,
            pulled_at: ts.parse().unwrap(),
        }
    }

    #[test]
    fn load_replaces_and_bumps_once() {
        let store = MirrorStore::new();
        store.upsert_pull(pull(99, "alice", 1, "2026-07-01T08:00:00Z"));
        let version = store.data_version();

        store.load(MirrorSnapshot {
            pulls: vec![
                pull(1, "alice", 10, "2026-08-01T08:00:00Z"),
                pull(2, "alice", 11, "2026-08-02T08:00:00Z"),
            ],
            ..MirrorSnapshot::default()
        });

        assert_eq!(store.data_version(), version + 1);
        assert_eq!(store.pull_count(), 2);
        assert!(store.pulls_snapshot().iter().all(|p| p.id != 99));
        assert!(store.last_reload().is_some());
    }

    #[test]
    fn pulls_snapshot_is_newest_first() {
        let store = MirrorStore::new();
        store.upsert_pull(pull(1, "alice", 10, "2026-08-01T08:00:00Z"));
        store.upsert_pull(pull(3, "alice", 12, "2026-08-03T08:00:00Z"));
        store.upsert_pull(pull(2, "alice", 11, "2026-08-02T08:00:00Z"));

        let ids: Vec<u64> = store.pulls_snapshot().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn duplicate_insert_is_an_update() {
        let store = MirrorStore::new();
        store.upsert_pull(pull(1, "alice", 10, "2026-08-01T08:00:00Z"));
        store.upsert_pull(pull(1, "alice", 12, "2026-08-01T08:00:00Z"));

        assert_eq!(store.pull_count(), 1);
        assert_eq!(store.pulls_snapshot()[0].card_ref, 12);
    }

    #[test]
    fn remove_of_absent_key_does_not_bump() {
        let store = MirrorStore::new();
        store.upsert_pull(pull(1, "alice", 10, "2026-08-01T08:00:00Z"));
        let version = store.data_version();

        store.remove_pull(7);
        assert_eq!(store.data_version(), version);

        store.remove_pull(1);
        store.remove_pull(1);
        assert_eq!(store.data_version(), version + 1);
        assert_eq!(store.pull_count(), 0);
    }

    #[test]
    fn version_is_monotonic_across_mutations() {
        let store = MirrorStore::new();
        let mut versions = vec![store.data_version()];

        store.upsert_profile(Profile {
            account: AccountId::from("alice"),
            display_name: "Alice".into(),
        });
        versions.push(store.data_version());

        store.upsert_streak(Streak {
            account: AccountId::from("alice"),
            current: 3,
            longest: 9,
        });
        versions.push(store.data_version());

        store.remove_profile(&AccountId::from("alice"));
        versions.push(store.data_version());

        assert!(versions.windows(2).all(|w| w[1] == w[0] + 1));
    }
}
