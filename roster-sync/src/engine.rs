//! The reconciliation engine.
//!
//! [`RosterEngine`] keeps one authoritative roster per parent consistent
//! across three places: the in-memory cache, the [`LocalRoster`] on disk and
//! the [`RemoteStore`]. Reads are synchronous and local-first; remote work is
//! async and never blocks a reader.
//!
//! # Locking
//!
//! All mutable state sits behind one `std::sync::Mutex`. The lock is only
//! taken inside the synchronous helpers on [`Inner`], so it is never held
//! across an `.await`, and callbacks are always invoked after it is released.
//! Every commit re-filters against the tombstone set under the lock; a delete
//! that lands while a fetch is in flight therefore always wins.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use roster_core::types::normalize_email;
use roster_core::{ChildId, ChildPatch, ChildRecord, LocalRoster, ParentId};

use crate::broker::{notify_all, Broker, RosterCallback, Subscription};
use crate::error::RemoteError;
use crate::reconcile::{merge, records_of};
use crate::remote::{RemoteDoc, RemoteStore};
use crate::status::{ParentStatus, SyncState, SyncTrack, WatchState};

/// Cheaply clonable handle to the engine; clones share all state.
#[derive(Clone)]
pub struct RosterEngine {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) local: LocalRoster,
    pub(crate) remote: Arc<dyn RemoteStore>,
    state: Mutex<EngineState>,
}

#[derive(Default)]
pub(crate) struct EngineState {
    cache: HashMap<ParentId, Vec<ChildRecord>>,
    tombstones: BTreeSet<ChildId>,
    current: Option<ChildRecord>,
    /// Set once a selection was loaded, chosen, cleared or defaulted. Only
    /// an unsettled engine picks the first record as current.
    selection_settled: bool,
    broker: Broker,
    sync: HashMap<ParentId, SyncTrack>,
}

/// Callbacks to run once the lock is released.
type Pending = Vec<(Vec<RosterCallback>, Vec<ChildRecord>)>;

impl std::fmt::Debug for RosterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RosterEngine").finish_non_exhaustive()
    }
}

impl RosterEngine {
    /// Build an engine over `local` and `remote`, loading persisted
    /// tombstones and the current selection.
    pub fn new(local: LocalRoster, remote: Arc<dyn RemoteStore>) -> Self {
        let current = local.load_current();
        let state = EngineState {
            tombstones: local.load_tombstones(),
            selection_settled: current.is_some(),
            current,
            ..Default::default()
        };
        tracing::debug!(
            tombstones = state.tombstones.len(),
            has_current = state.current.is_some(),
            "roster engine initialised"
        );
        Self {
            inner: Arc::new(Inner {
                local,
                remote,
                state: Mutex::new(state),
            }),
        }
    }

    // -- read path ---------------------------------------------------------

    /// Best-known roster for `parent`, right now.
    ///
    /// Schedules a background refresh on the ambient tokio runtime; outside
    /// a runtime the refresh is skipped.
    pub fn get_roster_sync(&self, parent: &ParentId, email: Option<&str>) -> Vec<ChildRecord> {
        let roster = self.inner.best_known(parent);
        self.schedule_refresh(parent, email);
        roster
    }

    /// Fetch `parent`'s remote documents, consolidate by `email`, merge with
    /// local-only records and commit the result.
    ///
    /// On fetch failure the cache is left alone and the best-known roster is
    /// returned.
    pub async fn refresh_from_remote(&self, parent: &ParentId, email: Option<&str>) -> Vec<ChildRecord> {
        self.inner.set_sync(parent, SyncState::Syncing);

        let docs = match self.inner.remote.list(parent).await {
            Ok(docs) => docs,
            Err(err) => return self.inner.fetch_failed(parent, &err),
        };
        let mut records = records_of(docs);
        if let Some(email) = email.and_then(normalize_email) {
            records.extend(self.consolidate_by_email(parent, &email).await);
        }
        let tombstones = self.tombstones();
        records.retain(|r| !tombstones.contains(&r.id));

        if records.is_empty() {
            let local = self.inner.local.children_for(parent, &tombstones);
            if !local.is_empty() {
                self.self_heal(parent, &local).await;
            }
        }

        let merged = self.inner.commit_remote(parent, records);
        self.inner.mark_synced(parent);
        tracing::debug!(parent = %parent, count = merged.len(), "roster refreshed from remote");
        merged
    }

    /// Commit a pushed remote snapshot for `parent`.
    ///
    /// The live listener calls this for every change event.
    pub fn apply_remote_snapshot(&self, parent: &ParentId, docs: Vec<RemoteDoc>) -> Vec<ChildRecord> {
        let merged = self.inner.commit_remote(parent, records_of(docs));
        self.inner.mark_synced(parent);
        merged
    }

    // -- write path --------------------------------------------------------

    /// Create a child under `parent` and make it the current selection.
    pub async fn add(&self, parent: &ParentId, name: &str, age: u32, email: Option<&str>) -> ChildRecord {
        let record = ChildRecord::new(parent.clone(), name, age, email.map(str::to_string));
        self.inner.insert_local(parent, &record);
        tracing::info!(parent = %parent, child = %record.id, "child added");

        if let Err(err) = self.push_live(parent, &record).await {
            tracing::warn!(child = %record.id, error = %err, "remote write failed; kept locally");
        }
        self.set_current(&record);
        record
    }

    /// Patch an existing child. `None` when the id is unknown (after one
    /// refresh-and-retry) or the child was deleted meanwhile.
    pub async fn update(&self, parent: &ParentId, id: &ChildId, patch: &ChildPatch) -> Option<ChildRecord> {
        let mut record = match self.inner.find(parent, id) {
            Some(record) => record,
            None => {
                tracing::debug!(child = %id, "child not cached; refreshing before update");
                self.refresh_from_remote(parent, None).await;
                match self.inner.find(parent, id) {
                    Some(record) => record,
                    None => {
                        tracing::warn!(parent = %parent, child = %id, "update target not found");
                        return None;
                    }
                }
            }
        };
        record.apply(patch);

        if self.is_tombstoned(id) {
            return None;
        }
        if let Err(err) = self.inner.remote.put(parent, &record).await {
            tracing::warn!(child = %id, error = %err, "remote update failed; applied locally");
        }
        if !self.inner.store_updated(parent, &record) {
            tracing::info!(child = %id, "child deleted during update; dropping it");
            if let Err(err) = self.inner.remote.delete(parent, id).await {
                tracing::warn!(child = %id, error = %err, "failed to remove resurrected remote document");
            }
            return None;
        }
        Some(record)
    }

    /// Delete a child. The tombstone is persisted before any other step.
    ///
    /// Returns whether the child was in `parent`'s best-known roster.
    pub async fn delete(&self, parent: &ParentId, id: &ChildId) -> bool {
        let existed = self.inner.tombstone(parent, id);

        if let Err(err) = self.inner.remote.delete(parent, id).await {
            tracing::warn!(child = %id, error = %err, "remote delete failed; tombstone still applies");
        }
        self.inner.purge(id);
        tracing::info!(parent = %parent, child = %id, existed, "child deleted");
        existed
    }

    // -- subscriptions -----------------------------------------------------

    /// Receive `parent`'s roster now and on every later change.
    ///
    /// `callback` is invoked immediately with the best-known roster. The
    /// first subscriber for a parent attaches a live remote listener.
    pub fn subscribe(&self, parent: &ParentId, callback: RosterCallback, email: Option<&str>) -> Subscription {
        let (id, needs_listener, roster) = self.inner.register(parent, callback.clone());
        callback(roster);
        if needs_listener {
            self.attach_listener(parent);
        }
        self.schedule_refresh(parent, email);
        Subscription::new(Arc::downgrade(&self.inner), parent.clone(), id)
    }

    // -- current selection -------------------------------------------------

    pub fn get_current(&self) -> Option<ChildRecord> {
        self.inner.lock().current.clone()
    }

    pub fn set_current(&self, record: &ChildRecord) {
        let mut st = self.inner.lock();
        if st.tombstones.contains(&record.id) {
            tracing::warn!(child = %record.id, "refusing to select a deleted child");
            return;
        }
        st.current = Some(record.clone());
        st.selection_settled = true;
        self.inner.local.save_current(Some(record));
    }

    pub fn clear_current(&self) {
        let mut st = self.inner.lock();
        st.current = None;
        st.selection_settled = true;
        self.inner.local.save_current(None);
    }

    // -- introspection -----------------------------------------------------

    pub fn status(&self, parent: &ParentId) -> ParentStatus {
        let st = self.inner.lock();
        status_of(&st, parent)
    }

    /// Status for every parent the engine has touched, sorted by id.
    pub fn statuses(&self) -> Vec<ParentStatus> {
        let st = self.inner.lock();
        let mut parents: BTreeSet<&ParentId> = st.cache.keys().collect();
        parents.extend(st.sync.keys());
        parents.extend(st.broker.parents());
        parents.into_iter().map(|p| status_of(&st, p)).collect()
    }

    pub fn tombstones(&self) -> BTreeSet<ChildId> {
        self.inner.lock().tombstones.clone()
    }

    pub fn is_tombstoned(&self, id: &ChildId) -> bool {
        self.inner.lock().tombstones.contains(id)
    }

    // -- internals ---------------------------------------------------------

    fn schedule_refresh(&self, parent: &ParentId, email: Option<&str>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let engine = self.clone();
                let parent = parent.clone();
                let email = email.map(str::to_string);
                handle.spawn(async move {
                    engine.refresh_from_remote(&parent, email.as_deref()).await;
                });
            }
            Err(_) => {
                tracing::debug!(parent = %parent, "no async runtime; skipping background refresh");
            }
        }
    }

    fn attach_listener(&self, parent: &ParentId) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::debug!(parent = %parent, "no async runtime; live updates disabled");
                return;
            }
        };
        let mut listener = match self.inner.remote.watch(parent) {
            Ok(listener) => listener,
            Err(err) => {
                tracing::warn!(parent = %parent, error = %err, "failed to attach remote listener");
                return;
            }
        };

        let engine = Arc::downgrade(&self.inner);
        let watched = parent.clone();
        let task = handle.spawn(async move {
            while let Some(snapshot) = listener.next().await {
                let Some(inner) = engine.upgrade() else { break };
                tracing::debug!(parent = %watched, docs = snapshot.len(), "remote change");
                RosterEngine { inner }.apply_remote_snapshot(&watched, snapshot);
            }
        });

        let rejected = self.inner.lock().broker.attach(parent, task);
        match rejected {
            Some(task) => task.abort(),
            None => tracing::debug!(parent = %parent, "remote listener attached"),
        }
    }

    /// Move every remote document matching `email` under `parent`.
    /// Returns the relocated records.
    pub(crate) async fn consolidate_by_email(&self, parent: &ParentId, email: &str) -> Vec<ChildRecord> {
        let found = match self.inner.remote.find_by_email(email).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(email, error = %err, "remote email scan failed");
                return Vec::new();
            }
        };

        let tombstones = self.tombstones();
        let mut moved = Vec::new();
        for doc in found {
            if &doc.parent == parent || tombstones.contains(&doc.record.id) {
                continue;
            }
            let from = doc.parent;
            let mut record = doc.record;
            record.parent_id = parent.clone();
            record.parent_email = Some(email.to_string());

            if let Err(err) = self.inner.remote.put(parent, &record).await {
                tracing::warn!(child = %record.id, error = %err, "failed to relocate remote record");
                continue;
            }
            if let Err(err) = self.inner.remote.delete(&from, &record.id).await {
                tracing::warn!(child = %record.id, from = %from, error = %err, "failed to remove relocated original");
            }
            tracing::info!(child = %record.id, from = %from, to = %parent, "relocated remote record by email");
            moved.push(record);
        }
        moved
    }

    async fn self_heal(&self, parent: &ParentId, local: &[ChildRecord]) {
        tracing::info!(parent = %parent, count = local.len(), "remote is empty; pushing local records");
        for record in local {
            if let Err(err) = self.push_live(parent, record).await {
                tracing::warn!(child = %record.id, error = %err, "self-heal write failed");
            }
        }
    }

    /// Put `record` unless it is tombstoned. A delete that lands while the
    /// put is in flight is replayed so the remote never keeps the record.
    async fn push_live(&self, parent: &ParentId, record: &ChildRecord) -> Result<(), RemoteError> {
        if self.is_tombstoned(&record.id) {
            tracing::debug!(child = %record.id, "skipping remote write for deleted child");
            return Ok(());
        }
        self.inner.remote.put(parent, record).await?;
        if self.is_tombstoned(&record.id) {
            tracing::info!(child = %record.id, "child deleted during remote write; removing it again");
            self.inner.remote.delete(parent, &record.id).await?;
        }
        Ok(())
    }
}

fn status_of(st: &EngineState, parent: &ParentId) -> ParentStatus {
    let track = st.sync.get(parent).cloned().unwrap_or_default();
    ParentStatus {
        parent: parent.clone(),
        sync: track.state,
        watch: if st.broker.is_watching(parent) {
            WatchState::Watching
        } else {
            WatchState::Unwatched
        },
        last_synced_at: track.last_synced_at,
        cached: st.cache.get(parent).map_or(0, Vec::len),
        subscribers: st.broker.subscriber_count(parent),
    }
}

fn run(pending: Pending) {
    for (callbacks, roster) in pending {
        notify_all(&callbacks, &roster);
    }
}

impl Inner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cache if non-empty, else the local store (which seeds the cache).
    fn best_known_locked(&self, st: &mut EngineState, parent: &ParentId) -> Vec<ChildRecord> {
        if let Some(cached) = st.cache.get(parent).filter(|c| !c.is_empty()) {
            return cached
                .iter()
                .filter(|r| !st.tombstones.contains(&r.id))
                .cloned()
                .collect();
        }
        let local = self.local.children_for(parent, &st.tombstones);
        st.cache.insert(parent.clone(), local.clone());
        local
    }

    pub(crate) fn best_known(&self, parent: &ParentId) -> Vec<ChildRecord> {
        let mut st = self.lock();
        self.best_known_locked(&mut st, parent)
    }

    fn find(&self, parent: &ParentId, id: &ChildId) -> Option<ChildRecord> {
        self.best_known(parent).into_iter().find(|r| &r.id == id)
    }

    fn register(&self, parent: &ParentId, callback: RosterCallback) -> (u64, bool, Vec<ChildRecord>) {
        let mut st = self.lock();
        let (id, needs_listener) = st.broker.register(parent, callback);
        let roster = self.best_known_locked(&mut st, parent);
        tracing::debug!(parent = %parent, subscribers = st.broker.subscriber_count(parent), "subscribed");
        (id, needs_listener, roster)
    }

    pub(crate) fn unsubscribe(&self, parent: &ParentId, id: u64) {
        let detached = self.lock().broker.remove(parent, id);
        if let Some(task) = detached {
            task.abort();
            tracing::debug!(parent = %parent, "last subscriber left; remote listener detached");
        }
    }

    fn insert_local(&self, parent: &ParentId, record: &ChildRecord) {
        let pending = {
            let mut st = self.lock();
            let mut roster = self.best_known_locked(&mut st, parent);
            roster.push(record.clone());
            st.cache.insert(parent.clone(), roster.clone());
            self.local.upsert_child(record);
            vec![(st.broker.callbacks(parent), roster)]
        };
        run(pending);
    }

    /// Write an updated record through cache and local store. `false` when
    /// the child has been tombstoned meanwhile.
    fn store_updated(&self, parent: &ParentId, record: &ChildRecord) -> bool {
        let pending = {
            let mut st = self.lock();
            if st.tombstones.contains(&record.id) {
                return false;
            }
            let mut roster = self.best_known_locked(&mut st, parent);
            match roster.iter_mut().find(|r| r.id == record.id) {
                Some(slot) => *slot = record.clone(),
                None => roster.push(record.clone()),
            }
            st.cache.insert(parent.clone(), roster.clone());
            self.local.upsert_child(record);
            if st.current.as_ref().is_some_and(|c| c.id == record.id) {
                st.current = Some(record.clone());
                self.local.save_current(Some(record));
            }
            vec![(st.broker.callbacks(parent), roster)]
        };
        run(pending);
        true
    }

    /// Record the tombstone and persist it. Returns whether the id was in
    /// `parent`'s best-known roster.
    fn tombstone(&self, parent: &ParentId, id: &ChildId) -> bool {
        let mut st = self.lock();
        let existed = self
            .best_known_locked(&mut st, parent)
            .iter()
            .any(|r| &r.id == id);
        st.tombstones.insert(id.clone());
        if !self.local.save_tombstones(&st.tombstones) {
            tracing::error!(child = %id, "tombstone could not be persisted");
        }
        existed
    }

    /// Remove a tombstoned id from the local store, every cache and the
    /// current selection.
    fn purge(&self, id: &ChildId) {
        let pending = {
            let mut guard = self.lock();
            let st = &mut *guard;
            self.local.remove_child(id);
            let mut pending = Pending::new();
            for (parent, roster) in st.cache.iter_mut() {
                let before = roster.len();
                roster.retain(|r| &r.id != id);
                if roster.len() != before {
                    pending.push((st.broker.callbacks(parent), roster.clone()));
                }
            }
            if st.current.as_ref().is_some_and(|c| &c.id == id) {
                st.current = None;
                st.selection_settled = true;
                self.local.save_current(None);
            }
            pending
        };
        run(pending);
    }

    /// Merge `remote` with the local-only records for `parent` and make the
    /// result authoritative: cache, local store, current selection,
    /// subscribers.
    pub(crate) fn commit_remote(&self, parent: &ParentId, remote: Vec<ChildRecord>) -> Vec<ChildRecord> {
        let (merged, pending) = {
            let mut guard = self.lock();
            let st = &mut *guard;
            let local = self.local.children_for(parent, &st.tombstones);
            let merged = merge(remote, local, &st.tombstones);
            self.local.replace_parent(parent, &merged);

            let mut pending = Pending::new();
            let ids: HashSet<&ChildId> = merged.iter().map(|r| &r.id).collect();
            for (other, roster) in st.cache.iter_mut() {
                if other == parent {
                    continue;
                }
                let before = roster.len();
                roster.retain(|r| !ids.contains(&r.id));
                if roster.len() != before {
                    pending.push((st.broker.callbacks(other), roster.clone()));
                }
            }
            st.cache.insert(parent.clone(), merged.clone());

            let refreshed = match &st.current {
                None if st.selection_settled => None,
                None => merged.first().cloned(),
                Some(current) => merged
                    .iter()
                    .find(|r| r.id == current.id && *r != current)
                    .cloned(),
            };
            if let Some(current) = refreshed {
                self.local.save_current(Some(&current));
                st.current = Some(current);
                st.selection_settled = true;
            }

            pending.insert(0, (st.broker.callbacks(parent), merged.clone()));
            (merged, pending)
        };
        run(pending);
        merged
    }

    pub(crate) fn set_sync(&self, parent: &ParentId, state: SyncState) {
        self.lock().sync.entry(parent.clone()).or_default().state = state;
    }

    pub(crate) fn mark_synced(&self, parent: &ParentId) {
        let mut st = self.lock();
        let track = st.sync.entry(parent.clone()).or_default();
        track.state = SyncState::Idle;
        track.last_synced_at = Some(Utc::now());
    }

    /// Log, flag `Error`, and fall back to the best-known roster.
    pub(crate) fn fetch_failed(&self, parent: &ParentId, err: &RemoteError) -> Vec<ChildRecord> {
        tracing::warn!(parent = %parent, error = %err, "remote fetch failed; serving cached roster");
        self.set_sync(
            parent,
            SyncState::Error {
                message: err.to_string(),
            },
        );
        self.best_known(parent)
    }

    /// Rewrite local records that belong to `email` (or carry no email and
    /// sit under another parent) onto `parent`. Returns `(previous parent,
    /// rewritten record)` for every record that changed parent.
    pub(crate) fn adopt_local(&self, parent: &ParentId, email: &str) -> Vec<(ParentId, ChildRecord)> {
        let st = self.lock();
        let mut all = self.local.load_children();
        let mut moved = Vec::new();
        let mut changed = false;
        for record in all.iter_mut() {
            if st.tombstones.contains(&record.id) {
                continue;
            }
            let orphan = record.parent_email.is_none() && &record.parent_id != parent;
            if !(record.email_matches(email) || orphan) {
                continue;
            }
            let from = record.parent_id.clone();
            if &from == parent && record.parent_email.as_deref() == Some(email) {
                continue;
            }
            record.parent_id = parent.clone();
            record.parent_email = Some(email.to_string());
            changed = true;
            if &from != parent {
                moved.push((from, record.clone()));
            }
        }
        if changed && !self.local.save_children(&all) {
            tracing::error!(parent = %parent, "failed to persist migrated records");
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use roster_core::MemoryStore;

    fn engine() -> (RosterEngine, Arc<MemoryRemote>, LocalRoster) {
        let remote = Arc::new(MemoryRemote::new());
        let local = LocalRoster::new(Arc::new(MemoryStore::new()));
        (RosterEngine::new(local.clone(), remote.clone()), remote, local)
    }

    #[test]
    fn read_path_works_without_a_runtime() {
        let (engine, _, local) = engine();
        let p1 = ParentId::from("p1");
        let ava = ChildRecord::new(p1.clone(), "Ava", 4, None);
        local.save_children(&[ava.clone()]);

        assert_eq!(engine.get_roster_sync(&p1, None), vec![ava]);
        assert_eq!(engine.status(&p1).cached, 1);
    }

    #[test]
    fn tombstones_load_on_construction() {
        let local = LocalRoster::new(Arc::new(MemoryStore::new()));
        let p1 = ParentId::from("p1");
        let gone = ChildRecord::new(p1.clone(), "Gone", 7, None);
        local.save_children(&[gone.clone()]);
        local.save_tombstones(&[gone.id.clone()].into_iter().collect());

        let engine = RosterEngine::new(local, Arc::new(MemoryRemote::new()));
        assert!(engine.is_tombstoned(&gone.id));
        assert!(engine.get_roster_sync(&p1, None).is_empty());
    }

    #[test]
    fn commit_refreshes_current_selection_from_remote() {
        let (engine, _, _) = engine();
        let p1 = ParentId::from("p1");
        let mut ava = ChildRecord::new(p1.clone(), "Ava", 4, None);
        engine.set_current(&ava);

        ava.name = "Ava Rose".into();
        engine.inner.commit_remote(&p1, vec![ava.clone()]);
        assert_eq!(engine.get_current().map(|c| c.name), Some("Ava Rose".to_string()));
    }

    #[test]
    fn first_record_becomes_current_when_nothing_selected() {
        let (engine, _, _) = engine();
        let p1 = ParentId::from("p1");
        let ava = ChildRecord::new(p1.clone(), "Ava", 4, None);
        let ben = ChildRecord::new(p1.clone(), "Ben", 8, None);
        engine.inner.commit_remote(&p1, vec![ava.clone(), ben]);
        assert_eq!(engine.get_current(), Some(ava));
    }

    #[test]
    fn cleared_selection_is_not_replaced_by_a_later_commit() {
        let (engine, _, _) = engine();
        let p1 = ParentId::from("p1");
        let ava = ChildRecord::new(p1.clone(), "Ava", 4, None);
        engine.set_current(&ava);
        engine.clear_current();

        engine.inner.commit_remote(&p1, vec![ava]);
        assert_eq!(engine.get_current(), None);
    }

    #[test]
    fn commit_evicts_moved_ids_from_other_parents() {
        let (engine, _, local) = engine();
        let old = ParentId::from("old");
        let new = ParentId::from("new");
        let mut mia = ChildRecord::new(old.clone(), "Mia", 6, Some("mum@x.io".into()));
        local.save_children(&[mia.clone()]);
        assert_eq!(engine.get_roster_sync(&old, None).len(), 1);

        mia.parent_id = new.clone();
        engine.inner.commit_remote(&new, vec![mia.clone()]);
        assert!(engine.get_roster_sync(&old, None).is_empty());
        assert_eq!(engine.get_roster_sync(&new, None), vec![mia]);
    }

    #[test]
    fn set_current_refuses_tombstoned_child() {
        let (engine, _, _) = engine();
        let p1 = ParentId::from("p1");
        let ava = ChildRecord::new(p1.clone(), "Ava", 4, None);
        engine.inner.tombstone(&p1, &ava.id);
        engine.set_current(&ava);
        assert_eq!(engine.get_current(), None);
    }

    #[test]
    fn adopt_local_moves_matching_and_orphaned_records() {
        let (engine, _, local) = engine();
        let target = ParentId::from("p2");
        let mine = ChildRecord::new(ParentId::from("p1"), "Mine", 5, Some("MUM@x.io".into()));
        let orphan = ChildRecord::new(ParentId::from("p3"), "Orphan", 5, None);
        let foreign = ChildRecord::new(ParentId::from("p4"), "Foreign", 5, Some("dad@x.io".into()));
        local.save_children(&[mine.clone(), orphan.clone(), foreign.clone()]);

        let moved = engine.inner.adopt_local(&target, "mum@x.io");
        let moved_ids: Vec<_> = moved.iter().map(|(_, r)| r.id.clone()).collect();
        assert_eq!(moved_ids, vec![mine.id.clone(), orphan.id.clone()]);

        let all = local.load_children();
        assert!(all.iter().filter(|r| r.id != foreign.id).all(|r| r.parent_id == target
            && r.parent_email.as_deref() == Some("mum@x.io")));
        assert_eq!(all.iter().find(|r| r.id == foreign.id), Some(&foreign));
    }
}
