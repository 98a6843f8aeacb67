//! End-to-end behaviour of the reconciliation engine over the bundled
//! remote stores.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use roster_core::{AgeGroup, ChildId, ChildPatch, ChildRecord, FileStore, LocalRoster, MemoryStore, ParentId};
use roster_sync::{
    DirRemote, MemoryRemote, RemoteDoc, RemoteError, RemoteListener, RemoteStore, RosterCallback, RosterEngine,
    SyncState, WatchState,
};
use tempfile::TempDir;

type Seen = Arc<Mutex<Vec<Vec<ChildRecord>>>>;

fn p1() -> ParentId {
    ParentId::from("p1")
}

/// One installation: its own local store, sharing `remote` with others.
fn device(remote: &Arc<MemoryRemote>) -> (RosterEngine, LocalRoster) {
    let local = LocalRoster::new(Arc::new(MemoryStore::new()));
    (RosterEngine::new(local.clone(), remote.clone()), local)
}

fn recorder() -> (Seen, RosterCallback) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: RosterCallback = Arc::new(move |roster: Vec<ChildRecord>| sink.lock().unwrap().push(roster));
    (seen, callback)
}

fn names(roster: &[ChildRecord]) -> Vec<&str> {
    roster.iter().map(|r| r.name.as_str()).collect()
}

fn remote_names(remote: &MemoryRemote) -> Vec<String> {
    remote.snapshot(&p1()).into_iter().map(|doc| doc.record.name).collect()
}

/// Remote whose writes take `delay` to land.
struct SlowPuts {
    inner: Arc<MemoryRemote>,
    delay: Duration,
}

#[async_trait::async_trait]
impl RemoteStore for SlowPuts {
    async fn list(&self, parent: &ParentId) -> Result<Vec<RemoteDoc>, RemoteError> {
        self.inner.list(parent).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<RemoteDoc>, RemoteError> {
        self.inner.find_by_email(email).await
    }

    async fn put(&self, parent: &ParentId, record: &ChildRecord) -> Result<(), RemoteError> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(parent, record).await
    }

    async fn delete(&self, parent: &ParentId, child: &ChildId) -> Result<(), RemoteError> {
        self.inner.delete(parent, child).await
    }

    fn watch(&self, parent: &ParentId) -> Result<RemoteListener, RemoteError> {
        self.inner.watch(parent)
    }
}

/// Ava and Ben stored locally, an empty remote whose puts take 50ms.
fn healing_device() -> (RosterEngine, Arc<MemoryRemote>, ChildRecord) {
    let memory = Arc::new(MemoryRemote::new());
    let local = LocalRoster::new(Arc::new(MemoryStore::new()));
    let ava = ChildRecord::new(p1(), "Ava", 4, None);
    let ben = ChildRecord::new(p1(), "Ben", 7, None);
    local.save_children(&[ava, ben.clone()]);
    let slow = SlowPuts {
        inner: memory.clone(),
        delay: Duration::from_millis(50),
    };
    (RosterEngine::new(local, Arc::new(slow)), memory, ben)
}

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

// ---------------------------------------------------------------------------
// 1. Read path
// ---------------------------------------------------------------------------

#[test]
fn local_records_are_served_synchronously_without_io() {
    let dir = TempDir::new().expect("tempdir");
    let local = LocalRoster::new(Arc::new(FileStore::new(dir.path())));
    let ava = ChildRecord::new(p1(), "Ava", 4, None);
    let ben = ChildRecord::new(ParentId::from("p2"), "Ben", 9, None);
    local.save_children(&[ava.clone(), ben]);

    let remote = Arc::new(MemoryRemote::new());
    remote.set_offline(true);
    let engine = RosterEngine::new(local, remote);

    assert_eq!(engine.get_roster_sync(&p1(), None), vec![ava]);
}

#[tokio::test]
async fn emma_is_visible_and_current_right_after_add() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, _) = device(&remote);

    let emma = engine.add(&p1(), "Emma", 5, None).await;
    assert_eq!(emma.age_group, AgeGroup::ThreeToFive);
    assert_eq!(engine.get_roster_sync(&p1(), None), vec![emma.clone()]);
    assert_eq!(engine.get_current(), Some(emma.clone()));
    assert_eq!(remote.snapshot(&p1()).len(), 1);
}

// ---------------------------------------------------------------------------
// 2. Refresh and merge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn consecutive_refreshes_agree() {
    let remote = Arc::new(MemoryRemote::new());
    let (other, _) = device(&remote);
    other.add(&p1(), "Ava", 4, None).await;
    other.add(&p1(), "Ben", 7, None).await;

    let (engine, local) = device(&remote);
    local.save_children(&[ChildRecord::new(p1(), "Cy", 10, None)]);

    let first = engine.refresh_from_remote(&p1(), None).await;
    let second = engine.refresh_from_remote(&p1(), None).await;
    assert_eq!(names(&first), ["Ava", "Ben", "Cy"]);
    assert_eq!(first, second);
    assert_eq!(engine.status(&p1()).sync, SyncState::Idle);
    assert!(engine.status(&p1()).last_synced_at.is_some());
}

#[tokio::test]
async fn remote_wins_field_disagreements() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, local) = device(&remote);
    let mut ava = ChildRecord::new(p1(), "Ava", 4, None);
    local.save_children(&[ava.clone()]);

    ava.name = "Ava (edited elsewhere)".into();
    remote.put(&p1(), &ava).await.unwrap();

    let roster = engine.refresh_from_remote(&p1(), None).await;
    assert_eq!(names(&roster), ["Ava (edited elsewhere)"]);
    assert_eq!(local.load_children()[0].name, "Ava (edited elsewhere)");
}

#[tokio::test]
async fn empty_remote_is_healed_from_local_records() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, local) = device(&remote);
    let ava = ChildRecord::new(p1(), "Ava", 4, None);
    local.save_children(&[ava.clone()]);

    let roster = engine.refresh_from_remote(&p1(), None).await;
    assert_eq!(roster, vec![ava.clone()]);
    let pushed = remote.snapshot(&p1());
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].record.id, ava.id);
}

#[tokio::test(start_paused = true)]
async fn child_deleted_before_its_heal_write_is_skipped() {
    let (engine, memory, ben) = healing_device();
    let healing = tokio::spawn({
        let engine = engine.clone();
        async move {
            let parent = p1();
            engine.refresh_from_remote(&parent, None).await
        }
    });

    // Ava's write is in flight; Ben's has not started.
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.delete(&p1(), &ben.id).await;
    let roster = healing.await.expect("refresh task");

    assert_eq!(names(&roster), ["Ava"]);
    assert_eq!(remote_names(&memory), ["Ava"]);
}

#[tokio::test(start_paused = true)]
async fn child_deleted_during_its_heal_write_is_removed_again() {
    let (engine, memory, ben) = healing_device();
    let healing = tokio::spawn({
        let engine = engine.clone();
        async move {
            let parent = p1();
            engine.refresh_from_remote(&parent, None).await
        }
    });

    // Ben's write started at 50ms and lands at 100ms.
    tokio::time::sleep(Duration::from_millis(70)).await;
    engine.delete(&p1(), &ben.id).await;
    let roster = healing.await.expect("refresh task");

    assert_eq!(names(&roster), ["Ava"]);
    assert_eq!(remote_names(&memory), ["Ava"]);
    assert!(engine.get_roster_sync(&p1(), None).iter().all(|r| r.id != ben.id));
}

#[tokio::test(start_paused = true)]
async fn add_racing_a_delete_leaves_no_remote_document() {
    let memory = Arc::new(MemoryRemote::new());
    let slow = SlowPuts {
        inner: memory.clone(),
        delay: Duration::from_millis(50),
    };
    let engine = RosterEngine::new(LocalRoster::new(Arc::new(MemoryStore::new())), Arc::new(slow));

    let adding = tokio::spawn({
        let engine = engine.clone();
        async move {
            let parent = p1();
            engine.add(&parent, "Zoe", 3, None).await
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let zoe = engine.get_roster_sync(&p1(), None)[0].clone();
    engine.delete(&p1(), &zoe.id).await;
    adding.await.expect("add task");

    assert!(memory.snapshot(&p1()).is_empty());
    assert_eq!(engine.get_current(), None);
}

#[tokio::test]
async fn fetch_failure_keeps_cache_and_reports_error() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, _) = device(&remote);
    engine.add(&p1(), "Ava", 4, None).await;
    let before = engine.refresh_from_remote(&p1(), None).await;

    remote.set_offline(true);
    let during = engine.refresh_from_remote(&p1(), None).await;
    assert_eq!(during, before);
    let status = engine.status(&p1());
    assert!(status.sync.is_error(), "got {:?}", status.sync);
    assert_eq!(status.cached, 1);

    remote.set_offline(false);
    engine.refresh_from_remote(&p1(), None).await;
    assert_eq!(engine.status(&p1()).sync, SyncState::Idle);
}

// ---------------------------------------------------------------------------
// 3. Deletes and tombstones
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_snapshot_cannot_resurrect_liam() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, _) = device(&remote);
    let (seen, callback) = recorder();
    let _sub = engine.subscribe(&p1(), callback, None);

    let liam = engine.add(&p1(), "Liam", 7, None).await;
    assert!(engine.delete(&p1(), &liam.id).await);

    let stale = RemoteDoc {
        parent: p1(),
        record: liam.clone(),
        updated_at: Utc::now(),
    };
    let roster = engine.apply_remote_snapshot(&p1(), vec![stale]);
    assert!(roster.is_empty());
    assert!(engine.get_roster_sync(&p1(), None).is_empty());

    let last = seen.lock().unwrap().last().cloned().expect("notified");
    assert!(last.iter().all(|r| r.id != liam.id));
}

#[tokio::test]
async fn stale_remote_write_from_another_device_is_ignored() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, _) = device(&remote);
    let (seen, callback) = recorder();
    let _sub = engine.subscribe(&p1(), callback, None);

    let liam = engine.add(&p1(), "Liam", 7, None).await;
    engine.delete(&p1(), &liam.id).await;
    let notified_before = seen.lock().unwrap().len();

    // Another device that never saw the delete writes Liam back.
    remote.put(&p1(), &liam).await.unwrap();
    eventually("listener to process the stale write", || {
        seen.lock().unwrap().len() > notified_before
    })
    .await;

    assert!(seen.lock().unwrap()[notified_before..]
        .iter()
        .all(|roster| roster.iter().all(|r| r.id != liam.id)));
    assert!(engine.get_roster_sync(&p1(), None).is_empty());
}

#[tokio::test]
async fn delete_clears_current_selection() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, local) = device(&remote);
    let ava = engine.add(&p1(), "Ava", 4, None).await;
    assert_eq!(engine.get_current(), Some(ava.clone()));

    engine.delete(&p1(), &ava.id).await;
    assert_eq!(engine.get_current(), None);
    assert_eq!(local.load_current(), None);
    assert!(local.load_children().is_empty());
    assert!(remote.snapshot(&p1()).is_empty());
}

#[tokio::test]
async fn current_stays_cleared_after_deleting_it_and_refreshing() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, local) = device(&remote);
    let (_, callback) = recorder();
    let _sub = engine.subscribe(&p1(), callback, None);
    engine.add(&p1(), "Ava", 4, None).await;
    let ben = engine.add(&p1(), "Ben", 7, None).await;
    assert_eq!(engine.get_current(), Some(ben.clone()));

    engine.delete(&p1(), &ben.id).await;
    assert_eq!(names(&engine.get_roster_sync(&p1(), None)), ["Ava"]);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(engine.get_current(), None);
    assert_eq!(local.load_current(), None);
}

#[tokio::test]
async fn deleting_an_unknown_id_still_tombstones_it() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, local) = device(&remote);
    let ghost = ChildId::from("child_0_ghost");
    assert!(!engine.delete(&p1(), &ghost).await);
    assert!(engine.is_tombstoned(&ghost));
    assert!(local.load_tombstones().contains(&ghost));
}

#[tokio::test]
async fn tombstones_survive_engine_restart() {
    let dir = TempDir::new().expect("tempdir");
    let remote = Arc::new(MemoryRemote::new());
    let store = Arc::new(FileStore::new(dir.path()));

    let liam = {
        let engine = RosterEngine::new(LocalRoster::new(store.clone()), remote.clone());
        let liam = engine.add(&p1(), "Liam", 7, None).await;
        remote.set_offline(true);
        engine.delete(&p1(), &liam.id).await;
        liam
    };

    // The remote never heard about the delete.
    remote.set_offline(false);
    remote.put(&p1(), &liam).await.unwrap();

    let engine = RosterEngine::new(LocalRoster::new(store), remote.clone());
    assert!(engine.refresh_from_remote(&p1(), None).await.is_empty());
}

// ---------------------------------------------------------------------------
// 4. Updates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_patches_fields_and_recomputes_age_group() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, local) = device(&remote);
    let ava = engine.add(&p1(), "Ava", 5, None).await;

    let patch = ChildPatch {
        name: Some("Ava Rose".into()),
        age: Some(6),
        avatar: Some(Some("fox".into())),
        ..Default::default()
    };
    let updated = engine.update(&p1(), &ava.id, &patch).await.expect("updated");
    assert_eq!(updated.age_group, AgeGroup::SixToEight);
    assert_eq!(updated.created_at, ava.created_at);
    assert_eq!(engine.get_current(), Some(updated.clone()));
    assert_eq!(local.load_children(), vec![updated.clone()]);
    assert_eq!(remote.snapshot(&p1())[0].record, updated);
}

#[tokio::test]
async fn update_finds_record_created_on_another_device() {
    let remote = Arc::new(MemoryRemote::new());
    let (phone, _) = device(&remote);
    let (tablet, _) = device(&remote);
    let zoe = phone.add(&p1(), "Zoe", 8, None).await;

    let patch = ChildPatch {
        name: Some("Zoë".into()),
        ..Default::default()
    };
    let updated = tablet.update(&p1(), &zoe.id, &patch).await.expect("found after refresh");
    assert_eq!(updated.name, "Zoë");
    assert_eq!(remote.snapshot(&p1())[0].record.name, "Zoë");
}

#[tokio::test]
async fn update_of_unknown_or_deleted_child_is_none() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, _) = device(&remote);
    let patch = ChildPatch {
        age: Some(9),
        ..Default::default()
    };
    assert!(engine.update(&p1(), &ChildId::from("nope"), &patch).await.is_none());

    let ava = engine.add(&p1(), "Ava", 4, None).await;
    engine.delete(&p1(), &ava.id).await;
    assert!(engine.update(&p1(), &ava.id, &patch).await.is_none());
    assert!(remote.snapshot(&p1()).is_empty());
}

// ---------------------------------------------------------------------------
// 5. Email consolidation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn migration_pulls_children_across_parent_ids() {
    let remote = Arc::new(MemoryRemote::new());
    let old_account = ParentId::from("anon-123");
    let new_account = ParentId::from("user-456");

    let (phone, _) = device(&remote);
    let mia = phone.add(&old_account, "Mia", 6, Some("Mum@Example.com")).await;

    let (laptop, _) = device(&remote);
    let roster = laptop
        .force_migrate_by_email(&new_account, "mum@example.com")
        .await;

    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].id, mia.id);
    assert_eq!(roster[0].parent_id, new_account);
    assert!(remote.snapshot(&old_account).is_empty());
    assert_eq!(remote.snapshot(&new_account).len(), 1);
}

#[tokio::test]
async fn refresh_with_email_relocates_matching_documents() {
    let remote = Arc::new(MemoryRemote::new());
    let (phone, _) = device(&remote);
    phone.add(&ParentId::from("old"), "Mia", 6, Some("mum@x.io")).await;
    phone.add(&ParentId::from("old"), "Kai", 6, Some("dad@x.io")).await;

    let (laptop, _) = device(&remote);
    let roster = laptop.refresh_from_remote(&p1(), Some("MUM@x.io")).await;
    assert_eq!(names(&roster), ["Mia"]);
    assert_eq!(remote.snapshot(&ParentId::from("old")).len(), 1);
}

// ---------------------------------------------------------------------------
// 6. Subscriptions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscriber_gets_immediate_snapshot_and_changes() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, local) = device(&remote);
    local.save_children(&[ChildRecord::new(p1(), "Ava", 4, None)]);

    let (seen, callback) = recorder();
    let sub = engine.subscribe(&p1(), callback, None);
    assert_eq!(names(&seen.lock().unwrap()[0]), ["Ava"]);

    engine.add(&p1(), "Ben", 7, None).await;
    eventually("add to be broadcast", || {
        seen.lock()
            .unwrap()
            .iter()
            .any(|roster| names(roster) == ["Ava", "Ben"])
    })
    .await;
    sub.unsubscribe();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn immediate_snapshot_precedes_live_changes() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, local) = device(&remote);
    local.save_children(&[ChildRecord::new(p1(), "Ava", 4, None)]);

    let writer = {
        let remote = remote.clone();
        tokio::spawn(async move {
            for i in 0..200 {
                let kid = ChildRecord::new(p1(), format!("Kid {i}"), 6, None);
                let _ = remote.put(&p1(), &kid).await;
                tokio::task::yield_now().await;
            }
        })
    };

    let (seen, callback) = recorder();
    let _sub = engine.subscribe(&p1(), callback, None);
    assert_eq!(names(&seen.lock().unwrap()[0]), ["Ava"]);
    writer.await.expect("writer task");
}

#[tokio::test]
async fn callbacks_may_call_back_into_the_engine() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, _) = device(&remote);
    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    let reentrant = engine.clone();
    let callback: RosterCallback = Arc::new(move |roster: Vec<ChildRecord>| {
        let status = reentrant.status(&ParentId::from("p1"));
        sink.lock().unwrap().push((roster.len(), status.subscribers));
    });

    let _sub = engine.subscribe(&p1(), callback, None);
    engine.add(&p1(), "Ava", 4, None).await;
    assert!(observed.lock().unwrap().iter().any(|(len, subs)| *len == 1 && *subs == 1));
}

#[tokio::test]
async fn listener_detaches_when_last_subscriber_leaves() {
    let remote = Arc::new(MemoryRemote::new());
    let (engine, _) = device(&remote);

    let (_, first_cb) = recorder();
    let (_, second_cb) = recorder();
    let first = engine.subscribe(&p1(), first_cb, None);
    let second = engine.subscribe(&p1(), second_cb, None);
    assert_eq!(remote.watcher_count(&p1()), 1);
    assert_eq!(engine.status(&p1()).watch, WatchState::Watching);
    assert_eq!(engine.status(&p1()).subscribers, 2);

    drop(first);
    assert_eq!(engine.status(&p1()).watch, WatchState::Watching);

    second.unsubscribe();
    assert_eq!(engine.status(&p1()).watch, WatchState::Unwatched);
    assert_eq!(engine.status(&p1()).subscribers, 0);
    eventually("remote watch to be released", || remote.watcher_count(&p1()) == 0).await;
}

#[tokio::test]
async fn subscribers_on_a_shared_directory_see_each_others_writes() {
    let dir = TempDir::new().expect("tempdir");
    let remote: Arc<dyn RemoteStore> = Arc::new(DirRemote::new(dir.path()));
    let phone = RosterEngine::new(LocalRoster::new(Arc::new(MemoryStore::new())), remote.clone());
    let tablet = RosterEngine::new(LocalRoster::new(Arc::new(MemoryStore::new())), remote);

    let (seen, callback) = recorder();
    let _sub = tablet.subscribe(&p1(), callback, None);
    let ava = phone.add(&p1(), "Ava", 4, None).await;

    eventually("tablet to see the phone's add", || {
        seen.lock()
            .unwrap()
            .iter()
            .any(|roster| roster.iter().any(|r| r.id == ava.id))
    })
    .await;
}
