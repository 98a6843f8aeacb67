//! The remote document store seam.
//!
//! Documents live at `parents/{parentId}/children/{childId}`. The engine only
//! talks to the store through [`RemoteStore`]; [`MemoryRemote`] is the
//! in-process implementation, [`crate::dir_remote::DirRemote`] the shared
//! directory one.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use roster_core::{ChildId, ChildRecord, ParentId};

use crate::error::RemoteError;

/// One remote document plus where it lives and when the server last wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDoc {
    /// The `{parentId}` segment of the document path.
    pub parent: ParentId,
    pub record: ChildRecord,
    pub updated_at: DateTime<Utc>,
}

/// Full contents of one parent's collection after a change.
pub type Snapshot = Vec<RemoteDoc>;

/// A live change subscription on one parent's collection.
///
/// Dropping the listener releases whatever the store keeps open for it.
pub struct RemoteListener {
    snapshots: mpsc::UnboundedReceiver<Snapshot>,
    _source: Option<Box<dyn std::any::Any + Send>>,
}

impl RemoteListener {
    pub fn new(snapshots: mpsc::UnboundedReceiver<Snapshot>) -> Self {
        Self {
            snapshots,
            _source: None,
        }
    }

    /// Keep `source` (e.g. a filesystem watcher) alive as long as the listener.
    pub fn with_source(
        snapshots: mpsc::UnboundedReceiver<Snapshot>,
        source: impl std::any::Any + Send,
    ) -> Self {
        Self {
            snapshots,
            _source: Some(Box::new(source)),
        }
    }

    /// Next snapshot, or `None` once the store stops sending.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.snapshots.recv().await
    }
}

/// Per-document CRUD, a cross-parent email scan, and live subscriptions.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every document under `parents/{parent}/children`, ordered by
    /// `createdAt` then id.
    async fn list(&self, parent: &ParentId) -> Result<Vec<RemoteDoc>, RemoteError>;

    /// Every document in the store, any parent, whose `parentEmail` matches
    /// `email` case-insensitively.
    async fn find_by_email(&self, email: &str) -> Result<Vec<RemoteDoc>, RemoteError>;

    /// Merge-write `record` at `parents/{parent}/children/{record.id}`,
    /// stamping a fresh server update time.
    async fn put(&self, parent: &ParentId, record: &ChildRecord) -> Result<(), RemoteError>;

    /// Delete one document. Deleting a missing document is not an error.
    async fn delete(&self, parent: &ParentId, child: &ChildId) -> Result<(), RemoteError>;

    /// Attach a live listener to `parent`'s collection.
    fn watch(&self, parent: &ParentId) -> Result<RemoteListener, RemoteError>;
}

/// Sort documents the way [`RemoteStore::list`] promises.
pub(crate) fn sort_docs(docs: &mut [RemoteDoc]) {
    docs.sort_by(|a, b| {
        a.record
            .created_at
            .cmp(&b.record.created_at)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
}

// ---------------------------------------------------------------------------
// MemoryRemote
// ---------------------------------------------------------------------------

/// In-process document store with push notifications to watchers.
///
/// `set_offline(true)` makes every request fail with
/// [`RemoteError::Unavailable`]; listeners stay attached, as a real SDK's
/// would while the network is down.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    docs: BTreeMap<ParentId, BTreeMap<ChildId, RemoteDoc>>,
    watchers: HashMap<ParentId, Vec<mpsc::UnboundedSender<Snapshot>>>,
    offline: bool,
}

impl MemoryInner {
    fn snapshot(&self, parent: &ParentId) -> Snapshot {
        let mut docs: Vec<RemoteDoc> = self
            .docs
            .get(parent)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        sort_docs(&mut docs);
        docs
    }

    fn broadcast(&mut self, parent: &ParentId) {
        let snapshot = self.snapshot(parent);
        if let Some(senders) = self.watchers.get_mut(parent) {
            senders.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline {
            Err(RemoteError::Unavailable("memory remote is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_offline(&self, offline: bool) {
        self.inner().offline = offline;
    }

    /// Current documents for `parent`, bypassing the offline switch.
    pub fn snapshot(&self, parent: &ParentId) -> Snapshot {
        self.inner().snapshot(parent)
    }

    /// Number of live listeners on `parent`.
    pub fn watcher_count(&self, parent: &ParentId) -> usize {
        let mut inner = self.inner();
        match inner.watchers.get_mut(parent) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn list(&self, parent: &ParentId) -> Result<Vec<RemoteDoc>, RemoteError> {
        let inner = self.inner();
        inner.check_online()?;
        Ok(inner.snapshot(parent))
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<RemoteDoc>, RemoteError> {
        let inner = self.inner();
        inner.check_online()?;
        let mut found: Vec<RemoteDoc> = inner
            .docs
            .values()
            .flat_map(|m| m.values())
            .filter(|doc| doc.record.email_matches(email))
            .cloned()
            .collect();
        sort_docs(&mut found);
        Ok(found)
    }

    async fn put(&self, parent: &ParentId, record: &ChildRecord) -> Result<(), RemoteError> {
        let mut inner = self.inner();
        inner.check_online()?;
        let doc = RemoteDoc {
            parent: parent.clone(),
            record: record.clone(),
            updated_at: Utc::now(),
        };
        inner
            .docs
            .entry(parent.clone())
            .or_default()
            .insert(record.id.clone(), doc);
        inner.broadcast(parent);
        Ok(())
    }

    async fn delete(&self, parent: &ParentId, child: &ChildId) -> Result<(), RemoteError> {
        let mut inner = self.inner();
        inner.check_online()?;
        let removed = inner
            .docs
            .get_mut(parent)
            .and_then(|m| m.remove(child))
            .is_some();
        if removed {
            inner.broadcast(parent);
        }
        Ok(())
    }

    fn watch(&self, parent: &ParentId) -> Result<RemoteListener, RemoteError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner()
            .watchers
            .entry(parent.clone())
            .or_default()
            .push(tx);
        Ok(RemoteListener::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(parent: &str, name: &str, email: Option<&str>) -> ChildRecord {
        ChildRecord::new(ParentId::from(parent), name, 7, email.map(str::to_string))
    }

    #[tokio::test]
    async fn put_list_delete() {
        let remote = MemoryRemote::new();
        let p1 = ParentId::from("p1");
        let a = rec("p1", "Ava", None);
        remote.put(&p1, &a).await.unwrap();
        let docs = remote.list(&p1).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].record, a);
        remote.delete(&p1, &a.id).await.unwrap();
        assert!(remote.list(&p1).await.unwrap().is_empty());
        remote.delete(&p1, &a.id).await.expect("deleting twice is fine");
    }

    #[tokio::test]
    async fn find_by_email_spans_parents() {
        let remote = MemoryRemote::new();
        remote.put(&ParentId::from("p1"), &rec("p1", "Ava", Some("a@x.io"))).await.unwrap();
        remote.put(&ParentId::from("p2"), &rec("p2", "Ben", Some("A@X.IO"))).await.unwrap();
        remote.put(&ParentId::from("p3"), &rec("p3", "Cy", None)).await.unwrap();
        let found = remote.find_by_email("a@x.io").await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn offline_requests_fail() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        let err = remote.list(&ParentId::from("p1")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_)));
    }

    #[tokio::test]
    async fn watchers_receive_snapshots_and_are_pruned_on_drop() {
        let remote = MemoryRemote::new();
        let p1 = ParentId::from("p1");
        let mut listener = remote.watch(&p1).unwrap();
        assert_eq!(remote.watcher_count(&p1), 1);

        let a = rec("p1", "Ava", None);
        remote.put(&p1, &a).await.unwrap();
        let snapshot = listener.next().await.expect("snapshot");
        assert_eq!(snapshot.len(), 1);

        drop(listener);
        assert_eq!(remote.watcher_count(&p1), 0);
    }
}
