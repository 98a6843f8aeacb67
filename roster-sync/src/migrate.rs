//! Forced migration of a parent's children onto a new parent id.
//!
//! Used when the same person signs in under a different account: every
//! record carrying their email, locally and remotely, ends up under the
//! target parent.

use roster_core::types::normalize_email;
use roster_core::{ChildRecord, ParentId};

use crate::engine::RosterEngine;
use crate::reconcile::records_of;
use crate::status::SyncState;

impl RosterEngine {
    /// Collect every child for `email` under `parent`, awaiting the remote.
    ///
    /// Local records matching `email`, and local records with no email that
    /// belong to another parent, are rewritten onto `parent` first. Remote
    /// documents for `email` are then relocated, and the target's remote
    /// collection is merged in.
    pub async fn force_migrate_by_email(&self, parent: &ParentId, email: &str) -> Vec<ChildRecord> {
        let email = match normalize_email(email) {
            Some(email) => email,
            None => {
                tracing::warn!(parent = %parent, "migration needs a non-empty email");
                return self.inner.best_known(parent);
            }
        };
        self.inner.set_sync(parent, SyncState::Syncing);

        let moved = self.inner.adopt_local(parent, &email);
        for (from, record) in &moved {
            if let Err(err) = self.inner.remote.put(parent, record).await {
                tracing::warn!(child = %record.id, error = %err, "failed to write migrated record remotely");
                continue;
            }
            if let Err(err) = self.inner.remote.delete(from, &record.id).await {
                tracing::warn!(child = %record.id, from = %from, error = %err, "failed to remove migrated original");
            }
        }

        let mut records = self.consolidate_by_email(parent, &email).await;
        let fetched = match self.inner.remote.list(parent).await {
            Ok(docs) => {
                records.extend(records_of(docs));
                true
            }
            Err(err) => {
                tracing::warn!(parent = %parent, error = %err, "remote fetch failed during migration");
                self.inner.set_sync(
                    parent,
                    SyncState::Error {
                        message: err.to_string(),
                    },
                );
                records.extend(moved.into_iter().map(|(_, record)| record));
                false
            }
        };

        let merged = self.inner.commit_remote(parent, records);
        if fetched {
            self.inner.mark_synced(parent);
        }
        tracing::info!(parent = %parent, count = merged.len(), "migration complete");
        merged
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use roster_core::{LocalRoster, MemoryStore};

    use crate::remote::{MemoryRemote, RemoteStore};
    use crate::RosterEngine;

    use super::*;

    #[tokio::test]
    async fn blank_email_is_a_no_op() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = RosterEngine::new(LocalRoster::new(Arc::new(MemoryStore::new())), remote.clone());
        let p1 = ParentId::from("p1");
        assert!(engine.force_migrate_by_email(&p1, "  ").await.is_empty());
        assert!(remote.list(&p1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_records_move_remotely_too() {
        let remote = Arc::new(MemoryRemote::new());
        let local = LocalRoster::new(Arc::new(MemoryStore::new()));
        let old = ParentId::from("old");
        let new = ParentId::from("new");
        let kid = ChildRecord::new(old.clone(), "Kid", 7, Some("mum@x.io".into()));
        local.save_children(&[kid.clone()]);
        remote.put(&old, &kid).await.unwrap();

        let engine = RosterEngine::new(local.clone(), remote.clone());
        let roster = engine.force_migrate_by_email(&new, "Mum@X.io").await;

        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, kid.id);
        assert_eq!(roster[0].parent_id, new);
        assert!(remote.snapshot(&old).is_empty());
        assert_eq!(remote.snapshot(&new).len(), 1);
        assert!(engine.status(&new).sync == SyncState::Idle);
    }

    #[tokio::test]
    async fn offline_migration_still_rewrites_locally() {
        let remote = Arc::new(MemoryRemote::new());
        let local = LocalRoster::new(Arc::new(MemoryStore::new()));
        let kid = ChildRecord::new(ParentId::from("old"), "Kid", 7, Some("mum@x.io".into()));
        local.save_children(&[kid.clone()]);
        remote.set_offline(true);

        let engine = RosterEngine::new(local.clone(), remote);
        let new = ParentId::from("new");
        let roster = engine.force_migrate_by_email(&new, "mum@x.io").await;

        assert_eq!(roster.len(), 1);
        assert!(engine.status(&new).sync.is_error());
        assert_eq!(local.load_children()[0].parent_id, new);
    }
}
