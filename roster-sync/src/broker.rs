//! Subscriber registry and live-listener ownership per parent.
//!
//! The broker itself never calls back: the engine collects callbacks under
//! its lock with [`Broker::callbacks`] and invokes them after releasing it.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;

use roster_core::{ChildRecord, ParentId};

use crate::engine::Inner;

/// Receives a fresh clone of the roster on every change.
pub type RosterCallback = Arc<dyn Fn(Vec<ChildRecord>) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Broker {
    next_id: u64,
    parents: HashMap<ParentId, Subscribers>,
}

#[derive(Default)]
struct Subscribers {
    callbacks: Vec<(u64, RosterCallback)>,
    listener: Option<JoinHandle<()>>,
}

impl Broker {
    /// Register `callback`; returns its id and whether `parent` still has no
    /// listener attached.
    pub(crate) fn register(&mut self, parent: &ParentId, callback: RosterCallback) -> (u64, bool) {
        self.next_id += 1;
        let id = self.next_id;
        let subs = self.parents.entry(parent.clone()).or_default();
        subs.callbacks.push((id, callback));
        (id, subs.listener.is_none())
    }

    /// Hand the listener task for `parent` to the broker. Gives it back when
    /// the parent already has one or nobody is subscribed any more; the
    /// caller must abort it.
    pub(crate) fn attach(&mut self, parent: &ParentId, task: JoinHandle<()>) -> Option<JoinHandle<()>> {
        match self.parents.get_mut(parent) {
            Some(subs) if !subs.callbacks.is_empty() && subs.listener.is_none() => {
                subs.listener = Some(task);
                None
            }
            _ => Some(task),
        }
    }

    /// Remove one callback. When it was the parent's last, the listener task
    /// is returned for the caller to abort.
    pub(crate) fn remove(&mut self, parent: &ParentId, id: u64) -> Option<JoinHandle<()>> {
        let subs = self.parents.get_mut(parent)?;
        subs.callbacks.retain(|(cb_id, _)| *cb_id != id);
        if !subs.callbacks.is_empty() {
            return None;
        }
        self.parents.remove(parent).and_then(|mut subs| subs.listener.take())
    }

    /// Callbacks for `parent` in registration order.
    pub(crate) fn callbacks(&self, parent: &ParentId) -> Vec<RosterCallback> {
        self.parents
            .get(parent)
            .map(|subs| subs.callbacks.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn subscriber_count(&self, parent: &ParentId) -> usize {
        self.parents.get(parent).map_or(0, |subs| subs.callbacks.len())
    }

    pub(crate) fn is_watching(&self, parent: &ParentId) -> bool {
        self.parents
            .get(parent)
            .is_some_and(|subs| subs.listener.is_some())
    }

    pub(crate) fn parents(&self) -> impl Iterator<Item = &ParentId> {
        self.parents.keys()
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        for subs in self.parents.values_mut() {
            if let Some(task) = subs.listener.take() {
                task.abort();
            }
        }
    }
}

/// Invoke every callback with its own clone of `roster`.
pub(crate) fn notify_all(callbacks: &[RosterCallback], roster: &[ChildRecord]) {
    for callback in callbacks {
        callback(roster.to_vec());
    }
}

/// Handle returned by `RosterEngine::subscribe`.
///
/// Dropping it unsubscribes; the last subscription for a parent also
/// detaches the remote listener.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    engine: Weak<Inner>,
    parent: ParentId,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(engine: Weak<Inner>, parent: ParentId, id: u64) -> Self {
        Self { engine, parent, id }
    }

    pub fn parent(&self) -> &ParentId {
        &self.parent
    }

    pub fn unsubscribe(self) {}
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("parent", &self.parent)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.engine.upgrade() {
            inner.unsubscribe(&self.parent, self.id);
        }
    }
}
