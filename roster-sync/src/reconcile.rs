//! Pure merge rules between remote documents and local records.

use std::collections::{BTreeSet, HashSet};

use roster_core::{ChildId, ChildRecord};

use crate::remote::RemoteDoc;

/// `remote ∪ local-only − tombstones`.
///
/// Remote records come first and win on id collisions; local records the
/// remote has never seen are appended in their stored order.
pub fn merge(
    remote: Vec<ChildRecord>,
    local: Vec<ChildRecord>,
    tombstones: &BTreeSet<ChildId>,
) -> Vec<ChildRecord> {
    let mut seen = HashSet::new();
    remote
        .into_iter()
        .chain(local)
        .filter(|r| !tombstones.contains(&r.id) && seen.insert(r.id.clone()))
        .collect()
}

/// Records from remote documents. The document path decides `parent_id`.
pub fn records_of(docs: Vec<RemoteDoc>) -> Vec<ChildRecord> {
    docs.into_iter()
        .map(|doc| {
            let mut record = doc.record;
            record.parent_id = doc.parent;
            record
        })
        .collect()
}
