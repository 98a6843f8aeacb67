//! Directory-backed remote store.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   parents/
//!     <parentId>/
//!       children/
//!         <childId>.json   (record fields + "updatedAt")
//! ```
//!
//! Several devices pointing at one shared directory see each other's writes;
//! change subscriptions come from filesystem notifications. Blocking I/O runs
//! on `spawn_blocking`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use roster_core::{normalize, ChildId, ChildRecord, ParentId};

use crate::error::{io_err, RemoteError};
use crate::remote::{sort_docs, RemoteDoc, RemoteListener, RemoteStore};

#[derive(Debug, Clone)]
pub struct DirRemote {
    root: PathBuf,
}

impl DirRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/parents`
    pub fn parents_dir(&self) -> PathBuf {
        self.root.join("parents")
    }

    /// `<root>/parents/<parent>/children`
    pub fn children_dir(&self, parent: &ParentId) -> Result<PathBuf, RemoteError> {
        Ok(self
            .parents_dir()
            .join(segment(&parent.0)?)
            .join("children"))
    }

    /// `<root>/parents/<parent>/children/<child>.json`
    pub fn doc_path(&self, parent: &ParentId, child: &ChildId) -> Result<PathBuf, RemoteError> {
        Ok(self
            .children_dir(parent)?
            .join(format!("{}.json", segment(&child.0)?)))
    }
}

#[async_trait]
impl RemoteStore for DirRemote {
    async fn list(&self, parent: &ParentId) -> Result<Vec<RemoteDoc>, RemoteError> {
        let dir = self.children_dir(parent)?;
        let parent = parent.clone();
        blocking(move || list_dir(&dir, &parent)).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<RemoteDoc>, RemoteError> {
        let this = self.clone();
        let email = email.to_string();
        blocking(move || {
            let mut found = Vec::new();
            for parent in this.parent_ids()? {
                let dir = this.children_dir(&parent)?;
                found.extend(
                    list_dir(&dir, &parent)?
                        .into_iter()
                        .filter(|doc| doc.record.email_matches(&email)),
                );
            }
            sort_docs(&mut found);
            Ok(found)
        })
        .await
    }

    async fn put(&self, parent: &ParentId, record: &ChildRecord) -> Result<(), RemoteError> {
        let path = self.doc_path(parent, &record.id)?;
        let record = record.clone();
        blocking(move || merge_write(&path, &record)).await
    }

    async fn delete(&self, parent: &ParentId, child: &ChildId) -> Result<(), RemoteError> {
        let path = self.doc_path(parent, child)?;
        blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(path, err)),
        })
        .await
    }

    fn watch(&self, parent: &ParentId) -> Result<RemoteListener, RemoteError> {
        let dir = self.children_dir(parent)?;
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let watched = dir.clone();
        let parent = parent.clone();
        let mut watcher = recommended_watcher(move |event: notify::Result<Event>| {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(error = %err, "remote directory watch error");
                    return;
                }
            };
            if !is_relevant_event(&event) {
                return;
            }
            match list_dir(&watched, &parent) {
                Ok(snapshot) => {
                    let _ = tx.send(snapshot);
                }
                Err(err) => {
                    tracing::warn!(parent = %parent, error = %err, "failed to read remote snapshot");
                }
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::debug!(path = %dir.display(), "watching remote collection");
        Ok(RemoteListener::with_source(rx, watcher))
    }
}

impl DirRemote {
    fn parent_ids(&self) -> Result<Vec<ParentId>, RemoteError> {
        let dir = self.parents_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(io_err(&dir, err)),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if segment(&name).is_err() {
                tracing::debug!(entry = %name, "skipping non-parent directory in remote");
                continue;
            }
            ids.push(ParentId::from(name));
        }
        ids.sort();
        Ok(ids)
    }
}

/// Reject ids that would escape or alias the collection layout.
fn segment(id: &str) -> Result<&str, RemoteError> {
    if id.is_empty()
        || id.starts_with('.')
        || id.contains(|c: char| c == '/' || c == '\\' || c.is_control())
    {
        return Err(RemoteError::InvalidSegment(id.to_string()));
    }
    Ok(id)
}

async fn blocking<T, F>(f: F) -> Result<T, RemoteError>
where
    F: FnOnce() -> Result<T, RemoteError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| RemoteError::Unavailable(format!("remote I/O task failed: {err}")))?
}

fn list_dir(dir: &Path, parent: &ParentId) -> Result<Vec<RemoteDoc>, RemoteError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(io_err(dir, err)),
    };

    let mut docs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            // Deleted between read_dir and read.
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&path, err)),
        };
        match parse_doc(&contents, parent) {
            Ok(doc) => docs.push(doc),
            Err(reason) => {
                tracing::warn!(path = %path.display(), %reason, "skipping malformed remote document");
            }
        }
    }
    sort_docs(&mut docs);
    Ok(docs)
}

fn parse_doc(contents: &str, parent: &ParentId) -> Result<RemoteDoc, String> {
    let raw: Value = serde_json::from_str(contents).map_err(|e| e.to_string())?;
    let record = normalize(&raw).map_err(|e| e.to_string())?;
    let updated_at = raw
        .get("updatedAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(record.created_at);
    Ok(RemoteDoc {
        parent: parent.clone(),
        record,
        updated_at,
    })
}

/// Overlay `record` onto whatever is stored, keeping unknown fields.
fn merge_write(path: &Path, record: &ChildRecord) -> Result<(), RemoteError> {
    let mut doc = match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        Err(err) if err.kind() == ErrorKind::NotFound => Map::new(),
        Err(err) => return Err(io_err(path, err)),
    };

    if let Value::Object(fields) = serde_json::to_value(record)? {
        doc.extend(fields);
    }
    // Optional fields are skipped when None; clear them explicitly.
    if record.parent_email.is_none() {
        doc.insert("parentEmail".to_string(), Value::Null);
    }
    if record.avatar.is_none() {
        doc.insert("avatar".to_string(), Value::Null);
    }
    doc.insert(
        "updatedAt".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let json = serde_json::to_string_pretty(&Value::Object(doc))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

fn is_relevant_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
}
