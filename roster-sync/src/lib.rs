//! # roster-sync
//!
//! Remote stores and the reconciliation engine.
//!
//! [`RosterEngine`] serves each parent's roster local-first, refreshes it
//! from a [`RemoteStore`] in the background, and pushes changes to
//! subscribers. [`MemoryRemote`] and [`DirRemote`] are the two bundled
//! stores.

pub mod broker;
pub mod dir_remote;
pub mod engine;
pub mod error;
mod migrate;
pub mod reconcile;
pub mod remote;
pub mod status;

pub use broker::{RosterCallback, Subscription};
pub use dir_remote::DirRemote;
pub use engine::RosterEngine;
pub use error::RemoteError;
pub use remote::{MemoryRemote, RemoteDoc, RemoteListener, RemoteStore, Snapshot};
pub use status::{ParentStatus, SyncState, WatchState};
