//! Roster core library: child record types, local storage, config, errors.
//!
//! - [`types`]: newtypes and the `ChildRecord` model
//! - [`normalize`]: raw JSON → `ChildRecord` at storage boundaries
//! - [`store`]: the `KeyValueStore` seam and its file/memory backends
//! - [`local`]: typed, error-absorbing local roster persistence
//! - [`config`]: `~/.roster/config.yaml`

pub mod config;
pub mod error;
pub mod local;
pub mod normalize;
pub mod store;
pub mod types;

pub use config::RosterConfig;
pub use error::{ConfigError, RecordError, StoreError};
pub use local::LocalRoster;
pub use normalize::normalize;
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use types::{AgeGroup, ChildId, ChildPatch, ChildRecord, ParentId};
