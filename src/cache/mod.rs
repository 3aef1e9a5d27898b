//! Versioned asset cache for offline support.
//!
//! This module provides the worker's asset cache:
//! - One named generation per deploy, populated from a fixed manifest
//! - Atomic install: a manifest that cannot be fully fetched leaves nothing behind
//! - Activation purges every generation except the current one
//! - Opportunistic inserts from successful network fetches

mod entry;
mod storage;
mod versioned;

pub use storage::{CacheStorage, SqliteStorage};
pub use versioned::{Lifecycle, VersionedCache};
