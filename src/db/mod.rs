//! Database module for persistent storage.
//!
//! Provides Redb-backed persistence for managed channel records.

mod channels;

pub use channels::{ChannelStore, StoreError, StoredChannel};

use redb::Database;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Open (or create) the Redb database at `path` and its channel store.
pub fn open_store(path: &str) -> Result<ChannelStore, StoreError> {
    // Create parent directory if it doesn't exist
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
    }

    let db = Database::create(path)?;
    info!(path = %path, "Database opened");
    ChannelStore::new(Arc::new(db))
}
