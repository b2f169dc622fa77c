//! Redb-backed persistence for managed channels.
//!
//! # Schema
//!
//! ```text
//! MANAGED_CHANNELS: "tenant_id\0resource_id" -> StoredChannel (serde_json)
//! ```
//!
//! Stored documents are flat: the channel type is a tag and the child-only
//! fields are nullable. [`StoredChannel`] converts to and from the
//! [`ManagedChannel`] sum type explicitly.

use crate::metrics;
use crate::state::{
    ChannelConfig, ChannelKey, ChannelKind, IMPORT_CHANNEL_NUMBER, ManagedChannel, TenantId,
};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Redb table for managed channel documents.
const MANAGED_CHANNELS: TableDefinition<&str, &[u8]> = TableDefinition::new("managed_channels");

/// Errors from channel persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("channel {0} is not managed")]
    NotFound(ChannelKey),

    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Stored channel type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoredChannelType {
    Spawner,
    Child,
    Import,
}

/// The sibling fields of a document, read without validating the rest.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SiblingFields {
    spawner: Option<(u64, u64)>,
    channel_number: Option<u32>,
}

/// Serialized channel document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChannel {
    pub tenant_id: u64,
    pub resource_id: u64,
    pub template: String,
    pub channel_type: StoredChannelType,
    /// `[tenant_id, resource_id]` of the originating spawner (children only).
    pub spawner: Option<(u64, u64)>,
    pub channel_number: Option<u32>,
    /// Unix seconds (children only).
    pub hold_until: Option<f64>,
}

impl StoredChannel {
    /// Convert a ManagedChannel to StoredChannel.
    pub fn from_channel(channel: &ManagedChannel) -> Self {
        let (channel_type, spawner, hold_until) = match &channel.config.kind {
            ChannelKind::Spawner => (StoredChannelType::Spawner, None, None),
            ChannelKind::Child {
                spawner,
                hold_until,
                ..
            } => (
                StoredChannelType::Child,
                Some((spawner.tenant_id, spawner.resource_id)),
                hold_until.map(to_unix_seconds),
            ),
            ChannelKind::Import => (StoredChannelType::Import, None, None),
        };

        Self {
            tenant_id: channel.tenant_id,
            resource_id: channel.resource_id,
            template: channel.config.template.clone(),
            channel_type,
            spawner,
            channel_number: channel.config.channel_number(),
            hold_until,
        }
    }

    /// Convert StoredChannel to ManagedChannel.
    pub fn to_channel(&self) -> Result<ManagedChannel, StoreError> {
        let kind = match self.channel_type {
            StoredChannelType::Spawner => ChannelKind::Spawner,
            StoredChannelType::Import => ChannelKind::Import,
            StoredChannelType::Child => {
                let (Some((tenant_id, resource_id)), Some(number)) =
                    (self.spawner, self.channel_number)
                else {
                    return Err(self.corrupt("child without spawner or channel_number"));
                };
                let hold_until = match self.hold_until {
                    Some(secs) => Some(
                        from_unix_seconds(secs)
                            .ok_or_else(|| self.corrupt("hold_until out of range"))?,
                    ),
                    None => None,
                };
                ChannelKind::Child {
                    spawner: ChannelKey::new(tenant_id, resource_id),
                    number,
                    hold_until,
                }
            }
        };

        Ok(ManagedChannel::new(
            self.tenant_id,
            self.resource_id,
            ChannelConfig {
                template: self.template.clone(),
                kind,
            },
        ))
    }

    fn corrupt(&self, reason: &str) -> StoreError {
        StoreError::Corrupt {
            key: ChannelKey::new(self.tenant_id, self.resource_id).to_string(),
            reason: reason.to_string(),
        }
    }
}

fn to_unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}

/// Redb-backed managed channel store.
///
/// Every method runs in its own transaction, so the store is safe to share
/// across tasks. Callers serialize transitions through the lock table; the
/// store itself offers no cross-record transactions.
pub struct ChannelStore {
    db: Arc<Database>,
}

impl ChannelStore {
    /// Create a new ChannelStore using an existing Redb database.
    pub fn new(db: Arc<Database>) -> Result<Self, StoreError> {
        // Ensure the table exists so read transactions never miss it
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(MANAGED_CHANNELS)?;
        }
        write_txn.commit()?;

        info!("Channel store initialized");
        Ok(Self { db })
    }

    /// Insert or replace the record for a channel's identity.
    pub fn insert(&self, channel: &ManagedChannel) -> Result<(), StoreError> {
        let key = Self::storage_key(channel.key());
        let value = serde_json::to_vec(&StoredChannel::from_channel(channel))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(MANAGED_CHANNELS)?;
            // Replace, never merge: drop whatever was stored for this identity.
            table.remove(key.as_str())?;
            table.insert(key.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;

        debug!(
            channel = %channel.key(),
            channel_type = channel.config.kind.label(),
            "Saved managed channel"
        );
        Ok(())
    }

    /// Remove the record for a channel's identity.
    pub fn remove(&self, channel: &ManagedChannel) -> Result<(), StoreError> {
        self.remove_key(channel.key())
    }

    /// Remove the record stored under `key`.
    pub fn remove_key(&self, key: ChannelKey) -> Result<(), StoreError> {
        let storage_key = Self::storage_key(key);
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(MANAGED_CHANNELS)?;
            table.remove(storage_key.as_str())?.is_some()
        };
        write_txn.commit()?;

        if !removed {
            return Err(StoreError::NotFound(key));
        }
        debug!(channel = %key, "Removed managed channel");
        Ok(())
    }

    /// Load the record for `key`.
    pub fn get(&self, key: ChannelKey) -> Result<ManagedChannel, StoreError> {
        let storage_key = Self::storage_key(key);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MANAGED_CHANNELS)?;
        let Some(value) = table.get(storage_key.as_str())? else {
            return Err(StoreError::NotFound(key));
        };
        Self::decode(&storage_key, value.value())
    }

    /// All children whose spawner reference names `spawner`, ascending by channel number.
    pub fn children_of(&self, spawner: &ManagedChannel) -> Result<Vec<ManagedChannel>, StoreError> {
        let spawner_key = spawner.key();
        let mut children: Vec<ManagedChannel> = self
            .tenant_records(spawner.tenant_id)?
            .into_iter()
            .filter(|channel| channel.config.spawner_key() == Some(spawner_key))
            .collect();
        children.sort_by_key(|channel| channel.config.channel_number());
        Ok(children)
    }

    /// Snapshot every record.
    ///
    /// The raw documents are read in a single transaction; decoding happens as
    /// the scan is iterated. Later writes do not affect an existing scan.
    pub fn scan_all(&self) -> Result<ChannelScan, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MANAGED_CHANNELS)?;

        let mut entries = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            entries.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(ChannelScan {
            entries: entries.into_iter(),
        })
    }

    /// Channel numbers in use under `spawner`.
    ///
    /// Unlike [`children_of`](Self::children_of), this also counts records
    /// that no longer decode but still name `spawner` and a number, so a
    /// damaged child's number is never handed out twice.
    pub fn taken_numbers(&self, spawner: &ManagedChannel) -> Result<Vec<u32>, StoreError> {
        let spawner_key = spawner.key();
        let mut numbers = Vec::new();
        for (key, bytes) in self.tenant_entries(spawner.tenant_id)? {
            let (owner, number) = match Self::decode_or_skip(&key, &bytes) {
                Some(channel) => (channel.config.spawner_key(), channel.config.channel_number()),
                None => match serde_json::from_slice::<SiblingFields>(&bytes) {
                    Ok(fields) => (
                        fields.spawner.map(|(t, r)| ChannelKey::new(t, r)),
                        fields.channel_number,
                    ),
                    Err(_) => continue,
                },
            };
            if owner == Some(spawner_key)
                && let Some(number) = number
            {
                numbers.push(number);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    fn tenant_records(&self, tenant_id: TenantId) -> Result<Vec<ManagedChannel>, StoreError> {
        Ok(self
            .tenant_entries(tenant_id)?
            .iter()
            .filter_map(|(key, bytes)| Self::decode_or_skip(key, bytes))
            .collect())
    }

    /// Raw documents of one tenant, read in a single transaction.
    fn tenant_entries(&self, tenant_id: TenantId) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let prefix = format!("{tenant_id}\0");
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MANAGED_CHANNELS)?;

        let mut entries = Vec::new();
        for item in table.range(prefix.as_str()..)? {
            let (key, value) = item?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            entries.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(entries)
    }

    /// Decode a document, logging and counting it when it is damaged.
    fn decode_or_skip(key: &str, bytes: &[u8]) -> Option<ManagedChannel> {
        match Self::decode(key, bytes) {
            Ok(channel) => Some(channel),
            Err(e) => {
                metrics::record_undecodable();
                warn!(key = %key.escape_debug(), error = %e, "Skipping undecodable channel");
                None
            }
        }
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<ManagedChannel, StoreError> {
        let stored: StoredChannel = serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
            key: key.escape_debug().to_string(),
            reason: e.to_string(),
        })?;
        stored.to_channel()
    }

    fn storage_key(key: ChannelKey) -> String {
        format!("{}\0{}", key.tenant_id, key.resource_id)
    }
}

/// Snapshot iterator returned by [`ChannelStore::scan_all`].
///
/// Clone it to restart from the beginning of the same snapshot.
#[derive(Debug, Clone)]
pub struct ChannelScan {
    entries: std::vec::IntoIter<(String, Vec<u8>)>,
}

impl Iterator for ChannelScan {
    type Item = ManagedChannel;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries
            .by_ref()
            .find_map(|(key, bytes)| ChannelStore::decode_or_skip(&key, &bytes))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.entries.len()))
    }
}
