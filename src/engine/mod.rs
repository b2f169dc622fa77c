//! Channel lifecycle engine.
//!
//! [`LifecycleEngine`] owns the store, the lock table and the platform client.
//! It is built once at startup and shared by `Arc` between the event intake
//! and the reconciliation loop. Every transition for a channel runs while
//! holding that channel's lock and re-reads the record after acquiring it.
//!
//! - [`spawn`]: child creation from an occupied spawner
//! - [`occupancy`]: join/leave handling, rename and expiry
//! - [`commands`]: operator operations (templates, holds, import, orphan)
//! - [`reconcile`]: periodic self-healing sweep

mod commands;
mod occupancy;
mod reconcile;
mod spawn;


pub use commands::parse_hold_duration;
pub use reconcile::spawn_reconciler;

use crate::config::NamingConfig;
use crate::db::ChannelStore;
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::platform::{PlatformError, VoicePlatform};
use crate::state::{ChannelKey, LockManager, ManagedChannel, ResourceId};
use std::sync::Arc;
use tracing::info;

/// Why a record was removed without an operator asking for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    TenantGone,
    ResourceGone,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenantGone => "tenant_gone",
            Self::ResourceGone => "resource_gone",
        }
    }
}

/// Outcome of a single transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A child was created and the spawner's occupants moved into it.
    Spawned {
        child: ResourceId,
        number: u32,
        name: String,
    },
    Renamed {
        name: String,
    },
    /// Nothing needed to change.
    Unchanged,
    /// Empty child kept alive by an active hold.
    Held,
    /// Empty expired child deleted and its record removed.
    Destroyed,
    /// Record removed because the platform side disappeared.
    Dropped(DropReason),
    /// The channel has no record.
    Untracked,
}

pub struct LifecycleEngine {
    store: Arc<ChannelStore>,
    locks: LockManager,
    platform: Arc<dyn VoicePlatform>,
    naming: NamingConfig,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<ChannelStore>,
        platform: Arc<dyn VoicePlatform>,
        naming: NamingConfig,
    ) -> Self {
        Self {
            store,
            locks: LockManager::new(),
            platform,
            naming,
        }
    }

    pub fn store(&self) -> &ChannelStore {
        &self.store
    }

    /// Load the record for `key`, mapping a missing record to `None`.
    ///
    /// Callers must hold `key`'s lock.
    fn load(&self, key: ChannelKey) -> EngineResult<Option<ManagedChannel>> {
        match self.store.get(key) {
            Ok(channel) => Ok(Some(channel)),
            Err(e) => match EngineError::from(e) {
                EngineError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    /// Remove a record whose platform side vanished.
    ///
    /// A record that is already gone counts as removed.
    fn drop_record(&self, key: ChannelKey, reason: DropReason) -> EngineResult<Transition> {
        match self.store.remove_key(key).map_err(EngineError::from) {
            Ok(()) | Err(EngineError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        metrics::record_drop(reason.as_str());
        info!(channel = %key, reason = reason.as_str(), "Dropped managed channel");
        Ok(Transition::Dropped(reason))
    }

    /// Settle a failed platform call on `key` during a transition.
    ///
    /// `Absent` means the backing channel is gone, so the record is dropped
    /// and the transition succeeds. Anything else is surfaced.
    fn platform_failure(
        &self,
        operation: &'static str,
        key: ChannelKey,
        err: PlatformError,
    ) -> EngineResult<Transition> {
        match err {
            PlatformError::Absent => self.drop_record(key, DropReason::ResourceGone),
            err => Err(EngineError::platform(operation, key, err)),
        }
    }
}
