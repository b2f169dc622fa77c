//! Join/leave handling.
//!
//! A join on a spawner spawns a child. Any change on a child or import
//! re-renders its name; an empty expired child is destroyed.

use super::{LifecycleEngine, Transition};
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::platform::{Deletion, Occupant, PlatformError};
use crate::state::{ChannelKey, ChannelKind, ManagedChannel, OccupantId, ResourceId, TenantId, naming};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

impl LifecycleEngine {
    /// Apply a voice state change for one occupant.
    ///
    /// The leave side runs first, then the join side. A failure on one side
    /// does not stop the other; the first error is returned.
    pub async fn on_voice_state_update(
        &self,
        tenant: TenantId,
        occupant: OccupantId,
        before: Option<ResourceId>,
        after: Option<ResourceId>,
    ) -> EngineResult<()> {
        if before == after {
            return Ok(());
        }

        let mut first_error = None;
        if let Some(resource) = before {
            let key = ChannelKey::new(tenant, resource);
            match self.handle_leave(key).await {
                Ok(outcome) => debug!(channel = %key, occupant, ?outcome, "Handled leave"),
                Err(e) => {
                    metrics::record_transition_error(e.error_code());
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(resource) = after {
            let key = ChannelKey::new(tenant, resource);
            match self.handle_join(key).await {
                Ok(outcome) => debug!(channel = %key, occupant, ?outcome, "Handled join"),
                Err(e) => {
                    metrics::record_transition_error(e.error_code());
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Someone entered `key`.
    pub async fn handle_join(&self, key: ChannelKey) -> EngineResult<Transition> {
        let _guard = self.locks.acquire(key).await;
        let Some(channel) = self.load(key)? else {
            return Ok(Transition::Untracked);
        };
        match channel.config.kind {
            ChannelKind::Spawner => self.spawn_locked(&channel).await,
            _ => self.settle_locked(&channel, Utc::now()).await,
        }
    }

    /// Someone left `key`.
    pub async fn handle_leave(&self, key: ChannelKey) -> EngineResult<Transition> {
        let _guard = self.locks.acquire(key).await;
        let Some(channel) = self.load(key)? else {
            return Ok(Transition::Untracked);
        };
        match channel.config.kind {
            ChannelKind::Spawner => Ok(Transition::Unchanged),
            _ => self.settle_locked(&channel, Utc::now()).await,
        }
    }

    /// Bring a child or import in line with its current occupants.
    ///
    /// Callers must hold the channel's lock.
    pub(super) async fn settle_locked(
        &self,
        channel: &ManagedChannel,
        now: DateTime<Utc>,
    ) -> EngineResult<Transition> {
        let key = channel.key();
        let occupants = match self.platform.list_occupants(key).await {
            Ok(occupants) => occupants,
            Err(e) => return self.platform_failure("list_occupants", key, e),
        };

        if occupants.is_empty() && matches!(channel.config.kind, ChannelKind::Child { .. }) {
            if !channel.config.is_expired(now) {
                debug!(channel = %key, hold_until = ?channel.config.hold_until(), "Empty child is held");
                return Ok(Transition::Held);
            }
            return self.destroy_locked(channel).await;
        }

        self.rename_locked(channel, &occupants).await
    }

    async fn destroy_locked(&self, channel: &ManagedChannel) -> EngineResult<Transition> {
        let key = channel.key();
        match self.platform.delete_resource(key).await {
            Ok(Deletion::Deleted) => {}
            Ok(Deletion::AlreadyAbsent) | Err(PlatformError::Absent) => {
                debug!(channel = %key, "Child was already deleted");
            }
            Err(e) => return Err(EngineError::platform("delete", key, e)),
        }

        match self.store.remove(channel).map_err(EngineError::from) {
            Ok(()) | Err(EngineError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        metrics::record_destroy();
        info!(channel = %key, spawner = ?channel.config.spawner_key(), "Destroyed empty child channel");
        Ok(Transition::Destroyed)
    }

    /// Rename `channel` if the name derived from `occupants` differs from
    /// the live one. Callers must hold the channel's lock.
    pub(super) async fn rename_locked(
        &self,
        channel: &ManagedChannel,
        occupants: &[Occupant],
    ) -> EngineResult<Transition> {
        let key = channel.key();
        let game = naming::game_status(occupants.iter().map(|o| o.activity.as_deref()));
        let name = channel.config.display_name(&game);

        let current = match self.platform.resource_name(key).await {
            Ok(current) => current,
            Err(e) => return self.platform_failure("resource_name", key, e),
        };
        if current == name {
            return Ok(Transition::Unchanged);
        }

        if let Err(e) = self.platform.rename_resource(key, &name).await {
            return self.platform_failure("rename", key, e);
        }
        metrics::record_rename();
        debug!(channel = %key, from = %current, to = %name, "Renamed channel");
        Ok(Transition::Renamed { name })
    }
}
