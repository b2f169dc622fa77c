//! Child creation from an occupied spawner.

use super::{LifecycleEngine, Transition};
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::platform::PlatformError;
use crate::state::{ManagedChannel, naming};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Smallest positive number not in `taken`.
pub fn next_channel_number<I>(taken: I) -> u32
where
    I: IntoIterator<Item = u32>,
{
    let taken: BTreeSet<u32> = taken.into_iter().collect();
    (1..=u32::MAX)
        .find(|n| !taken.contains(n))
        .unwrap_or(u32::MAX)
}

impl LifecycleEngine {
    /// Spawn a child for everyone currently in `spawner`.
    ///
    /// Occupants are listed under the spawner's lock, so a spawner that was
    /// already emptied by an earlier spawn is a no-op. Callers must hold the
    /// spawner's lock; the child's lock is taken while its occupants move in.
    pub(super) async fn spawn_locked(&self, spawner: &ManagedChannel) -> EngineResult<Transition> {
        let key = spawner.key();
        let occupants = match self.platform.list_occupants(key).await {
            Ok(occupants) => occupants,
            Err(e) => return self.platform_failure("list_occupants", key, e),
        };
        if occupants.is_empty() {
            debug!(channel = %key, "Spawner is empty, nothing to spawn");
            return Ok(Transition::Unchanged);
        }

        let number = next_channel_number(self.store.taken_numbers(spawner)?);
        let config = spawner.config.child_of(key, number);
        let game = naming::game_status(occupants.iter().map(|o| o.activity.as_deref()));
        let name = config.display_name(&game);

        let child_id = match self.platform.clone_resource(key, &name).await {
            Ok(id) => id,
            Err(e) => return self.platform_failure("clone", key, e),
        };
        let child = ManagedChannel::new(key.tenant_id, child_id, config);
        // Held until everyone is moved in. Lock order is spawner, then child.
        let _child_guard = self.locks.acquire(child.key()).await;
        self.store.insert(&child)?;
        metrics::record_spawn();
        info!(
            spawner = %key,
            child = %child.key(),
            number,
            name = %name,
            occupants = occupants.len(),
            "Spawned child channel"
        );

        for occupant in &occupants {
            match self
                .platform
                .move_occupant(key.tenant_id, occupant.id, child_id)
                .await
            {
                Ok(()) => {}
                // Left before we could move them; the child empties out on its own.
                Err(PlatformError::Absent) => {
                    warn!(child = %child.key(), occupant = occupant.id, "Occupant vanished before move");
                }
                Err(e) => return Err(EngineError::platform("move", child.key(), e)),
            }
        }

        Ok(Transition::Spawned {
            child: child_id,
            number,
            name,
        })
    }
}
