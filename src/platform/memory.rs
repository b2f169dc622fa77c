//! In-memory voice platform for tests.
//!
//! Models tenants, channels and occupants, records every mutating call, and
//! can be told to fail specific operations. Every call yields to the
//! scheduler first so concurrent transitions interleave the way they would
//! against a real network client.

use super::{Deletion, Occupant, PlatformError, VoicePlatform};
use crate::state::{ChannelKey, OccupantId, ResourceId, TenantId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

/// A recorded mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create { tenant: TenantId, name: String },
    Clone { source: ChannelKey, name: String },
    Delete { key: ChannelKey },
    Move { tenant: TenantId, occupant: OccupantId, target: ResourceId },
    Rename { key: ChannelKey, name: String },
    Limit { key: ChannelKey, limit: u32 },
}

#[derive(Debug, Default)]
struct Resource {
    name: String,
    occupants: Vec<Occupant>,
    position: u32,
    limit: u32,
}

#[derive(Debug)]
struct World {
    tenants: HashSet<TenantId>,
    resources: BTreeMap<ChannelKey, Resource>,
    next_id: ResourceId,
    calls: Vec<Call>,
    queries: usize,
    failing: HashSet<&'static str>,
    lagging: HashMap<&'static str, Duration>,
}

#[derive(Debug)]
pub struct MemoryPlatform {
    world: Mutex<World>,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self {
            world: Mutex::new(World {
                tenants: HashSet::new(),
                resources: BTreeMap::new(),
                next_id: 1000,
                calls: Vec::new(),
                queries: 0,
                failing: HashSet::new(),
                lagging: HashMap::new(),
            }),
        }
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove_tenant(&self, tenant: TenantId) {
        let mut world = self.world.lock();
        world.tenants.remove(&tenant);
        world.resources.retain(|key, _| key.tenant_id != tenant);
    }

    /// Add a channel (and its tenant) directly, bypassing call recording.
    pub fn add_resource(&self, key: ChannelKey, name: &str) {
        let mut world = self.world.lock();
        world.tenants.insert(key.tenant_id);
        let position = world.resources.len() as u32;
        world.resources.insert(
            key,
            Resource {
                name: name.to_string(),
                position,
                ..Default::default()
            },
        );
    }

    pub fn remove_resource(&self, key: ChannelKey) {
        self.world.lock().resources.remove(&key);
    }

    /// Place an occupant into a channel, taking them out of any other one.
    pub fn connect(&self, key: ChannelKey, occupant: Occupant) {
        let mut world = self.world.lock();
        detach(&mut world, key.tenant_id, occupant.id);
        if let Some(resource) = world.resources.get_mut(&key) {
            resource.occupants.push(occupant);
        }
    }

    pub fn disconnect(&self, tenant: TenantId, occupant: OccupantId) {
        detach(&mut self.world.lock(), tenant, occupant);
    }

    pub fn fail(&self, operation: &'static str) {
        self.world.lock().failing.insert(operation);
    }

    /// Make `operation` take `lag` longer after it has taken effect.
    pub fn lag(&self, operation: &'static str, lag: Duration) {
        self.world.lock().lagging.insert(operation, lag);
    }

    pub fn heal(&self, operation: &'static str) {
        self.world.lock().failing.remove(operation);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.world.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.world.lock().calls.clear();
    }

    /// Number of read-only calls made so far.
    pub fn queries(&self) -> usize {
        self.world.lock().queries
    }

    pub fn name_of(&self, key: ChannelKey) -> Option<String> {
        self.world.lock().resources.get(&key).map(|r| r.name.clone())
    }

    pub fn limit_of(&self, key: ChannelKey) -> Option<u32> {
        self.world.lock().resources.get(&key).map(|r| r.limit)
    }

    pub fn position_of(&self, key: ChannelKey) -> Option<u32> {
        self.world.lock().resources.get(&key).map(|r| r.position)
    }

    pub fn occupant_ids(&self, key: ChannelKey) -> Vec<OccupantId> {
        self.world
            .lock()
            .resources
            .get(&key)
            .map(|r| r.occupants.iter().map(|o| o.id).collect())
            .unwrap_or_default()
    }

    pub fn exists(&self, key: ChannelKey) -> bool {
        self.world.lock().resources.contains_key(&key)
    }

    /// Channels in `tenant`, in position order.
    pub fn resources_in(&self, tenant: TenantId) -> Vec<ChannelKey> {
        let world = self.world.lock();
        let mut keys: Vec<_> = world
            .resources
            .iter()
            .filter(|(key, _)| key.tenant_id == tenant)
            .map(|(key, r)| (r.position, *key))
            .collect();
        keys.sort();
        keys.into_iter().map(|(_, key)| key).collect()
    }

    async fn query(&self) -> parking_lot::MutexGuard<'_, World> {
        tokio::task::yield_now().await;
        let mut world = self.world.lock();
        world.queries += 1;
        world
    }

    async fn mutate(
        &self,
        operation: &'static str,
        call: Call,
    ) -> Result<parking_lot::MutexGuard<'_, World>, PlatformError> {
        tokio::task::yield_now().await;
        let mut world = self.world.lock();
        if world.failing.contains(operation) {
            return Err(PlatformError::failed(operation, "injected failure"));
        }
        world.calls.push(call);
        Ok(world)
    }
}

fn detach(world: &mut World, tenant: TenantId, occupant: OccupantId) -> Option<Occupant> {
    world
        .resources
        .iter_mut()
        .filter(|(key, _)| key.tenant_id == tenant)
        .find_map(|(_, resource)| {
            let index = resource.occupants.iter().position(|o| o.id == occupant)?;
            Some(resource.occupants.remove(index))
        })
}

#[async_trait]
impl VoicePlatform for MemoryPlatform {
    async fn tenant_exists(&self, tenant: TenantId) -> Result<bool, PlatformError> {
        Ok(self.query().await.tenants.contains(&tenant))
    }

    async fn resource_exists(&self, key: ChannelKey) -> Result<bool, PlatformError> {
        Ok(self.query().await.resources.contains_key(&key))
    }

    async fn resource_name(&self, key: ChannelKey) -> Result<String, PlatformError> {
        let world = self.query().await;
        world
            .resources
            .get(&key)
            .map(|r| r.name.clone())
            .ok_or(PlatformError::Absent)
    }

    async fn list_occupants(&self, key: ChannelKey) -> Result<Vec<Occupant>, PlatformError> {
        let world = self.query().await;
        world
            .resources
            .get(&key)
            .map(|r| r.occupants.clone())
            .ok_or(PlatformError::Absent)
    }

    async fn create_resource(
        &self,
        tenant: TenantId,
        name: &str,
    ) -> Result<ResourceId, PlatformError> {
        let call = Call::Create {
            tenant,
            name: name.to_string(),
        };
        let (id, lag) = {
            let mut world = self.mutate("create", call).await?;
            if !world.tenants.contains(&tenant) {
                return Err(PlatformError::Absent);
            }
            let id = world.next_id;
            world.next_id += 1;
            let position = world.resources.len() as u32;
            world.resources.insert(
                ChannelKey::new(tenant, id),
                Resource {
                    name: name.to_string(),
                    position,
                    ..Default::default()
                },
            );
            (id, world.lagging.get("create").copied())
        };
        if let Some(lag) = lag {
            tokio::time::sleep(lag).await;
        }
        Ok(id)
    }

    async fn clone_resource(
        &self,
        source: ChannelKey,
        name: &str,
    ) -> Result<ResourceId, PlatformError> {
        let call = Call::Clone {
            source,
            name: name.to_string(),
        };
        let mut world = self.mutate("clone", call).await?;
        let Some(position) = world.resources.get(&source).map(|r| r.position) else {
            return Err(PlatformError::Absent);
        };
        for (key, resource) in world.resources.iter_mut() {
            if key.tenant_id == source.tenant_id && resource.position > position {
                resource.position += 1;
            }
        }
        let id = world.next_id;
        world.next_id += 1;
        world.resources.insert(
            ChannelKey::new(source.tenant_id, id),
            Resource {
                name: name.to_string(),
                position: position + 1,
                ..Default::default()
            },
        );
        Ok(id)
    }

    async fn delete_resource(&self, key: ChannelKey) -> Result<Deletion, PlatformError> {
        let mut world = self.mutate("delete", Call::Delete { key }).await?;
        Ok(match world.resources.remove(&key) {
            Some(_) => Deletion::Deleted,
            None => Deletion::AlreadyAbsent,
        })
    }

    async fn move_occupant(
        &self,
        tenant: TenantId,
        occupant: OccupantId,
        target: ResourceId,
    ) -> Result<(), PlatformError> {
        let call = Call::Move {
            tenant,
            occupant,
            target,
        };
        let mut world = self.mutate("move", call).await?;
        let target = ChannelKey::new(tenant, target);
        if !world.resources.contains_key(&target) {
            return Err(PlatformError::Absent);
        }
        let moved = detach(&mut world, tenant, occupant).ok_or(PlatformError::Absent)?;
        if let Some(resource) = world.resources.get_mut(&target) {
            resource.occupants.push(moved);
        }
        Ok(())
    }

    async fn rename_resource(&self, key: ChannelKey, name: &str) -> Result<(), PlatformError> {
        let call = Call::Rename {
            key,
            name: name.to_string(),
        };
        let mut world = self.mutate("rename", call).await?;
        let resource = world.resources.get_mut(&key).ok_or(PlatformError::Absent)?;
        resource.name = name.to_string();
        Ok(())
    }

    async fn set_occupancy_limit(
        &self,
        key: ChannelKey,
        limit: u32,
    ) -> Result<(), PlatformError> {
        let mut world = self.mutate("limit", Call::Limit { key, limit }).await?;
        let resource = world.resources.get_mut(&key).ok_or(PlatformError::Absent)?;
        resource.limit = limit;
        Ok(())
    }
}
