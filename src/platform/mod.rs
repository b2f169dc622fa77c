//! Voice platform abstraction.
//!
//! The engine never talks to the chat platform directly; it goes through the
//! [`VoicePlatform`] capability. [`bridge::BridgePlatform`] implements it over
//! HTTP against a platform adapter process.

use crate::state::{ChannelKey, OccupantId, ResourceId, TenantId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bridge;
#[cfg(test)]
pub mod memory;

pub use bridge::BridgePlatform;

/// A member currently connected to a voice channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    pub id: OccupantId,
    /// Name of the playing/streaming activity, if any.
    #[serde(default)]
    pub activity: Option<String>,
}

impl Occupant {
    pub fn new(id: OccupantId, activity: Option<&str>) -> Self {
        Self {
            id,
            activity: activity.map(str::to_string),
        }
    }
}

/// Outcome of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Deleted,
    AlreadyAbsent,
}

/// Platform call failures.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The tenant, resource, or occupant does not exist (any more).
    #[error("not found on platform")]
    Absent,

    #[error("{operation} failed: {reason}")]
    Failed {
        operation: &'static str,
        reason: String,
    },
}

impl PlatformError {
    pub fn failed(operation: &'static str, reason: impl ToString) -> Self {
        Self::Failed {
            operation,
            reason: reason.to_string(),
        }
    }
}

/// Operations the lifecycle engine needs from the chat platform.
///
/// Calls may suspend; none of them are retried by the engine.
#[async_trait]
pub trait VoicePlatform: Send + Sync {
    async fn tenant_exists(&self, tenant: TenantId) -> Result<bool, PlatformError>;

    async fn resource_exists(&self, key: ChannelKey) -> Result<bool, PlatformError>;

    /// Current display name. `Absent` if the resource is gone.
    async fn resource_name(&self, key: ChannelKey) -> Result<String, PlatformError>;

    /// Occupants in platform order. `Absent` if the resource is gone.
    async fn list_occupants(&self, key: ChannelKey) -> Result<Vec<Occupant>, PlatformError>;

    /// Create a fresh voice channel named `name` in `tenant`.
    async fn create_resource(
        &self,
        tenant: TenantId,
        name: &str,
    ) -> Result<ResourceId, PlatformError>;

    /// Duplicate `source` (permissions, category) under a new name, positioned
    /// immediately after it.
    async fn clone_resource(
        &self,
        source: ChannelKey,
        name: &str,
    ) -> Result<ResourceId, PlatformError>;

    async fn delete_resource(&self, key: ChannelKey) -> Result<Deletion, PlatformError>;

    async fn move_occupant(
        &self,
        tenant: TenantId,
        occupant: OccupantId,
        target: ResourceId,
    ) -> Result<(), PlatformError>;

    async fn rename_resource(&self, key: ChannelKey, name: &str) -> Result<(), PlatformError>;

    /// Set the occupant cap; zero removes it.
    async fn set_occupancy_limit(&self, key: ChannelKey, limit: u32)
    -> Result<(), PlatformError>;
}
