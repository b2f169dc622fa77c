//! Managed-channel types and state.
//!
//! A managed channel is identified by its `(tenant_id, resource_id)` pair and
//! carries a [`ChannelConfig`]. The config is always replaced wholesale when it
//! changes; nothing outside this module mutates individual fields.

use super::naming;
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;

/// Tenant (guild) identifier.
pub type TenantId = u64;

/// Resource (voice channel) identifier.
pub type ResourceId = u64;

/// Occupant (member) identifier.
pub type OccupantId = u64;

/// Template used for new spawners when none is configured.
pub const DEFAULT_TEMPLATE: &str = "#${no} Talk [${game}]";

/// Channel number recorded for imported channels.
pub const IMPORT_CHANNEL_NUMBER: u32 = 0;

/// Identity of a managed channel. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    pub tenant_id: TenantId,
    pub resource_id: ResourceId,
}

impl ChannelKey {
    pub const fn new(tenant_id: TenantId, resource_id: ResourceId) -> Self {
        Self {
            tenant_id,
            resource_id,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.resource_id)
    }
}

/// Lifecycle role of a managed channel.
///
/// Per-variant payloads replace the flat "optional field valid only for some
/// types" layout of the stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    /// Long-lived origin point. Occupying it spawns a child.
    Spawner,
    /// Ephemeral channel created by a spawn.
    Child {
        spawner: ChannelKey,
        number: u32,
        /// Destruction is suppressed while `now < hold_until`.
        hold_until: Option<DateTime<Utc>>,
    },
    /// Pre-existing channel adopted into management. Renamed, never destroyed.
    Import,
}

impl ChannelKind {
    /// Stable label, matching the stored `channel_type` tag.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Spawner => "SPAWNER",
            Self::Child { .. } => "CHILD",
            Self::Import => "IMPORT",
        }
    }
}

/// Per-channel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Naming template with `no` and `game` placeholders.
    pub template: String,
    pub kind: ChannelKind,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::spawner(DEFAULT_TEMPLATE)
    }
}

impl ChannelConfig {
    pub fn spawner(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            kind: ChannelKind::Spawner,
        }
    }

    /// Config for an adopted channel; the template is usually its current name.
    pub fn import(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            kind: ChannelKind::Import,
        }
    }

    /// Build the config of a child spawned from a channel with this config.
    ///
    /// The template carries over; children start without a hold.
    pub fn child_of(&self, spawner: ChannelKey, number: u32) -> Self {
        Self {
            template: self.template.clone(),
            kind: ChannelKind::Child {
                spawner,
                number,
                hold_until: None,
            },
        }
    }

    /// Replace the template, keeping the lifecycle role.
    pub fn with_template(&self, template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            kind: self.kind.clone(),
        }
    }

    pub fn channel_number(&self) -> Option<u32> {
        match self.kind {
            ChannelKind::Spawner => None,
            ChannelKind::Child { number, .. } => Some(number),
            ChannelKind::Import => Some(IMPORT_CHANNEL_NUMBER),
        }
    }

    pub fn spawner_key(&self) -> Option<ChannelKey> {
        match self.kind {
            ChannelKind::Child { spawner, .. } => Some(spawner),
            _ => None,
        }
    }

    pub fn hold_until(&self) -> Option<DateTime<Utc>> {
        match self.kind {
            ChannelKind::Child { hold_until, .. } => hold_until,
            _ => None,
        }
    }

    /// Whether an empty channel with this config may be destroyed at `now`.
    ///
    /// Imports never expire. Everything else is expired unless a hold is set
    /// and still in the future.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.kind {
            ChannelKind::Import => false,
            _ => self.hold_until().is_none_or(|until| now >= until),
        }
    }

    /// Extend the hold of a child by `by`.
    ///
    /// Extensions accumulate onto an existing hold and start from `now` when
    /// none is set. The result is truncated to whole microseconds, the
    /// precision records are stored at. Returns the new instant, or `None` for
    /// non-child configs and on timestamp overflow (the config is left
    /// untouched then).
    pub fn extend_hold(&mut self, by: TimeDelta, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let ChannelKind::Child { hold_until, .. } = &mut self.kind else {
            return None;
        };
        let next = hold_until.unwrap_or(now).checked_add_signed(by)?;
        let next = DateTime::from_timestamp_micros(next.timestamp_micros())?;
        *hold_until = Some(next);
        Some(next)
    }

    /// Render the display name for the given derived status.
    pub fn display_name(&self, game: &str) -> String {
        naming::render(
            &self.template,
            self.channel_number().unwrap_or(IMPORT_CHANNEL_NUMBER),
            game,
        )
    }
}

/// A channel tracked by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedChannel {
    pub tenant_id: TenantId,
    pub resource_id: ResourceId,
    pub config: ChannelConfig,
}

impl ManagedChannel {
    pub fn new(tenant_id: TenantId, resource_id: ResourceId, config: ChannelConfig) -> Self {
        Self {
            tenant_id,
            resource_id,
            config,
        }
    }

    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.tenant_id, self.resource_id)
    }

    /// Same identity with a replacement config.
    pub fn with_config(&self, config: ChannelConfig) -> Self {
        Self {
            config,
            ..self.clone()
        }
    }
}
