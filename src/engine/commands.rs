//! Operator operations.
//!
//! Text parsing and permission checks belong to whatever front end drives
//! these; each operation here only validates its input, takes the relevant
//! channel lock and performs one store write plus any platform call it needs.

use super::{LifecycleEngine, Transition};
use crate::error::{EngineError, EngineResult};
use crate::platform::PlatformError;
use crate::state::{ChannelConfig, ChannelKey, ChannelKind, ManagedChannel, TenantId, naming};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::info;

/// Parse a `DD:HH:MM` hold duration.
pub fn parse_hold_duration(input: &str) -> EngineResult<TimeDelta> {
    let invalid = || EngineError::InvalidHold(input.to_string());

    let parts = input
        .trim()
        .split(':')
        .map(|part| part.parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;
    let &[days, hours, minutes] = parts.as_slice() else {
        return Err(invalid());
    };

    TimeDelta::try_days(i64::from(days))
        .and_then(|d| d.checked_add(&TimeDelta::try_hours(i64::from(hours))?))
        .and_then(|d| d.checked_add(&TimeDelta::try_minutes(i64::from(minutes))?))
        .ok_or_else(invalid)
}

fn expect_kind(
    channel: &ManagedChannel,
    expected: &'static str,
    allowed: impl FnOnce(&ChannelKind) -> bool,
) -> EngineResult<()> {
    if allowed(&channel.config.kind) {
        Ok(())
    } else {
        Err(EngineError::WrongChannelType {
            channel: channel.key(),
            expected,
            actual: channel.config.kind.label(),
        })
    }
}

impl LifecycleEngine {
    fn require(&self, key: ChannelKey) -> EngineResult<ManagedChannel> {
        self.load(key)?.ok_or(EngineError::NotFound(key))
    }

    /// Create a new spawner channel in `tenant` with the configured defaults.
    pub async fn create_spawner(&self, tenant: TenantId) -> EngineResult<ManagedChannel> {
        let resource = self
            .platform
            .create_resource(tenant, &self.naming.spawner_name)
            .await
            .map_err(|e| match e {
                PlatformError::Absent => EngineError::TenantGone(tenant),
                e => EngineError::platform("create", ChannelKey::new(tenant, 0), e),
            })?;

        let spawner = ManagedChannel::new(
            tenant,
            resource,
            ChannelConfig::spawner(self.naming.default_template.clone()),
        );
        let _guard = self.locks.acquire(spawner.key()).await;
        self.store.insert(&spawner)?;
        info!(channel = %spawner.key(), "Created spawner");
        Ok(spawner)
    }

    /// Set the template new children of a spawner are created with.
    ///
    /// `key` may name the spawner itself or one of its children. Existing
    /// children keep their own template. Returns the spawner's key.
    pub async fn set_template(&self, key: ChannelKey, template: &str) -> EngineResult<ChannelKey> {
        naming::validate_template(template)?;

        let spawner_key = {
            let _guard = self.locks.acquire(key).await;
            let channel = self.require(key)?;
            expect_kind(&channel, "SPAWNER or CHILD", |kind| {
                !matches!(kind, ChannelKind::Import)
            })?;
            match channel.config.spawner_key() {
                Some(spawner_key) => spawner_key,
                None => {
                    self.store
                        .insert(&channel.with_config(channel.config.with_template(template)))?;
                    info!(channel = %key, template, "Updated spawner template");
                    return Ok(key);
                }
            }
        };

        // The child's lock is released before taking the spawner's.
        let _guard = self.locks.acquire(spawner_key).await;
        let spawner = self.require(spawner_key)?;
        expect_kind(&spawner, "SPAWNER", |kind| matches!(kind, ChannelKind::Spawner))?;
        self.store
            .insert(&spawner.with_config(spawner.config.with_template(template)))?;
        info!(channel = %spawner_key, via = %key, template, "Updated spawner template");
        Ok(spawner_key)
    }

    /// Give a child or import its own template and re-render its name now.
    pub async fn rename(&self, key: ChannelKey, template: &str) -> EngineResult<Transition> {
        naming::validate_template(template)?;

        let _guard = self.locks.acquire(key).await;
        let channel = self.require(key)?;
        expect_kind(&channel, "CHILD or IMPORT", |kind| {
            !matches!(kind, ChannelKind::Spawner)
        })?;

        let channel = channel.with_config(channel.config.with_template(template));
        self.store.insert(&channel)?;
        info!(channel = %key, template, "Updated channel template");

        let occupants = match self.platform.list_occupants(key).await {
            Ok(occupants) => occupants,
            Err(e) => return self.platform_failure("list_occupants", key, e),
        };
        self.rename_locked(&channel, &occupants).await
    }

    /// Cap how many occupants a child admits. Zero removes the cap.
    pub async fn set_occupancy_limit(&self, key: ChannelKey, limit: u32) -> EngineResult<()> {
        let _guard = self.locks.acquire(key).await;
        let channel = self.require(key)?;
        expect_kind(&channel, "CHILD", |kind| {
            matches!(kind, ChannelKind::Child { .. })
        })?;

        self.platform
            .set_occupancy_limit(key, limit)
            .await
            .map_err(|e| EngineError::platform("limit", key, e))?;
        info!(channel = %key, limit, "Set occupancy limit");
        Ok(())
    }

    /// Keep a child alive while empty for `duration` longer.
    ///
    /// Extends an existing hold, or starts one at `now`. Returns the new
    /// expiry instant as stored.
    pub async fn hold(
        &self,
        key: ChannelKey,
        duration: TimeDelta,
        now: DateTime<Utc>,
    ) -> EngineResult<DateTime<Utc>> {
        let _guard = self.locks.acquire(key).await;
        let channel = self.require(key)?;
        expect_kind(&channel, "CHILD", |kind| {
            matches!(kind, ChannelKind::Child { .. })
        })?;

        let mut config = channel.config.clone();
        let until = config
            .extend_hold(duration, now)
            .ok_or_else(|| EngineError::InvalidHold(duration.to_string()))?;
        self.store.insert(&channel.with_config(config))?;

        // Report what a later read will see.
        let until = self.require(key)?.config.hold_until().unwrap_or(until);
        info!(channel = %key, hold_until = %until, "Extended hold");
        Ok(until)
    }

    /// Adopt an existing channel. Its current name becomes its template.
    pub async fn import_channel(&self, key: ChannelKey) -> EngineResult<ManagedChannel> {
        let _guard = self.locks.acquire(key).await;
        if self.load(key)?.is_some() {
            return Err(EngineError::AlreadyManaged(key));
        }

        let name = self
            .platform
            .resource_name(key)
            .await
            .map_err(|e| EngineError::platform("resource_name", key, e))?;
        let channel = ManagedChannel::new(key.tenant_id, key.resource_id, ChannelConfig::import(name));
        self.store.insert(&channel)?;
        info!(channel = %key, template = %channel.config.template, "Imported channel");
        Ok(channel)
    }

    /// Stop managing a channel. The channel itself is left alone.
    pub async fn orphan(&self, key: ChannelKey) -> EngineResult<ManagedChannel> {
        let _guard = self.locks.acquire(key).await;
        let channel = self.require(key)?;
        self.store.remove(&channel)?;
        if matches!(channel.config.kind, ChannelKind::Spawner) {
            // Its children stay managed until they empty out.
            let children = self.store.children_of(&channel)?.len();
            info!(channel = %key, children, "Orphaned spawner");
        } else {
            info!(channel = %key, channel_type = channel.config.kind.label(), "Orphaned channel");
        }
        Ok(channel)
    }
}
