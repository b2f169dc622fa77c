//! HTTP bridge to a platform adapter.
//!
//! The adapter owns the chat-platform session and exposes a small REST
//! surface; this client maps it onto [`VoicePlatform`].
//!
//! # Endpoints
//!
//! - `GET    /tenants/{t}` - tenant probe
//! - `GET    /tenants/{t}/resources/{r}` - `{name, occupants}`
//! - `POST   /tenants/{t}/resources` - `{name}` -> `{id}`
//! - `POST   /tenants/{t}/resources/{r}/clone` - `{name}` -> `{id}`
//! - `DELETE /tenants/{t}/resources/{r}`
//! - `PATCH  /tenants/{t}/resources/{r}` - `{name?, user_limit?}`
//! - `PUT    /tenants/{t}/occupants/{o}/resource` - `{resource_id}`
//!
//! `404` always means [`PlatformError::Absent`].

use super::{Deletion, Occupant, PlatformError, VoicePlatform};
use crate::config::BridgeConfig;
use crate::state::{ChannelKey, OccupantId, ResourceId, TenantId};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ResourceView {
    name: String,
    #[serde(default)]
    occupants: Vec<Occupant>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: ResourceId,
}

#[derive(Debug, Serialize)]
struct NameBody<'a> {
    name: &'a str,
}

#[derive(Debug, Default, Serialize)]
struct PatchBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct MoveBody {
    resource_id: ResourceId,
}

/// [`VoicePlatform`] over the adapter's REST API.
pub struct BridgePlatform {
    client: Client,
    base_url: String,
}

impl BridgePlatform {
    pub fn new(config: &BridgeConfig, user_agent: &str) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(user_agent.to_string())
            .build()
            .map_err(|e| PlatformError::failed("connect", e))?;

        info!(base_url = %config.base_url, "Platform bridge initialized");
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn resource_url(&self, key: ChannelKey) -> String {
        format!(
            "{}/tenants/{}/resources/{}",
            self.base_url, key.tenant_id, key.resource_id
        )
    }

    /// Send a request, mapping transport errors and non-success statuses.
    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, PlatformError> {
        let response = request
            .send()
            .await
            .map_err(|e| PlatformError::failed(operation, e))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(PlatformError::Absent),
            status => {
                let body = response.text().await.unwrap_or_default();
                debug!(operation, %status, body = %body, "Adapter rejected request");
                Err(PlatformError::failed(operation, format!("HTTP {status}: {body}")))
            }
        }
    }

    async fn fetch_resource(&self, key: ChannelKey) -> Result<ResourceView, PlatformError> {
        let response = self
            .send("get_resource", self.client.get(self.resource_url(key)))
            .await?;
        response
            .json()
            .await
            .map_err(|e| PlatformError::failed("get_resource", e))
    }

    async fn patch(
        &self,
        operation: &'static str,
        key: ChannelKey,
        body: PatchBody<'_>,
    ) -> Result<(), PlatformError> {
        self.send(operation, self.client.patch(self.resource_url(key)).json(&body))
            .await
            .map(drop)
    }
}

/// Collapse `Absent` into `false` for existence probes.
fn exists(result: Result<Response, PlatformError>) -> Result<bool, PlatformError> {
    match result {
        Ok(_) => Ok(true),
        Err(PlatformError::Absent) => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl VoicePlatform for BridgePlatform {
    async fn tenant_exists(&self, tenant: TenantId) -> Result<bool, PlatformError> {
        let url = format!("{}/tenants/{}", self.base_url, tenant);
        exists(self.send("get_tenant", self.client.get(url)).await)
    }

    async fn resource_exists(&self, key: ChannelKey) -> Result<bool, PlatformError> {
        exists(
            self.send("get_resource", self.client.get(self.resource_url(key)))
                .await,
        )
    }

    async fn resource_name(&self, key: ChannelKey) -> Result<String, PlatformError> {
        Ok(self.fetch_resource(key).await?.name)
    }

    async fn list_occupants(&self, key: ChannelKey) -> Result<Vec<Occupant>, PlatformError> {
        Ok(self.fetch_resource(key).await?.occupants)
    }

    async fn create_resource(
        &self,
        tenant: TenantId,
        name: &str,
    ) -> Result<ResourceId, PlatformError> {
        let url = format!("{}/tenants/{}/resources", self.base_url, tenant);
        let response = self
            .send("create", self.client.post(url).json(&NameBody { name }))
            .await?;
        let created: Created = response
            .json()
            .await
            .map_err(|e| PlatformError::failed("create", e))?;
        Ok(created.id)
    }

    async fn clone_resource(
        &self,
        source: ChannelKey,
        name: &str,
    ) -> Result<ResourceId, PlatformError> {
        let url = format!("{}/clone", self.resource_url(source));
        let response = self
            .send("clone", self.client.post(url).json(&NameBody { name }))
            .await?;
        let created: Created = response
            .json()
            .await
            .map_err(|e| PlatformError::failed("clone", e))?;
        Ok(created.id)
    }

    async fn delete_resource(&self, key: ChannelKey) -> Result<Deletion, PlatformError> {
        match self
            .send("delete", self.client.delete(self.resource_url(key)))
            .await
        {
            Ok(_) => Ok(Deletion::Deleted),
            Err(PlatformError::Absent) => Ok(Deletion::AlreadyAbsent),
            Err(e) => Err(e),
        }
    }

    async fn move_occupant(
        &self,
        tenant: TenantId,
        occupant: OccupantId,
        target: ResourceId,
    ) -> Result<(), PlatformError> {
        let url = format!(
            "{}/tenants/{}/occupants/{}/resource",
            self.base_url, tenant, occupant
        );
        self.send(
            "move",
            self.client.put(url).json(&MoveBody {
                resource_id: target,
            }),
        )
        .await
        .map(drop)
    }

    async fn rename_resource(&self, key: ChannelKey, name: &str) -> Result<(), PlatformError> {
        let body = PatchBody {
            name: Some(name),
            ..Default::default()
        };
        self.patch("rename", key, body).await
    }

    async fn set_occupancy_limit(
        &self,
        key: ChannelKey,
        limit: u32,
    ) -> Result<(), PlatformError> {
        let body = PatchBody {
            user_limit: Some(limit),
            ..Default::default()
        };
        self.patch("limit", key, body).await
    }
}
