//! Steam API collaborator.
//!
//! The trait is what processors program against; [`WebApiClient`] is the
//! production implementation over the public Steam Web API. The important
//! contract is the error split: "resource does not exist" versus
//! "upstream is struggling", which processors map to `Fail` versus `Retry`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::info;

use crate::error::ApiError;

/// Read access to upstream Steam metadata.
#[async_trait]
pub trait SteamApi: Send + Sync {
    /// PICS-style product metadata for an app or package.
    async fn product_info(&self, id: u32) -> Result<Value, ApiError>;

    /// Store details for a bundle.
    async fn bundle_details(&self, id: u32) -> Result<Value, ApiError>;

    async fn player_summary(&self, id: u64) -> Result<Value, ApiError>;

    async fn player_games(&self, id: u64) -> Result<Value, ApiError>;

    async fn player_badges(&self, id: u64) -> Result<Value, ApiError>;

    async fn player_groups(&self, id: u64) -> Result<Value, ApiError>;
}

/// HTTP client for the public Steam Web API.
pub struct WebApiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl WebApiClient {
    pub fn new(api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(timeout)
            .build()?;
        Ok(WebApiClient {
            client,
            base_url: "https://api.steampowered.com".to_string(),
            api_key,
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;

        let status = response.status();
        info!(path = path, status = status.as_u16(), "steam_api_response");

        match status {
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(0)),
            s if s.is_success() => response
                .json::<Value>()
                .await
                .map_err(|e| ApiError::Transient(format!("malformed response: {e}"))),
            // Rate limits and server errors are worth another attempt.
            s => Err(ApiError::Transient(format!("status {s}"))),
        }
    }
}

#[async_trait]
impl SteamApi for WebApiClient {
    async fn product_info(&self, id: u32) -> Result<Value, ApiError> {
        self.get_json("IStoreService/GetAppInfo/v1", &[("appid", id.to_string())])
            .await
            .map_err(|e| e.with_id(id as u64))
    }

    async fn bundle_details(&self, id: u32) -> Result<Value, ApiError> {
        self.get_json("IStoreService/GetBundles/v1", &[("bundleid", id.to_string())])
            .await
            .map_err(|e| e.with_id(id as u64))
    }

    async fn player_summary(&self, id: u64) -> Result<Value, ApiError> {
        self.get_json(
            "ISteamUser/GetPlayerSummaries/v2",
            &[("steamids", id.to_string())],
        )
        .await
        .map_err(|e| e.with_id(id))
    }

    async fn player_games(&self, id: u64) -> Result<Value, ApiError> {
        self.get_json(
            "IPlayerService/GetOwnedGames/v1",
            &[("steamid", id.to_string())],
        )
        .await
        .map_err(|e| e.with_id(id))
    }

    async fn player_badges(&self, id: u64) -> Result<Value, ApiError> {
        self.get_json(
            "IPlayerService/GetBadges/v1",
            &[("steamid", id.to_string())],
        )
        .await
        .map_err(|e| e.with_id(id))
    }

    async fn player_groups(&self, id: u64) -> Result<Value, ApiError> {
        self.get_json(
            "ISteamUser/GetUserGroupList/v1",
            &[("steamid", id.to_string())],
        )
        .await
        .map_err(|e| e.with_id(id))
    }
}

impl ApiError {
    /// Attach the entity id to a NotFound raised below the call boundary.
    fn with_id(self, id: u64) -> ApiError {
        match self {
            ApiError::NotFound(_) => ApiError::NotFound(id),
            other => other,
        }
    }
}
