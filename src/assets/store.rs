// Remote asset store
// Listing query plus on-demand payload fetch per record id

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::debug;

use super::models::{MeditationAsset, RemoteAsset};
use crate::error::StoreError;
use crate::settings::StoreSettings;

/// Remote store of guided meditations
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// All asset records, in any order
    async fn query_assets(&self) -> Result<Vec<MeditationAsset>, StoreError>;

    /// Full record for one asset, including its audio payload
    async fn fetch_asset(&self, id: &str) -> Result<RemoteAsset, StoreError>;
}

/// HTTP/JSON store:
/// `GET {base}/assets`, `GET {base}/assets/{id}`, `GET {base}/assets/{id}/audio`
pub struct HttpAssetStore {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAssetStore {
    pub fn new(settings: &StoreSettings) -> Result<Self, StoreError> {
        let mut builder = reqwest::Client::builder().user_agent(settings.user_agent.clone());
        if let Some(secs) = settings.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = settings.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let base_url = Url::parse(&settings.base_url)
            .map_err(|e| StoreError::InvalidUrl(format!("{}: {}", settings.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::InvalidUrl(settings.base_url.clone()));
        }

        Ok(Self {
            client: builder.build()?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL extended by `segments`, each percent-encoded as one path segment
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Always Ok: `new` rejects cannot-be-a-base URLs
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get(&self, url: Url, id: Option<&str>) -> Result<reqwest::Response, StoreError> {
        debug!("GET {}", url);
        let response = self.client.get(url.clone()).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND if id.is_some() => {
                Err(StoreError::NotFound(id.unwrap_or_default().to_string()))
            }
            status => Err(StoreError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn query_assets(&self) -> Result<Vec<MeditationAsset>, StoreError> {
        let assets = self
            .get(self.endpoint(&["assets"]), None)
            .await?
            .json::<Vec<MeditationAsset>>()
            .await?;
        debug!("Store listed {} assets", assets.len());
        Ok(assets)
    }

    async fn fetch_asset(&self, id: &str) -> Result<RemoteAsset, StoreError> {
        let record = self
            .get(self.endpoint(&["assets", id]), Some(id))
            .await?
            .json::<MeditationAsset>()
            .await?;
        if record.id != id {
            return Err(StoreError::InvalidResponse(format!(
                "asked for {} but store returned {}",
                id, record.id
            )));
        }

        let payload = self
            .get(self.endpoint(&["assets", id, "audio"]), Some(id))
            .await?
            .bytes()
            .await?
            .to_vec();
        if payload.is_empty() {
            return Err(StoreError::InvalidResponse(format!("empty payload for {}", id)));
        }

        debug!("Fetched {} ({} bytes)", id, payload.len());
        Ok(RemoteAsset { record, payload })
    }
}
