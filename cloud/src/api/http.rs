//! Production [`OscApi`] implementation over HTTPS.

use super::{models, sign, OscApi};
use crate::error::{self, CloudError, ParsedApiError, Transport};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use snafu::ResultExt;
use url::Url;

/// HTTP client for the provider's OAPI endpoint.
#[derive(Debug, Clone)]
pub struct HttpOscApi {
    client: reqwest::Client,
    endpoint: Url,
    credentials: sign::Credentials,
    region: String,
}

impl HttpOscApi {
    /// Client against the public endpoint of `region`.
    pub fn new(region: &str, credentials: sign::Credentials) -> Result<Self, CloudError> {
        let endpoint = format!("https://api.{}.outscale.com/api/v1/", region);
        let endpoint = Url::parse(&endpoint).map_err(|err| CloudError::Internal {
            reason: format!("bad api endpoint '{}': {}", endpoint, err),
        })?;
        Ok(Self::with_endpoint(endpoint, region, credentials))
    }

    /// Client against an explicit endpoint, e.g. a regional mirror.
    pub fn with_endpoint(endpoint: Url, region: &str, credentials: sign::Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            credentials,
            region: region.to_string(),
        }
    }

    async fn call<Req, Resp>(&self, action: &'static str, request: &Req) -> Result<Resp, CloudError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = self
            .endpoint
            .join(action)
            .map_err(|err| CloudError::Internal {
                reason: format!("bad action url for '{}': {}", action, err),
            })?;
        let body = serde_json::to_vec(request).map_err(|err| CloudError::Internal {
            reason: format!("serializing '{}' request: {}", action, err),
        })?;
        let host = url.host_str().unwrap_or_default().to_string();
        let headers = sign::sign_request(
            &self.credentials,
            &self.region,
            &host,
            url.path(),
            &body,
            chrono::Utc::now(),
        )?;

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Osc-Date", headers.date)
            .header("Authorization", headers.authorization)
            .body(body)
            .send()
            .await
            .context(Transport { action })?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.context(Transport { action });
        }

        let body = response.text().await.unwrap_or_default();
        match error::parse_api_error(&body) {
            ParsedApiError::Api(errors) => Err(CloudError::Api {
                action,
                status: status.as_u16(),
                errors,
            }),
            ParsedApiError::Raw(body) => Err(CloudError::ApiRaw {
                action,
                status: status.as_u16(),
                body,
            }),
        }
    }
}

#[async_trait]
impl OscApi for HttpOscApi {
    async fn create_volume(
        &self,
        request: models::CreateVolumeRequest,
    ) -> Result<models::Volume, CloudError> {
        let response: models::CreateVolumeResponse = self.call("CreateVolume", &request).await?;
        Ok(response.volume)
    }

    async fn read_volumes(
        &self,
        request: models::ReadVolumesRequest,
    ) -> Result<models::ReadVolumesResponse, CloudError> {
        self.call("ReadVolumes", &request).await
    }

    async fn update_volume(
        &self,
        request: models::UpdateVolumeRequest,
    ) -> Result<models::Volume, CloudError> {
        let response: models::UpdateVolumeResponse = self.call("UpdateVolume", &request).await?;
        Ok(response.volume)
    }

    async fn delete_volume(
        &self,
        request: models::DeleteVolumeRequest,
    ) -> Result<(), CloudError> {
        let _: serde_json::Value = self.call("DeleteVolume", &request).await?;
        Ok(())
    }

    async fn link_volume(&self, request: models::LinkVolumeRequest) -> Result<(), CloudError> {
        let _: serde_json::Value = self.call("LinkVolume", &request).await?;
        Ok(())
    }

    async fn unlink_volume(&self, request: models::UnlinkVolumeRequest) -> Result<(), CloudError> {
        let _: serde_json::Value = self.call("UnlinkVolume", &request).await?;
        Ok(())
    }

    async fn create_snapshot(
        &self,
        request: models::CreateSnapshotRequest,
    ) -> Result<models::Snapshot, CloudError> {
        let response: models::CreateSnapshotResponse = self.call("CreateSnapshot", &request).await?;
        Ok(response.snapshot)
    }

    async fn read_snapshots(
        &self,
        request: models::ReadSnapshotsRequest,
    ) -> Result<models::ReadSnapshotsResponse, CloudError> {
        self.call("ReadSnapshots", &request).await
    }

    async fn delete_snapshot(
        &self,
        request: models::DeleteSnapshotRequest,
    ) -> Result<(), CloudError> {
        let _: serde_json::Value = self.call("DeleteSnapshot", &request).await?;
        Ok(())
    }

    async fn create_tags(&self, request: models::CreateTagsRequest) -> Result<(), CloudError> {
        let _: serde_json::Value = self.call("CreateTags", &request).await?;
        Ok(())
    }

    async fn read_vms(
        &self,
        request: models::ReadVmsRequest,
    ) -> Result<models::ReadVmsResponse, CloudError> {
        self.call("ReadVms", &request).await
    }

    async fn read_subregions(&self) -> Result<models::ReadSubregionsResponse, CloudError> {
        self.call("ReadSubregions", &models::ReadSubregionsRequest::default())
            .await
    }
}
