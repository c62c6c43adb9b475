//! Instance metadata service client (node mode only).

use async_trait::async_trait;
use snafu::{ResultExt, Snafu};

/// Well-known metadata endpoint inside an instance.
pub const METADATA_ENDPOINT: &str = "http://169.254.169.254/latest/meta-data";

/// Environment variable overriding the region (controller mode).
pub const REGION_ENV: &str = "OSC_REGION";

/// Metadata of the instance the plugin runs on.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct InstanceMetadata {
    pub instance_id: String,
    pub instance_type: String,
    pub availability_zone: String,
}

impl InstanceMetadata {
    /// The region, derived by discarding the zone's trailing letter.
    pub fn region(&self) -> String {
        let mut region = self.availability_zone.clone();
        region.pop();
        region
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
pub enum MetadataError {
    #[snafu(display("metadata request '{}' failed: {}", path, source))]
    Request { path: String, source: reqwest::Error },
    #[snafu(display("metadata request '{}' answered http {}", path, status))]
    Failed { path: String, status: u16 },
}

/// Fetches instance metadata. Production talks HTTP to the link-local
/// endpoint; tests return canned values.
#[async_trait]
pub trait MetadataService: Send + Sync + 'static {
    async fn fetch(&self) -> Result<InstanceMetadata, MetadataError>;
}

/// HTTP client for the metadata endpoint.
#[derive(Debug, Clone)]
pub struct HttpMetadataService {
    client: reqwest::Client,
    base: String,
}

impl HttpMetadataService {
    pub fn new() -> Self {
        Self::with_endpoint(METADATA_ENDPOINT)
    }

    pub fn with_endpoint(base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn get_text(&self, path: &str) -> Result<String, MetadataError> {
        let url = format!("{}/{}", self.base, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context(Request { path })?;
        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Failed {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await.context(Request { path })?;
        Ok(body.trim().to_string())
    }
}

impl Default for HttpMetadataService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataService for HttpMetadataService {
    async fn fetch(&self) -> Result<InstanceMetadata, MetadataError> {
        Ok(InstanceMetadata {
            instance_id: self.get_text("instance-id").await?,
            instance_type: self.get_text("instance-type").await?,
            availability_zone: self.get_text("placement/availability-zone").await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_discards_the_zone_letter() {
        let metadata = InstanceMetadata {
            availability_zone: "eu-west-2a".to_string(),
            ..Default::default()
        };
        assert_eq!(metadata.region(), "eu-west-2");
    }
}
