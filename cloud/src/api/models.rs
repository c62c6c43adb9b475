//! Wire models for the provider's OAPI endpoints.
//!
//! Field names follow the provider's JSON casing; empty collections and
//! absent optionals are skipped on serialization so request bodies stay
//! minimal.

use serde::{Deserialize, Serialize};

/// A `{Key, Value}` tag on a provider resource.
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceTag {
    pub key: String,
    pub value: String,
}

impl ResourceTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CreateVolumeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iops: Option<u32>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    pub subregion_name: String,
    pub volume_type: String,
}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct CreateVolumeResponse {
    pub volume: Volume,
}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Volume {
    pub volume_id: String,
    pub size: u64,
    pub iops: Option<u32>,
    pub snapshot_id: Option<String>,
    pub state: String,
    pub subregion_name: String,
    pub volume_type: String,
    pub linked_volumes: Vec<LinkedVolume>,
    pub tags: Vec<ResourceTag>,
}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct LinkedVolume {
    pub device_name: String,
    pub state: String,
    pub vm_id: String,
    pub volume_id: String,
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct FiltersVolume {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volume_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tag_keys: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tag_values: Vec<String>,
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ReadVolumesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<FiltersVolume>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_per_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ReadVolumesResponse {
    pub volumes: Vec<Volume>,
    pub next_page_token: Option<String>,
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateVolumeRequest {
    pub volume_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iops: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct UpdateVolumeResponse {
    pub volume: Volume,
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteVolumeRequest {
    pub volume_id: String,
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct LinkVolumeRequest {
    pub device_name: String,
    pub vm_id: String,
    pub volume_id: String,
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct UnlinkVolumeRequest {
    pub volume_id: String,
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CreateSnapshotRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub volume_id: String,
}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct CreateSnapshotResponse {
    pub snapshot: Snapshot,
}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Snapshot {
    pub snapshot_id: String,
    pub volume_id: String,
    pub volume_size: u64,
    pub state: String,
    pub description: Option<String>,
    pub creation_date: Option<String>,
    pub tags: Vec<ResourceTag>,
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct FiltersSnapshot {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub snapshot_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volume_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tag_keys: Vec<String>,
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ReadSnapshotsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<FiltersSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_per_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ReadSnapshotsResponse {
    pub snapshots: Vec<Snapshot>,
    pub next_page_token: Option<String>,
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteSnapshotRequest {
    pub snapshot_id: String,
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CreateTagsRequest {
    pub resource_ids: Vec<String>,
    pub tags: Vec<ResourceTag>,
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct FiltersVm {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vm_ids: Vec<String>,
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ReadVmsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<FiltersVm>,
}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ReadVmsResponse {
    pub vms: Vec<Vm>,
}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Vm {
    pub vm_id: String,
    pub vm_type: String,
    pub placement: Placement,
    pub block_device_mappings: Vec<BlockDeviceMappingCreated>,
    pub state: String,
}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Placement {
    pub subregion_name: String,
}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct BlockDeviceMappingCreated {
    pub device_name: String,
    pub bsu: Bsu,
}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Bsu {
    pub volume_id: String,
    pub state: String,
}

#[derive(Serialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ReadSubregionsRequest {}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ReadSubregionsResponse {
    pub subregions: Vec<Subregion>,
}

#[derive(Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Subregion {
    pub region_name: String,
    pub subregion_name: String,
    pub state: String,
}
