//! CSI Controller service: volume and snapshot lifecycle over the cloud
//! coordinator.

use crate::{
    csi, DEVICE_PATH_KEY, ENCRYPTED_KEY, IOPS_PER_GB_KEY, LUKS_CIPHER_KEY, LUKS_HASH_KEY,
    LUKS_KEY_SIZE_KEY, TOPOLOGY_ZONE_KEY, VOLUME_TYPE_KEY, WELL_KNOWN_ZONE_KEY,
};
use cloud::{error::grpc_code, Cloud, CloudError};
use common_lib::{
    bytes_to_gib_round_up, gib_to_bytes, is_reserved_tag_key,
    types::{Snapshot, SnapshotOptions, SnapshotState, Volume, VolumeOptions, VolumeType},
    GIB,
};
use std::collections::HashMap;
use tonic::{Request, Response, Status};

/// Capacity used when the request carries no range.
const DEFAULT_VOLUME_SIZE_BYTES: u64 = 100 * GIB;

/// CSI Controller service.
pub struct ControllerService {
    cloud: Cloud,
    extra_volume_tags: HashMap<String, String>,
}

impl ControllerService {
    /// Controller over `cloud`, tagging every created volume with
    /// `extra_volume_tags` on top of the name tag.
    pub fn new(cloud: Cloud, extra_volume_tags: HashMap<String, String>) -> Self {
        Self {
            cloud,
            extra_volume_tags,
        }
    }

    fn status(error: CloudError) -> Status {
        Status::new(grpc_code(&error), error.to_string())
    }
}

/// Parsed `CreateVolumeRequest.parameters`.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
struct Parameters {
    volume_type: VolumeType,
    iops_per_gib: u32,
    encrypted: bool,
    luks_cipher: Option<String>,
    luks_hash: Option<String>,
    luks_key_size: Option<String>,
}

fn parse_parameters(parameters: &HashMap<String, String>) -> Result<Parameters, Status> {
    let mut parsed = Parameters::default();
    for (key, value) in parameters {
        match key.as_str() {
            VOLUME_TYPE_KEY => {
                parsed.volume_type = VolumeType::parse(value).ok_or_else(|| {
                    Status::invalid_argument(format!("unknown volume type '{}'", value))
                })?;
            }
            IOPS_PER_GB_KEY => {
                parsed.iops_per_gib = value.parse().map_err(|_| {
                    Status::invalid_argument(format!("'{}' is not a valid iops ratio", value))
                })?;
            }
            ENCRYPTED_KEY => parsed.encrypted = value == "true",
            LUKS_CIPHER_KEY => parsed.luks_cipher = Some(value.clone()),
            LUKS_HASH_KEY => parsed.luks_hash = Some(value.clone()),
            LUKS_KEY_SIZE_KEY => parsed.luks_key_size = Some(value.clone()),
            _ => {
                return Err(Status::invalid_argument(format!(
                    "unknown parameter key '{}'",
                    key
                )))
            }
        }
    }
    Ok(parsed)
}

/// Size to provision, rounded up to GiB, checked against the range limit.
fn requested_size_bytes(range: Option<&csi::CapacityRange>) -> Result<u64, Status> {
    let range = match range {
        None => return Ok(DEFAULT_VOLUME_SIZE_BYTES),
        Some(range) => range,
    };
    let required = range.required_bytes.max(0) as u64;
    let limit = range.limit_bytes.max(0) as u64;
    let size = if required > 0 {
        required
    } else if limit > 0 {
        limit
    } else {
        DEFAULT_VOLUME_SIZE_BYTES
    };
    let rounded = gib_to_bytes(bytes_to_gib_round_up(size).max(1));
    if limit > 0 && rounded > limit {
        return Err(Status::invalid_argument(format!(
            "capacity {} rounded up to the GiB boundary exceeds the limit of {} bytes",
            size, limit
        )));
    }
    Ok(rounded)
}

fn validate_capabilities(capabilities: &[csi::VolumeCapability]) -> Result<(), Status> {
    use csi::volume_capability::access_mode::Mode;
    if capabilities.is_empty() {
        return Err(Status::invalid_argument(
            "volume capabilities missing in request",
        ));
    }
    for capability in capabilities {
        let mode = capability
            .access_mode
            .as_ref()
            .map(|access| access.mode)
            .unwrap_or_default();
        if mode != Mode::SingleNodeWriter as i32 && mode != Mode::SingleNodeReaderOnly as i32 {
            return Err(Status::invalid_argument(
                "only single-node access modes are supported",
            ));
        }
    }
    Ok(())
}

/// Zone requested through the topology requirement, preferred entries first.
fn pick_zone(requirement: Option<&csi::TopologyRequirement>) -> Option<String> {
    let requirement = requirement?;
    requirement
        .preferred
        .iter()
        .chain(requirement.requisite.iter())
        .find_map(|topology| {
            topology
                .segments
                .get(TOPOLOGY_ZONE_KEY)
                .or_else(|| topology.segments.get(WELL_KNOWN_ZONE_KEY))
                .filter(|zone| !zone.is_empty())
                .cloned()
        })
}

fn snapshot_source(source: Option<&csi::VolumeContentSource>) -> Result<Option<String>, Status> {
    match source.and_then(|source| source.r#type.as_ref()) {
        None => Ok(None),
        Some(csi::volume_content_source::Type::Snapshot(snapshot)) => {
            if snapshot.snapshot_id.is_empty() {
                Err(Status::invalid_argument("content source misses the snapshot id"))
            } else {
                Ok(Some(snapshot.snapshot_id.clone()))
            }
        }
        Some(csi::volume_content_source::Type::Volume(_)) => Err(Status::invalid_argument(
            "volume cloning is not supported",
        )),
    }
}

fn volume_context(parameters: &Parameters) -> HashMap<String, String> {
    let mut context = HashMap::new();
    if parameters.encrypted {
        context.insert(ENCRYPTED_KEY.to_string(), "true".to_string());
        if let Some(cipher) = &parameters.luks_cipher {
            context.insert(LUKS_CIPHER_KEY.to_string(), cipher.clone());
        }
        if let Some(hash) = &parameters.luks_hash {
            context.insert(LUKS_HASH_KEY.to_string(), hash.clone());
        }
        if let Some(key_size) = &parameters.luks_key_size {
            context.insert(LUKS_KEY_SIZE_KEY.to_string(), key_size.clone());
        }
    }
    context
}

fn csi_volume(volume: &Volume, context: HashMap<String, String>) -> csi::Volume {
    let mut segments = HashMap::new();
    segments.insert(TOPOLOGY_ZONE_KEY.to_string(), volume.subregion_name.clone());
    csi::Volume {
        capacity_bytes: volume.size_bytes() as i64,
        volume_id: volume.volume_id.clone(),
        volume_context: context,
        content_source: volume.snapshot_id.as_ref().map(|snapshot_id| {
            csi::VolumeContentSource {
                r#type: Some(csi::volume_content_source::Type::Snapshot(
                    csi::volume_content_source::SnapshotSource {
                        snapshot_id: snapshot_id.clone(),
                    },
                )),
            }
        }),
        accessible_topology: vec![csi::Topology { segments }],
    }
}

fn csi_snapshot(snapshot: &Snapshot) -> csi::Snapshot {
    let creation_time = snapshot
        .creation_date
        .as_deref()
        .and_then(|date| chrono::DateTime::parse_from_rfc3339(date).ok())
        .map(|date| prost_types::Timestamp {
            seconds: date.timestamp(),
            nanos: date.timestamp_subsec_nanos() as i32,
        });
    csi::Snapshot {
        size_bytes: snapshot.size_bytes() as i64,
        snapshot_id: snapshot.snapshot_id.clone(),
        source_volume_id: snapshot.volume_id.clone(),
        creation_time,
        ready_to_use: snapshot.ready_to_use(),
    }
}

#[tonic::async_trait]
impl csi::controller_server::Controller for ControllerService {
    async fn create_volume(
        &self,
        request: Request<csi::CreateVolumeRequest>,
    ) -> Result<Response<csi::CreateVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.name.is_empty() {
            return Err(Status::invalid_argument("volume name missing in request"));
        }
        validate_capabilities(&request.volume_capabilities)?;
        let size_bytes = requested_size_bytes(request.capacity_range.as_ref())?;
        let parameters = parse_parameters(&request.parameters)?;
        let snapshot_id = snapshot_source(request.volume_content_source.as_ref())?;

        // reserved keys never reach the provider
        if let Some(key) = self
            .extra_volume_tags
            .keys()
            .find(|key| is_reserved_tag_key(key))
        {
            return Err(Status::invalid_argument(format!(
                "tag key '{}' is reserved for the driver",
                key
            )));
        }

        tracing::info!(name = %request.name, size_bytes, "CreateVolume request");

        match self
            .cloud
            .get_disk_by_name(&request.name, size_bytes, snapshot_id.as_deref())
            .await
        {
            Ok(Some(existing)) => {
                return Ok(Response::new(csi::CreateVolumeResponse {
                    volume: Some(csi_volume(&existing, volume_context(&parameters))),
                }));
            }
            Ok(None) => {}
            Err(error) => return Err(Self::status(error)),
        }

        let options = VolumeOptions {
            capacity_bytes: size_bytes,
            tags: self.extra_volume_tags.clone(),
            volume_type: parameters.volume_type,
            iops_per_gib: parameters.iops_per_gib,
            subregion_name: pick_zone(request.accessibility_requirements.as_ref()),
            encrypted: parameters.encrypted,
            snapshot_id,
            kms_key_id: None,
        };
        let volume = self
            .cloud
            .create_volume(&request.name, &options)
            .await
            .map_err(Self::status)?;

        Ok(Response::new(csi::CreateVolumeResponse {
            volume: Some(csi_volume(&volume, volume_context(&parameters))),
        }))
    }

    async fn delete_volume(
        &self,
        request: Request<csi::DeleteVolumeRequest>,
    ) -> Result<Response<csi::DeleteVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume id missing in request"));
        }
        match self.cloud.delete_volume(&request.volume_id).await {
            Ok(()) => {}
            // deleting a volume that is already gone is a success
            Err(error) if error.is_not_found() => {
                tracing::warn!(volume = %request.volume_id, "volume already deleted");
            }
            Err(error) => return Err(Self::status(error)),
        }
        Ok(Response::new(csi::DeleteVolumeResponse {}))
    }

    async fn controller_publish_volume(
        &self,
        request: Request<csi::ControllerPublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerPublishVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume id missing in request"));
        }
        if request.node_id.is_empty() {
            return Err(Status::invalid_argument("node id missing in request"));
        }
        let capability = request
            .volume_capability
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("volume capability missing in request"))?;
        validate_capabilities(std::slice::from_ref(capability))?;

        self.cloud
            .get_vm_by_id(&request.node_id)
            .await
            .map_err(Self::status)?;
        self.cloud
            .get_disk_by_id(&request.volume_id)
            .await
            .map_err(Self::status)?;

        let device = self
            .cloud
            .attach_volume(&request.volume_id, &request.node_id)
            .await
            .map_err(Self::status)?;
        tracing::info!(volume = %request.volume_id, node = %request.node_id, device = %device, "volume attached");

        let mut publish_context = HashMap::new();
        publish_context.insert(DEVICE_PATH_KEY.to_string(), device);
        for key in &[
            ENCRYPTED_KEY,
            LUKS_CIPHER_KEY,
            LUKS_HASH_KEY,
            LUKS_KEY_SIZE_KEY,
        ] {
            if let Some(value) = request.volume_context.get(*key) {
                publish_context.insert(key.to_string(), value.clone());
            }
        }
        Ok(Response::new(csi::ControllerPublishVolumeResponse {
            publish_context,
        }))
    }

    async fn controller_unpublish_volume(
        &self,
        request: Request<csi::ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerUnpublishVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume id missing in request"));
        }
        if request.node_id.is_empty() {
            return Err(Status::invalid_argument("node id missing in request"));
        }
        match self
            .cloud
            .detach_volume(&request.volume_id, &request.node_id)
            .await
        {
            Ok(()) => {}
            // the volume or the attachment is already gone
            Err(error) if error.is_not_found() => {
                tracing::warn!(volume = %request.volume_id, "volume already detached");
            }
            Err(error) => return Err(Self::status(error)),
        }
        Ok(Response::new(csi::ControllerUnpublishVolumeResponse {}))
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<csi::ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<csi::ValidateVolumeCapabilitiesResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume id missing in request"));
        }
        self.cloud
            .get_disk_by_id(&request.volume_id)
            .await
            .map_err(Self::status)?;

        let response = match validate_capabilities(&request.volume_capabilities) {
            Ok(()) => csi::ValidateVolumeCapabilitiesResponse {
                confirmed: Some(csi::validate_volume_capabilities_response::Confirmed {
                    volume_context: request.volume_context,
                    volume_capabilities: request.volume_capabilities,
                    parameters: request.parameters,
                }),
                message: String::new(),
            },
            Err(status) => csi::ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: status.message().to_string(),
            },
        };
        Ok(Response::new(response))
    }

    async fn list_volumes(
        &self,
        _request: Request<csi::ListVolumesRequest>,
    ) -> Result<Response<csi::ListVolumesResponse>, Status> {
        Err(Status::unimplemented("ListVolumes is not supported"))
    }

    async fn get_capacity(
        &self,
        _request: Request<csi::GetCapacityRequest>,
    ) -> Result<Response<csi::GetCapacityResponse>, Status> {
        Err(Status::unimplemented("GetCapacity is not supported"))
    }

    async fn controller_get_capabilities(
        &self,
        _request: Request<csi::ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<csi::ControllerGetCapabilitiesResponse>, Status> {
        use csi::controller_service_capability::{rpc, Rpc, Type};
        let capabilities = [
            rpc::Type::CreateDeleteVolume,
            rpc::Type::PublishUnpublishVolume,
            rpc::Type::CreateDeleteSnapshot,
            rpc::Type::ListSnapshots,
            rpc::Type::ExpandVolume,
        ]
        .iter()
        .map(|capability| csi::ControllerServiceCapability {
            r#type: Some(Type::Rpc(Rpc {
                r#type: *capability as i32,
            })),
        })
        .collect();
        Ok(Response::new(csi::ControllerGetCapabilitiesResponse {
            capabilities,
        }))
    }

    async fn create_snapshot(
        &self,
        request: Request<csi::CreateSnapshotRequest>,
    ) -> Result<Response<csi::CreateSnapshotResponse>, Status> {
        let request = request.into_inner();
        if request.name.is_empty() {
            return Err(Status::invalid_argument("snapshot name missing in request"));
        }
        if request.source_volume_id.is_empty() {
            return Err(Status::invalid_argument(
                "source volume id missing in request",
            ));
        }

        match self.cloud.get_snapshot_by_name(&request.name).await {
            Ok(Some(existing)) => {
                if existing.volume_id != request.source_volume_id {
                    return Err(Status::already_exists(format!(
                        "snapshot '{}' exists for a different source volume",
                        request.name
                    )));
                }
                if existing.state == SnapshotState::Error {
                    // the provider parks over-quota snapshots in error state
                    return Err(Status::resource_exhausted(format!(
                        "snapshot '{}' is in error state",
                        request.name
                    )));
                }
                return Ok(Response::new(csi::CreateSnapshotResponse {
                    snapshot: Some(csi_snapshot(&existing)),
                }));
            }
            Ok(None) => {}
            Err(error) => return Err(Self::status(error)),
        }

        let snapshot = self
            .cloud
            .create_snapshot(
                &request.name,
                &request.source_volume_id,
                &SnapshotOptions::default(),
            )
            .await
            .map_err(Self::status)?;
        Ok(Response::new(csi::CreateSnapshotResponse {
            snapshot: Some(csi_snapshot(&snapshot)),
        }))
    }

    async fn delete_snapshot(
        &self,
        request: Request<csi::DeleteSnapshotRequest>,
    ) -> Result<Response<csi::DeleteSnapshotResponse>, Status> {
        let request = request.into_inner();
        if request.snapshot_id.is_empty() {
            return Err(Status::invalid_argument("snapshot id missing in request"));
        }
        match self.cloud.delete_snapshot(&request.snapshot_id).await {
            Ok(()) => {}
            Err(error) if error.is_not_found() => {
                tracing::warn!(snapshot = %request.snapshot_id, "snapshot already deleted");
            }
            Err(error) => return Err(Self::status(error)),
        }
        Ok(Response::new(csi::DeleteSnapshotResponse {}))
    }

    async fn list_snapshots(
        &self,
        request: Request<csi::ListSnapshotsRequest>,
    ) -> Result<Response<csi::ListSnapshotsResponse>, Status> {
        let request = request.into_inner();

        if !request.snapshot_id.is_empty() {
            let entries = match self.cloud.get_snapshot_by_id(&request.snapshot_id).await {
                Ok(snapshot) => vec![csi::list_snapshots_response::Entry {
                    snapshot: Some(csi_snapshot(&snapshot)),
                }],
                Err(error) if error.is_not_found() => Vec::new(),
                Err(error) => return Err(Self::status(error)),
            };
            return Ok(Response::new(csi::ListSnapshotsResponse {
                entries,
                next_token: String::new(),
            }));
        }

        if request.max_entries < 0 {
            return Err(Status::invalid_argument("max entries must not be negative"));
        }
        let max_entries = if request.max_entries > 0 {
            Some(request.max_entries as u32)
        } else {
            None
        };
        let starting_token = if request.starting_token.is_empty() {
            None
        } else {
            Some(request.starting_token.clone())
        };
        let source_volume = if request.source_volume_id.is_empty() {
            None
        } else {
            Some(request.source_volume_id.as_str())
        };

        let (snapshots, next_token) = self
            .cloud
            .list_snapshots(source_volume, max_entries, starting_token)
            .await
            .map_err(Self::status)?;
        Ok(Response::new(csi::ListSnapshotsResponse {
            entries: snapshots
                .iter()
                .map(|snapshot| csi::list_snapshots_response::Entry {
                    snapshot: Some(csi_snapshot(snapshot)),
                })
                .collect(),
            next_token: next_token.unwrap_or_default(),
        }))
    }

    async fn controller_expand_volume(
        &self,
        request: Request<csi::ControllerExpandVolumeRequest>,
    ) -> Result<Response<csi::ControllerExpandVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume id missing in request"));
        }
        let range = request
            .capacity_range
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("capacity range missing in request"))?;
        let new_size = if range.required_bytes > 0 {
            range.required_bytes
        } else {
            range.limit_bytes
        };
        if new_size <= 0 {
            return Err(Status::invalid_argument(
                "capacity range carries no positive size",
            ));
        }

        let capacity_bytes = self
            .cloud
            .resize_volume(&request.volume_id, new_size as u64)
            .await
            .map_err(Self::status)?;

        let block_access = matches!(
            request
                .volume_capability
                .as_ref()
                .and_then(|capability| capability.access_type.as_ref()),
            Some(csi::volume_capability::AccessType::Block(_))
        );
        Ok(Response::new(csi::ControllerExpandVolumeResponse {
            capacity_bytes: capacity_bytes as i64,
            node_expansion_required: !block_access,
        }))
    }

    async fn controller_get_volume(
        &self,
        _request: Request<csi::ControllerGetVolumeRequest>,
    ) -> Result<Response<csi::ControllerGetVolumeResponse>, Status> {
        Err(Status::unimplemented("ControllerGetVolume is not supported"))
    }
}
