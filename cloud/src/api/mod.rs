//! Provider API surface: wire models, the client trait the coordinator is
//! written against, and the production HTTP transport.

pub mod http;
pub mod models;
pub mod sign;

use crate::error::CloudError;
use async_trait::async_trait;
use common_lib::types::{
    BlockDeviceMapping, LinkedVolume, LinkedVolumeState, Snapshot, SnapshotState, Vm, Volume,
    VolumeState, VolumeType,
};
use std::{convert::TryFrom, str::FromStr};

pub use http::HttpOscApi;

/// The provider endpoints the driver calls. The coordinator only ever talks
/// through this trait; tests inject scripted fakes, production uses
/// [`HttpOscApi`].
#[async_trait]
pub trait OscApi: Send + Sync + 'static {
    async fn create_volume(
        &self,
        request: models::CreateVolumeRequest,
    ) -> Result<models::Volume, CloudError>;

    async fn read_volumes(
        &self,
        request: models::ReadVolumesRequest,
    ) -> Result<models::ReadVolumesResponse, CloudError>;

    async fn update_volume(
        &self,
        request: models::UpdateVolumeRequest,
    ) -> Result<models::Volume, CloudError>;

    async fn delete_volume(&self, request: models::DeleteVolumeRequest)
        -> Result<(), CloudError>;

    async fn link_volume(&self, request: models::LinkVolumeRequest) -> Result<(), CloudError>;

    async fn unlink_volume(&self, request: models::UnlinkVolumeRequest) -> Result<(), CloudError>;

    async fn create_snapshot(
        &self,
        request: models::CreateSnapshotRequest,
    ) -> Result<models::Snapshot, CloudError>;

    async fn read_snapshots(
        &self,
        request: models::ReadSnapshotsRequest,
    ) -> Result<models::ReadSnapshotsResponse, CloudError>;

    async fn delete_snapshot(
        &self,
        request: models::DeleteSnapshotRequest,
    ) -> Result<(), CloudError>;

    async fn create_tags(&self, request: models::CreateTagsRequest) -> Result<(), CloudError>;

    async fn read_vms(
        &self,
        request: models::ReadVmsRequest,
    ) -> Result<models::ReadVmsResponse, CloudError>;

    async fn read_subregions(&self) -> Result<models::ReadSubregionsResponse, CloudError>;
}

fn parse_state<T: FromStr>(resource: &'static str, id: &str, state: &str) -> Result<T, CloudError> {
    T::from_str(state).map_err(|_| CloudError::Internal {
        reason: format!("unknown {} state '{}' on '{}'", resource, state, id),
    })
}

fn none_if_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

impl TryFrom<models::Volume> for Volume {
    type Error = CloudError;

    fn try_from(src: models::Volume) -> Result<Self, Self::Error> {
        let state: VolumeState = parse_state("volume", &src.volume_id, &src.state)?;
        let volume_type: VolumeType = parse_state("volume type", &src.volume_id, &src.volume_type)?;
        let linked_volumes = src
            .linked_volumes
            .into_iter()
            .map(|link| {
                let state: LinkedVolumeState =
                    parse_state("linked volume", &link.volume_id, &link.state)?;
                Ok(LinkedVolume {
                    vm_id: link.vm_id,
                    device_name: link.device_name,
                    state,
                })
            })
            .collect::<Result<Vec<_>, CloudError>>()?;
        Ok(Volume {
            volume_id: src.volume_id,
            size_gib: src.size,
            subregion_name: src.subregion_name,
            snapshot_id: none_if_empty(src.snapshot_id),
            volume_type,
            iops: src.iops,
            state,
            linked_volumes,
        })
    }
}

impl TryFrom<models::Snapshot> for Snapshot {
    type Error = CloudError;

    fn try_from(src: models::Snapshot) -> Result<Self, Self::Error> {
        let state: SnapshotState = parse_state("snapshot", &src.snapshot_id, &src.state)?;
        Ok(Snapshot {
            snapshot_id: src.snapshot_id,
            volume_id: src.volume_id,
            volume_size_gib: src.volume_size,
            creation_date: none_if_empty(src.creation_date),
            state,
        })
    }
}

impl From<models::Vm> for Vm {
    fn from(src: models::Vm) -> Self {
        Vm {
            vm_id: src.vm_id,
            vm_type: src.vm_type,
            subregion_name: src.placement.subregion_name,
            block_device_mappings: src
                .block_device_mappings
                .into_iter()
                .map(|mapping| BlockDeviceMapping {
                    device_name: mapping.device_name,
                    volume_id: mapping.bsu.volume_id,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_conversion() {
        let wire = models::Volume {
            volume_id: "vol-1".into(),
            size: 5,
            state: "in-use".into(),
            subregion_name: "eu-west-2a".into(),
            volume_type: "io1".into(),
            iops: Some(500),
            snapshot_id: Some(String::new()),
            linked_volumes: vec![models::LinkedVolume {
                device_name: "/dev/xvdb".into(),
                state: "attached".into(),
                vm_id: "i-1".into(),
                volume_id: "vol-1".into(),
            }],
            ..Default::default()
        };
        let volume = Volume::try_from(wire).unwrap();
        assert_eq!(volume.state, VolumeState::InUse);
        assert_eq!(volume.volume_type, VolumeType::Io1);
        assert_eq!(volume.snapshot_id, None);
        assert_eq!(volume.linked_volumes[0].state, LinkedVolumeState::Attached);
    }

    #[test]
    fn unknown_state_is_rejected() {
        let wire = models::Volume {
            volume_id: "vol-1".into(),
            state: "melting".into(),
            volume_type: "gp2".into(),
            ..Default::default()
        };
        assert!(Volume::try_from(wire).is_err());
    }

    #[test]
    fn vm_conversion_flattens_placement() {
        let wire = models::Vm {
            vm_id: "i-1".into(),
            vm_type: "tinav5.c2r4p1".into(),
            placement: models::Placement {
                subregion_name: "eu-west-2a".into(),
            },
            block_device_mappings: vec![models::BlockDeviceMappingCreated {
                device_name: "/dev/sda1".into(),
                bsu: models::Bsu {
                    volume_id: "vol-root".into(),
                    state: "attached".into(),
                },
            }],
            ..Default::default()
        };
        let vm = Vm::from(wire);
        assert_eq!(vm.subregion_name, "eu-west-2a");
        assert_eq!(vm.device_for_volume("vol-root"), Some("/dev/sda1"));
    }
}
