use super::volume::VolumeType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Creation parameters for a volume, assembled by the controller service and
/// consumed by the cloud coordinator.
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeOptions {
    /// requested capacity in bytes, rounded up to GiB by the coordinator
    pub capacity_bytes: u64,
    /// tags to apply on the created volume, on top of the name tag
    pub tags: HashMap<String, String>,
    /// volume performance class
    pub volume_type: VolumeType,
    /// iops per GiB, meaningful for `Io1` only
    pub iops_per_gib: u32,
    /// target subregion; defaults to `<region>a` when empty
    pub subregion_name: Option<String>,
    /// whether the node must wrap the device in LUKS
    pub encrypted: bool,
    /// snapshot to hydrate the volume from
    pub snapshot_id: Option<String>,
    /// provider-side KMS key binding, not supported by this driver
    pub kms_key_id: Option<String>,
}

impl VolumeOptions {
    /// Requested capacity in GiB, rounded up.
    pub fn capacity_gib(&self) -> u64 {
        crate::bytes_to_gib_round_up(self.capacity_bytes)
    }
}

/// Creation parameters for a snapshot.
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotOptions {
    /// tags to apply on the created snapshot, on top of the name tag
    pub tags: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GIB;

    #[test]
    fn capacity_rounds_up() {
        let options = VolumeOptions {
            capacity_bytes: GIB + 1,
            ..Default::default()
        };
        assert_eq!(options.capacity_gib(), 2);
    }
}
