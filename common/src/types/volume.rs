use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// Minimum provisioned iops accepted by the provider for `Io1` volumes.
pub const MIN_IOPS: u32 = 100;
/// Maximum provisioned iops accepted by the provider for `Io1` volumes.
pub const MAX_IOPS: u32 = 13000;
/// Iops-per-GiB ratios above this value are treated as this value.
pub const MAX_IOPS_PER_GIB: u32 = 300;

/// Volume information as reported by the provider.
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// provider-assigned volume identifier (`vol-` prefixed)
    pub volume_id: String,
    /// volume size in GiB
    pub size_gib: u64,
    /// subregion (availability zone) hosting the volume
    pub subregion_name: String,
    /// snapshot the volume was created from, if any
    pub snapshot_id: Option<String>,
    /// volume performance class
    pub volume_type: VolumeType,
    /// provisioned iops, meaningful for `Io1` only
    pub iops: Option<u32>,
    /// current lifecycle state
    pub state: VolumeState,
    /// attachments of this volume to instances
    pub linked_volumes: Vec<LinkedVolume>,
}

impl Volume {
    /// Volume size in bytes.
    pub fn size_bytes(&self) -> u64 {
        crate::gib_to_bytes(self.size_gib)
    }

    /// The attachment of this volume to the given instance, if any.
    pub fn link_to(&self, vm_id: &str) -> Option<&LinkedVolume> {
        self.linked_volumes.iter().find(|link| link.vm_id == vm_id)
    }

    /// True when any attachment of this volume reached the `Attached` state.
    pub fn attached(&self) -> bool {
        self.linked_volumes
            .iter()
            .any(|link| link.state == LinkedVolumeState::Attached)
    }
}

/// Attachment of a volume to an instance.
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LinkedVolume {
    /// instance the volume is linked to
    pub vm_id: String,
    /// device name on the instance, e.g. `/dev/xvdb`
    pub device_name: String,
    /// state of the attachment
    pub state: LinkedVolumeState,
}

/// State of a volume attachment.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LinkedVolumeState {
    Attaching,
    Attached,
    Detaching,
    Detached,
}

impl Default for LinkedVolumeState {
    fn default() -> Self {
        Self::Detached
    }
}

/// Volume lifecycle state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, EnumString, Display)]
#[strum(serialize_all = "kebab_case")]
#[serde(rename_all = "kebab-case")]
pub enum VolumeState {
    Creating,
    Available,
    InUse,
    Updating,
    Deleting,
    Error,
}

impl Default for VolumeState {
    fn default() -> Self {
        Self::Creating
    }
}

impl VolumeState {
    /// States in which the volume is usable by a caller.
    pub fn ready(&self) -> bool {
        matches!(self, Self::Available | Self::InUse)
    }
    /// Terminal states a wait must give up on.
    pub fn failed(&self) -> bool {
        matches!(self, Self::Error | Self::Deleting)
    }
}

/// Volume performance class.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    Standard,
    Gp2,
    Io1,
}

impl Default for VolumeType {
    fn default() -> Self {
        Self::Gp2
    }
}

impl VolumeType {
    /// Parse a storage-class `type` parameter.
    pub fn parse(source: &str) -> Option<Self> {
        Self::from_str(source).ok()
    }
}

/// Total provisioned iops for an `Io1` volume of `size_gib` with the given
/// iops-per-GiB ratio. The ratio is capped at [`MAX_IOPS_PER_GIB`] and the
/// product is clamped to the provider's accepted range.
pub fn compute_iops(size_gib: u64, iops_per_gib: u32) -> u32 {
    let ratio = iops_per_gib.min(MAX_IOPS_PER_GIB);
    let iops = (size_gib as u32).saturating_mul(ratio);
    iops.max(MIN_IOPS).min(MAX_IOPS)
}
