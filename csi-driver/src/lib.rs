//! CSI plugin for Outscale BSU volumes.
//!
//! Serves the CSI Identity, Controller and Node services over a local UNIX
//! socket. The controller side drives the provider API through the `cloud`
//! crate; the node side prepares block devices for pods.

pub mod controller;
pub mod identity;
pub mod inflight;
pub mod metadata;
pub mod node;

#[allow(dead_code)]
#[allow(clippy::type_complexity)]
#[allow(clippy::unit_arg)]
#[allow(clippy::redundant_closure)]
#[allow(clippy::enum_variant_names)]
#[allow(clippy::upper_case_acronyms)]
pub mod csi {
    tonic::include_proto!("csi.v1");
}

/// CSI driver name, as registered with the orchestrator.
pub const DRIVER_NAME: &str = "bsu.csi.outscale.com";

/// Driver-specific topology key carrying the availability zone.
pub const TOPOLOGY_ZONE_KEY: &str = "topology.bsu.csi.outscale.com/zone";
/// Orchestrator-generic topology key carrying the availability zone.
pub const WELL_KNOWN_ZONE_KEY: &str = "topology.kubernetes.io/zone";

/// `CreateVolumeRequest.parameters` key selecting the volume type.
pub const VOLUME_TYPE_KEY: &str = "type";
/// `CreateVolumeRequest.parameters` key selecting the iops ratio for `io1`.
pub const IOPS_PER_GB_KEY: &str = "iopsPerGB";
/// `CreateVolumeRequest.parameters` key enabling LUKS encryption.
pub const ENCRYPTED_KEY: &str = "encrypted";
/// LUKS tuning keys, passed through to `cryptsetup luksFormat`.
pub const LUKS_CIPHER_KEY: &str = "luksCipher";
pub const LUKS_HASH_KEY: &str = "luksHash";
pub const LUKS_KEY_SIZE_KEY: &str = "luksKeySize";

/// Publish-context key carrying the device path from controller to node.
pub const DEVICE_PATH_KEY: &str = "devicePath";

/// Secret key carrying the LUKS passphrase.
pub const LUKS_PASSPHRASE_KEY: &str = "luks/passphrase";

/// Environment variable overriding the advertised volume limit per node.
pub const MAX_VOLUMES_ENV: &str = "MAX_BSU_VOLUMES";

/// Filesystem used when neither the request nor the device carries one.
pub const DEFAULT_FS_TYPE: &str = "ext4";
