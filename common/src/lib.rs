pub mod types;

/// Tag key carrying the CSI volume name on provider volumes.
pub const VOLUME_NAME_TAG_KEY: &str = "CSIVolumeName";
/// Tag key carrying the CSI snapshot name on provider snapshots.
pub const SNAPSHOT_NAME_TAG_KEY: &str = "CSIVolumeSnapshotName";

/// Tag key prefixes owned by the orchestrator or the driver itself.
pub const RESERVED_TAG_PREFIXES: [&str; 2] = ["kubernetes.io", "osc:"];

/// Checks whether a caller-supplied tag key collides with a key the driver
/// manages itself.
pub fn is_reserved_tag_key(key: &str) -> bool {
    key == VOLUME_NAME_TAG_KEY
        || key == SNAPSHOT_NAME_TAG_KEY
        || RESERVED_TAG_PREFIXES
            .iter()
            .any(|prefix| key.starts_with(prefix))
}

/// Number of bytes in one gibibyte.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Converts a size in GiB to bytes.
pub fn gib_to_bytes(gib: u64) -> u64 {
    gib * GIB
}

/// Converts a size in bytes to GiB, rounding up to the next full gibibyte.
pub fn bytes_to_gib_round_up(bytes: u64) -> u64 {
    (bytes + GIB - 1) / GIB
}
