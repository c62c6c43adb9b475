use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Snapshot information as reported by the provider.
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// provider-assigned snapshot identifier (`snap-` prefixed)
    pub snapshot_id: String,
    /// volume the snapshot was taken from
    pub volume_id: String,
    /// size of the source volume in GiB
    pub volume_size_gib: u64,
    /// creation time, RFC 3339
    pub creation_date: Option<String>,
    /// current lifecycle state
    pub state: SnapshotState,
}

impl Snapshot {
    /// Snapshot size in bytes.
    pub fn size_bytes(&self) -> u64 {
        crate::gib_to_bytes(self.volume_size_gib)
    }

    /// A snapshot is usable as a volume source only once completed.
    pub fn ready_to_use(&self) -> bool {
        self.state == SnapshotState::Completed
    }
}

/// Snapshot lifecycle state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, EnumString, Display)]
#[strum(serialize_all = "kebab_case")]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotState {
    InQueue,
    Pending,
    Completed,
    Error,
    Deleting,
}

impl Default for SnapshotState {
    fn default() -> Self {
        Self::InQueue
    }
}

impl SnapshotState {
    /// States the completion wait keeps waiting through.
    pub fn in_progress(&self) -> bool {
        matches!(self, Self::InQueue | Self::Pending)
    }
    /// Terminal states a wait must give up on.
    pub fn failed(&self) -> bool {
        matches!(self, Self::Error | Self::Deleting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn ready_only_when_completed() {
        let mut snapshot = Snapshot {
            snapshot_id: "snap-1".into(),
            state: SnapshotState::Pending,
            ..Default::default()
        };
        assert!(!snapshot.ready_to_use());
        snapshot.state = SnapshotState::Completed;
        assert!(snapshot.ready_to_use());
    }

    #[test]
    fn state_strings_match_provider() {
        assert_eq!(
            SnapshotState::from_str("in-queue").unwrap(),
            SnapshotState::InQueue
        );
        assert_eq!(SnapshotState::InQueue.to_string(), "in-queue");
        assert_eq!(
            SnapshotState::from_str("completed").unwrap(),
            SnapshotState::Completed
        );
    }
}
