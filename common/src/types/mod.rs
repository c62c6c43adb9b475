pub mod options;
pub mod snapshot;
pub mod vm;
pub mod volume;

pub use options::{SnapshotOptions, VolumeOptions};
pub use snapshot::{Snapshot, SnapshotState};
pub use vm::{BlockDeviceMapping, Vm};
pub use volume::{LinkedVolume, LinkedVolumeState, Volume, VolumeState, VolumeType};
