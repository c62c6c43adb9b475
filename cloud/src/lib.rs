//! Provider-facing engine of the BSU CSI driver: API client, retry policy,
//! batched state watchers, device-name bookkeeping and the lifecycle
//! coordinator the CSI services are built on.

pub mod api;
pub mod backoff;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod watcher;

pub use coordinator::Cloud;
pub use error::CloudError;
