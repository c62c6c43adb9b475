//! CSI Node service: block-device preparation on the instance.

pub mod luks;
pub mod mount;

use crate::{
    csi, inflight::InFlight, metadata::InstanceMetadata, DEFAULT_FS_TYPE, DEVICE_PATH_KEY,
    ENCRYPTED_KEY, LUKS_CIPHER_KEY, LUKS_HASH_KEY, LUKS_KEY_SIZE_KEY, LUKS_PASSPHRASE_KEY,
    MAX_VOLUMES_ENV, TOPOLOGY_ZONE_KEY,
};
use luks::{LuksConfig, LuksOps};
use mount::{MountError, MountPoint, Mounter};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tonic::{Request, Response, Status};

/// Baseline attachment budget of an instance before subtracting the devices
/// the OS itself occupies.
const DEFAULT_MAX_VOLUMES: i64 = 40;

/// Prefix of open LUKS mappings.
const MAPPER_PREFIX: &str = "/dev/mapper/";

/// CSI Node service.
pub struct NodeService {
    node_id: String,
    zone: String,
    mounter: Arc<dyn Mounter>,
    luks: Arc<dyn LuksOps>,
    inflight: InFlight,
}

impl NodeService {
    /// Production service for the instance described by `metadata`.
    pub fn new(metadata: &InstanceMetadata) -> Self {
        Self::with_parts(
            &metadata.instance_id,
            &metadata.availability_zone,
            Arc::new(mount::ShellMounter::new()),
            Arc::new(luks::Cryptsetup::new()),
        )
    }

    /// Service over explicit collaborators (used by tests).
    pub fn with_parts(
        node_id: &str,
        zone: &str,
        mounter: Arc<dyn Mounter>,
        luks: Arc<dyn LuksOps>,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            zone: zone.to_string(),
            mounter,
            luks,
            inflight: InFlight::new(),
        }
    }

    /// Resolves the device to stage from the publish context.
    ///
    /// The controller hands over the name it linked the volume under
    /// (`/dev/xvdX`). Some kernels expose the device differently, in which
    /// case the canonical by-id entry for the same suffix points at it.
    fn resolve_device(&self, publish_context: &HashMap<String, String>) -> Result<PathBuf, Status> {
        let device = publish_context
            .get(DEVICE_PATH_KEY)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| Status::invalid_argument("publish context misses the device path"))?;
        let device_path = Path::new(device);
        if self.mounter.path_exists(device_path) {
            return Ok(device_path.to_path_buf());
        }

        let suffix = device
            .strip_prefix("/dev/xvd")
            .filter(|suffix| !suffix.is_empty())
            .ok_or_else(|| {
                Status::internal(format!("device '{}' not found on this node", device))
            })?;
        let by_id = PathBuf::from(format!(
            "/dev/disk/by-id/scsi-0QEMU_QEMU_HARDDISK_sd{}",
            suffix
        ));
        if !self.mounter.path_exists(&by_id) {
            return Err(Status::internal(format!(
                "neither '{}' nor '{}' exist on this node",
                device,
                by_id.display()
            )));
        }
        let resolved = self
            .mounter
            .resolve_link(&by_id)
            .map_err(internal)?;
        if !resolved.starts_with("/dev") {
            return Err(Status::internal(format!(
                "'{}' resolves outside /dev: '{}'",
                by_id.display(),
                resolved.display()
            )));
        }
        Ok(resolved)
    }

    async fn stage_mount_volume(
        &self,
        request: &csi::NodeStageVolumeRequest,
        fs_type: &str,
        mount_flags: &[String],
    ) -> Result<(), Status> {
        let mut source = self.resolve_device(&request.publish_context)?;
        let staging = Path::new(&request.staging_target_path);
        if !self.mounter.path_exists(staging) {
            self.mounter.make_dir_all(staging).map_err(internal)?;
        }

        let encrypted = request
            .publish_context
            .get(ENCRYPTED_KEY)
            .map(|value| value == "true")
            .unwrap_or(false);
        let mut opened_mapping = None;

        if encrypted {
            let passphrase = request
                .secrets
                .get(LUKS_PASSPHRASE_KEY)
                .filter(|secret| !secret.is_empty())
                .ok_or_else(|| {
                    Status::invalid_argument("encrypted volumes require the luks passphrase secret")
                })?;
            let name = luks::encrypted_name(&source);
            let mapped = luks::mapped_path(&name);

            if let Some(existing) = self.mounter.mount_at(staging).map_err(internal)? {
                if Path::new(&existing.device) == mapped {
                    return Ok(());
                }
            }
            if !self.luks.is_luks(&source).await {
                let config = LuksConfig {
                    cipher: request.publish_context.get(LUKS_CIPHER_KEY).cloned(),
                    hash: request.publish_context.get(LUKS_HASH_KEY).cloned(),
                    key_size: request.publish_context.get(LUKS_KEY_SIZE_KEY).cloned(),
                };
                self.luks
                    .format(&source, passphrase, &config)
                    .await
                    .map_err(internal)?;
            }
            self.luks
                .check_passphrase(&source, passphrase)
                .await
                .map_err(|_| Status::invalid_argument("luks passphrase does not open the volume"))?;
            if !self.luks.is_open(&name).await {
                self.luks
                    .open(&source, &name, passphrase)
                    .await
                    .map_err(internal)?;
            }
            opened_mapping = Some(name);
            source = mapped;
        } else if let Some(existing) = self.mounter.mount_at(staging).map_err(internal)? {
            if Path::new(&existing.device) == source {
                return Ok(());
            }
            // stale mount from an earlier incarnation: one unmount, then retry
            tracing::warn!(
                staging = %staging.display(),
                device = %existing.device,
                "staging path mounted from an unexpected device, remounting"
            );
            self.mounter.unmount(staging).await.map_err(internal)?;
        }

        let result = self.format_and_mount(&source, staging, fs_type, mount_flags).await;
        if result.is_err() {
            if let Some(name) = opened_mapping {
                if let Err(error) = self.luks.close(&name).await {
                    tracing::error!(mapping = %name, error = %error, "failed to close luks mapping");
                }
            }
        }
        result
    }

    async fn format_and_mount(
        &self,
        source: &Path,
        staging: &Path,
        requested_fs: &str,
        mount_flags: &[String],
    ) -> Result<(), Status> {
        let existing = self.mounter.get_disk_format(source).await.map_err(internal)?;
        let fs_type = match (&existing, requested_fs.is_empty()) {
            (Some(existing), true) => existing.clone(),
            (Some(existing), false) if existing != requested_fs => {
                return Err(Status::internal(format!(
                    "device '{}' carries '{}' but '{}' was requested",
                    source.display(),
                    existing,
                    requested_fs
                )));
            }
            (Some(_), false) => requested_fs.to_string(),
            (None, true) => DEFAULT_FS_TYPE.to_string(),
            (None, false) => requested_fs.to_string(),
        };
        // mkfs.xfs refuses some freshly attached devices unless invoked
        // directly before the safe format-and-mount
        if fs_type == "xfs" && existing.is_none() {
            self.mounter.mkfs(source, "xfs").await.map_err(internal)?;
        }
        self.mounter
            .format_and_mount(source, staging, &fs_type, mount_flags)
            .await
            .map_err(internal)
    }

    fn max_volumes(&self) -> i64 {
        let env_limit = std::env::var(MAX_VOLUMES_ENV).ok();
        let mounts = self.mounter.list_mounts().unwrap_or_default();
        max_volumes_from(env_limit.as_deref(), &mounts)
    }
}

/// Advertised volume limit: the `MAX_BSU_VOLUMES` override when positive,
/// otherwise the default budget minus the devices the OS occupies outside
/// the kubelet tree.
fn max_volumes_from(env_limit: Option<&str>, mounts: &[MountPoint]) -> i64 {
    if let Some(limit) = env_limit.and_then(|raw| raw.parse::<i64>().ok()) {
        if limit > 0 {
            return limit;
        }
    }
    let mut devices = std::collections::HashSet::new();
    let mut kubelet_devices = std::collections::HashSet::new();
    for mount in mounts {
        if !mount.device.starts_with("/dev/") {
            continue;
        }
        devices.insert(mount.device.as_str());
        if mount.path.starts_with("/var/lib/kubelet/") {
            kubelet_devices.insert(mount.device.as_str());
        }
    }
    DEFAULT_MAX_VOLUMES - (devices.len() as i64 - kubelet_devices.len() as i64)
}

fn internal(error: MountError) -> Status {
    Status::internal(error.to_string())
}

fn validate_access_mode(capability: &csi::VolumeCapability) -> Result<(), Status> {
    use csi::volume_capability::access_mode::Mode;
    let mode = capability
        .access_mode
        .as_ref()
        .map(|access| access.mode)
        .unwrap_or_default();
    if mode == Mode::SingleNodeWriter as i32 || mode == Mode::SingleNodeReaderOnly as i32 {
        Ok(())
    } else {
        Err(Status::invalid_argument(
            "only single-node access modes are supported",
        ))
    }
}

fn mapper_name(device: &str) -> Option<&str> {
    device.strip_prefix(MAPPER_PREFIX).filter(|name| !name.is_empty())
}

#[tonic::async_trait]
impl csi::node_server::Node for NodeService {
    async fn node_stage_volume(
        &self,
        request: Request<csi::NodeStageVolumeRequest>,
    ) -> Result<Response<csi::NodeStageVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume id missing in request"));
        }
        if request.staging_target_path.is_empty() {
            return Err(Status::invalid_argument(
                "staging target path missing in request",
            ));
        }
        let capability = request
            .volume_capability
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("volume capability missing in request"))?;
        validate_access_mode(capability)?;

        let (fs_type, mount_flags) = match &capability.access_type {
            // raw block: the device is handed to the workload as-is
            Some(csi::volume_capability::AccessType::Block(_)) => {
                return Ok(Response::new(csi::NodeStageVolumeResponse {}));
            }
            Some(csi::volume_capability::AccessType::Mount(mount)) => {
                (mount.fs_type.clone(), mount.mount_flags.clone())
            }
            None => {
                return Err(Status::invalid_argument(
                    "volume capability misses the access type",
                ))
            }
        };

        let key = format!("{}:{}", request.volume_id, request.staging_target_path);
        let _guard = self.inflight.acquire(&key).ok_or_else(|| {
            Status::internal(format!(
                "an operation for volume '{}' is already in flight",
                request.volume_id
            ))
        })?;

        tracing::info!(volume = %request.volume_id, staging = %request.staging_target_path, "staging volume");
        self.stage_mount_volume(&request, &fs_type, &mount_flags)
            .await?;
        Ok(Response::new(csi::NodeStageVolumeResponse {}))
    }

    async fn node_unstage_volume(
        &self,
        request: Request<csi::NodeUnstageVolumeRequest>,
    ) -> Result<Response<csi::NodeUnstageVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume id missing in request"));
        }
        if request.staging_target_path.is_empty() {
            return Err(Status::invalid_argument(
                "staging target path missing in request",
            ));
        }
        let key = format!("{}:{}", request.volume_id, request.staging_target_path);
        let _guard = self.inflight.acquire(&key).ok_or_else(|| {
            Status::internal(format!(
                "an operation for volume '{}' is already in flight",
                request.volume_id
            ))
        })?;

        let staging = Path::new(&request.staging_target_path);
        let mounted = self.mounter.mount_at(staging).map_err(internal)?;
        let mount = match mounted {
            None => return Ok(Response::new(csi::NodeUnstageVolumeResponse {})),
            Some(mount) => mount,
        };
        self.mounter.unmount(staging).await.map_err(internal)?;
        if let Some(name) = mapper_name(&mount.device) {
            if self.luks.is_open(name).await {
                self.luks.close(name).await.map_err(internal)?;
            }
        }
        Ok(Response::new(csi::NodeUnstageVolumeResponse {}))
    }

    async fn node_publish_volume(
        &self,
        request: Request<csi::NodePublishVolumeRequest>,
    ) -> Result<Response<csi::NodePublishVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume id missing in request"));
        }
        if request.target_path.is_empty() {
            return Err(Status::invalid_argument("target path missing in request"));
        }
        let capability = request
            .volume_capability
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("volume capability missing in request"))?;
        validate_access_mode(capability)?;

        let target = Path::new(&request.target_path);
        let mut flags = vec!["bind".to_string()];
        let source = match &capability.access_type {
            Some(csi::volume_capability::AccessType::Block(_)) => {
                let device = self.resolve_device(&request.publish_context)?;
                self.mounter.make_file(target).map_err(internal)?;
                device
            }
            Some(csi::volume_capability::AccessType::Mount(mount)) => {
                if request.staging_target_path.is_empty() {
                    return Err(Status::invalid_argument(
                        "staging target path missing in request",
                    ));
                }
                for flag in &mount.mount_flags {
                    if !flags.contains(flag) {
                        flags.push(flag.clone());
                    }
                }
                self.mounter.make_dir_all(target).map_err(internal)?;
                PathBuf::from(&request.staging_target_path)
            }
            None => {
                return Err(Status::invalid_argument(
                    "volume capability misses the access type",
                ))
            }
        };
        if request.readonly && !flags.iter().any(|flag| flag == "ro") {
            flags.push("ro".to_string());
        }

        if let Some(existing) = self.mounter.mount_at(target).map_err(internal)? {
            if Path::new(&existing.device) == source {
                return Ok(Response::new(csi::NodePublishVolumeResponse {}));
            }
        }
        self.mounter
            .mount(&source, target, None, &flags)
            .await
            .map_err(internal)?;
        Ok(Response::new(csi::NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<csi::NodeUnpublishVolumeRequest>,
    ) -> Result<Response<csi::NodeUnpublishVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume id missing in request"));
        }
        if request.target_path.is_empty() {
            return Err(Status::invalid_argument("target path missing in request"));
        }
        let target = Path::new(&request.target_path);
        if self.mounter.mount_at(target).map_err(internal)?.is_some() {
            self.mounter.unmount(target).await.map_err(internal)?;
        }
        self.mounter.remove_path(target).map_err(internal)?;
        Ok(Response::new(csi::NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_volume_stats(
        &self,
        request: Request<csi::NodeGetVolumeStatsRequest>,
    ) -> Result<Response<csi::NodeGetVolumeStatsResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume id missing in request"));
        }
        if request.volume_path.is_empty() {
            return Err(Status::invalid_argument("volume path missing in request"));
        }
        let path = Path::new(&request.volume_path);
        if !self.mounter.path_exists(path) {
            return Err(Status::not_found(format!(
                "volume path '{}' does not exist",
                request.volume_path
            )));
        }

        if self.mounter.is_block_device(path).map_err(internal)? {
            let size = self.mounter.block_size_bytes(path).await.map_err(internal)?;
            return Ok(Response::new(csi::NodeGetVolumeStatsResponse {
                usage: vec![csi::VolumeUsage {
                    available: 0,
                    total: size as i64,
                    used: 0,
                    unit: csi::volume_usage::Unit::Bytes as i32,
                }],
                volume_condition: None,
            }));
        }

        let stats = self.mounter.fs_stats(path).await.map_err(internal)?;
        Ok(Response::new(csi::NodeGetVolumeStatsResponse {
            usage: vec![
                csi::VolumeUsage {
                    available: stats.available_bytes as i64,
                    total: stats.total_bytes as i64,
                    used: stats.used_bytes as i64,
                    unit: csi::volume_usage::Unit::Bytes as i32,
                },
                csi::VolumeUsage {
                    available: stats.free_inodes as i64,
                    total: stats.total_inodes as i64,
                    used: stats.used_inodes as i64,
                    unit: csi::volume_usage::Unit::Inodes as i32,
                },
            ],
            volume_condition: None,
        }))
    }

    async fn node_expand_volume(
        &self,
        request: Request<csi::NodeExpandVolumeRequest>,
    ) -> Result<Response<csi::NodeExpandVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume id missing in request"));
        }
        if request.volume_path.is_empty() {
            return Err(Status::invalid_argument("volume path missing in request"));
        }
        let volume_path = Path::new(&request.volume_path);
        let mount = self
            .mounter
            .mount_at(volume_path)
            .map_err(internal)?
            .ok_or_else(|| {
                Status::not_found(format!(
                    "no device mounted at '{}'",
                    request.volume_path
                ))
            })?;

        if let Some(name) = mapper_name(&mount.device) {
            let passphrase = request
                .secrets
                .get(LUKS_PASSPHRASE_KEY)
                .filter(|secret| !secret.is_empty())
                .ok_or_else(|| {
                    Status::invalid_argument("encrypted volumes require the luks passphrase secret")
                })?;
            self.luks.resize(name, passphrase).await.map_err(internal)?;
        }
        self.mounter
            .resize_fs(Path::new(&mount.device), volume_path, &mount.fs_type)
            .await
            .map_err(internal)?;

        let capacity_bytes = request
            .capacity_range
            .map(|range| range.required_bytes)
            .unwrap_or_default();
        Ok(Response::new(csi::NodeExpandVolumeResponse {
            capacity_bytes,
        }))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<csi::NodeGetCapabilitiesRequest>,
    ) -> Result<Response<csi::NodeGetCapabilitiesResponse>, Status> {
        use csi::node_service_capability::{rpc, Rpc, Type};
        let capabilities = [
            rpc::Type::StageUnstageVolume,
            rpc::Type::GetVolumeStats,
            rpc::Type::ExpandVolume,
        ]
        .iter()
        .map(|capability| csi::NodeServiceCapability {
            r#type: Some(Type::Rpc(Rpc {
                r#type: *capability as i32,
            })),
        })
        .collect();
        Ok(Response::new(csi::NodeGetCapabilitiesResponse {
            capabilities,
        }))
    }

    async fn node_get_info(
        &self,
        _request: Request<csi::NodeGetInfoRequest>,
    ) -> Result<Response<csi::NodeGetInfoResponse>, Status> {
        let mut segments = HashMap::new();
        segments.insert(TOPOLOGY_ZONE_KEY.to_string(), self.zone.clone());
        Ok(Response::new(csi::NodeGetInfoResponse {
            node_id: self.node_id.clone(),
            max_volumes_per_node: self.max_volumes(),
            accessible_topology: Some(csi::Topology { segments }),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csi::node_server::Node;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    use super::mount::FsStats;

    #[derive(Default)]
    struct FakeMounter {
        state: Mutex<MounterState>,
    }

    #[derive(Default)]
    struct MounterState {
        paths: HashSet<String>,
        links: HashMap<String, String>,
        mounts: Vec<MountPoint>,
        formats: HashMap<String, String>,
        block_devices: HashSet<String>,
        block_sizes: HashMap<String, u64>,
        stats: HashMap<String, FsStats>,
        operations: Vec<String>,
        fail_mount: bool,
    }

    impl FakeMounter {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }
        fn add_path(&self, path: &str) {
            self.state.lock().paths.insert(path.to_string());
        }
        fn add_link(&self, from: &str, to: &str) {
            let mut state = self.state.lock();
            state.paths.insert(from.to_string());
            state.links.insert(from.to_string(), to.to_string());
        }
        fn add_mount(&self, device: &str, path: &str, fs_type: &str) {
            self.state.lock().mounts.push(MountPoint {
                device: device.to_string(),
                path: path.to_string(),
                fs_type: fs_type.to_string(),
            });
        }
        fn set_format(&self, device: &str, fs_type: &str) {
            self.state
                .lock()
                .formats
                .insert(device.to_string(), fs_type.to_string());
        }
        fn operations(&self) -> Vec<String> {
            self.state.lock().operations.clone()
        }
    }

    #[async_trait]
    impl Mounter for FakeMounter {
        fn path_exists(&self, path: &Path) -> bool {
            self.state
                .lock()
                .paths
                .contains(&path.to_string_lossy().to_string())
        }

        fn make_dir_all(&self, path: &Path) -> Result<(), MountError> {
            let mut state = self.state.lock();
            let path = path.to_string_lossy().to_string();
            state.operations.push(format!("mkdir {}", path));
            state.paths.insert(path);
            Ok(())
        }

        fn make_file(&self, path: &Path) -> Result<(), MountError> {
            let mut state = self.state.lock();
            let path = path.to_string_lossy().to_string();
            state.operations.push(format!("mkfile {}", path));
            state.paths.insert(path);
            Ok(())
        }

        fn remove_path(&self, path: &Path) -> Result<(), MountError> {
            let mut state = self.state.lock();
            let path = path.to_string_lossy().to_string();
            state.operations.push(format!("remove {}", path));
            state.paths.remove(&path);
            Ok(())
        }

        fn resolve_link(&self, path: &Path) -> Result<PathBuf, MountError> {
            let state = self.state.lock();
            let key = path.to_string_lossy().to_string();
            Ok(state
                .links
                .get(&key)
                .map(PathBuf::from)
                .unwrap_or_else(|| path.to_path_buf()))
        }

        fn is_block_device(&self, path: &Path) -> Result<bool, MountError> {
            Ok(self
                .state
                .lock()
                .block_devices
                .contains(&path.to_string_lossy().to_string()))
        }

        fn list_mounts(&self) -> Result<Vec<MountPoint>, MountError> {
            Ok(self.state.lock().mounts.clone())
        }

        async fn mount(
            &self,
            source: &Path,
            target: &Path,
            fs_type: Option<&str>,
            flags: &[String],
        ) -> Result<(), MountError> {
            let mut state = self.state.lock();
            if state.fail_mount {
                return Err(MountError::CommandFailed {
                    command: "mount".to_string(),
                    stderr: "mount scripted to fail".to_string(),
                });
            }
            let source = source.to_string_lossy().to_string();
            let target = target.to_string_lossy().to_string();
            state.operations.push(format!(
                "mount {} {} fs={} flags={}",
                source,
                target,
                fs_type.unwrap_or("-"),
                flags.join(",")
            ));
            state.mounts.push(MountPoint {
                device: source,
                path: target,
                fs_type: fs_type.unwrap_or("none").to_string(),
            });
            Ok(())
        }

        async fn unmount(&self, target: &Path) -> Result<(), MountError> {
            let mut state = self.state.lock();
            let target = target.to_string_lossy().to_string();
            state.operations.push(format!("umount {}", target));
            state.mounts.retain(|mount| mount.path != target);
            Ok(())
        }

        async fn get_disk_format(&self, device: &Path) -> Result<Option<String>, MountError> {
            Ok(self
                .state
                .lock()
                .formats
                .get(&device.to_string_lossy().to_string())
                .cloned())
        }

        async fn mkfs(&self, device: &Path, fs_type: &str) -> Result<(), MountError> {
            let mut state = self.state.lock();
            let device = device.to_string_lossy().to_string();
            state.operations.push(format!("mkfs.{} {}", fs_type, device));
            state.formats.insert(device, fs_type.to_string());
            Ok(())
        }

        async fn format_and_mount(
            &self,
            device: &Path,
            target: &Path,
            fs_type: &str,
            flags: &[String],
        ) -> Result<(), MountError> {
            if self.get_disk_format(device).await?.is_none() {
                self.mkfs(device, fs_type).await?;
            }
            self.mount(device, target, Some(fs_type), flags).await
        }

        async fn resize_fs(
            &self,
            device: &Path,
            mount_path: &Path,
            fs_type: &str,
        ) -> Result<(), MountError> {
            self.state.lock().operations.push(format!(
                "resize_fs {} {} {}",
                device.to_string_lossy(),
                mount_path.to_string_lossy(),
                fs_type
            ));
            Ok(())
        }

        async fn block_size_bytes(&self, device: &Path) -> Result<u64, MountError> {
            Ok(self
                .state
                .lock()
                .block_sizes
                .get(&device.to_string_lossy().to_string())
                .copied()
                .unwrap_or_default())
        }

        async fn fs_stats(&self, path: &Path) -> Result<FsStats, MountError> {
            Ok(self
                .state
                .lock()
                .stats
                .get(&path.to_string_lossy().to_string())
                .copied()
                .unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct FakeLuks {
        state: Mutex<LuksState>,
    }

    #[derive(Default)]
    struct LuksState {
        formatted: HashSet<String>,
        open: HashSet<String>,
        operations: Vec<String>,
        wrong_passphrase: bool,
    }

    impl FakeLuks {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }
        fn operations(&self) -> Vec<String> {
            self.state.lock().operations.clone()
        }
    }

    #[async_trait]
    impl LuksOps for FakeLuks {
        async fn is_luks(&self, device: &Path) -> bool {
            self.state
                .lock()
                .formatted
                .contains(&device.to_string_lossy().to_string())
        }

        async fn format(
            &self,
            device: &Path,
            _passphrase: &str,
            _config: &LuksConfig,
        ) -> Result<(), MountError> {
            let mut state = self.state.lock();
            let device = device.to_string_lossy().to_string();
            state.operations.push(format!("luksFormat {}", device));
            state.formatted.insert(device);
            Ok(())
        }

        async fn check_passphrase(
            &self,
            _device: &Path,
            _passphrase: &str,
        ) -> Result<(), MountError> {
            if self.state.lock().wrong_passphrase {
                return Err(MountError::CommandFailed {
                    command: "cryptsetup open --test-passphrase".to_string(),
                    stderr: "No key available with this passphrase".to_string(),
                });
            }
            Ok(())
        }

        async fn open(
            &self,
            device: &Path,
            name: &str,
            _passphrase: &str,
        ) -> Result<(), MountError> {
            let mut state = self.state.lock();
            state
                .operations
                .push(format!("luksOpen {} {}", device.to_string_lossy(), name));
            state.open.insert(name.to_string());
            Ok(())
        }

        async fn close(&self, name: &str) -> Result<(), MountError> {
            let mut state = self.state.lock();
            state.operations.push(format!("luksClose {}", name));
            state.open.remove(name);
            Ok(())
        }

        async fn resize(&self, name: &str, _passphrase: &str) -> Result<(), MountError> {
            self.state
                .lock()
                .operations
                .push(format!("luksResize {}", name));
            Ok(())
        }

        async fn is_open(&self, name: &str) -> bool {
            self.state.lock().open.contains(name)
        }
    }

    fn service(mounter: &Arc<FakeMounter>, luks: &Arc<FakeLuks>) -> NodeService {
        NodeService::with_parts(
            "i-1",
            "eu-west-2a",
            mounter.clone() as Arc<dyn Mounter>,
            luks.clone() as Arc<dyn LuksOps>,
        )
    }

    fn mount_capability(fs_type: &str, flags: &[&str]) -> csi::VolumeCapability {
        csi::VolumeCapability {
            access_type: Some(csi::volume_capability::AccessType::Mount(
                csi::volume_capability::MountVolume {
                    fs_type: fs_type.to_string(),
                    mount_flags: flags.iter().map(|flag| flag.to_string()).collect(),
                },
            )),
            access_mode: Some(csi::volume_capability::AccessMode {
                mode: csi::volume_capability::access_mode::Mode::SingleNodeWriter as i32,
            }),
        }
    }

    fn block_capability() -> csi::VolumeCapability {
        csi::VolumeCapability {
            access_type: Some(csi::volume_capability::AccessType::Block(
                csi::volume_capability::BlockVolume {},
            )),
            access_mode: Some(csi::volume_capability::AccessMode {
                mode: csi::volume_capability::access_mode::Mode::SingleNodeWriter as i32,
            }),
        }
    }

    fn stage_request(device: &str, fs_type: &str) -> csi::NodeStageVolumeRequest {
        let mut publish_context = HashMap::new();
        publish_context.insert(DEVICE_PATH_KEY.to_string(), device.to_string());
        csi::NodeStageVolumeRequest {
            volume_id: "vol-1".to_string(),
            publish_context,
            staging_target_path: "/var/lib/kubelet/staging/vol-1".to_string(),
            volume_capability: Some(mount_capability(fs_type, &[])),
            ..Default::default()
        }
    }

    fn encrypted_stage_request(device: &str) -> csi::NodeStageVolumeRequest {
        let mut request = stage_request(device, "ext4");
        request
            .publish_context
            .insert(ENCRYPTED_KEY.to_string(), "true".to_string());
        request
            .secrets
            .insert(LUKS_PASSPHRASE_KEY.to_string(), "opensesame".to_string());
        request
    }

    #[tokio::test]
    async fn stage_formats_and_mounts_a_fresh_device() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_path("/dev/xvdb");
        let node = service(&mounter, &luks);
        node.node_stage_volume(Request::new(stage_request("/dev/xvdb", "ext4")))
            .await
            .unwrap();
        let operations = mounter.operations();
        assert!(operations.iter().any(|op| op == "mkfs.ext4 /dev/xvdb"));
        assert!(operations
            .iter()
            .any(|op| op.starts_with("mount /dev/xvdb /var/lib/kubelet/staging/vol-1")));
    }

    #[tokio::test]
    async fn stage_is_idempotent_when_already_mounted() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_path("/dev/xvdb");
        mounter.add_path("/var/lib/kubelet/staging/vol-1");
        mounter.add_mount("/dev/xvdb", "/var/lib/kubelet/staging/vol-1", "ext4");
        let node = service(&mounter, &luks);
        node.node_stage_volume(Request::new(stage_request("/dev/xvdb", "ext4")))
            .await
            .unwrap();
        assert!(mounter.operations().is_empty());
    }

    #[tokio::test]
    async fn stage_block_capability_is_a_noop() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        let node = service(&mounter, &luks);
        let mut request = stage_request("/dev/xvdb", "");
        request.volume_capability = Some(block_capability());
        node.node_stage_volume(Request::new(request)).await.unwrap();
        assert!(mounter.operations().is_empty());
    }

    #[tokio::test]
    async fn stage_adopts_an_existing_filesystem() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_path("/dev/xvdb");
        mounter.set_format("/dev/xvdb", "xfs");
        let node = service(&mounter, &luks);
        node.node_stage_volume(Request::new(stage_request("/dev/xvdb", "")))
            .await
            .unwrap();
        let operations = mounter.operations();
        assert!(!operations.iter().any(|op| op.starts_with("mkfs")));
        assert!(operations.iter().any(|op| op.contains("fs=xfs")));
    }

    #[tokio::test]
    async fn stage_rejects_a_conflicting_filesystem() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_path("/dev/xvdb");
        mounter.set_format("/dev/xvdb", "xfs");
        let node = service(&mounter, &luks);
        let status = node
            .node_stage_volume(Request::new(stage_request("/dev/xvdb", "ext4")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
    }

    #[tokio::test]
    async fn stage_falls_back_to_the_by_id_entry() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_link("/dev/disk/by-id/scsi-0QEMU_QEMU_HARDDISK_sdb", "/dev/sdb");
        let node = service(&mounter, &luks);
        node.node_stage_volume(Request::new(stage_request("/dev/xvdb", "ext4")))
            .await
            .unwrap();
        assert!(mounter
            .operations()
            .iter()
            .any(|op| op.starts_with("mount /dev/sdb ")));
    }

    #[tokio::test]
    async fn stage_rejects_devices_outside_dev() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_link(
            "/dev/disk/by-id/scsi-0QEMU_QEMU_HARDDISK_sdb",
            "/tmp/not-a-device",
        );
        let node = service(&mounter, &luks);
        let status = node
            .node_stage_volume(Request::new(stage_request("/dev/xvdb", "ext4")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
    }

    #[tokio::test]
    async fn duplicate_stage_requests_are_rejected() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_path("/dev/xvdb");
        let node = service(&mounter, &luks);
        assert!(node
            .inflight
            .insert("vol-1:/var/lib/kubelet/staging/vol-1"));
        let status = node
            .node_stage_volume(Request::new(stage_request("/dev/xvdb", "ext4")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);

        // once the first operation finishes, staging works again
        node.inflight.delete("vol-1:/var/lib/kubelet/staging/vol-1");
        node.node_stage_volume(Request::new(stage_request("/dev/xvdb", "ext4")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stage_encrypted_formats_and_opens_luks() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_path("/dev/xvdb");
        let node = service(&mounter, &luks);
        node.node_stage_volume(Request::new(encrypted_stage_request("/dev/xvdb")))
            .await
            .unwrap();
        let luks_operations = luks.operations();
        assert!(luks_operations.iter().any(|op| op == "luksFormat /dev/xvdb"));
        assert!(luks_operations
            .iter()
            .any(|op| op == "luksOpen /dev/xvdb xvdb_crypt"));
        assert!(mounter
            .operations()
            .iter()
            .any(|op| op.starts_with("mount /dev/mapper/xvdb_crypt ")));
    }

    #[tokio::test]
    async fn stage_encrypted_skips_format_when_luks_exists() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_path("/dev/xvdb");
        luks.state.lock().formatted.insert("/dev/xvdb".to_string());
        let node = service(&mounter, &luks);
        node.node_stage_volume(Request::new(encrypted_stage_request("/dev/xvdb")))
            .await
            .unwrap();
        assert!(!luks
            .operations()
            .iter()
            .any(|op| op.starts_with("luksFormat")));
    }

    #[tokio::test]
    async fn stage_encrypted_requires_the_passphrase() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_path("/dev/xvdb");
        let node = service(&mounter, &luks);
        let mut request = encrypted_stage_request("/dev/xvdb");
        request.secrets.clear();
        let status = node
            .node_stage_volume(Request::new(request))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn stage_encrypted_rejects_a_wrong_passphrase() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_path("/dev/xvdb");
        luks.state.lock().wrong_passphrase = true;
        let node = service(&mounter, &luks);
        let status = node
            .node_stage_volume(Request::new(encrypted_stage_request("/dev/xvdb")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn stage_failure_after_luks_open_closes_the_mapping() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_path("/dev/xvdb");
        mounter.state.lock().fail_mount = true;
        let node = service(&mounter, &luks);
        let status = node
            .node_stage_volume(Request::new(encrypted_stage_request("/dev/xvdb")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(luks.operations().iter().any(|op| op == "luksClose xvdb_crypt"));
        assert!(!luks.state.lock().open.contains("xvdb_crypt"));
    }

    #[tokio::test]
    async fn unstage_is_idempotent_when_not_mounted() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        let node = service(&mounter, &luks);
        node.node_unstage_volume(Request::new(csi::NodeUnstageVolumeRequest {
            volume_id: "vol-1".to_string(),
            staging_target_path: "/var/lib/kubelet/staging/vol-1".to_string(),
        }))
        .await
        .unwrap();
        assert!(mounter.operations().is_empty());
    }

    #[tokio::test]
    async fn unstage_unmounts_and_closes_luks() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_mount(
            "/dev/mapper/xvdb_crypt",
            "/var/lib/kubelet/staging/vol-1",
            "ext4",
        );
        luks.state.lock().open.insert("xvdb_crypt".to_string());
        let node = service(&mounter, &luks);
        node.node_unstage_volume(Request::new(csi::NodeUnstageVolumeRequest {
            volume_id: "vol-1".to_string(),
            staging_target_path: "/var/lib/kubelet/staging/vol-1".to_string(),
        }))
        .await
        .unwrap();
        assert!(mounter
            .operations()
            .iter()
            .any(|op| op == "umount /var/lib/kubelet/staging/vol-1"));
        assert!(luks.operations().iter().any(|op| op == "luksClose xvdb_crypt"));
    }

    #[tokio::test]
    async fn publish_bind_mounts_without_duplicating_flags() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        let node = service(&mounter, &luks);
        let request = csi::NodePublishVolumeRequest {
            volume_id: "vol-1".to_string(),
            staging_target_path: "/var/lib/kubelet/staging/vol-1".to_string(),
            target_path: "/var/lib/kubelet/pods/p/volumes/vol-1/mount".to_string(),
            volume_capability: Some(mount_capability("ext4", &["bind", "noatime"])),
            readonly: true,
            ..Default::default()
        };
        node.node_publish_volume(Request::new(request)).await.unwrap();
        let mount_operation = mounter
            .operations()
            .into_iter()
            .find(|op| op.starts_with("mount "))
            .unwrap();
        assert!(mount_operation.contains("flags=bind,noatime,ro"));
        assert_eq!(mount_operation.matches("bind").count(), 1);
    }

    #[tokio::test]
    async fn publish_block_binds_the_device_onto_a_file() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_path("/dev/xvdb");
        let node = service(&mounter, &luks);
        let mut publish_context = HashMap::new();
        publish_context.insert(DEVICE_PATH_KEY.to_string(), "/dev/xvdb".to_string());
        let request = csi::NodePublishVolumeRequest {
            volume_id: "vol-1".to_string(),
            publish_context,
            target_path: "/var/lib/kubelet/pods/p/volumes/vol-1".to_string(),
            volume_capability: Some(block_capability()),
            ..Default::default()
        };
        node.node_publish_volume(Request::new(request)).await.unwrap();
        let operations = mounter.operations();
        assert!(operations
            .iter()
            .any(|op| op == "mkfile /var/lib/kubelet/pods/p/volumes/vol-1"));
        assert!(operations
            .iter()
            .any(|op| op.starts_with("mount /dev/xvdb /var/lib/kubelet/pods/p/volumes/vol-1")));
    }

    #[tokio::test]
    async fn unpublish_never_fails_on_a_missing_target() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        let node = service(&mounter, &luks);
        node.node_unpublish_volume(Request::new(csi::NodeUnpublishVolumeRequest {
            volume_id: "vol-1".to_string(),
            target_path: "/var/lib/kubelet/pods/p/volumes/vol-1/mount".to_string(),
        }))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unpublish_unmounts_and_removes_the_target() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        let target = "/var/lib/kubelet/pods/p/volumes/vol-1/mount";
        mounter.add_path(target);
        mounter.add_mount("/var/lib/kubelet/staging/vol-1", target, "ext4");
        let node = service(&mounter, &luks);
        node.node_unpublish_volume(Request::new(csi::NodeUnpublishVolumeRequest {
            volume_id: "vol-1".to_string(),
            target_path: target.to_string(),
        }))
        .await
        .unwrap();
        let operations = mounter.operations();
        assert!(operations.iter().any(|op| *op == format!("umount {}", target)));
        assert!(operations.iter().any(|op| *op == format!("remove {}", target)));
    }

    #[tokio::test]
    async fn expand_resizes_luks_before_the_filesystem() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        let path = "/var/lib/kubelet/staging/vol-1";
        mounter.add_mount("/dev/mapper/xvdb_crypt", path, "ext4");
        let node = service(&mounter, &luks);
        let mut secrets = HashMap::new();
        secrets.insert(LUKS_PASSPHRASE_KEY.to_string(), "opensesame".to_string());
        let response = node
            .node_expand_volume(Request::new(csi::NodeExpandVolumeRequest {
                volume_id: "vol-1".to_string(),
                volume_path: path.to_string(),
                capacity_range: Some(csi::CapacityRange {
                    required_bytes: 10 * 1024 * 1024 * 1024,
                    limit_bytes: 0,
                }),
                secrets,
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.capacity_bytes, 10 * 1024 * 1024 * 1024);
        assert!(luks.operations().iter().any(|op| op == "luksResize xvdb_crypt"));
        assert!(mounter
            .operations()
            .iter()
            .any(|op| op.starts_with("resize_fs /dev/mapper/xvdb_crypt")));
    }

    #[tokio::test]
    async fn stats_report_block_device_size() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        mounter.add_path("/dev/xvdb");
        {
            let mut state = mounter.state.lock();
            state.block_devices.insert("/dev/xvdb".to_string());
            state.block_sizes.insert("/dev/xvdb".to_string(), 5 << 30);
        }
        let node = service(&mounter, &luks);
        let response = node
            .node_get_volume_stats(Request::new(csi::NodeGetVolumeStatsRequest {
                volume_id: "vol-1".to_string(),
                volume_path: "/dev/xvdb".to_string(),
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.usage.len(), 1);
        assert_eq!(response.usage[0].total, 5 << 30);
    }

    #[tokio::test]
    async fn stats_report_filesystem_bytes_and_inodes() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        let path = "/var/lib/kubelet/staging/vol-1";
        mounter.add_path(path);
        mounter.state.lock().stats.insert(
            path.to_string(),
            FsStats {
                total_bytes: 1000,
                available_bytes: 600,
                used_bytes: 400,
                total_inodes: 100,
                free_inodes: 90,
                used_inodes: 10,
            },
        );
        let node = service(&mounter, &luks);
        let response = node
            .node_get_volume_stats(Request::new(csi::NodeGetVolumeStatsRequest {
                volume_id: "vol-1".to_string(),
                volume_path: path.to_string(),
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.usage.len(), 2);
        assert_eq!(response.usage[0].used, 400);
        assert_eq!(response.usage[1].total, 100);
    }

    #[tokio::test]
    async fn node_info_reports_zone_topology() {
        let mounter = FakeMounter::new();
        let luks = FakeLuks::new();
        let node = service(&mounter, &luks);
        let response = node
            .node_get_info(Request::new(csi::NodeGetInfoRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.node_id, "i-1");
        let topology = response.accessible_topology.unwrap();
        assert_eq!(topology.segments[TOPOLOGY_ZONE_KEY], "eu-west-2a");
    }

    #[test]
    fn max_volumes_prefers_the_env_override() {
        assert_eq!(max_volumes_from(Some("25"), &[]), 25);
        assert_eq!(max_volumes_from(Some("0"), &[]), DEFAULT_MAX_VOLUMES);
        assert_eq!(max_volumes_from(Some("junk"), &[]), DEFAULT_MAX_VOLUMES);
    }

    #[test]
    fn max_volumes_subtracts_os_devices() {
        let mounts = vec![
            MountPoint {
                device: "/dev/xvda1".to_string(),
                path: "/".to_string(),
                fs_type: "ext4".to_string(),
            },
            MountPoint {
                device: "tmpfs".to_string(),
                path: "/run".to_string(),
                fs_type: "tmpfs".to_string(),
            },
            MountPoint {
                device: "/dev/xvdb".to_string(),
                path: "/var/lib/kubelet/pods/p/volumes/vol-1/mount".to_string(),
                fs_type: "ext4".to_string(),
            },
        ];
        // two /dev devices, one of them kubelet-owned
        assert_eq!(max_volumes_from(None, &mounts), DEFAULT_MAX_VOLUMES - 1);
    }
}
