//! Volume and snapshot lifecycle coordination.
//!
//! The coordinator exposes synchronous-looking operations to the CSI
//! services and internally schedules provider calls through the backoff
//! policy and state waits through the batched resource watchers. It holds no
//! resource state of its own: the provider is the source of truth.

use crate::{
    api::{models, OscApi},
    backoff::BackoffPolicy,
    device::{Device, DeviceManager},
    error::{
        is_malformed_id, is_snapshot_not_found, is_volume_not_found, CloudError,
    },
    watcher::{BatchReader, ResourceWatcher, Watched},
};
use async_trait::async_trait;
use common_lib::{
    bytes_to_gib_round_up, gib_to_bytes,
    types::{
        volume::compute_iops, LinkedVolumeState, Snapshot, SnapshotOptions, Vm, Volume,
        VolumeOptions, VolumeState, VolumeType,
    },
    SNAPSHOT_NAME_TAG_KEY, VOLUME_NAME_TAG_KEY,
};
use std::{convert::TryFrom, future::Future, sync::Arc, time::Duration};

/// Largest page the provider accepts on `Read*` calls.
pub const MAX_RESULTS_PER_PAGE: u32 = 1000;

/// Longest client token the provider accepts.
const CLIENT_TOKEN_MAX_LEN: usize = 64;

/// Tag application must not give up early: a failed tag write would orphan
/// the resource for name-based idempotency lookups.
const TAG_BACKOFF_STEPS: u32 = 10;

/// Default deadline for state waits.
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

impl Watched for Volume {
    fn resource_id(&self) -> &str {
        &self.volume_id
    }
}

impl Watched for Snapshot {
    fn resource_id(&self) -> &str {
        &self.snapshot_id
    }
}

struct VolumeReader {
    api: Arc<dyn OscApi>,
}

#[async_trait]
impl BatchReader<Volume> for VolumeReader {
    async fn read_batch(&self, ids: &[String]) -> Result<Vec<Volume>, CloudError> {
        let response = self
            .api
            .read_volumes(models::ReadVolumesRequest {
                filters: Some(models::FiltersVolume {
                    volume_ids: ids.to_vec(),
                    ..Default::default()
                }),
                results_per_page: Some(ids.len() as u32),
                next_page_token: None,
            })
            .await?;
        response.volumes.into_iter().map(Volume::try_from).collect()
    }
}

struct SnapshotReader {
    api: Arc<dyn OscApi>,
}

#[async_trait]
impl BatchReader<Snapshot> for SnapshotReader {
    async fn read_batch(&self, ids: &[String]) -> Result<Vec<Snapshot>, CloudError> {
        let response = self
            .api
            .read_snapshots(models::ReadSnapshotsRequest {
                filters: Some(models::FiltersSnapshot {
                    snapshot_ids: ids.to_vec(),
                    ..Default::default()
                }),
                results_per_page: Some(ids.len() as u32),
                next_page_token: None,
            })
            .await?;
        response
            .snapshots
            .into_iter()
            .map(Snapshot::try_from)
            .collect()
    }
}

/// The cloud-resource coordinator.
#[derive(Clone)]
pub struct Cloud {
    api: Arc<dyn OscApi>,
    region: String,
    devices: DeviceManager,
    volume_watcher: ResourceWatcher<Volume>,
    snapshot_watcher: ResourceWatcher<Snapshot>,
    backoff: BackoffPolicy,
    wait_timeout: Duration,
}

impl Cloud {
    /// Coordinator over `api` for `region`, with watchers polling at the
    /// configured interval.
    pub fn new(api: Arc<dyn OscApi>, region: &str) -> Self {
        let volume_watcher = ResourceWatcher::start(
            "volumes",
            Arc::new(VolumeReader { api: api.clone() }),
        );
        let snapshot_watcher = ResourceWatcher::start(
            "snapshots",
            Arc::new(SnapshotReader { api: api.clone() }),
        );
        Self {
            api,
            region: region.to_string(),
            devices: DeviceManager::new(),
            volume_watcher,
            snapshot_watcher,
            backoff: BackoffPolicy::from_env(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    /// Same as [`Cloud::new`] with an explicit watcher interval and wait
    /// deadline.
    pub fn with_poll_interval(
        api: Arc<dyn OscApi>,
        region: &str,
        interval: Duration,
        wait_timeout: Duration,
    ) -> Self {
        let volume_watcher = ResourceWatcher::with_interval(
            "volumes",
            Arc::new(VolumeReader { api: api.clone() }),
            interval,
        );
        let snapshot_watcher = ResourceWatcher::with_interval(
            "snapshots",
            Arc::new(SnapshotReader { api: api.clone() }),
            interval,
        );
        Self {
            api,
            region: region.to_string(),
            devices: DeviceManager::new(),
            volume_watcher,
            snapshot_watcher,
            backoff: BackoffPolicy::from_env(),
            wait_timeout,
        }
    }

    /// The region this coordinator operates in.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Creates a volume and waits until it is usable.
    #[tracing::instrument(level = "debug", skip(self, options), err)]
    pub async fn create_volume(
        &self,
        name: &str,
        options: &VolumeOptions,
    ) -> Result<Volume, CloudError> {
        if options.kms_key_id.is_some() {
            return Err(CloudError::InvalidArgument {
                reason: "KMS key binding is not supported".to_string(),
            });
        }
        if options.volume_type == VolumeType::Io1 && options.iops_per_gib == 0 {
            return Err(CloudError::InvalidArgument {
                reason: "io1 volumes require a positive iopsPerGB".to_string(),
            });
        }

        let size_gib = options.capacity_gib().max(1);
        let iops = match options.volume_type {
            VolumeType::Io1 => Some(compute_iops(size_gib, options.iops_per_gib)),
            _ => None,
        };
        let subregion_name = options
            .subregion_name
            .clone()
            .filter(|zone| !zone.is_empty())
            .unwrap_or_else(|| format!("{}a", self.region));

        let request = models::CreateVolumeRequest {
            client_token: client_token(name),
            iops,
            size: size_gib,
            snapshot_id: options.snapshot_id.clone(),
            subregion_name,
            volume_type: options.volume_type.to_string(),
        };
        let created = self
            .api_call("create volume", &self.backoff, || {
                self.api.create_volume(request.clone())
            })
            .await
            .map_err(|err| {
                if is_snapshot_not_found(&err) {
                    CloudError::NotFound {
                        resource: "snapshot",
                        id: options.snapshot_id.clone().unwrap_or_default(),
                    }
                } else {
                    err
                }
            })?;

        let volume_id = created.volume_id.clone();
        self.apply_tags(&volume_id, VOLUME_NAME_TAG_KEY, name, &options.tags)
            .await?;

        let volume = self
            .wait_volume(&volume_id, |volume| match volume {
                None => Ok(false),
                Some(volume) if volume.state.ready() => Ok(true),
                Some(volume) if volume.state.failed() => Err(CloudError::TerminalState {
                    resource: "volume",
                    id: volume.volume_id.clone(),
                    state: volume.state.to_string(),
                }),
                Some(_) => Ok(false),
            })
            .await?;
        volume.ok_or(CloudError::NotFound {
            resource: "volume",
            id: volume_id,
        })
    }

    /// Deletes a volume. Malformed and unknown identifiers surface as
    /// [`CloudError::NotFound`]; the CSI layer collapses that to success.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn delete_volume(&self, volume_id: &str) -> Result<(), CloudError> {
        if !volume_id.starts_with("vol-") {
            return Err(CloudError::NotFound {
                resource: "volume",
                id: volume_id.to_string(),
            });
        }
        let request = models::DeleteVolumeRequest {
            volume_id: volume_id.to_string(),
        };
        self.api_call("delete volume", &self.backoff, || {
            self.api.delete_volume(request.clone())
        })
        .await
        .map_err(|err| {
            if is_volume_not_found(&err) || is_malformed_id(&err) {
                CloudError::NotFound {
                    resource: "volume",
                    id: volume_id.to_string(),
                }
            } else {
                err
            }
        })
    }

    /// Attaches a volume to an instance and returns the device path.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn attach_volume(
        &self,
        volume_id: &str,
        vm_id: &str,
    ) -> Result<String, CloudError> {
        let vm = self.get_vm_by_id(vm_id).await?;
        let mut device = self.devices.new_device(&vm, volume_id)?;
        let result = self.link_and_wait(&device, volume_id, vm_id).await;
        device.release(false);
        result
    }

    async fn link_and_wait(
        &self,
        device: &Device,
        volume_id: &str,
        vm_id: &str,
    ) -> Result<String, CloudError> {
        if !device.is_already_assigned {
            let request = models::LinkVolumeRequest {
                device_name: device.path.clone(),
                vm_id: vm_id.to_string(),
                volume_id: volume_id.to_string(),
            };
            self.api_call("attach volume", &self.backoff, || {
                self.api.link_volume(request.clone())
            })
            .await?;
        }

        let vm = vm_id.to_string();
        let watched_volume = volume_id.to_string();
        let wait = self
            .wait_volume(volume_id, move |volume| match volume {
                None => Err(CloudError::NotFound {
                    resource: "volume",
                    id: watched_volume.clone(),
                }),
                Some(volume) => Ok(volume
                    .link_to(&vm)
                    .map(|link| link.state == LinkedVolumeState::Attached)
                    .unwrap_or(false)),
            })
            .await;
        match wait {
            Ok(_) => Ok(device.path.clone()),
            Err(err) => {
                // the provider may still be attaching; keep the name off the
                // free list until the process restarts
                device.taint();
                Err(err)
            }
        }
    }

    /// Detaches a volume from an instance. Succeeds when the volume is
    /// already detached.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn detach_volume(&self, volume_id: &str, vm_id: &str) -> Result<(), CloudError> {
        let vm = self.get_vm_by_id(vm_id).await?;
        let volume = self.get_disk_by_id(volume_id).await?;
        if volume.state == VolumeState::Available {
            if let Some(mut device) = self.devices.get_device(&vm, volume_id) {
                device.release(true);
            }
            return Ok(());
        }

        let mut device =
            self.devices
                .get_device(&vm, volume_id)
                .ok_or(CloudError::NotFound {
                    resource: "attachment",
                    id: volume_id.to_string(),
                })?;

        let request = models::UnlinkVolumeRequest {
            volume_id: volume_id.to_string(),
        };
        let result = async {
            self.api_call("detach volume", &self.backoff, || {
                self.api.unlink_volume(request.clone())
            })
            .await?;
            self.wait_volume(volume_id, |volume| match volume {
                None => Ok(true),
                Some(volume) => Ok(volume.linked_volumes.is_empty()
                    || volume.state == VolumeState::Deleting),
            })
            .await
            .map(|_| ())
        }
        .await;
        device.release(true);
        result
    }

    /// Grows a volume to at least `new_size_bytes` and returns the actual
    /// size in bytes. Never shrinks.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn resize_volume(
        &self,
        volume_id: &str,
        new_size_bytes: u64,
    ) -> Result<u64, CloudError> {
        let volume = self.get_disk_by_id(volume_id).await?;
        if volume.state != VolumeState::Available {
            return Err(CloudError::UnexpectedState {
                resource: "volume",
                id: volume_id.to_string(),
                state: volume.state.to_string(),
                expected: "available",
            });
        }
        let requested_gib = bytes_to_gib_round_up(new_size_bytes).max(1);
        if volume.size_gib >= requested_gib {
            return Ok(gib_to_bytes(volume.size_gib));
        }

        let request = models::UpdateVolumeRequest {
            volume_id: volume_id.to_string(),
            size: Some(requested_gib),
            ..Default::default()
        };
        self.api_call("resize volume", &self.backoff, || {
            self.api.update_volume(request.clone())
        })
        .await?;

        let resized = self
            .wait_volume(volume_id, move |volume| {
                Ok(volume
                    .map(|volume| volume.size_gib >= requested_gib)
                    .unwrap_or(false))
            })
            .await?
            .ok_or(CloudError::NotFound {
                resource: "volume",
                id: volume_id.to_string(),
            })?;
        Ok(gib_to_bytes(resized.size_gib))
    }

    /// Applies a mutable-parameter change to an existing volume. No provider
    /// call is made when nothing would change.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn update_volume(
        &self,
        volume_id: &str,
        volume_type: VolumeType,
        iops_per_gib: u32,
    ) -> Result<(), CloudError> {
        let volume = self.get_disk_by_id(volume_id).await?;
        let iops = match volume_type {
            VolumeType::Io1 => Some(compute_iops(volume.size_gib, iops_per_gib)),
            _ => None,
        };
        let type_changed = volume.volume_type != volume_type;
        let iops_changed = iops.is_some() && volume.iops != iops;
        if !type_changed && !iops_changed {
            return Ok(());
        }
        let request = models::UpdateVolumeRequest {
            volume_id: volume_id.to_string(),
            volume_type: type_changed.then(|| volume_type.to_string()),
            iops,
            size: None,
        };
        self.api_call("update volume", &self.backoff, || {
            self.api.update_volume(request.clone())
        })
        .await?;
        Ok(())
    }

    /// Creates a snapshot of a volume and waits for completion.
    #[tracing::instrument(level = "debug", skip(self, options), err)]
    pub async fn create_snapshot(
        &self,
        name: &str,
        volume_id: &str,
        options: &SnapshotOptions,
    ) -> Result<Snapshot, CloudError> {
        let request = models::CreateSnapshotRequest {
            client_token: client_token(name),
            description: Some(format!("Created by BSU CSI driver for {}", volume_id)),
            volume_id: volume_id.to_string(),
        };
        let created = self
            .api_call("create snapshot", &self.backoff, || {
                self.api.create_snapshot(request.clone())
            })
            .await
            .map_err(|err| {
                if is_volume_not_found(&err) {
                    CloudError::NotFound {
                        resource: "volume",
                        id: volume_id.to_string(),
                    }
                } else {
                    err
                }
            })?;

        let snapshot_id = created.snapshot_id.clone();
        self.apply_tags(&snapshot_id, SNAPSHOT_NAME_TAG_KEY, name, &options.tags)
            .await?;

        let snapshot = self
            .wait_snapshot(&snapshot_id, |snapshot| match snapshot {
                None => Ok(false),
                Some(snapshot) if snapshot.ready_to_use() => Ok(true),
                Some(snapshot) if snapshot.state.failed() => Err(CloudError::TerminalState {
                    resource: "snapshot",
                    id: snapshot.snapshot_id.clone(),
                    state: snapshot.state.to_string(),
                }),
                Some(_) => Ok(false),
            })
            .await?;
        snapshot.ok_or(CloudError::NotFound {
            resource: "snapshot",
            id: snapshot_id,
        })
    }

    /// Deletes a snapshot. Unknown identifiers surface as
    /// [`CloudError::NotFound`]; the CSI layer collapses that to success.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), CloudError> {
        let request = models::DeleteSnapshotRequest {
            snapshot_id: snapshot_id.to_string(),
        };
        self.api_call("delete snapshot", &self.backoff, || {
            self.api.delete_snapshot(request.clone())
        })
        .await
        .map_err(|err| {
            if is_snapshot_not_found(&err) || is_malformed_id(&err) {
                CloudError::NotFound {
                    resource: "snapshot",
                    id: snapshot_id.to_string(),
                }
            } else {
                err
            }
        })
    }

    /// Reads one snapshot by id.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn get_snapshot_by_id(&self, snapshot_id: &str) -> Result<Snapshot, CloudError> {
        let request = models::ReadSnapshotsRequest {
            filters: Some(models::FiltersSnapshot {
                snapshot_ids: vec![snapshot_id.to_string()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let response = self
            .api_call("read snapshots", &self.backoff, || {
                self.api.read_snapshots(request.clone())
            })
            .await?;
        let snapshot = response
            .snapshots
            .into_iter()
            .next()
            .ok_or(CloudError::NotFound {
                resource: "snapshot",
                id: snapshot_id.to_string(),
            })?;
        Snapshot::try_from(snapshot)
    }

    /// Looks a snapshot up by its CSI name tag.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn get_snapshot_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Snapshot>, CloudError> {
        let request = models::ReadSnapshotsRequest {
            filters: Some(models::FiltersSnapshot {
                tags: vec![format!("{}={}", SNAPSHOT_NAME_TAG_KEY, name)],
                ..Default::default()
            }),
            ..Default::default()
        };
        let response = self
            .api_call("read snapshots", &self.backoff, || {
                self.api.read_snapshots(request.clone())
            })
            .await?;
        let mut snapshots = response.snapshots;
        match snapshots.len() {
            0 => Ok(None),
            1 => Ok(Some(Snapshot::try_from(snapshots.remove(0))?)),
            _ => Err(CloudError::MultiSnapshots {
                name: name.to_string(),
            }),
        }
    }

    /// Lists driver-created snapshots, optionally restricted to one source
    /// volume, with provider-side pagination.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn list_snapshots(
        &self,
        volume_id: Option<&str>,
        max_results: Option<u32>,
        next_token: Option<String>,
    ) -> Result<(Vec<Snapshot>, Option<String>), CloudError> {
        // the provider rejects a page token without an explicit page size
        let results_per_page = match (max_results, &next_token) {
            (Some(max), _) => Some(max.min(MAX_RESULTS_PER_PAGE)),
            (None, Some(_)) => Some(MAX_RESULTS_PER_PAGE),
            (None, None) => None,
        };
        let request = models::ReadSnapshotsRequest {
            filters: Some(models::FiltersSnapshot {
                tag_keys: vec![SNAPSHOT_NAME_TAG_KEY.to_string()],
                volume_ids: volume_id
                    .map(|id| vec![id.to_string()])
                    .unwrap_or_default(),
                ..Default::default()
            }),
            results_per_page,
            next_page_token: next_token,
        };
        let response = self
            .api_call("list snapshots", &self.backoff, || {
                self.api.read_snapshots(request.clone())
            })
            .await?;
        let snapshots = response
            .snapshots
            .into_iter()
            .map(Snapshot::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((snapshots, response.next_page_token))
    }

    /// Looks a volume up by its CSI name tag and verifies the stored volume
    /// is compatible with the requested size and snapshot source.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn get_disk_by_name(
        &self,
        name: &str,
        capacity_bytes: u64,
        snapshot_id: Option<&str>,
    ) -> Result<Option<Volume>, CloudError> {
        let request = models::ReadVolumesRequest {
            filters: Some(models::FiltersVolume {
                tags: vec![format!("{}={}", VOLUME_NAME_TAG_KEY, name)],
                ..Default::default()
            }),
            ..Default::default()
        };
        let response = self
            .api_call("read volumes", &self.backoff, || {
                self.api.read_volumes(request.clone())
            })
            .await?;
        let mut volumes = response.volumes;
        let volume = match volumes.len() {
            0 => return Ok(None),
            1 => Volume::try_from(volumes.remove(0))?,
            _ => {
                return Err(CloudError::MultiVolumes {
                    name: name.to_string(),
                })
            }
        };

        let requested_gib = bytes_to_gib_round_up(capacity_bytes).max(1);
        if volume.size_gib != requested_gib {
            return Err(CloudError::DiskExistsDiffSize {
                name: name.to_string(),
                existing_gib: volume.size_gib,
                requested_gib,
            });
        }
        if volume.snapshot_id.as_deref() != snapshot_id.filter(|id| !id.is_empty()) {
            return Err(CloudError::AlreadyExists {
                reason: format!(
                    "volume '{}' exists with a different source snapshot",
                    name
                ),
            });
        }
        Ok(Some(volume))
    }

    /// Reads one volume by id.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn get_disk_by_id(&self, volume_id: &str) -> Result<Volume, CloudError> {
        let request = models::ReadVolumesRequest {
            filters: Some(models::FiltersVolume {
                volume_ids: vec![volume_id.to_string()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let response = self
            .api_call("read volumes", &self.backoff, || {
                self.api.read_volumes(request.clone())
            })
            .await?;
        let volume = response
            .volumes
            .into_iter()
            .next()
            .ok_or(CloudError::NotFound {
                resource: "volume",
                id: volume_id.to_string(),
            })?;
        Volume::try_from(volume)
    }

    /// Availability zones of the region, for topology validation.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn get_availability_zones(&self) -> Result<Vec<String>, CloudError> {
        let response = self
            .api_call("read subregions", &self.backoff, || {
                self.api.read_subregions()
            })
            .await?;
        Ok(response
            .subregions
            .into_iter()
            .map(|subregion| subregion.subregion_name)
            .collect())
    }

    /// Reads one instance by id.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn get_vm_by_id(&self, vm_id: &str) -> Result<Vm, CloudError> {
        let request = models::ReadVmsRequest {
            filters: Some(models::FiltersVm {
                vm_ids: vec![vm_id.to_string()],
            }),
        };
        let response = self
            .api_call("read vms", &self.backoff, || {
                self.api.read_vms(request.clone())
            })
            .await?;
        response
            .vms
            .into_iter()
            .next()
            .map(Vm::from)
            .ok_or(CloudError::NotFound {
                resource: "instance",
                id: vm_id.to_string(),
            })
    }

    async fn apply_tags(
        &self,
        resource_id: &str,
        name_key: &str,
        name: &str,
        tags: &std::collections::HashMap<String, String>,
    ) -> Result<(), CloudError> {
        let mut resource_tags = vec![models::ResourceTag::new(name_key, name)];
        resource_tags.extend(
            tags.iter()
                .map(|(key, value)| models::ResourceTag::new(key.clone(), value.clone())),
        );
        let request = models::CreateTagsRequest {
            resource_ids: vec![resource_id.to_string()],
            tags: resource_tags,
        };
        let policy = self
            .backoff
            .clone()
            .with_steps(TAG_BACKOFF_STEPS)
            .with_retry_on_errors();
        self.api_call("tag resource", &policy, || {
            self.api.create_tags(request.clone())
        })
        .await
    }

    async fn api_call<T, F, Fut>(
        &self,
        action: &'static str,
        policy: &BackoffPolicy,
        mut call: F,
    ) -> Result<T, CloudError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CloudError>>,
    {
        policy
            .run(action, || {
                let attempt = call();
                async move { policy.classify_http(attempt.await) }
            })
            .await
    }

    async fn wait_volume<P>(&self, id: &str, predicate: P) -> Result<Option<Volume>, CloudError>
    where
        P: Fn(Option<&Volume>) -> Result<bool, CloudError> + Send + 'static,
    {
        match tokio::time::timeout(
            self.wait_timeout,
            self.volume_watcher.wait_until(id, predicate),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CloudError::WaitTimeout {
                resource: "volume",
                id: id.to_string(),
            }),
        }
    }

    async fn wait_snapshot<P>(
        &self,
        id: &str,
        predicate: P,
    ) -> Result<Option<Snapshot>, CloudError>
    where
        P: Fn(Option<&Snapshot>) -> Result<bool, CloudError> + Send + 'static,
    {
        match tokio::time::timeout(
            self.wait_timeout,
            self.snapshot_watcher.wait_until(id, predicate),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CloudError::WaitTimeout {
                resource: "snapshot",
                id: id.to_string(),
            }),
        }
    }
}

fn client_token(name: &str) -> Option<String> {
    if name.len() <= CLIENT_TOKEN_MAX_LEN {
        Some(name.to_string())
    } else {
        None
    }
}
