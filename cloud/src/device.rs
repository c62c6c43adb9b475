//! Device-name bookkeeping for volume attachments.
//!
//! The provider requires the caller to pick the device name under which a
//! volume is linked to an instance. This manager hands out unused
//! `/dev/xvd<suffix>` names per instance and keeps a reservation for the
//! duration of the attach/detach so two concurrent attachments never pick
//! the same name. A reservation whose attach wait failed in an unknown
//! provider state is tainted: the suffix stays reserved until the process
//! restarts and rediscovers attachments from the instance records.

use crate::error::CloudError;
use common_lib::types::Vm;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Device path prefix used for volume attachments.
pub const DEVICE_PREFIX: &str = "/dev/xvd";

/// Suffix alphabet, iterated in this fixed order so independent processes
/// agree on "next free".
const SUFFIXES: &[char] = &[
    'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't',
    'u', 'v', 'w', 'x', 'y', 'z',
];

#[derive(Debug, Default)]
struct Reservation {
    suffix: char,
    tainted: bool,
}

#[derive(Debug, Default)]
struct VmDevices {
    /// volume id -> reservation, held while an attach or detach is running
    in_flight: HashMap<String, Reservation>,
}

/// Per-process allocator of device names.
#[derive(Debug, Clone, Default)]
pub struct DeviceManager {
    inner: Arc<Mutex<HashMap<String, VmDevices>>>,
}

/// A device name handed out by the manager.
///
/// The record must be released on every exit path of the operation that
/// requested it; releasing is idempotent. A tainted record survives a
/// non-forced release so its suffix is not handed out again.
#[derive(Debug)]
pub struct Device {
    /// full device path, e.g. `/dev/xvdb`
    pub path: String,
    /// true when the instance already had this volume attached
    pub is_already_assigned: bool,
    vm_id: String,
    volume_id: String,
    tainted: Arc<AtomicBool>,
    manager: DeviceManager,
    released: bool,
}

impl Device {
    /// Marks the suffix unusable for the rest of the process lifetime.
    pub fn taint(&self) {
        self.tainted.store(true, Ordering::SeqCst);
        let mut inner = self.manager.inner.lock();
        if let Some(devices) = inner.get_mut(&self.vm_id) {
            if let Some(reservation) = devices.in_flight.get_mut(&self.volume_id) {
                reservation.tainted = true;
            }
        }
    }

    /// Drops the reservation. A tainted reservation is only dropped when
    /// `force_unassign` is set (detach paths).
    pub fn release(&mut self, force_unassign: bool) {
        if self.released {
            return;
        }
        self.released = true;
        if self.tainted.load(Ordering::SeqCst) && !force_unassign {
            return;
        }
        let mut inner = self.manager.inner.lock();
        if let Some(devices) = inner.get_mut(&self.vm_id) {
            devices.in_flight.remove(&self.volume_id);
            if devices.in_flight.is_empty() {
                inner.remove(&self.vm_id);
            }
        }
    }
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the device for `(vm, volume_id)`, allocating a fresh suffix
    /// when the pair has neither an instance-record attachment nor an
    /// in-flight reservation.
    pub fn new_device(&self, vm: &Vm, volume_id: &str) -> Result<Device, CloudError> {
        let mut inner = self.inner.lock();

        // attachment acknowledged by the provider
        if let Some(path) = vm.device_for_volume(volume_id) {
            return Ok(self.device(vm, volume_id, path.to_string(), true, false));
        }

        let devices = inner.entry(vm.vm_id.clone()).or_default();

        // a concurrent operation on the same pair gets the same name back
        if let Some(reservation) = devices.in_flight.get(volume_id) {
            let path = format!("{}{}", DEVICE_PREFIX, reservation.suffix);
            let tainted = reservation.tainted;
            return Ok(self.device(vm, volume_id, path, true, tainted));
        }

        let suffix = SUFFIXES
            .iter()
            .copied()
            .find(|suffix| {
                !Self::suffix_in_instance(vm, *suffix)
                    && !devices
                        .in_flight
                        .values()
                        .any(|reservation| reservation.suffix == *suffix)
            })
            .ok_or(CloudError::NoDeviceAvailable {
                vm_id: vm.vm_id.clone(),
            })?;

        devices.in_flight.insert(
            volume_id.to_string(),
            Reservation {
                suffix,
                tainted: false,
            },
        );
        let path = format!("{}{}", DEVICE_PREFIX, suffix);
        Ok(self.device(vm, volume_id, path, false, false))
    }

    /// Looks the pair up without allocating.
    pub fn get_device(&self, vm: &Vm, volume_id: &str) -> Option<Device> {
        if let Some(path) = vm.device_for_volume(volume_id) {
            return Some(self.device(vm, volume_id, path.to_string(), true, false));
        }
        let inner = self.inner.lock();
        let reservation = inner.get(&vm.vm_id)?.in_flight.get(volume_id)?;
        let path = format!("{}{}", DEVICE_PREFIX, reservation.suffix);
        let tainted = reservation.tainted;
        drop(inner);
        Some(self.device(vm, volume_id, path, true, tainted))
    }

    fn device(
        &self,
        vm: &Vm,
        volume_id: &str,
        path: String,
        is_already_assigned: bool,
        tainted: bool,
    ) -> Device {
        Device {
            path,
            is_already_assigned,
            vm_id: vm.vm_id.clone(),
            volume_id: volume_id.to_string(),
            tainted: Arc::new(AtomicBool::new(tainted)),
            manager: self.clone(),
            released: false,
        }
    }

    /// True when the instance record already uses this suffix, whatever the
    /// device naming scheme of the attachment (`/dev/xvdX` or `/dev/sdX`).
    fn suffix_in_instance(vm: &Vm, suffix: char) -> bool {
        vm.block_device_mappings
            .iter()
            .any(|mapping| mapping.device_name.ends_with(suffix))
    }
}
