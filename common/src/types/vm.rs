use serde::{Deserialize, Serialize};

/// Instance information, reduced to what the driver needs.
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    /// provider-assigned instance identifier (`i-` prefixed)
    pub vm_id: String,
    /// instance flavour, e.g. `tinav5.c2r4p1`
    pub vm_type: String,
    /// subregion (availability zone) hosting the instance
    pub subregion_name: String,
    /// block devices currently attached to the instance
    pub block_device_mappings: Vec<BlockDeviceMapping>,
}

impl Vm {
    /// Device name under which `volume_id` is attached, if it is.
    pub fn device_for_volume(&self, volume_id: &str) -> Option<&str> {
        self.block_device_mappings
            .iter()
            .find(|mapping| mapping.volume_id == volume_id)
            .map(|mapping| mapping.device_name.as_str())
    }
}

/// A single attached block device on an instance.
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceMapping {
    /// device name on the instance, e.g. `/dev/sda1`
    pub device_name: String,
    /// volume backing the device
    pub volume_id: String,
}
