//! VM Operator `VirtualMachine` resource (vmoperator.vmware.com/v1alpha1)
//!
//! Only the fields this provider reads or writes are modelled; the server
//! keeps the rest.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Device key vSphere assigns to the first disk of a new VM
pub const SYSTEM_DISK_DEVICE_KEY: i32 = 2000;

/// Name of the system disk volume
pub const SYSTEM_VOLUME_NAME: &str = "system";

/// A virtual machine managed by VM Operator
///
/// Example:
/// ```yaml
/// apiVersion: vmoperator.vmware.com/v1alpha1
/// kind: VirtualMachine
/// metadata:
///   name: shoot--foo--worker-abc
///   namespace: shoot-ns
/// spec:
///   className: best-effort-small
///   imageName: ubuntu-20-1633387172196
///   powerState: poweredOn
///   networkInterfaces:
///     - networkType: nsx-t
///       networkName: shoot-net
///   vmMetadata:
///     configMapName: vm-metadata-shoot--foo--worker-abc
///     transport: OvfEnv
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "vmoperator.vmware.com",
    version = "v1alpha1",
    kind = "VirtualMachine",
    namespaced,
    status = "VirtualMachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// VirtualMachineImage to deploy
    pub image_name: String,

    /// VirtualMachineClass sizing the VM
    pub class_name: String,

    /// Desired power state
    pub power_state: PowerState,

    /// Network interfaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<NetworkInterface>,

    /// Storage class for the VM's disks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// VirtualMachineSetResourcePolicy to place the VM with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_policy_name: Option<String>,

    /// Boot metadata source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_metadata: Option<VmMetadata>,

    /// Volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

/// VM power state
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    /// Running
    #[default]
    PoweredOn,
    /// Stopped
    PoweredOff,
}

/// A network interface
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Network provider type (e.g. `nsx-t`, `vsphere-distributed`)
    pub network_type: String,
    /// Network name
    pub network_name: String,
}

/// Boot metadata transport
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum MetadataTransport {
    /// OVF environment (vApp properties)
    #[default]
    OvfEnv,
    /// Extra config guestinfo keys
    ExtraConfig,
}

/// Boot metadata reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VmMetadata {
    /// ConfigMap holding the metadata
    pub config_map_name: String,
    /// How the metadata reaches the guest
    pub transport: MetadataTransport,
}

/// A VM volume
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name
    pub name: String,
    /// vSphere disk backing
    #[serde(
        default,
        rename = "vSphereVolume",
        skip_serializing_if = "Option::is_none"
    )]
    pub vsphere_volume: Option<VsphereVolumeSource>,
}

/// A disk of the VM itself
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VsphereVolumeSource {
    /// Capacity by resource name (`ephemeral-storage`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capacity: BTreeMap<String, Quantity>,
    /// Device key of the disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_key: Option<i32>,
}

impl Volume {
    /// The system disk volume resized to `size_gib`
    pub fn system_disk(size_gib: u32) -> Self {
        Self {
            name: SYSTEM_VOLUME_NAME.to_string(),
            vsphere_volume: Some(VsphereVolumeSource {
                capacity: BTreeMap::from([(
                    "ephemeral-storage".to_string(),
                    Quantity(format!("{size_gib}Gi")),
                )]),
                device_key: Some(SYSTEM_DISK_DEVICE_KEY),
            }),
        }
    }
}

/// Observed VM state
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    /// Lifecycle phase (Creating, Created, Deleting, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Observed power state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<PowerState>,

    /// vSphere instance UUID, assigned once the VM exists
    #[serde(
        default,
        rename = "instanceUUID",
        skip_serializing_if = "Option::is_none"
    )]
    pub instance_uuid: Option<String>,

    /// Managed object id
    #[serde(default, rename = "uniqueID", skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    /// Primary IP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_ip: Option<String>,
}

impl VirtualMachine {
    /// Instance UUID, if assigned
    pub fn instance_uuid(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.instance_uuid.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Lifecycle phase, if reported
    pub fn phase(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.phase.as_deref())
    }
}
