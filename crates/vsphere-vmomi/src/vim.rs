//! VIM API seam
//!
//! [`VimClient`] is the narrow slice of the vCenter API the template-clone
//! backend needs, expressed over managed object references. A SOAP-backed
//! implementation lives with the hosting process; tests use the mockall
//! double.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use vsphere_common::{Error, VcenterCredentials};

#[cfg(any(test, feature = "mock"))]
use mockall::automock;

/// Managed object type of virtual machines
pub const KIND_VIRTUAL_MACHINE: &str = "VirtualMachine";
/// Managed object type of folders
pub const KIND_FOLDER: &str = "Folder";

/// A fault reported by vCenter
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Fault {
    /// Inventory lookup found nothing
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Managed object type searched for
        kind: String,
        /// Name or path searched for
        name: String,
    },

    /// Hardware upgrade requested for a VM already at that version
    #[error("virtual machine is already upgraded")]
    AlreadyUpgraded,

    /// Any other fault
    #[error("{0}")]
    Other(String),
}

impl Fault {
    /// Wrap into a provider error for the given step
    pub fn into_error(self, operation: &str) -> Error {
        Error::provider(operation, self.to_string())
    }
}

/// Closure form of [`Fault::into_error`] for `map_err`
pub fn fault(operation: &'static str) -> impl FnOnce(Fault) -> Error {
    move |f| f.into_error(operation)
}

/// Managed object reference (type + id, e.g. `VirtualMachine:vm-42`)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManagedObjectRef {
    /// Managed object type
    pub kind: String,
    /// Server-side id
    pub value: String,
}

impl ManagedObjectRef {
    /// Create a reference
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// Whether the reference points at a virtual machine
    pub fn is_virtual_machine(&self) -> bool {
        self.kind == KIND_VIRTUAL_MACHINE
    }

    /// Whether the reference points at a folder
    pub fn is_folder(&self) -> bool {
        self.kind == KIND_FOLDER
    }
}

impl std::fmt::Display for ManagedObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// VM power state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    /// Running
    PoweredOn,
    /// Stopped
    PoweredOff,
    /// Suspended
    Suspended,
}

/// Network backing of an ethernet card
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkBacking {
    /// Network or distributed port group
    pub network: ManagedObjectRef,
    /// Distributed switch UUID, for distributed port groups
    pub switch_uuid: Option<String>,
}

/// A virtual device of a VM, reduced to what cloning touches
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VirtualDevice {
    /// Virtual disk
    Disk {
        /// Device key
        key: i32,
        /// Capacity in bytes; 0 on old hosts that only report KB
        capacity_in_bytes: i64,
        /// Capacity in KB
        capacity_in_kb: i64,
    },
    /// Ethernet card of any adapter type
    EthernetCard {
        /// Device key
        key: i32,
        /// Current backing
        backing: Option<NetworkBacking>,
    },
    /// Anything else
    Other {
        /// Device key
        key: i32,
    },
}

impl VirtualDevice {
    /// Disk capacity in bytes, falling back to the KB figure
    pub fn disk_capacity(&self) -> Option<i64> {
        match self {
            VirtualDevice::Disk {
                capacity_in_bytes,
                capacity_in_kb,
                ..
            } => Some(if *capacity_in_bytes > 0 {
                *capacity_in_bytes
            } else {
                capacity_in_kb * 1024
            }),
            _ => None,
        }
    }
}

/// Device change operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceOperation {
    /// Add a device
    Add,
    /// Edit an existing device
    Edit,
}

/// A device change in a config or relocate spec
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceChange {
    /// Operation
    pub operation: DeviceOperation,
    /// Device after the change
    pub device: VirtualDevice,
}

/// Where a clone lands
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelocateSpec {
    /// Destination folder
    pub folder: ManagedObjectRef,
    /// Destination resource pool
    pub pool: ManagedObjectRef,
    /// Destination host
    pub host: Option<ManagedObjectRef>,
    /// Destination datastore
    pub datastore: Option<ManagedObjectRef>,
    /// Device changes applied while relocating
    pub device_change: Vec<DeviceChange>,
}

/// Opaque guest customization specification
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomizationSpec(pub serde_json::Value);

/// Clone parameters
#[derive(Clone, Debug, PartialEq)]
pub struct CloneSpec {
    /// Placement of the clone
    pub location: RelocateSpec,
    /// Power on after cloning
    pub power_on: bool,
    /// Mark the clone as template
    pub template: bool,
    /// Device changes applied to the clone's config
    pub config_device_change: Vec<DeviceChange>,
    /// Guest customization
    pub customization: Option<CustomizationSpec>,
}

/// Storage DRS placement request for a clone
#[derive(Clone, Debug, PartialEq)]
pub struct StoragePlacementRequest {
    /// Datastore cluster to place into
    pub storage_pod: ManagedObjectRef,
    /// Source VM
    pub vm: ManagedObjectRef,
    /// Name of the clone
    pub clone_name: String,
    /// Clone spec as it stands
    pub clone_spec: CloneSpec,
}

/// Compute placement recommendation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlacementRecommendation {
    /// Recommended host
    pub host: Option<ManagedObjectRef>,
    /// Recommended datastore
    pub datastore: ManagedObjectRef,
}

/// A vApp property as defined on a VM
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VAppPropertyInfo {
    /// Property key
    pub key: i32,
    /// Property id (e.g. "user-data")
    pub id: String,
    /// Default value
    pub default_value: String,
    /// Whether users may set it
    pub user_configurable: bool,
}

/// A vApp property edit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VAppPropertyEdit {
    /// Property key
    pub key: i32,
    /// Property id
    pub id: String,
    /// New value
    pub value: String,
}

/// Subset of a VM's configuration read by the clone flow
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VmConfigInfo {
    /// Guest OS identifier
    pub guest_id: String,
    /// vApp properties; `None` when the VM has no vApp configuration
    pub vapp_properties: Option<Vec<VAppPropertyInfo>>,
}

/// VM reconfiguration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VmConfigSpec {
    /// Virtual CPUs
    pub num_cpus: Option<i32>,
    /// Memory in MB
    pub memory_mb: Option<i64>,
    /// Lock memory reservation to the configured size
    pub memory_reservation_locked_to_max: Option<bool>,
    /// Guest OS identifier
    pub guest_id: Option<String>,
    /// vApp property edits
    pub vapp_properties: Option<Vec<VAppPropertyEdit>>,
    /// Expose disk UUIDs to the guest
    pub disk_uuid_enabled: Option<bool>,
    /// Additional advanced settings
    pub extra_config: BTreeMap<String, String>,
}

/// Value of a custom field on an entity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomFieldValue {
    /// Field key
    pub key: i32,
    /// Value
    pub value: String,
}

/// Custom field definition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomFieldDef {
    /// Field key
    pub key: i32,
    /// Field name
    pub name: String,
}

/// Name and custom values of a managed entity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagedEntity {
    /// The entity
    pub reference: ManagedObjectRef,
    /// Display name
    pub name: String,
    /// Custom field values
    pub custom_values: Vec<CustomFieldValue>,
}

/// vCenter operations used by the template-clone backend
///
/// Long-running operations return once their task has completed.
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait VimClient: Send + Sync {
    /// Find a datacenter by name; empty selects the default
    async fn datacenter(&self, name: &str) -> Result<ManagedObjectRef, Fault>;

    /// Find a compute cluster
    async fn cluster(&self, dc: &ManagedObjectRef, name: &str)
        -> Result<ManagedObjectRef, Fault>;

    /// Root resource pool of a cluster
    async fn cluster_resource_pool(
        &self,
        cluster: &ManagedObjectRef,
    ) -> Result<ManagedObjectRef, Fault>;

    /// Find a resource pool; empty selects the default
    async fn resource_pool(
        &self,
        dc: &ManagedObjectRef,
        name: &str,
    ) -> Result<ManagedObjectRef, Fault>;

    /// Find a host system
    async fn host_system(
        &self,
        dc: &ManagedObjectRef,
        name: &str,
    ) -> Result<ManagedObjectRef, Fault>;

    /// Resource pool of a standalone host or its cluster
    async fn host_resource_pool(
        &self,
        host: &ManagedObjectRef,
    ) -> Result<ManagedObjectRef, Fault>;

    /// Find a VM folder by path; empty selects the datacenter VM folder
    async fn folder(&self, dc: &ManagedObjectRef, path: &str)
        -> Result<ManagedObjectRef, Fault>;

    /// Datacenter VM folder
    async fn vm_folder(&self, dc: &ManagedObjectRef) -> Result<ManagedObjectRef, Fault>;

    /// Direct children of a folder
    async fn children(&self, folder: &ManagedObjectRef) -> Result<Vec<ManagedObjectRef>, Fault>;

    /// Find a datastore
    async fn datastore(
        &self,
        dc: &ManagedObjectRef,
        name: &str,
    ) -> Result<ManagedObjectRef, Fault>;

    /// Find a datastore cluster
    async fn storage_pod(
        &self,
        dc: &ManagedObjectRef,
        name: &str,
    ) -> Result<ManagedObjectRef, Fault>;

    /// Find a network, disambiguated by distributed switch UUID when given
    async fn network(
        &self,
        dc: &ManagedObjectRef,
        name: &str,
        switch_uuid: &str,
    ) -> Result<NetworkBacking, Fault>;

    /// Find a VM or template by name or path
    async fn virtual_machine(
        &self,
        dc: &ManagedObjectRef,
        name: &str,
    ) -> Result<ManagedObjectRef, Fault>;

    /// Find a VM by inventory path
    async fn find_by_inventory_path(&self, path: &str)
        -> Result<Option<ManagedObjectRef>, Fault>;

    /// Virtual devices of a VM
    async fn devices(&self, vm: &ManagedObjectRef) -> Result<Vec<VirtualDevice>, Fault>;

    /// Guest id and vApp descriptor of a VM
    async fn config_info(&self, vm: &ManagedObjectRef) -> Result<VmConfigInfo, Fault>;

    /// BIOS UUID of a VM
    async fn uuid(&self, vm: &ManagedObjectRef) -> Result<String, Fault>;

    /// Storage DRS datastore recommendations, best first
    async fn recommend_datastores(
        &self,
        request: &StoragePlacementRequest,
    ) -> Result<Vec<ManagedObjectRef>, Fault>;

    /// Cluster placement recommendations for a clone, best first
    async fn place_vm(
        &self,
        cluster: &ManagedObjectRef,
        vm: &ManagedObjectRef,
        clone_name: &str,
        clone_spec: &CloneSpec,
    ) -> Result<Vec<PlacementRecommendation>, Fault>;

    /// Display name of a datastore
    async fn datastore_name(&self, datastore: &ManagedObjectRef) -> Result<String, Fault>;

    /// Whether a file exists on a datastore
    async fn datastore_file_exists(
        &self,
        datastore: &ManagedObjectRef,
        path: &str,
    ) -> Result<bool, Fault>;

    /// Look up a guest customization specification
    async fn customization_spec(&self, name: &str) -> Result<Option<CustomizationSpec>, Fault>;

    /// Clone a VM and return the clone
    async fn clone_vm(
        &self,
        source: &ManagedObjectRef,
        folder: &ManagedObjectRef,
        name: &str,
        spec: &CloneSpec,
    ) -> Result<ManagedObjectRef, Fault>;

    /// Reconfigure a VM
    async fn reconfigure(&self, vm: &ManagedObjectRef, spec: &VmConfigSpec) -> Result<(), Fault>;

    /// Key of a custom field definition, if defined
    async fn find_custom_field(&self, name: &str) -> Result<Option<i32>, Fault>;

    /// Define a custom field for the given managed object type
    async fn add_custom_field(&self, name: &str, managed_object_type: &str) -> Result<i32, Fault>;

    /// Set a custom field value on an entity
    async fn set_custom_field(
        &self,
        entity: &ManagedObjectRef,
        key: i32,
        value: &str,
    ) -> Result<(), Fault>;

    /// All custom field definitions
    async fn custom_field_defs(&self) -> Result<Vec<CustomFieldDef>, Fault>;

    /// Batch fetch name and custom values
    async fn retrieve_entities(
        &self,
        refs: &[ManagedObjectRef],
    ) -> Result<Vec<ManagedEntity>, Fault>;

    /// Upgrade virtual hardware (e.g. "vmx-15")
    async fn upgrade_hardware(&self, vm: &ManagedObjectRef, version: &str) -> Result<(), Fault>;

    /// Current power state
    async fn power_state(&self, vm: &ManagedObjectRef) -> Result<PowerState, Fault>;

    /// Power on
    async fn power_on(&self, vm: &ManagedObjectRef) -> Result<(), Fault>;

    /// Power off
    async fn power_off(&self, vm: &ManagedObjectRef) -> Result<(), Fault>;

    /// Destroy the VM and its files
    async fn destroy(&self, vm: &ManagedObjectRef) -> Result<(), Fault>;

    /// Wait until the guest reports an IP address
    async fn wait_for_ip(&self, vm: &ManagedObjectRef) -> Result<String, Fault>;

    /// End the session
    async fn logout(&self) -> Result<(), Fault>;
}

/// Opens VIM sessions
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait VimConnector: Send + Sync {
    /// Log in to `https://<host>/sdk`
    async fn connect(&self, credentials: &VcenterCredentials) -> Result<Box<dyn VimClient>, Fault>;
}
