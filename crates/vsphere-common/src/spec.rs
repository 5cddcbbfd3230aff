//! Machine provider spec: a closed set of versioned shapes
//!
//! The provider-spec bytes are a JSON object in one of two shapes. Which one
//! applies is decided by the credential secret (see [`crate::secrets`]), not
//! by the JSON itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Spec version discriminant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecVersion {
    /// Template clone through the vCenter API
    V1,
    /// Declarative VM through the VM Operator custom resource
    V2,
}

impl SpecVersion {
    /// Numeric form of the version
    pub fn as_u8(self) -> u8 {
        match self {
            SpecVersion::V1 => 1,
            SpecVersion::V2 => 2,
        }
    }
}

impl std::fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

/// System disk size override
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SystemDisk {
    /// Size in GiB
    pub size: u32,
}

/// Explicit vApp property values
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct VApp {
    /// Property id -> value
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Template-clone machine spec (version 1)
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TemplateCloneSpec {
    /// vSphere region, used as provider ID locality
    pub region: String,
    /// Datacenter name; empty selects the default datacenter
    pub datacenter: String,

    /// Datastore cluster for storage DRS placement
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datastore_cluster: String,
    /// Datastore
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datastore: String,

    /// Compute cluster
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compute_cluster: String,
    /// Resource pool
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_pool: String,
    /// Host system
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_system: String,

    /// VM folder; empty means the datacenter VM folder
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub folder: String,

    /// Number of virtual CPUs; 0 keeps the template's
    #[serde(default)]
    pub num_cpus: i32,
    /// Memory in MB; 0 keeps the template's
    #[serde(default)]
    pub memory: i64,
    /// Lock the memory reservation to the configured size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_reservation_locked_to_max: Option<bool>,

    /// System disk size override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_disk: Option<SystemDisk>,

    /// Additional `extraConfig` entries for the VM
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_config: BTreeMap<String, String>,

    /// Network (port group) name
    pub network: String,
    /// Distributed switch UUID, when the port group name is ambiguous
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub switch_uuid: String,

    /// Template VM to clone
    #[serde(rename = "templateVM")]
    pub template_vm: String,

    /// Guest OS identifier override
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub guest_id: String,

    /// Explicit vApp properties; replaces the generated boot metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vapp: Option<VApp>,

    /// Overwrite an existing VM directory on the datastore
    #[serde(default)]
    pub force: bool,

    /// Block until the guest reports an IP address
    #[serde(default, rename = "waitForIP")]
    pub wait_for_ip: bool,

    /// Name of a guest customization specification
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub customization: String,

    /// SSH public keys to deploy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<String>,

    /// Tags placed on the VM as custom fields
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Declarative VM machine spec (version 2)
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DeclarativeVmSpec {
    /// Namespace of the VirtualMachine resources, used as provider ID locality
    pub namespace: String,
    /// VirtualMachineImage name
    pub image_name: String,
    /// VirtualMachineClass name
    pub class_name: String,
    /// Network name
    pub network_name: String,
    /// Network type (e.g. "nsx-t", "vsphere-distributed")
    pub network_type: String,

    /// Storage class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    /// VirtualMachineSetResourcePolicy name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_policy_name: Option<String>,

    /// System disk size override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_disk: Option<SystemDisk>,

    /// SSH public keys to deploy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<String>,

    /// Tags; the cluster/role identity becomes labels, the rest annotations
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A decoded machine spec
///
/// Missing fields decode to their empty value; [`crate::validation`] reports
/// them all at once instead of failing on the first.
#[derive(Clone, Debug, PartialEq)]
pub enum MachineSpec {
    /// Template clone
    V1(TemplateCloneSpec),
    /// Declarative VM
    V2(DeclarativeVmSpec),
}

impl MachineSpec {
    /// Decode provider-spec bytes in the shape of the given version
    pub fn decode(version: SpecVersion, bytes: &[u8]) -> Result<Self> {
        let kind = format!("provider spec {version}");
        match version {
            SpecVersion::V1 => serde_json::from_slice(bytes).map(MachineSpec::V1),
            SpecVersion::V2 => serde_json::from_slice(bytes).map(MachineSpec::V2),
        }
        .map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
    }

    /// Version discriminant
    pub fn version(&self) -> SpecVersion {
        match self {
            MachineSpec::V1(_) => SpecVersion::V1,
            MachineSpec::V2(_) => SpecVersion::V2,
        }
    }

    /// Machine tags
    pub fn tags(&self) -> &BTreeMap<String, String> {
        match self {
            MachineSpec::V1(spec) => &spec.tags,
            MachineSpec::V2(spec) => &spec.tags,
        }
    }

    /// SSH public keys
    pub fn ssh_keys(&self) -> &[String] {
        match self {
            MachineSpec::V1(spec) => &spec.ssh_keys,
            MachineSpec::V2(spec) => &spec.ssh_keys,
        }
    }
}
