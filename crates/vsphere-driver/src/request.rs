//! Request and response shapes of the machine entry points

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Request for one machine (create, delete, shut down, status)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineRequest {
    /// Machine object name, also the VM name
    pub machine_name: String,
    /// Provider ID returned earlier, empty if unknown
    #[serde(default)]
    pub provider_id: String,
    /// Provider spec JSON
    #[serde(default)]
    pub provider_spec: Vec<u8>,
    /// Credential secret data
    #[serde(default)]
    pub secrets: BTreeMap<String, Vec<u8>>,
}

/// Request to list the machines of a machine class
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMachinesRequest {
    /// Provider spec JSON
    #[serde(default)]
    pub provider_spec: Vec<u8>,
    /// Credential secret data
    #[serde(default)]
    pub secrets: BTreeMap<String, Vec<u8>>,
}

/// Result of a create
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMachineResponse {
    /// Provider ID of the new VM
    pub provider_id: String,
    /// Name the node registers with
    pub node_name: String,
    /// Opaque state for later requests
    pub last_known_state: Vec<u8>,
}

/// Result of a delete
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMachineResponse {
    /// Opaque state for later requests
    pub last_known_state: Vec<u8>,
}

/// Result of a shut down
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutDownMachineResponse {
    /// Opaque state for later requests
    pub last_known_state: Vec<u8>,
}

/// Result of a status request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMachineStatusResponse {
    /// Provider ID of the VM
    pub provider_id: String,
    /// Name the node registers with
    pub node_name: String,
}

/// Result of a list
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMachinesResponse {
    /// Provider ID -> machine name
    pub machine_list: BTreeMap<String, String>,
}

/// Result of a volume ID request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetVolumeIdsResponse {
    /// vSphere volume IDs, in input order
    pub volume_ids: Vec<String>,
}
