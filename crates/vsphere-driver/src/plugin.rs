//! Machine lifecycle entry points invoked by the machine controller

use std::sync::Arc;

use k8s_openapi::api::core::v1::PersistentVolumeSpec;
use tracing::{debug, info};

use vsphere_common::cache::ExpiringClientCache;
use vsphere_common::telemetry::init_tracing;
use vsphere_common::{Error, ProviderId, RequestContext};
use vsphere_vmomi::{OsEnvGuestLogin, TemplateCloneBackend, VimConnector};
use vsphere_vmop::{DeclarativeVmBackend, KubeconfigConnector, SharedClient};

use crate::config::DriverConfig;
use crate::decode::{decode_request, Purpose};
use crate::dispatcher::Dispatcher;
use crate::error::MachineError;
use crate::request::{
    CreateMachineResponse, DeleteMachineResponse, GetMachineStatusResponse, GetVolumeIdsResponse,
    ListMachinesRequest, ListMachinesResponse, MachineRequest, ShutDownMachineResponse,
};
use crate::volumes::volume_ids;

/// Result of an entry point
pub type MachineResult<T> = std::result::Result<T, MachineError>;

/// The vSphere machine plugin
#[derive(Clone)]
pub struct MachinePlugin {
    dispatcher: Dispatcher,
}

impl MachinePlugin {
    /// Create a plugin over a dispatcher
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Wire production backends from configuration
    ///
    /// `vim` opens vCenter sessions for template-clone machines. Installs the
    /// tracing subscriber unless the hosting process already has one.
    pub fn from_config(config: &DriverConfig, vim: Arc<dyn VimConnector>) -> Self {
        if let Err(e) = init_tracing(config.log_format()) {
            debug!(error = %e, "keeping existing tracing subscriber");
        }
        let cache = Arc::new(ExpiringClientCache::<SharedClient>::new(
            config.client_cache_capacity,
            config.client_cache_ttl(),
        ));
        let template_clone =
            TemplateCloneBackend::new(vim, Arc::new(OsEnvGuestLogin), config.template_clone());
        let declarative_vm = DeclarativeVmBackend::new(
            Arc::new(KubeconfigConnector::new(cache)),
            config.declarative_vm(),
        );
        Self::new(Dispatcher::new(template_clone, declarative_vm))
    }

    /// Create the VM of a machine
    pub async fn create_machine(
        &self,
        ctx: &RequestContext,
        req: &MachineRequest,
    ) -> MachineResult<CreateMachineResponse> {
        let name = &req.machine_name;
        info!(machine = %name, "create machine request received");

        let decoded = decode_request(&req.provider_spec, &req.secrets, Purpose::Create)
            .map_err(|e| decode_failed(&e, format!("Create machine {name:?}")))?;
        let provider_id = self
            .dispatcher
            .create(ctx, name, &decoded)
            .await
            .map_err(|e| MachineError::wrap(&e, format!("Create machine {name:?} failed")))?;

        info!(machine = %name, provider_id = %provider_id, "VM created for machine");
        Ok(CreateMachineResponse {
            last_known_state: format!("Created {provider_id}").into_bytes(),
            provider_id,
            node_name: name.clone(),
        })
    }

    /// Delete the VM of a machine
    pub async fn delete_machine(&self, req: &MachineRequest) -> MachineResult<DeleteMachineResponse> {
        let name = &req.machine_name;
        info!(machine = %name, "delete machine request received");
        log_provider_id_hint(name, &req.provider_id);

        let decoded = decode_request(&req.provider_spec, &req.secrets, Purpose::Other)
            .map_err(|e| decode_failed(&e, format!("Delete machine {name:?}")))?;
        let provider_id = self
            .dispatcher
            .delete(name, &decoded)
            .await
            .map_err(|e| MachineError::wrap(&e, format!("Delete machine {name:?} failed")))?;

        info!(machine = %name, provider_id = %provider_id, "VM deleted for machine");
        Ok(DeleteMachineResponse::default())
    }

    /// Power off the VM of a machine
    pub async fn shut_down_machine(
        &self,
        req: &MachineRequest,
    ) -> MachineResult<ShutDownMachineResponse> {
        let name = &req.machine_name;
        info!(machine = %name, "shut down machine request received");
        log_provider_id_hint(name, &req.provider_id);

        let decoded = decode_request(&req.provider_spec, &req.secrets, Purpose::Other)
            .map_err(|e| decode_failed(&e, format!("ShutDown machine {name:?}")))?;
        let provider_id = self
            .dispatcher
            .shut_down(name, &decoded)
            .await
            .map_err(|e| MachineError::wrap(&e, format!("ShutDown machine {name:?} failed")))?;

        info!(machine = %name, provider_id = %provider_id, "VM shut down for machine");
        Ok(ShutDownMachineResponse {
            last_known_state: format!("Shut down {provider_id}").into_bytes(),
        })
    }

    /// Provider ID of the VM of a machine
    pub async fn get_machine_status(
        &self,
        req: &MachineRequest,
    ) -> MachineResult<GetMachineStatusResponse> {
        let name = &req.machine_name;
        debug!(machine = %name, "machine status request received");
        log_provider_id_hint(name, &req.provider_id);

        let decoded = decode_request(&req.provider_spec, &req.secrets, Purpose::Other)
            .map_err(|e| decode_failed(&e, format!("Machine status {name:?}")))?;
        let provider_id = self
            .dispatcher
            .get_status(name, &decoded)
            .await
            .map_err(|e| MachineError::wrap(&e, format!("Machine status {name:?} failed")))?;

        Ok(GetMachineStatusResponse {
            provider_id,
            node_name: name.clone(),
        })
    }

    /// VMs belonging to the machine class, for orphan collection
    pub async fn list_machines(
        &self,
        req: &ListMachinesRequest,
    ) -> MachineResult<ListMachinesResponse> {
        debug!("list machines request received");

        let decoded = decode_request(&req.provider_spec, &req.secrets, Purpose::Other)
            .map_err(|e| decode_failed(&e, "List machines"))?;
        let machine_list = self
            .dispatcher
            .list(&decoded)
            .await
            .map_err(|e| MachineError::wrap(&e, "List machines failed"))?;

        info!(count = machine_list.len(), "listed machines");
        Ok(ListMachinesResponse { machine_list })
    }

    /// vSphere volume IDs of a JSON list of persistent volume specs
    pub fn get_volume_ids(&self, pv_spec_list: &[u8]) -> MachineResult<GetVolumeIdsResponse> {
        let specs: Vec<PersistentVolumeSpec> = serde_json::from_slice(pv_spec_list)
            .map_err(|e| {
                MachineError::wrap(
                    &Error::serialization_for_kind("PersistentVolumeSpec list", e.to_string()),
                    "GetVolumeIDs failed",
                )
            })?;
        let volume_ids = volume_ids(&specs);
        debug!(count = volume_ids.len(), "resolved volume IDs");
        Ok(GetVolumeIdsResponse { volume_ids })
    }
}

fn decode_failed(err: &Error, request: impl std::fmt::Display) -> MachineError {
    MachineError::wrap(err, format!("{request} failed to decode provider spec and secrets"))
}

fn log_provider_id_hint(name: &str, provider_id: &str) {
    if provider_id.is_empty() {
        return;
    }
    let decoded = ProviderId::decode(provider_id);
    if decoded.is_empty() {
        debug!(machine = %name, provider_id = %provider_id, "ignoring foreign provider ID");
    } else {
        debug!(
            machine = %name,
            locality = %decoded.locality,
            machine_id = %decoded.machine_id,
            "request carries provider ID"
        );
    }
}
