//! Lookup, power and listing of existing machines

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use vsphere_common::{Error, RelevantTags, Result, TemplateCloneSpec};

use crate::vim::{fault, ManagedObjectRef, PowerState, VimClient};

/// Inventory path of a machine's VM: `/<datacenter>/vm[/<folder>]/<name>`
pub fn inventory_path(spec: &TemplateCloneSpec, name: &str) -> String {
    if spec.folder.is_empty() {
        format!("/{}/vm/{}", spec.datacenter, name)
    } else {
        format!("/{}/vm/{}/{}", spec.datacenter, spec.folder, name)
    }
}

/// Find a machine's VM by its inventory path
pub async fn find_vm(
    client: &dyn VimClient,
    spec: &TemplateCloneSpec,
    name: &str,
) -> Result<ManagedObjectRef> {
    let path = inventory_path(spec, name);
    client
        .find_by_inventory_path(&path)
        .await
        .map_err(fault("find VM by inventory path"))?
        .ok_or_else(|| Error::machine_not_found(name))
}

/// Power off a VM unless it already is off or suspended
pub async fn power_off_if_running(client: &dyn VimClient, vm: &ManagedObjectRef) -> Result<()> {
    let state = client
        .power_state(vm)
        .await
        .map_err(fault("read power state"))?;
    if state == PowerState::PoweredOn {
        client.power_off(vm).await.map_err(fault("power off VM"))?;
        info!(vm = %vm, "powered off VM");
    } else {
        debug!(vm = %vm, state = ?state, "VM not running");
    }
    Ok(())
}

/// Power off a machine's VM; returns its UUID
pub async fn shut_down(
    client: &dyn VimClient,
    spec: &TemplateCloneSpec,
    name: &str,
) -> Result<String> {
    let vm = find_vm(client, spec, name).await?;
    let uuid = client.uuid(&vm).await.map_err(fault("read VM uuid"))?;
    power_off_if_running(client, &vm).await?;
    Ok(uuid)
}

/// Power off and destroy a machine's VM; returns its UUID
pub async fn delete(
    client: &dyn VimClient,
    spec: &TemplateCloneSpec,
    name: &str,
) -> Result<String> {
    let vm = find_vm(client, spec, name).await?;
    let uuid = client.uuid(&vm).await.map_err(fault("read VM uuid"))?;
    power_off_if_running(client, &vm).await?;
    client.destroy(&vm).await.map_err(fault("destroy VM"))?;
    info!(machine = %name, uuid = %uuid, "destroyed VM");
    Ok(uuid)
}

/// A machine's VM found by listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedVm {
    /// VM reference
    pub reference: ManagedObjectRef,
    /// VM name, equal to the machine name
    pub name: String,
}

/// List the VMs of the configured folder that carry `identity`
///
/// Custom field values are matched by field name, so VMs tagged under either
/// convention are returned.
pub async fn list_vms(
    client: &dyn VimClient,
    spec: &TemplateCloneSpec,
    identity: &RelevantTags,
) -> Result<Vec<ListedVm>> {
    let dc = client
        .datacenter(&spec.datacenter)
        .await
        .map_err(fault("find datacenter"))?;
    let mut folder = client
        .vm_folder(&dc)
        .await
        .map_err(fault("find VM folder"))?;

    if !spec.folder.is_empty() {
        folder = find_child_folder(client, &folder, &spec.folder).await?;
    }

    let vms: Vec<ManagedObjectRef> = client
        .children(&folder)
        .await
        .map_err(fault("list folder children"))?
        .into_iter()
        .filter(ManagedObjectRef::is_virtual_machine)
        .collect();
    if vms.is_empty() {
        return Ok(Vec::new());
    }

    let field_names: HashMap<i32, String> = client
        .custom_field_defs()
        .await
        .map_err(fault("read custom field definitions"))?
        .into_iter()
        .map(|def| (def.key, def.name))
        .collect();

    let entities = client
        .retrieve_entities(&vms)
        .await
        .map_err(fault("retrieve VM properties"))?;

    let listed = entities
        .into_iter()
        .filter(|entity| {
            let tags: BTreeMap<&str, &str> = entity
                .custom_values
                .iter()
                .filter_map(|cv| {
                    field_names
                        .get(&cv.key)
                        .map(|name| (name.as_str(), cv.value.as_str()))
                })
                .collect();
            identity.matches(tags)
        })
        .map(|entity| ListedVm {
            reference: entity.reference,
            name: entity.name,
        })
        .collect::<Vec<_>>();

    debug!(
        cluster = %identity.cluster_name(),
        role = %identity.node_role(),
        count = listed.len(),
        "listed VMs"
    );
    Ok(listed)
}

async fn find_child_folder(
    client: &dyn VimClient,
    parent: &ManagedObjectRef,
    name: &str,
) -> Result<ManagedObjectRef> {
    let folders: Vec<ManagedObjectRef> = client
        .children(parent)
        .await
        .map_err(fault("list folder children"))?
        .into_iter()
        .filter(ManagedObjectRef::is_folder)
        .collect();
    if folders.is_empty() {
        return Err(Error::provider(
            "find folder",
            format!("Folder {name} not found"),
        ));
    }

    let entities = client
        .retrieve_entities(&folders)
        .await
        .map_err(fault("retrieve folder names"))?;
    entities
        .into_iter()
        .find(|e| e.name == name)
        .map(|e| e.reference)
        .ok_or_else(|| Error::provider("find folder", format!("Folder {name} not found")))
}
