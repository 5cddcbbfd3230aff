//! Template clone: the create path of the template-clone backend

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use vsphere_common::userdata::trim_ssh_keys;
use vsphere_common::{Error, RequestContext, Result, TemplateCloneSpec};

use crate::boot::{default_vapp_properties, expand_vapp_config, BootMetadata};
use crate::guest::GuestLoginConfig;
use crate::inventory::power_off_if_running;
use crate::placement::{resolve_placement, Placement};
use crate::vim::{
    fault, CloneSpec, DeviceChange, DeviceOperation, Fault, ManagedObjectRef, RelocateSpec,
    StoragePlacementRequest, VimClient, VirtualDevice, VmConfigSpec, KIND_VIRTUAL_MACHINE,
};

const GIB: i64 = 1024 * 1024 * 1024;

/// Everything needed to create one machine by cloning a template
pub struct TemplateClone<'a> {
    /// Open VIM session
    pub client: &'a dyn VimClient,
    /// Machine (and VM) name
    pub name: &'a str,
    /// Machine spec
    pub spec: &'a TemplateCloneSpec,
    /// Plain cloud-init user data
    pub user_data: &'a str,
    /// Console login overrides
    pub login: &'a dyn GuestLoginConfig,
    /// Virtual hardware version to upgrade to; `None` skips the upgrade
    pub hardware_version: Option<u32>,
}

impl TemplateClone<'_> {
    /// Clone, configure and power on; returns the clone's UUID
    pub async fn run(&self, ctx: &RequestContext) -> Result<String> {
        let placement = resolve_placement(self.client, self.spec)
            .await
            .map_err(|e| e.context("resolve placement"))?;

        let vm = self.clone_vm(&placement).await?;
        info!(machine = %self.name, vm = %vm, "cloned template");

        self.configure(&placement, &vm).await?;
        self.apply_tags(&vm).await?;
        self.upgrade_hardware(&vm).await?;
        self.power_on(ctx, &vm).await?;

        self.client.uuid(&vm).await.map_err(fault("read VM uuid"))
    }

    async fn clone_vm(&self, placement: &Placement) -> Result<ManagedObjectRef> {
        let devices = self
            .client
            .devices(&placement.template)
            .await
            .map_err(fault("list template VM devices"))?;

        // Disk resize is checked first so a shrink never reaches vCenter
        let config_device_change = match &self.spec.system_disk {
            Some(disk) => vec![resize_system_disk(&devices, disk.size)?],
            None => Vec::new(),
        };

        let mut clone_spec = CloneSpec {
            location: RelocateSpec {
                folder: placement.folder.clone(),
                pool: placement.resource_pool.clone(),
                host: placement.host.clone(),
                datastore: None,
                device_change: vec![network_change(&devices, placement)],
            },
            power_on: false,
            template: false,
            config_device_change,
            customization: None,
        };

        let datastore = self.select_datastore(placement, &mut clone_spec).await?;
        clone_spec.location.datastore = Some(datastore.clone());

        if !self.spec.force {
            self.ensure_vmx_absent(&datastore).await?;
        }

        if !self.spec.customization.is_empty() {
            let customization = self
                .client
                .customization_spec(&self.spec.customization)
                .await
                .map_err(fault("get customization specification"))?
                .ok_or_else(|| {
                    Error::provider(
                        "get customization specification",
                        format!(
                            "customization specification {} does not exists",
                            self.spec.customization
                        ),
                    )
                })?;
            clone_spec.customization = Some(customization);
        }

        info!(
            machine = %self.name,
            template = %self.spec.template_vm,
            datastore = %datastore,
            "cloning template VM"
        );
        self.client
            .clone_vm(&placement.template, &placement.folder, self.name, &clone_spec)
            .await
            .map_err(fault("clone template VM"))
    }

    async fn select_datastore(
        &self,
        placement: &Placement,
        clone_spec: &mut CloneSpec,
    ) -> Result<ManagedObjectRef> {
        match (&placement.storage_pod, &placement.datastore, &placement.cluster) {
            (Some(pod), None, _) => {
                let request = StoragePlacementRequest {
                    storage_pod: pod.clone(),
                    vm: placement.template.clone(),
                    clone_name: self.name.to_string(),
                    clone_spec: clone_spec.clone(),
                };
                let recommendations = self
                    .client
                    .recommend_datastores(&request)
                    .await
                    .map_err(fault("retrieve storage placement"))?;
                recommendations.into_iter().next().ok_or_else(|| {
                    Error::provider(
                        "retrieve storage placement",
                        "no datastore-cluster recommendations",
                    )
                })
            }
            (_, Some(datastore), _) => Ok(datastore.clone()),
            (None, None, Some(cluster)) => {
                let recommendations = self
                    .client
                    .place_vm(cluster, &placement.template, self.name, clone_spec)
                    .await
                    .map_err(fault("place VM"))?;
                let first = recommendations.into_iter().next().ok_or_else(|| {
                    Error::provider("place VM", "no cluster recommendations")
                })?;
                if first.host.is_some() {
                    clone_spec.location.host = first.host;
                }
                Ok(first.datastore)
            }
            (None, None, None) => Err(Error::provider(
                "select datastore",
                "please provide either a cluster, datastore or datastore-cluster",
            )),
        }
    }

    async fn ensure_vmx_absent(&self, datastore: &ManagedObjectRef) -> Result<()> {
        let vmx_path = format!("{name}/{name}.vmx", name = self.name);
        let exists = self
            .client
            .datastore_file_exists(datastore, &vmx_path)
            .await
            .map_err(fault("stat vmx file"))?;
        if exists {
            let ds_name = self
                .client
                .datastore_name(datastore)
                .await
                .map_err(fault("read datastore name"))?;
            return Err(Error::conflict(format!(
                "file [{ds_name}] {vmx_path} already exists (use force=true to overwrite)"
            )));
        }
        Ok(())
    }

    async fn configure(&self, placement: &Placement, vm: &ManagedObjectRef) -> Result<()> {
        let template_config = self
            .client
            .config_info(&placement.template)
            .await
            .map_err(fault("read template VM properties"))?;
        let guest_id = if self.spec.guest_id.is_empty() {
            template_config.guest_id.clone()
        } else {
            self.spec.guest_id.clone()
        };
        debug!(
            template_guest_id = %template_config.guest_id,
            guest_id = %guest_id,
            "selected guest id"
        );

        let ssh_keys = trim_ssh_keys(&self.spec.ssh_keys);
        let properties: BTreeMap<String, String> = match &self.spec.vapp {
            Some(vapp) => vapp.properties.clone(),
            None => default_vapp_properties(
                &guest_id,
                &BootMetadata {
                    hostname: self.name,
                    user_data: self.user_data,
                    ssh_keys: &ssh_keys,
                },
                self.login,
            )
            .map_err(|e| e.context("build boot metadata"))?,
        };

        let clone_config = self
            .client
            .config_info(vm)
            .await
            .map_err(fault("read cloned VM properties"))?;
        let vapp_edits = expand_vapp_config(&properties, clone_config.vapp_properties.as_deref())?;

        let config = VmConfigSpec {
            num_cpus: (self.spec.num_cpus > 0).then_some(self.spec.num_cpus),
            memory_mb: (self.spec.memory > 0).then_some(self.spec.memory),
            memory_reservation_locked_to_max: self.spec.memory_reservation_locked_to_max,
            guest_id: (!self.spec.guest_id.is_empty()).then(|| self.spec.guest_id.clone()),
            vapp_properties: Some(vapp_edits),
            disk_uuid_enabled: Some(true),
            extra_config: self.spec.extra_config.clone(),
        };
        self.client
            .reconfigure(vm, &config)
            .await
            .map_err(fault("reconfigure VM"))
    }

    async fn apply_tags(&self, vm: &ManagedObjectRef) -> Result<()> {
        for (name, value) in &self.spec.tags {
            let key = match self
                .client
                .find_custom_field(name)
                .await
                .map_err(fault("find custom field"))?
            {
                Some(key) => key,
                None => self
                    .client
                    .add_custom_field(name, KIND_VIRTUAL_MACHINE)
                    .await
                    .map_err(fault("add custom field"))?,
            };
            self.client
                .set_custom_field(vm, key, value)
                .await
                .map_err(|f| f.into_error(&format!("set tag {name}({key})")))?;
        }
        Ok(())
    }

    async fn upgrade_hardware(&self, vm: &ManagedObjectRef) -> Result<()> {
        let Some(version) = self.hardware_version else {
            return Ok(());
        };
        let version = format!("vmx-{version:02}");
        match self.client.upgrade_hardware(vm, &version).await {
            Ok(()) => Ok(()),
            Err(Fault::AlreadyUpgraded) => {
                debug!(vm = %vm, version = %version, "virtual hardware already upgraded");
                Ok(())
            }
            Err(f) => Err(f.into_error("upgrade virtual hardware")),
        }
    }

    async fn power_on(&self, ctx: &RequestContext, vm: &ManagedObjectRef) -> Result<()> {
        self.client
            .power_on(vm)
            .await
            .map_err(fault("power on VM"))?;

        if self.spec.wait_for_ip {
            tokio::select! {
                biased;
                _ = ctx.done() => {
                    warn!(machine = %self.name, "create cancelled while waiting for VM IP");
                    self.discard(vm).await;
                    return Err(Error::Cancelled { machine: self.name.to_string() });
                }
                ip = self.client.wait_for_ip(vm) => {
                    let ip = ip.map_err(fault("wait for VM IP"))?;
                    info!(machine = %self.name, ip = %ip, "VM reported IP address");
                }
            }
        }
        Ok(())
    }

    /// Best-effort power off and destroy of an unfinished clone
    async fn discard(&self, vm: &ManagedObjectRef) {
        let result = async {
            power_off_if_running(self.client, vm).await?;
            self.client.destroy(vm).await.map_err(fault("destroy VM"))
        }
        .await;
        match result {
            Ok(()) => info!(machine = %self.name, vm = %vm, "destroyed unfinished clone"),
            Err(e) => {
                warn!(machine = %self.name, vm = %vm, error = %e, "failed to destroy unfinished clone")
            }
        }
    }
}

/// Point the template's first NIC at the placement network, or add one
fn network_change(devices: &[VirtualDevice], placement: &Placement) -> DeviceChange {
    let existing = devices.iter().find_map(|d| match d {
        VirtualDevice::EthernetCard { key, .. } => Some(*key),
        _ => None,
    });
    match existing {
        Some(key) => DeviceChange {
            operation: DeviceOperation::Edit,
            device: VirtualDevice::EthernetCard {
                key,
                backing: Some(placement.network.clone()),
            },
        },
        None => DeviceChange {
            operation: DeviceOperation::Add,
            device: VirtualDevice::EthernetCard {
                key: -1,
                backing: Some(placement.network.clone()),
            },
        },
    }
}

/// Grow the template's first disk to `size_gib`
fn resize_system_disk(devices: &[VirtualDevice], size_gib: u32) -> Result<DeviceChange> {
    let (key, old_size) = devices
        .iter()
        .find_map(|d| match d {
            VirtualDevice::Disk { key, .. } => d.disk_capacity().map(|c| (*key, c)),
            _ => None,
        })
        .ok_or_else(|| Error::provider("resize system disk", "system disk device not found"))?;

    let new_size = i64::from(size_gib) * GIB;
    if new_size < old_size {
        return Err(Error::provider(
            "resize system disk",
            format!("cannot shrink system disk size from {old_size} to {new_size}"),
        ));
    }
    Ok(DeviceChange {
        operation: DeviceOperation::Edit,
        device: VirtualDevice::Disk {
            key,
            capacity_in_bytes: new_size,
            capacity_in_kb: new_size / 1024,
        },
    })
}
