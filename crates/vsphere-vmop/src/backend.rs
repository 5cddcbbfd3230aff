//! Declarative VM backend: VirtualMachine resources on a supervisor cluster

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use vsphere_common::tags::LABEL_MCM_VSPHERE;
use vsphere_common::userdata::{add_ssh_keys_section, trim_ssh_keys};
use vsphere_common::{provider_id, DeclarativeVmSpec, Error, RelevantTags, RequestContext, Result};

use crate::client::VmOperatorClient;
use crate::connector::VmOperatorConnector;
use crate::crd::{
    MetadataTransport, NetworkInterface, PowerState, VirtualMachine, VirtualMachineSpec,
    VmMetadata, Volume,
};

/// Interval between readiness checks of a new VM
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How long a new VM may take to get an instance UUID
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(3 * 60);

const ANNOTATION_IMAGE_SUPPORTED_CHECK: &str = "vmoperator.vmware.com/image-supported-check";
const ANNOTATION_VSPHERE_CUSTOMIZATION: &str = "vmoperator.vmware.com/vsphere-customization";

/// Name of the boot metadata ConfigMap of a machine
pub fn config_map_name(machine: &str) -> String {
    format!("vm-metadata-{machine}")
}

/// Backend settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclarativeVmConfig {
    /// Interval between readiness checks
    pub poll_interval: Duration,
    /// Total time to wait for an instance UUID
    pub create_timeout: Duration,
}

impl Default for DeclarativeVmConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            create_timeout: DEFAULT_CREATE_TIMEOUT,
        }
    }
}

/// Machine lifecycle through VM Operator
#[derive(Clone)]
pub struct DeclarativeVmBackend {
    connector: Arc<dyn VmOperatorConnector>,
    config: DeclarativeVmConfig,
}

impl DeclarativeVmBackend {
    /// Create a backend
    pub fn new(connector: Arc<dyn VmOperatorConnector>, config: DeclarativeVmConfig) -> Self {
        Self { connector, config }
    }

    /// Create a machine and wait for its instance UUID; returns its provider ID
    ///
    /// If the VM gets no UUID in time, or the request is cancelled first, the
    /// half-created resource is deleted on a best-effort basis.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        kubeconfig: &[u8],
        name: &str,
        spec: &DeclarativeVmSpec,
        user_data: &str,
    ) -> Result<String> {
        let client = self.connector.connect(kubeconfig).await?;

        let user_data = add_ssh_keys_section(user_data, &trim_ssh_keys(&spec.ssh_keys))
            .map_err(|e| e.context("add ssh keys to user data"))?;
        let config_map = metadata_config_map(name, &spec.namespace, &user_data);
        client.apply_config_map(&config_map).await.map_err(|e| {
            Error::from(e).context(&format!("create/update configmap {}", config_map_name(name)))
        })?;

        let identity = RelevantTags::derive(&spec.tags)
            .map_err(|_| Error::provider("create virtual machine", "missing relevant tags"))?;
        let vm = virtual_machine(name, spec, &identity);

        let created = client.create(&vm).await.map_err(|e| {
            Error::from(e).context(&format!("create virtual machine {name}"))
        })?;
        info!(machine = %name, namespace = %spec.namespace, "created virtual machine");

        self.await_instance_uuid(ctx, client.as_ref(), name, &spec.namespace, created)
            .await
    }

    async fn await_instance_uuid(
        &self,
        ctx: &RequestContext,
        client: &dyn VmOperatorClient,
        name: &str,
        namespace: &str,
        mut vm: VirtualMachine,
    ) -> Result<String> {
        let deadline = Instant::now() + self.config.create_timeout;
        while vm.instance_uuid().is_none() && Instant::now() < deadline {
            tokio::select! {
                _ = ctx.done() => {
                    warn!(machine = %name, "create cancelled while waiting for instance UUID");
                    compensating_delete(client, namespace, name).await;
                    return Err(Error::Cancelled { machine: name.to_string() });
                }
                _ = sleep(self.config.poll_interval) => {}
            }

            vm = match client.get(namespace, name).await {
                Ok(Some(vm)) => vm,
                Ok(None) => {
                    return Err(Error::provider(
                        "create virtual machine",
                        format!("virtual machine {name} disappeared while waiting for instance UUID"),
                    ));
                }
                Err(e) => {
                    compensating_delete(client, namespace, name).await;
                    return Err(Error::from(e).context(&format!("get virtual machine {name}")));
                }
            };
            debug!(machine = %name, phase = ?vm.phase(), "polled virtual machine");
        }

        match vm.instance_uuid() {
            Some(uuid) => {
                let id = provider_id::encode(namespace, uuid);
                info!(machine = %name, provider_id = %id, "virtual machine ready");
                Ok(id)
            }
            None => {
                compensating_delete(client, namespace, name).await;
                Err(Error::Timeout {
                    machine: name.to_string(),
                    phase: vm.phase().map(str::to_string),
                })
            }
        }
    }

    async fn fetch(
        &self,
        client: &dyn VmOperatorClient,
        name: &str,
        namespace: &str,
    ) -> Result<VirtualMachine> {
        client
            .get(namespace, name)
            .await
            .map_err(|e| Error::from(e).context(&format!("get virtual machine {name}")))?
            .ok_or_else(|| Error::machine_not_found_in(name, namespace))
    }

    /// Delete a machine; returns its provider ID
    pub async fn delete(
        &self,
        kubeconfig: &[u8],
        name: &str,
        spec: &DeclarativeVmSpec,
    ) -> Result<String> {
        let client = self.connector.connect(kubeconfig).await?;
        let vm = self.fetch(client.as_ref(), name, &spec.namespace).await?;
        client
            .delete(&spec.namespace, name)
            .await
            .map_err(|e| Error::from(e).context(&format!("delete virtual machine {name}")))?;
        info!(machine = %name, namespace = %spec.namespace, "deleted virtual machine");
        Ok(provider_id::encode(
            &spec.namespace,
            vm.instance_uuid().unwrap_or_default(),
        ))
    }

    /// Request power off; does not wait for it. Returns the provider ID
    pub async fn shut_down(
        &self,
        kubeconfig: &[u8],
        name: &str,
        spec: &DeclarativeVmSpec,
    ) -> Result<String> {
        let client = self.connector.connect(kubeconfig).await?;
        let mut vm = self.fetch(client.as_ref(), name, &spec.namespace).await?;
        vm.spec.power_state = PowerState::PoweredOff;
        let vm = client
            .replace(&vm)
            .await
            .map_err(|e| Error::from(e).context(&format!("update virtual machine {name}")))?;
        info!(machine = %name, namespace = %spec.namespace, "requested power off");
        Ok(provider_id::encode(
            &spec.namespace,
            vm.instance_uuid().unwrap_or_default(),
        ))
    }

    /// Provider ID of an existing machine; empty while no UUID is assigned
    pub async fn get_status(
        &self,
        kubeconfig: &[u8],
        name: &str,
        spec: &DeclarativeVmSpec,
    ) -> Result<String> {
        let client = self.connector.connect(kubeconfig).await?;
        let vm = self.fetch(client.as_ref(), name, &spec.namespace).await?;
        let status = vm.status.clone().unwrap_or_default();
        debug!(
            machine = %name,
            phase = ?status.phase,
            power_state = ?status.power_state,
            instance_uuid = ?status.instance_uuid,
            unique_id = ?status.unique_id,
            vm_ip = ?status.vm_ip,
            "virtual machine status"
        );
        Ok(provider_id::encode(
            &spec.namespace,
            vm.instance_uuid().unwrap_or_default(),
        ))
    }

    /// Machines carrying the spec's cluster and role labels, provider ID -> name
    ///
    /// A spec without both tags lists nothing; VMs without UUID are skipped.
    pub async fn list(
        &self,
        kubeconfig: &[u8],
        spec: &DeclarativeVmSpec,
    ) -> Result<BTreeMap<String, String>> {
        let client = self.connector.connect(kubeconfig).await?;
        let Ok(identity) = RelevantTags::derive(&spec.tags) else {
            debug!("spec lacks cluster or role tags, listing nothing");
            return Ok(BTreeMap::new());
        };

        let vms = client
            .list(&spec.namespace, &machine_labels(&identity))
            .await
            .map_err(|e| {
                Error::from(e).context(&format!(
                    "list virtual machines in namespace {}",
                    spec.namespace
                ))
            })?;

        let machines: BTreeMap<String, String> = vms
            .iter()
            .filter(|vm| {
                let labels = vm.metadata.labels.iter().flatten();
                identity.matches(labels.map(|(k, v)| (k.as_str(), v.as_str())))
            })
            .filter_map(|vm| {
                let uuid = vm.instance_uuid()?;
                let name = vm.metadata.name.clone()?;
                Some((provider_id::encode(&spec.namespace, uuid), name))
            })
            .collect();
        debug!(
            namespace = %spec.namespace,
            count = machines.len(),
            "listed virtual machines"
        );
        Ok(machines)
    }
}

async fn compensating_delete(client: &dyn VmOperatorClient, namespace: &str, name: &str) {
    match client.delete(namespace, name).await {
        Ok(()) => info!(machine = %name, "deleted unfinished virtual machine"),
        Err(e) => warn!(machine = %name, error = %e, "failed to delete unfinished virtual machine"),
    }
}

/// Relevant labels plus the ownership label
fn machine_labels(identity: &RelevantTags) -> BTreeMap<String, String> {
    let mut labels = identity.labels();
    labels.insert(LABEL_MCM_VSPHERE.to_string(), "true".to_string());
    labels
}

fn metadata_config_map(name: &str, namespace: &str, user_data: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name(name)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            ("hostname".to_string(), name.to_string()),
            ("user-data".to_string(), STANDARD.encode(user_data)),
        ])),
        ..Default::default()
    }
}

fn virtual_machine(name: &str, spec: &DeclarativeVmSpec, identity: &RelevantTags) -> VirtualMachine {
    let mut annotations = identity.non_relevant(&spec.tags);
    annotations.insert(ANNOTATION_IMAGE_SUPPORTED_CHECK.to_string(), "disable".to_string());
    annotations.insert(ANNOTATION_VSPHERE_CUSTOMIZATION.to_string(), "disable".to_string());

    let mut vm = VirtualMachine::new(
        name,
        VirtualMachineSpec {
            image_name: spec.image_name.clone(),
            class_name: spec.class_name.clone(),
            power_state: PowerState::PoweredOn,
            network_interfaces: vec![NetworkInterface {
                network_type: spec.network_type.clone(),
                network_name: spec.network_name.clone(),
            }],
            storage_class: spec.storage_class.clone(),
            resource_policy_name: spec.resource_policy_name.clone(),
            vm_metadata: Some(VmMetadata {
                config_map_name: config_map_name(name),
                transport: MetadataTransport::OvfEnv,
            }),
            volumes: spec
                .system_disk
                .iter()
                .map(|disk| Volume::system_disk(disk.size))
                .collect(),
        },
    );
    vm.metadata.namespace = Some(spec.namespace.clone());
    vm.metadata.labels = Some(machine_labels(identity));
    vm.metadata.annotations = Some(annotations);
    vm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockVmOperatorClient;
    use crate::connector::{MockVmOperatorConnector, SharedClient};
    use crate::crd::VirtualMachineStatus;
    use tokio_util::sync::CancellationToken;
    use vsphere_common::spec::SystemDisk;

    const NS: &str = "shoot-ns";

    fn spec() -> DeclarativeVmSpec {
        DeclarativeVmSpec {
            namespace: NS.into(),
            image_name: "ubuntu-22".into(),
            class_name: "best-effort-small".into(),
            network_name: "shoot-net".into(),
            network_type: "nsx-t".into(),
            storage_class: Some("wcp-storage".into()),
            system_disk: Some(SystemDisk { size: 30 }),
            ssh_keys: vec!["ssh-ed25519 AAAA".into()],
            tags: BTreeMap::from([
                ("kubernetes.io/cluster/shoot--foo".to_string(), "1".to_string()),
                ("kubernetes.io/role/node".to_string(), "1".to_string()),
                ("team".to_string(), "infra".to_string()),
            ]),
            ..Default::default()
        }
    }

    fn vm_with(phase: &str, uuid: Option<&str>) -> VirtualMachine {
        let mut vm = VirtualMachine::new("m1", VirtualMachineSpec::default());
        vm.metadata.namespace = Some(NS.into());
        vm.status = Some(VirtualMachineStatus {
            phase: Some(phase.into()),
            instance_uuid: uuid.map(str::to_string),
            ..Default::default()
        });
        vm
    }

    fn owned_labels(cluster: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("mcm.gardener.cloud/cluster".to_string(), cluster.to_string()),
            ("mcm.gardener.cloud/role".to_string(), "node".to_string()),
            ("mcm.gardener.cloud/machine".to_string(), "true".to_string()),
        ])
    }

    fn backend(client: MockVmOperatorClient) -> DeclarativeVmBackend {
        let client: SharedClient = Arc::new(client);
        let mut connector = MockVmOperatorConnector::new();
        connector
            .expect_connect()
            .returning(move |_| Ok(client.clone()));
        DeclarativeVmBackend::new(Arc::new(connector), DeclarativeVmConfig::default())
    }

    // ==========================================================================
    // Story Tests: Creating a machine
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn story_create_waits_for_instance_uuid() {
        let mut client = MockVmOperatorClient::new();
        client
            .expect_apply_config_map()
            .withf(|cm| {
                let data = cm.data.as_ref().unwrap();
                let user_data = String::from_utf8(STANDARD.decode(&data["user-data"]).unwrap())
                    .unwrap();
                cm.metadata.name.as_deref() == Some("vm-metadata-m1")
                    && cm.metadata.namespace.as_deref() == Some(NS)
                    && data["hostname"] == "m1"
                    && user_data == "#cloud-config\n\nssh_authorized_keys:\n- \"ssh-ed25519 AAAA\"\n"
            })
            .times(1)
            .returning(|_| Ok(()));
        client
            .expect_create()
            .withf(|vm| {
                let labels = vm.metadata.labels.as_ref().unwrap();
                let annotations = vm.metadata.annotations.as_ref().unwrap();
                labels["mcm.gardener.cloud/cluster"] == "shoot--foo"
                    && labels["mcm.gardener.cloud/role"] == "node"
                    && labels["mcm.gardener.cloud/machine"] == "true"
                    && annotations["team"] == "infra"
                    && annotations["vmoperator.vmware.com/image-supported-check"] == "disable"
                    && !annotations.contains_key("kubernetes.io/role/node")
                    && vm.spec.volumes == vec![Volume::system_disk(30)]
                    && vm.spec.storage_class.as_deref() == Some("wcp-storage")
            })
            .times(1)
            .returning(|_| Ok(vm_with("Creating", None)));

        let mut seq = mockall::Sequence::new();
        client
            .expect_get()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Some(vm_with("Creating", None))));
        client
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Some(vm_with("Created", Some("5012-abcd")))));
        client.expect_delete().never();

        let id = backend(client)
            .create(&RequestContext::background(), b"kubeconfig", "m1", &spec(), "#cloud-config\n")
            .await
            .unwrap();
        assert_eq!(id, "vsphere://shoot-ns/5012-abcd");
    }

    #[tokio::test(start_paused = true)]
    async fn story_create_timeout_deletes_half_created_vm() {
        let mut client = MockVmOperatorClient::new();
        client.expect_apply_config_map().returning(|_| Ok(()));
        client
            .expect_create()
            .returning(|_| Ok(vm_with("Creating", None)));
        // 3 minutes at 10s intervals
        client
            .expect_get()
            .times(18)
            .returning(|_, _| Ok(Some(vm_with("Creating", None))));
        client
            .expect_delete()
            .withf(|ns, name| ns == NS && name == "m1")
            .times(1)
            .returning(|_, _| Ok(()));

        let err = backend(client)
            .create(&RequestContext::background(), b"kubeconfig", "m1", &spec(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(
            err.to_string(),
            "timeout on vm create of virtual machine m1. phase=Creating"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn story_cancelled_create_stops_polling_and_cleans_up() {
        let mut client = MockVmOperatorClient::new();
        client.expect_apply_config_map().returning(|_| Ok(()));
        client
            .expect_create()
            .returning(|_| Ok(vm_with("Creating", None)));
        client.expect_get().never();
        client.expect_delete().times(1).returning(|_, _| Ok(()));

        let token = CancellationToken::new();
        token.cancel();
        let err = backend(client)
            .create(&RequestContext::with_cancellation(token), b"kubeconfig", "m1", &spec(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn story_vm_vanishing_during_create_is_not_reported_as_not_found() {
        let mut client = MockVmOperatorClient::new();
        client.expect_apply_config_map().returning(|_| Ok(()));
        client
            .expect_create()
            .returning(|_| Ok(vm_with("Creating", None)));
        client.expect_get().times(1).returning(|_, _| Ok(None));
        client.expect_delete().never();

        let err = backend(client)
            .create(&RequestContext::background(), b"kubeconfig", "m1", &spec(), "")
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err, Error::Provider { .. }));
        assert!(err
            .to_string()
            .contains("virtual machine m1 disappeared while waiting for instance UUID"));
    }

    #[tokio::test(start_paused = true)]
    async fn story_failed_poll_deletes_half_created_vm() {
        let mut client = MockVmOperatorClient::new();
        client.expect_apply_config_map().returning(|_| Ok(()));
        client
            .expect_create()
            .returning(|_| Ok(vm_with("Creating", None)));
        client.expect_get().times(1).returning(|_, _| {
            Err(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "connection refused".to_string(),
                reason: "ServiceUnavailable".to_string(),
                code: 503,
            }))
        });
        client
            .expect_delete()
            .withf(|ns, name| ns == NS && name == "m1")
            .times(1)
            .returning(|_, _| Ok(()));

        let err = backend(client)
            .create(&RequestContext::background(), b"kubeconfig", "m1", &spec(), "")
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("get virtual machine m1"));
    }

    #[tokio::test]
    async fn create_without_identity_tags_submits_nothing() {
        let mut client = MockVmOperatorClient::new();
        client.expect_apply_config_map().returning(|_| Ok(()));
        client.expect_create().never();

        let spec = DeclarativeVmSpec {
            tags: BTreeMap::new(),
            ..spec()
        };
        let err = backend(client)
            .create(&RequestContext::background(), b"kubeconfig", "m1", &spec, "")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing relevant tags"));
    }

    #[tokio::test]
    async fn existing_ssh_section_is_a_conflict() {
        let mut client = MockVmOperatorClient::new();
        client.expect_apply_config_map().never();

        let err = backend(client)
            .create(
                &RequestContext::background(),
                b"kubeconfig",
                "m1",
                &spec(),
                "#cloud-config\nssh_authorized_keys:\n- a\n",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    // ==========================================================================
    // Story Tests: Existing machines
    // ==========================================================================

    #[tokio::test]
    async fn story_status_of_missing_vm_is_not_found_with_namespace() {
        let mut client = MockVmOperatorClient::new();
        client.expect_get().returning(|_, _| Ok(None));

        let err = backend(client)
            .get_status(b"kubeconfig", "m1", &spec())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "machine m1 not found in namespace shoot-ns");
    }

    #[tokio::test]
    async fn shut_down_records_powered_off() {
        let mut client = MockVmOperatorClient::new();
        client
            .expect_get()
            .returning(|_, _| Ok(Some(vm_with("Created", Some("5012-abcd")))));
        client
            .expect_replace()
            .withf(|vm| vm.spec.power_state == PowerState::PoweredOff)
            .times(1)
            .returning(|vm| Ok(vm.clone()));

        let id = backend(client)
            .shut_down(b"kubeconfig", "m1", &spec())
            .await
            .unwrap();
        assert_eq!(id, "vsphere://shoot-ns/5012-abcd");
    }

    #[tokio::test]
    async fn delete_returns_provider_id() {
        let mut client = MockVmOperatorClient::new();
        client
            .expect_get()
            .returning(|_, _| Ok(Some(vm_with("Created", Some("5012-abcd")))));
        client.expect_delete().times(1).returning(|_, _| Ok(()));

        let id = backend(client)
            .delete(b"kubeconfig", "m1", &spec())
            .await
            .unwrap();
        assert_eq!(id, "vsphere://shoot-ns/5012-abcd");
    }

    #[tokio::test]
    async fn list_skips_vms_without_uuid() {
        let mut client = MockVmOperatorClient::new();
        client
            .expect_list()
            .withf(|ns, labels| {
                ns == NS
                    && labels.len() == 3
                    && labels["mcm.gardener.cloud/machine"] == "true"
            })
            .returning(|_, _| {
                let mut ready = vm_with("Created", Some("uuid-1"));
                ready.metadata.name = Some("m1".into());
                ready.metadata.labels = Some(owned_labels("shoot--foo"));
                let mut pending = vm_with("Creating", None);
                pending.metadata.name = Some("m2".into());
                pending.metadata.labels = Some(owned_labels("shoot--foo"));
                Ok(vec![ready, pending])
            });

        let machines = backend(client).list(b"kubeconfig", &spec()).await.unwrap();
        assert_eq!(
            machines,
            BTreeMap::from([("vsphere://shoot-ns/uuid-1".to_string(), "m1".to_string())])
        );
    }

    #[tokio::test]
    async fn list_drops_vms_of_another_cluster() {
        let mut client = MockVmOperatorClient::new();
        client.expect_list().returning(|_, _| {
            let mut own = vm_with("Created", Some("uuid-1"));
            own.metadata.name = Some("m1".into());
            own.metadata.labels = Some(owned_labels("shoot--foo"));
            let mut foreign = vm_with("Created", Some("uuid-2"));
            foreign.metadata.name = Some("bar-1".into());
            foreign.metadata.labels = Some(owned_labels("shoot--bar"));
            let mut unlabelled = vm_with("Created", Some("uuid-3"));
            unlabelled.metadata.name = Some("stray".into());
            Ok(vec![own, foreign, unlabelled])
        });

        let machines = backend(client).list(b"kubeconfig", &spec()).await.unwrap();
        assert_eq!(
            machines,
            BTreeMap::from([("vsphere://shoot-ns/uuid-1".to_string(), "m1".to_string())])
        );
    }

    #[tokio::test]
    async fn list_without_identity_tags_is_empty() {
        let mut client = MockVmOperatorClient::new();
        client.expect_list().never();

        let spec = DeclarativeVmSpec {
            tags: BTreeMap::new(),
            ..spec()
        };
        assert!(backend(client).list(b"kubeconfig", &spec).await.unwrap().is_empty());
    }
}
