//! Supervisor cluster access for VirtualMachine and ConfigMap resources

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;

#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use vsphere_common::PROVIDER_USER_AGENT;

use crate::crd::VirtualMachine;

/// Operations on the supervisor cluster used by the declarative backend
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait VmOperatorClient: Send + Sync {
    /// Create or update a ConfigMap with server-side apply
    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<(), kube::Error>;

    /// Create a VirtualMachine
    async fn create(&self, vm: &VirtualMachine) -> Result<VirtualMachine, kube::Error>;

    /// Get a VirtualMachine; `None` if it does not exist
    async fn get(&self, namespace: &str, name: &str)
        -> Result<Option<VirtualMachine>, kube::Error>;

    /// Replace a VirtualMachine
    async fn replace(&self, vm: &VirtualMachine) -> Result<VirtualMachine, kube::Error>;

    /// Delete a VirtualMachine; deleting a missing one succeeds
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;

    /// List VirtualMachines carrying all `labels`
    async fn list(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<VirtualMachine>, kube::Error>;
}

/// [`VmOperatorClient`] over a `kube::Client`
#[derive(Clone)]
pub struct KubeVmOperatorClient {
    client: Client,
}

impl KubeVmOperatorClient {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn vms(&self, namespace: &str) -> Api<VirtualMachine> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn namespace_of(vm: &VirtualMachine) -> &str {
    vm.metadata.namespace.as_deref().unwrap_or_default()
}

fn name_of(vm: &VirtualMachine) -> &str {
    vm.metadata.name.as_deref().unwrap_or_default()
}

/// `k1=v1,k2=v2` selector for equality matching
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl VmOperatorClient for KubeVmOperatorClient {
    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<(), kube::Error> {
        let namespace = config_map.metadata.namespace.as_deref().unwrap_or_default();
        let name = config_map.metadata.name.as_deref().unwrap_or_default();
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            name,
            &PatchParams::apply(PROVIDER_USER_AGENT).force(),
            &Patch::Apply(config_map),
        )
        .await?;
        Ok(())
    }

    async fn create(&self, vm: &VirtualMachine) -> Result<VirtualMachine, kube::Error> {
        self.vms(namespace_of(vm))
            .create(&PostParams::default(), vm)
            .await
    }

    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachine>, kube::Error> {
        self.vms(namespace).get_opt(name).await
    }

    async fn replace(&self, vm: &VirtualMachine) -> Result<VirtualMachine, kube::Error> {
        self.vms(namespace_of(vm))
            .replace(name_of(vm), &PostParams::default(), vm)
            .await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        match self
            .vms(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<VirtualMachine>, kube::Error> {
        let params = ListParams::default().labels(&label_selector(labels));
        Ok(self.vms(namespace).list(&params).await?.items)
    }
}
