//! Supervisor cluster clients built from kubeconfig secrets

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use vsphere_common::cache::{credential_key, ClientCache};
use vsphere_common::{Error, Result};

use crate::client::{KubeVmOperatorClient, VmOperatorClient};

/// Connection timeout towards the supervisor cluster
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Read timeout towards the supervisor cluster
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared supervisor client handle
pub type SharedClient = Arc<dyn VmOperatorClient>;

/// Produces supervisor clients for a kubeconfig blob
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait VmOperatorConnector: Send + Sync {
    /// Client for the cluster the kubeconfig points at
    async fn connect(&self, kubeconfig: &[u8]) -> Result<SharedClient>;
}

/// Builds `kube` clients, reusing them through a [`ClientCache`]
pub struct KubeconfigConnector {
    cache: Arc<dyn ClientCache<SharedClient>>,
}

impl KubeconfigConnector {
    /// Create a connector backed by `cache`
    pub fn new(cache: Arc<dyn ClientCache<SharedClient>>) -> Self {
        Self { cache }
    }
}

async fn build_client(kubeconfig: &[u8]) -> Result<Client> {
    let text = std::str::from_utf8(kubeconfig)
        .map_err(|e| Error::provider("build supervisor client", format!("kubeconfig is not UTF-8: {e}")))?;
    let kubeconfig = Kubeconfig::from_yaml(text).map_err(|e| {
        Error::provider("build supervisor client", format!("failed to parse kubeconfig: {e}"))
    })?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::provider("build supervisor client", format!("failed to load kubeconfig: {e}"))
        })?;
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::provider("build supervisor client", format!("failed to create client: {e}"))
    })
}

#[async_trait]
impl VmOperatorConnector for KubeconfigConnector {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<SharedClient> {
        let key = credential_key(kubeconfig);
        if let Some(client) = self.cache.get(&key) {
            debug!(cache_key = %key, "reusing supervisor client");
            return Ok(client);
        }

        let client: SharedClient = Arc::new(KubeVmOperatorClient::new(build_client(kubeconfig).await?));
        debug!(cache_key = %key, "built supervisor client");
        self.cache.insert(key, client.clone());
        Ok(client)
    }
}
