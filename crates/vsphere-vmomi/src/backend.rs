//! Template-clone backend: one VIM session per call

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use vsphere_common::provider_id;
use vsphere_common::{RelevantTags, RequestContext, Result, TemplateCloneSpec, VcenterCredentials};

use crate::clone::TemplateClone;
use crate::guest::GuestLoginConfig;
use crate::inventory;
use crate::vim::{fault, VimClient, VimConnector};

/// Virtual hardware version new clones are upgraded to
pub const DEFAULT_HARDWARE_VERSION: u32 = 15;

/// Backend settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateCloneConfig {
    /// Hardware version to upgrade clones to; `None` keeps the template's
    pub hardware_version: Option<u32>,
}

impl Default for TemplateCloneConfig {
    fn default() -> Self {
        Self {
            hardware_version: Some(DEFAULT_HARDWARE_VERSION),
        }
    }
}

/// Machine lifecycle against vCenter by cloning template VMs
#[derive(Clone)]
pub struct TemplateCloneBackend {
    connector: Arc<dyn VimConnector>,
    login: Arc<dyn GuestLoginConfig>,
    config: TemplateCloneConfig,
}

impl TemplateCloneBackend {
    /// Create a backend
    pub fn new(
        connector: Arc<dyn VimConnector>,
        login: Arc<dyn GuestLoginConfig>,
        config: TemplateCloneConfig,
    ) -> Self {
        Self {
            connector,
            login,
            config,
        }
    }

    async fn connect(&self, credentials: &VcenterCredentials) -> Result<Box<dyn VimClient>> {
        debug!(url = %credentials.sdk_url(), "opening vCenter session");
        self.connector
            .connect(credentials)
            .await
            .map_err(fault("connect to vCenter"))
    }

    async fn logout(client: &dyn VimClient) {
        if let Err(e) = client.logout().await {
            warn!(error = %e, "vCenter logout failed");
        }
    }

    /// Clone and start a machine; returns its provider ID
    pub async fn create(
        &self,
        ctx: &RequestContext,
        credentials: &VcenterCredentials,
        name: &str,
        spec: &TemplateCloneSpec,
        user_data: &str,
    ) -> Result<String> {
        let client = self.connect(credentials).await?;
        let result = TemplateClone {
            client: client.as_ref(),
            name,
            spec,
            user_data,
            login: self.login.as_ref(),
            hardware_version: self.config.hardware_version,
        }
        .run(ctx)
        .await;
        Self::logout(client.as_ref()).await;

        let id = provider_id::encode(&spec.region, &result?);
        info!(machine = %name, provider_id = %id, "created machine");
        Ok(id)
    }

    /// Power off and destroy a machine; returns its provider ID
    pub async fn delete(
        &self,
        credentials: &VcenterCredentials,
        name: &str,
        spec: &TemplateCloneSpec,
    ) -> Result<String> {
        let client = self.connect(credentials).await?;
        let result = inventory::delete(client.as_ref(), spec, name).await;
        Self::logout(client.as_ref()).await;
        Ok(provider_id::encode(&spec.region, &result?))
    }

    /// Power off a machine; returns its provider ID
    pub async fn shut_down(
        &self,
        credentials: &VcenterCredentials,
        name: &str,
        spec: &TemplateCloneSpec,
    ) -> Result<String> {
        let client = self.connect(credentials).await?;
        let result = inventory::shut_down(client.as_ref(), spec, name).await;
        Self::logout(client.as_ref()).await;
        Ok(provider_id::encode(&spec.region, &result?))
    }

    /// Provider ID of an existing machine
    pub async fn get_status(
        &self,
        credentials: &VcenterCredentials,
        name: &str,
        spec: &TemplateCloneSpec,
    ) -> Result<String> {
        let client = self.connect(credentials).await?;
        let result = async {
            let vm = inventory::find_vm(client.as_ref(), spec, name).await?;
            client.uuid(&vm).await.map_err(fault("read VM uuid"))
        }
        .await;
        Self::logout(client.as_ref()).await;
        Ok(provider_id::encode(&spec.region, &result?))
    }

    /// Machines carrying the spec's cluster and role tags, provider ID -> name
    ///
    /// A spec without both tags lists nothing.
    pub async fn list(
        &self,
        credentials: &VcenterCredentials,
        spec: &TemplateCloneSpec,
    ) -> Result<BTreeMap<String, String>> {
        let Ok(identity) = RelevantTags::derive(&spec.tags) else {
            debug!("spec lacks cluster or role tags, listing nothing");
            return Ok(BTreeMap::new());
        };

        let client = self.connect(credentials).await?;
        let result = async {
            let vms = inventory::list_vms(client.as_ref(), spec, &identity).await?;
            let mut machines = BTreeMap::new();
            for vm in vms {
                let uuid = client
                    .uuid(&vm.reference)
                    .await
                    .map_err(fault("read VM uuid"))?;
                machines.insert(provider_id::encode(&spec.region, &uuid), vm.name);
            }
            Ok(machines)
        }
        .await;
        Self::logout(client.as_ref()).await;
        result
    }
}
