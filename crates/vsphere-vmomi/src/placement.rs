//! Inventory objects a clone is placed into

use tracing::debug;

use vsphere_common::{Error, Result, TemplateCloneSpec};

use crate::vim::{fault, ManagedObjectRef, NetworkBacking, VimClient};

/// Resolved placement of a new clone
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    /// Datacenter
    pub datacenter: ManagedObjectRef,
    /// Compute cluster, if named
    pub cluster: Option<ManagedObjectRef>,
    /// Datastore cluster, if named
    pub storage_pod: Option<ManagedObjectRef>,
    /// Datastore, resolved only without datastore cluster and compute cluster
    pub datastore: Option<ManagedObjectRef>,
    /// Host, if named
    pub host: Option<ManagedObjectRef>,
    /// Resource pool
    pub resource_pool: ManagedObjectRef,
    /// VM folder
    pub folder: ManagedObjectRef,
    /// Network for the first NIC
    pub network: NetworkBacking,
    /// Template VM
    pub template: ManagedObjectRef,
}

/// Resolve every inventory object named by the spec
///
/// Datastore cluster wins over datastore; with a compute cluster the
/// datastore comes from the cluster placement recommendation later on. The
/// resource pool comes from the host, else the named pool (standalone
/// hosts), else the cluster.
pub async fn resolve_placement(
    client: &dyn VimClient,
    spec: &TemplateCloneSpec,
) -> Result<Placement> {
    let datacenter = client
        .datacenter(&spec.datacenter)
        .await
        .map_err(fault("find datacenter"))?;

    let cluster = match spec.compute_cluster.as_str() {
        "" => None,
        name => Some(
            client
                .cluster(&datacenter, name)
                .await
                .map_err(fault("find compute cluster"))?,
        ),
    };

    let mut storage_pod = None;
    let mut datastore = None;
    if !spec.datastore_cluster.is_empty() {
        storage_pod = Some(
            client
                .storage_pod(&datacenter, &spec.datastore_cluster)
                .await
                .map_err(fault("find datastore cluster"))?,
        );
    } else if cluster.is_none() {
        datastore = Some(
            client
                .datastore(&datacenter, &spec.datastore)
                .await
                .map_err(fault("find datastore"))?,
        );
    }

    let host = match spec.host_system.as_str() {
        "" => None,
        name => Some(
            client
                .host_system(&datacenter, name)
                .await
                .map_err(fault("find host system"))?,
        ),
    };

    let resource_pool = match (&host, &cluster) {
        (Some(host), _) => client
            .host_resource_pool(host)
            .await
            .map_err(fault("retrieve host system's resource pool"))?,
        (None, None) => client
            .resource_pool(&datacenter, &spec.resource_pool)
            .await
            .map_err(fault("find resource pool"))?,
        (None, Some(cluster)) => client
            .cluster_resource_pool(cluster)
            .await
            .map_err(fault("retrieve cluster's resource pool"))?,
    };

    let folder = client
        .folder(&datacenter, &spec.folder)
        .await
        .map_err(fault("find folder"))?;

    let network = client
        .network(&datacenter, &spec.network, &spec.switch_uuid)
        .await
        .map_err(fault("find network"))?;

    if spec.template_vm.is_empty() {
        return Err(Error::invalid_field("spec.templateVM", "template vm not set"));
    }
    let template = client
        .virtual_machine(&datacenter, &spec.template_vm)
        .await
        .map_err(fault("find template VM"))?;

    debug!(
        datacenter = %datacenter,
        resource_pool = %resource_pool,
        folder = %folder,
        template = %template,
        "resolved clone placement"
    );

    Ok(Placement {
        datacenter,
        cluster,
        storage_pod,
        datastore,
        host,
        resource_pool,
        folder,
        network,
        template,
    })
}
