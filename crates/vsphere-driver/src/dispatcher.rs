//! Routes each operation to the backend of the spec's version

use std::collections::BTreeMap;

use vsphere_common::{Error, MachineSpec, RequestContext, Result, Secrets};
use vsphere_vmomi::TemplateCloneBackend;
use vsphere_vmop::DeclarativeVmBackend;

use crate::decode::DecodedRequest;

/// The two backends behind one front
#[derive(Clone)]
pub struct Dispatcher {
    template_clone: TemplateCloneBackend,
    declarative_vm: DeclarativeVmBackend,
}

/// Version-specific view of a decoded request
enum Target<'a> {
    TemplateClone {
        spec: &'a vsphere_common::TemplateCloneSpec,
        credentials: &'a vsphere_common::VcenterCredentials,
        user_data: &'a str,
    },
    DeclarativeVm {
        spec: &'a vsphere_common::DeclarativeVmSpec,
        kubeconfig: &'a [u8],
        user_data: &'a str,
    },
}

fn target(req: &DecodedRequest) -> Result<Target<'_>> {
    match (&req.spec, &req.secrets) {
        (
            MachineSpec::V1(spec),
            Secrets::Vcenter {
                credentials,
                user_data,
            },
        ) => Ok(Target::TemplateClone {
            spec,
            credentials,
            user_data,
        }),
        (
            MachineSpec::V2(spec),
            Secrets::Kubeconfig {
                kubeconfig,
                user_data,
            },
        ) => Ok(Target::DeclarativeVm {
            spec,
            kubeconfig,
            user_data,
        }),
        (spec, _) => Err(Error::invalid_field(
            "secret",
            format!("credentials do not match provider spec {}", spec.version()),
        )),
    }
}

impl Dispatcher {
    /// Combine the backends
    pub fn new(template_clone: TemplateCloneBackend, declarative_vm: DeclarativeVmBackend) -> Self {
        Self {
            template_clone,
            declarative_vm,
        }
    }

    /// Create a machine; returns its provider ID
    pub async fn create(
        &self,
        ctx: &RequestContext,
        name: &str,
        req: &DecodedRequest,
    ) -> Result<String> {
        match target(req)? {
            Target::TemplateClone {
                spec,
                credentials,
                user_data,
            } => {
                self.template_clone
                    .create(ctx, credentials, name, spec, user_data)
                    .await
            }
            Target::DeclarativeVm {
                spec,
                kubeconfig,
                user_data,
            } => {
                self.declarative_vm
                    .create(ctx, kubeconfig, name, spec, user_data)
                    .await
            }
        }
    }

    /// Delete a machine; returns its provider ID
    pub async fn delete(&self, name: &str, req: &DecodedRequest) -> Result<String> {
        match target(req)? {
            Target::TemplateClone {
                spec, credentials, ..
            } => self.template_clone.delete(credentials, name, spec).await,
            Target::DeclarativeVm {
                spec, kubeconfig, ..
            } => self.declarative_vm.delete(kubeconfig, name, spec).await,
        }
    }

    /// Power off a machine; returns its provider ID
    pub async fn shut_down(&self, name: &str, req: &DecodedRequest) -> Result<String> {
        match target(req)? {
            Target::TemplateClone {
                spec, credentials, ..
            } => self.template_clone.shut_down(credentials, name, spec).await,
            Target::DeclarativeVm {
                spec, kubeconfig, ..
            } => self.declarative_vm.shut_down(kubeconfig, name, spec).await,
        }
    }

    /// Provider ID of an existing machine
    pub async fn get_status(&self, name: &str, req: &DecodedRequest) -> Result<String> {
        match target(req)? {
            Target::TemplateClone {
                spec, credentials, ..
            } => self.template_clone.get_status(credentials, name, spec).await,
            Target::DeclarativeVm {
                spec, kubeconfig, ..
            } => self.declarative_vm.get_status(kubeconfig, name, spec).await,
        }
    }

    /// Machines of the spec's cluster and role, provider ID -> name
    pub async fn list(&self, req: &DecodedRequest) -> Result<BTreeMap<String, String>> {
        match target(req)? {
            Target::TemplateClone {
                spec, credentials, ..
            } => self.template_clone.list(credentials, spec).await,
            Target::DeclarativeVm {
                spec, kubeconfig, ..
            } => self.declarative_vm.list(kubeconfig, spec).await,
        }
    }
}
