//! Declarative machine backend
//!
//! Creates machines by submitting VM Operator `VirtualMachine` resources to a
//! vSphere supervisor cluster and waiting for vSphere to assign an instance
//! UUID.

#![deny(missing_docs)]

pub mod backend;
pub mod client;
pub mod connector;
pub mod crd;

pub use backend::{DeclarativeVmBackend, DeclarativeVmConfig};
pub use client::{KubeVmOperatorClient, VmOperatorClient};
pub use connector::{KubeconfigConnector, SharedClient, VmOperatorConnector};
pub use crd::{VirtualMachine, VirtualMachineSpec, VirtualMachineStatus};
