//! Common types for the vSphere machine provider: spec model, secrets,
//! tag identity, provider IDs, errors and shared utilities

#![deny(missing_docs)]

pub mod cache;
pub mod context;
pub mod error;
pub mod provider_id;
pub mod secrets;
pub mod spec;
pub mod tags;
pub mod telemetry;
pub mod userdata;
pub mod validation;

pub use context::RequestContext;
pub use error::{Error, FieldError};
pub use provider_id::ProviderId;
pub use secrets::{Secrets, VcenterCredentials};
pub use spec::{DeclarativeVmSpec, MachineSpec, SpecVersion, TemplateCloneSpec};
pub use tags::RelevantTags;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager and user agent used towards downstream APIs
pub const PROVIDER_USER_AGENT: &str = "machine-controller-manager-provider-vsphere";
