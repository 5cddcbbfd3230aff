//! Template-clone machine backend
//!
//! Creates machines by cloning a template VM in vCenter, configuring it and
//! powering it on. vCenter is reached through the [`vim::VimClient`] seam.

#![deny(missing_docs)]

pub mod backend;
pub mod boot;
pub mod clone;
pub mod guest;
pub mod inventory;
pub mod placement;
pub mod vim;

pub use backend::{TemplateCloneBackend, TemplateCloneConfig, DEFAULT_HARDWARE_VERSION};
pub use guest::{GuestLoginConfig, NoGuestLogin, OsEnvGuestLogin};
pub use vim::{Fault, ManagedObjectRef, VimClient, VimConnector};
