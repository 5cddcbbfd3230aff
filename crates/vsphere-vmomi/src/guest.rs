//! Guest console login overrides
//!
//! Machines are normally reached over SSH. For debugging through the vSphere
//! web console a password (cloud-init images) or password hash (Ignition
//! images) can be injected through the controller's environment.

/// Environment variable holding a plain guest password
pub const ENV_MACHINE_PASSWORD: &str = "VMWARE_MACHINE_PASSWORD";

/// Environment variable holding a guest password hash (e.g. `openssl passwd -1`)
pub const ENV_MACHINE_PASSWORD_HASH: &str = "VMWARE_MACHINE_PASSWORD_HASH";

/// Source of guest console login overrides
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait GuestLoginConfig: Send + Sync {
    /// Password set through the cloud-init `password` vApp property
    fn password(&self) -> Option<String>;

    /// Password hash for the Ignition `core` user
    fn password_hash(&self) -> Option<String>;
}

/// Default implementation that reads from environment variables
#[derive(Clone, Default)]
pub struct OsEnvGuestLogin;

impl GuestLoginConfig for OsEnvGuestLogin {
    fn password(&self) -> Option<String> {
        std::env::var(ENV_MACHINE_PASSWORD)
            .ok()
            .filter(|v| !v.is_empty())
    }

    fn password_hash(&self) -> Option<String> {
        std::env::var(ENV_MACHINE_PASSWORD_HASH)
            .ok()
            .filter(|v| !v.is_empty())
    }
}

/// No console login
#[derive(Clone, Copy, Debug, Default)]
pub struct NoGuestLogin;

impl GuestLoginConfig for NoGuestLogin {
    fn password(&self) -> Option<String> {
        None
    }

    fn password_hash(&self) -> Option<String> {
        None
    }
}
