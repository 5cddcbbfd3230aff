//! Credential secret parsing
//!
//! The secret map decides the spec version: a `vsphereKubeconfig` entry means
//! the declarative VM backend, its absence the template-clone backend.

use std::collections::BTreeMap;

use crate::error::FieldError;
use crate::spec::SpecVersion;
use crate::{Error, Result};

// =============================================================================
// Secret keys
// =============================================================================

/// vCenter host name
pub const SECRET_VSPHERE_HOST: &str = "vsphereHost";
/// vCenter user name
pub const SECRET_VSPHERE_USERNAME: &str = "vsphereUsername";
/// vCenter password
pub const SECRET_VSPHERE_PASSWORD: &str = "vspherePassword";
/// Skip TLS verification towards vCenter ("true" or "1")
pub const SECRET_VSPHERE_INSECURE_SSL: &str = "vsphereInsecureSSL";
/// Kubeconfig of the supervisor cluster running the VM Operator
pub const SECRET_VSPHERE_KUBECONFIG: &str = "vsphereKubeconfig";
/// Cloud-init user data for the guest
pub const SECRET_USER_DATA: &str = "userData";

/// Pick the spec version from the keys present in a secret map
pub fn detect_spec_version(secret_map: &BTreeMap<String, Vec<u8>>) -> SpecVersion {
    if secret_map.contains_key(SECRET_VSPHERE_KUBECONFIG) {
        SpecVersion::V2
    } else {
        SpecVersion::V1
    }
}

/// vCenter credentials
#[derive(Clone, PartialEq, Eq)]
pub struct VcenterCredentials {
    /// Host name (optionally with port)
    pub host: String,
    /// User name
    pub username: String,
    /// Password
    pub password: String,
    /// Skip TLS verification
    pub insecure: bool,
}

impl VcenterCredentials {
    /// SDK endpoint URL
    pub fn sdk_url(&self) -> String {
        format!("https://{}/sdk", self.host)
    }
}

impl std::fmt::Debug for VcenterCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VcenterCredentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("insecure", &self.insecure)
            .finish()
    }
}

/// Decoded credential secret
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Secrets {
    /// Credentials for the template-clone backend
    Vcenter {
        /// vCenter login
        credentials: VcenterCredentials,
        /// Guest user data; empty when not required by the operation
        user_data: String,
    },
    /// Credentials for the declarative VM backend
    Kubeconfig {
        /// Raw kubeconfig of the supervisor cluster
        kubeconfig: Vec<u8>,
        /// Guest user data; empty when not required by the operation
        user_data: String,
    },
}

impl Secrets {
    /// Parse a secret map for the given spec version
    ///
    /// `require_user_data` is set for create requests only. Every missing
    /// key is reported in one error.
    pub fn from_secret_map(
        version: SpecVersion,
        secret_map: &BTreeMap<String, Vec<u8>>,
        require_user_data: bool,
    ) -> Result<Self> {
        let required: &[&str] = match version {
            SpecVersion::V1 => &[
                SECRET_VSPHERE_HOST,
                SECRET_VSPHERE_USERNAME,
                SECRET_VSPHERE_PASSWORD,
            ],
            SpecVersion::V2 => &[SECRET_VSPHERE_KUBECONFIG],
        };

        let mut missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|key| !secret_map.contains_key(*key))
            .collect();
        if require_user_data && !secret_map.contains_key(SECRET_USER_DATA) {
            missing.push(SECRET_USER_DATA);
        }
        if !missing.is_empty() {
            let message = format!(
                "invalid secret map. Missing keys: '{}'",
                missing.join("', '")
            );
            return Err(Error::validation(vec![FieldError::new("secret", message)]));
        }

        let text = |key: &str| -> String {
            secret_map
                .get(key)
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .unwrap_or_default()
        };
        let user_data = text(SECRET_USER_DATA);

        Ok(match version {
            SpecVersion::V1 => {
                let insecure = text(SECRET_VSPHERE_INSECURE_SSL);
                Secrets::Vcenter {
                    credentials: VcenterCredentials {
                        host: text(SECRET_VSPHERE_HOST),
                        username: text(SECRET_VSPHERE_USERNAME),
                        password: text(SECRET_VSPHERE_PASSWORD),
                        insecure: insecure.eq_ignore_ascii_case("true") || insecure == "1",
                    },
                    user_data,
                }
            }
            SpecVersion::V2 => Secrets::Kubeconfig {
                kubeconfig: secret_map
                    .get(SECRET_VSPHERE_KUBECONFIG)
                    .cloned()
                    .unwrap_or_default(),
                user_data,
            },
        })
    }

    /// Guest user data
    pub fn user_data(&self) -> &str {
        match self {
            Secrets::Vcenter { user_data, .. } | Secrets::Kubeconfig { user_data, .. } => {
                user_data
            }
        }
    }
}
