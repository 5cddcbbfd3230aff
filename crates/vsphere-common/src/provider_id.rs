//! Provider ID codec
//!
//! Format: `vsphere://<locality>/<machine id>`. Locality is the region for
//! template-clone machines and the namespace for declarative VMs.

/// Scheme prefix of every provider ID
pub const PROVIDER_ID_PREFIX: &str = "vsphere://";

/// Encode a provider ID; an empty machine id yields an empty provider ID
pub fn encode(locality: &str, machine_id: &str) -> String {
    if machine_id.is_empty() {
        return String::new();
    }
    format!("{PROVIDER_ID_PREFIX}{locality}/{machine_id}")
}

/// A decoded provider ID
///
/// Both parts are empty when the input is not a well-formed provider ID.
/// Decoding never fails: callers only use the parts for logging and
/// best-effort lookups, and always fall back to the machine name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderId {
    /// Region or namespace
    pub locality: String,
    /// Backend-specific VM identifier
    pub machine_id: String,
}

impl ProviderId {
    /// Decode a provider ID
    pub fn decode(provider_id: &str) -> Self {
        let Some(rest) = provider_id.strip_prefix(PROVIDER_ID_PREFIX) else {
            return Self::default();
        };
        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [locality, machine_id] => Self {
                locality: locality.to_string(),
                machine_id: machine_id.to_string(),
            },
            _ => Self::default(),
        }
    }

    /// Whether decoding produced a machine id
    pub fn is_empty(&self) -> bool {
        self.machine_id.is_empty()
    }
}
