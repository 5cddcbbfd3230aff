//! First-boot metadata delivered through vApp properties
//!
//! Cloud-init images read `hostname`, `user-data` and `password` properties.
//! CoreOS images read an Ignition document from `guestinfo.coreos.config.data`.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::{context, Environment};

use vsphere_common::userdata::add_ssh_keys_section;
use vsphere_common::{Error, Result};

use crate::guest::GuestLoginConfig;
use crate::vim::{VAppPropertyEdit, VAppPropertyInfo};

/// Guest id that receives an Ignition document instead of cloud-init
pub const COREOS_GUEST_ID: &str = "coreos64Guest";

/// vApp property carrying the Ignition document
pub const IGNITION_PROPERTY: &str = "guestinfo.coreos.config.data";

/// Ignition template loaded at compile time
const IGNITION_TEMPLATE: &str = include_str!("../templates/ignition.json.j2");

/// Inputs for the boot metadata of one machine
pub struct BootMetadata<'a> {
    /// Machine name, used as hostname
    pub hostname: &'a str,
    /// Plain cloud-init user data
    pub user_data: &'a str,
    /// Trimmed SSH public keys
    pub ssh_keys: &'a [String],
}

fn json(value: &impl serde::Serialize) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::serialization_for_kind("ignition", e.to_string()))
}

/// Render the Ignition document for a CoreOS guest
pub fn coreos_ignition(meta: &BootMetadata<'_>, password_hash: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("ignition", IGNITION_TEMPLATE)
        .map_err(|e| Error::serialization_for_kind("ignition", e.to_string()))?;

    let ctx = context! {
        password_hash => json(&password_hash)?,
        ssh_keys => json(&meta.ssh_keys)?,
        hostname_source => json(&format!("data:,{}", meta.hostname))?,
        user_data_source => json(&format!(
            "data:text/plain;charset=utf-8;base64,{}",
            STANDARD.encode(meta.user_data)
        ))?,
    };

    env.get_template("ignition")
        .and_then(|t| t.render(ctx))
        .map_err(|e| Error::serialization_for_kind("ignition", e.to_string()))
}

/// vApp properties for a guest without explicit properties in its spec
pub fn default_vapp_properties(
    guest_id: &str,
    meta: &BootMetadata<'_>,
    login: &dyn GuestLoginConfig,
) -> Result<BTreeMap<String, String>> {
    if guest_id == COREOS_GUEST_ID {
        let password_hash = login.password_hash().unwrap_or_else(|| "*".to_string());
        let ignition = coreos_ignition(meta, &password_hash)?;
        return Ok(BTreeMap::from([(IGNITION_PROPERTY.to_string(), ignition)]));
    }

    let user_data = add_ssh_keys_section(meta.user_data, meta.ssh_keys)?;
    let mut props = BTreeMap::from([
        ("hostname".to_string(), meta.hostname.to_string()),
        ("user-data".to_string(), STANDARD.encode(user_data)),
    ]);
    if let Some(password) = login.password() {
        props.insert("password".to_string(), password);
    }
    Ok(props)
}

/// Turn requested property values into edits against a VM's vApp descriptor
///
/// Every user-configurable property is edited: to the requested value, else
/// its default, else a single space. Requesting a read-only property is a
/// conflict; requesting an undefined one is an error.
pub fn expand_vapp_config(
    requested: &BTreeMap<String, String>,
    defined: Option<&[VAppPropertyInfo]>,
) -> Result<Vec<VAppPropertyEdit>> {
    let Some(defined) = defined else {
        return Err(Error::provider(
            "expand vApp",
            "this VM lacks a vApp configuration and cannot have vApp properties set on it",
        ));
    };

    let mut remaining = requested.clone();
    let mut edits = Vec::new();
    for prop in defined {
        if prop.user_configurable {
            let default = if prop.default_value.is_empty() {
                " ".to_string()
            } else {
                prop.default_value.clone()
            };
            edits.push(VAppPropertyEdit {
                key: prop.key,
                id: prop.id.clone(),
                value: remaining.remove(&prop.id).unwrap_or(default),
            });
        } else if remaining.contains_key(&prop.id) {
            return Err(Error::conflict(format!(
                "vApp property with userConfigurable=false specified in vapp.properties: {:?}",
                remaining.keys().collect::<Vec<_>>()
            )));
        }
    }

    if !remaining.is_empty() {
        return Err(Error::provider(
            "expand vApp",
            format!(
                "unsupported vApp properties in vapp.properties: {:?}",
                remaining.keys().collect::<Vec<_>>()
            ),
        ));
    }
    Ok(edits)
}
