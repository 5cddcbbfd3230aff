//! Cloud-init user data helpers

use crate::{Error, Result};

const SSH_AUTHORIZED_KEYS: &str = "ssh_authorized_keys:";

/// Append an `ssh_authorized_keys` list to cloud-init user data
///
/// Returns the input unchanged when there are no keys. Fails with a conflict
/// if the user data already declares the section.
pub fn add_ssh_keys_section(user_data: &str, ssh_keys: &[String]) -> Result<String> {
    if ssh_keys.is_empty() {
        return Ok(user_data.to_string());
    }
    if user_data.contains(SSH_AUTHORIZED_KEYS) {
        return Err(Error::conflict(
            "userdata already contains key `ssh_authorized_keys`",
        ));
    }

    let mut out = String::with_capacity(user_data.len() + 32 * ssh_keys.len());
    out.push_str(user_data);
    out.push('\n');
    out.push_str(SSH_AUTHORIZED_KEYS);
    out.push('\n');
    for key in ssh_keys {
        out.push_str(&format!("- {key:?}\n"));
    }
    Ok(out)
}

/// Trim whitespace around each key and drop empty entries
pub fn trim_ssh_keys(ssh_keys: &[String]) -> Vec<String> {
    ssh_keys
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(k: &[&str]) -> Vec<String> {
        k.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn appends_quoted_keys_in_order() {
        let out = add_ssh_keys_section("#cloud-config\n", &keys(&["ssh1", "ssh2"])).unwrap();
        assert_eq!(
            out,
            "#cloud-config\n\nssh_authorized_keys:\n- \"ssh1\"\n- \"ssh2\"\n"
        );
    }

    #[test]
    fn no_keys_leaves_user_data_untouched() {
        let out = add_ssh_keys_section("#cloud-config\n", &[]).unwrap();
        assert_eq!(out, "#cloud-config\n");
    }

    #[test]
    fn existing_section_is_a_conflict() {
        let err = add_ssh_keys_section(
            "#cloud-config\nssh_authorized_keys:\n- \"a\"\n",
            &keys(&["ssh1"]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert!(err.to_string().contains("already contains key"));
    }

    #[test]
    fn injected_payload_matches_reference_encoding() {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let input = "I2Nsb3VkLWNvbmZpZwpydW5jbWQ6Ci0gJ2VjaG8gMTI3LjAuMC4xIGBob3N0bmFtZWAgPj4gL2V0Yy9ob3N0cy14eHgnCg==";
        let expected = "I2Nsb3VkLWNvbmZpZwpydW5jbWQ6Ci0gJ2VjaG8gMTI3LjAuMC4xIGBob3N0bmFtZWAgPj4gL2V0Yy9ob3N0cy14eHgnCgpzc2hfYXV0aG9yaXplZF9rZXlzOgotICJzc2gxIgotICJzc2gyIgo=";
        let plain = String::from_utf8(STANDARD.decode(input).unwrap()).unwrap();
        let out = add_ssh_keys_section(&plain, &keys(&["ssh1", "ssh2"])).unwrap();
        assert_eq!(STANDARD.encode(out), expected);
    }

    #[test]
    fn trims_keys() {
        assert_eq!(
            trim_ssh_keys(&keys(&[" ssh-rsa A \n", "", "ssh-ed25519 B"])),
            keys(&["ssh-rsa A", "ssh-ed25519 B"])
        );
    }
}
