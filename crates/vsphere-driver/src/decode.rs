//! Request decoding: spec version detection, spec, secrets and validation

use std::collections::BTreeMap;

use vsphere_common::secrets::detect_spec_version;
use vsphere_common::validation::validate_spec;
use vsphere_common::{MachineSpec, Result, Secrets};

/// What the decoded request is used for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Purpose {
    /// Create: user data and cluster/role tags are required
    Create,
    /// Any other operation
    Other,
}

/// A validated spec with the matching credentials
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedRequest {
    /// Provider spec
    pub spec: MachineSpec,
    /// Credentials and user data
    pub secrets: Secrets,
}

/// Decode and validate provider spec bytes and secret data
///
/// The spec shape follows the secret: a `vsphereKubeconfig` key selects the
/// declarative VM spec, its absence the template-clone spec.
pub fn decode_request(
    provider_spec: &[u8],
    secret_map: &BTreeMap<String, Vec<u8>>,
    purpose: Purpose,
) -> Result<DecodedRequest> {
    let version = detect_spec_version(secret_map);
    let spec = MachineSpec::decode(version, provider_spec)?;
    let create = purpose == Purpose::Create;
    let secrets = Secrets::from_secret_map(version, secret_map, create)?;
    validate_spec(&spec, create)?;
    Ok(DecodedRequest { spec, secrets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsphere_common::Error;

    fn v1_secrets() -> BTreeMap<String, Vec<u8>> {
        BTreeMap::from([
            ("vsphereHost".to_string(), b"vc.example.com".to_vec()),
            ("vsphereUsername".to_string(), b"admin".to_vec()),
            ("vspherePassword".to_string(), b"secret".to_vec()),
            ("userData".to_string(), b"#cloud-config\n".to_vec()),
        ])
    }

    const V1_SPEC: &str = r#"{
        "region": "eu-1",
        "datacenter": "dc1",
        "datastore": "ds1",
        "resourcePool": "pool1",
        "network": "VM Network",
        "templateVM": "ubuntu",
        "numCpus": 2,
        "memory": 4096,
        "tags": {
            "kubernetes.io/cluster/shoot--foo": "1",
            "kubernetes.io/role/node": "1"
        }
    }"#;

    #[test]
    fn secret_without_kubeconfig_selects_template_clone() {
        let req = decode_request(V1_SPEC.as_bytes(), &v1_secrets(), Purpose::Create).unwrap();
        assert!(matches!(req.spec, MachineSpec::V1(_)));
        assert!(matches!(req.secrets, Secrets::Vcenter { .. }));
    }

    #[test]
    fn kubeconfig_selects_declarative_vm() {
        let secrets = BTreeMap::from([
            ("vsphereKubeconfig".to_string(), b"apiVersion: v1".to_vec()),
            ("userData".to_string(), b"#cloud-config\n".to_vec()),
        ]);
        let spec = r#"{
            "namespace": "shoot-ns",
            "imageName": "ubuntu",
            "className": "small",
            "networkName": "net",
            "networkType": "nsx-t",
            "tags": {
                "mcm.gardener.cloud/cluster": "shoot--foo",
                "mcm.gardener.cloud/role": "node"
            }
        }"#;
        let req = decode_request(spec.as_bytes(), &secrets, Purpose::Create).unwrap();
        assert!(matches!(req.spec, MachineSpec::V2(_)));
        assert!(matches!(req.secrets, Secrets::Kubeconfig { .. }));
    }

    #[test]
    fn user_data_is_only_required_for_create() {
        let mut secrets = v1_secrets();
        secrets.remove("userData");

        let err = decode_request(V1_SPEC.as_bytes(), &secrets, Purpose::Create).unwrap_err();
        assert!(err.to_string().contains("userData"));
        assert!(decode_request(V1_SPEC.as_bytes(), &secrets, Purpose::Other).is_ok());
    }

    #[test]
    fn identity_tags_are_only_required_for_create() {
        let spec = V1_SPEC
            .replace("\"kubernetes.io/cluster/shoot--foo\": \"1\",", "")
            .replace("\"kubernetes.io/role/node\": \"1\"", "");
        let err = decode_request(spec.as_bytes(), &v1_secrets(), Purpose::Create).unwrap_err();
        match err {
            Error::Validation { errors } => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {other}"),
        }
        assert!(decode_request(spec.as_bytes(), &v1_secrets(), Purpose::Other).is_ok());
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        let err = decode_request(b"{not json", &v1_secrets(), Purpose::Other).unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
