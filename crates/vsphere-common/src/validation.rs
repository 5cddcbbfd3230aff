//! Provider spec validation
//!
//! Collects every problem before failing so a machine class can be fixed in
//! one round.

use crate::error::FieldError;
use crate::spec::{DeclarativeVmSpec, MachineSpec, TemplateCloneSpec};
use crate::tags::{RelevantTags, TagError};
use crate::{Error, Result};

/// Validate a decoded spec
///
/// `require_identity` demands cluster/role tags. Create needs them to label
/// the new VM; list degrades to an empty result without them instead.
pub fn validate_spec(spec: &MachineSpec, require_identity: bool) -> Result<()> {
    let mut errors = match spec {
        MachineSpec::V1(spec) => validate_template_clone(spec),
        MachineSpec::V2(spec) => validate_declarative_vm(spec),
    };

    if require_identity {
        if let Err(tag_errors) = RelevantTags::derive(spec.tags()) {
            errors.extend(tag_errors.into_iter().map(|e| {
                let field = match e {
                    TagError::MissingCluster => "spec.tags.cluster",
                    TagError::MissingRole => "spec.tags.role",
                };
                FieldError::new(field, e.to_string())
            }));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(errors))
    }
}

fn validate_template_clone(spec: &TemplateCloneSpec) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if spec.datastore.is_empty() && spec.datastore_cluster.is_empty() {
        errors.push(FieldError::new(
            "spec.datastoreCluster",
            "DatastoreCluster or Datastore is required",
        ));
    }
    if spec.template_vm.is_empty() {
        errors.push(FieldError::new("spec.templateVM", "TemplateVM is required"));
    }
    if spec.compute_cluster.is_empty() && spec.resource_pool.is_empty() && spec.host_system.is_empty()
    {
        errors.push(FieldError::new(
            "spec.computeCluster",
            "ComputeCluster or Pool or HostSystem is required",
        ));
    }
    if spec.network.is_empty() {
        errors.push(FieldError::new("spec.network", "Network is required"));
    }
    if spec.num_cpus < 0 {
        errors.push(FieldError::new("spec.numCpus", "must not be negative"));
    }
    if spec.memory < 0 {
        errors.push(FieldError::new("spec.memory", "must not be negative"));
    }
    errors
}

fn validate_declarative_vm(spec: &DeclarativeVmSpec) -> Vec<FieldError> {
    let required = [
        ("spec.namespace", &spec.namespace, "Namespace is required"),
        ("spec.imageName", &spec.image_name, "ImageName is required"),
        ("spec.className", &spec.class_name, "ClassName is required"),
        ("spec.networkName", &spec.network_name, "NetworkName is required"),
        ("spec.networkType", &spec.network_type, "NetworkType is required"),
    ];
    let mut errors: Vec<FieldError> = required
        .into_iter()
        .filter(|(_, value, _)| value.is_empty())
        .map(|(field, _, message)| FieldError::new(field, message))
        .collect();
    if spec.system_disk.as_ref().is_some_and(|disk| disk.size == 0) {
        errors.push(FieldError::new(
            "spec.systemDisk.size",
            "must be greater than zero",
        ));
    }
    errors
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::spec::SystemDisk;

    fn identity_tags() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("kubernetes.io/cluster/foo".to_string(), "1".to_string()),
            ("kubernetes.io/role/node".to_string(), "1".to_string()),
        ])
    }

    fn field_names(err: Error) -> Vec<String> {
        match err {
            Error::Validation { errors } => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn complete_template_clone_spec_passes() {
        let spec = MachineSpec::V1(TemplateCloneSpec {
            datastore: "ds1".into(),
            template_vm: "tmpl".into(),
            resource_pool: "pool".into(),
            network: "VM Network".into(),
            tags: identity_tags(),
            ..Default::default()
        });
        validate_spec(&spec, true).unwrap();
    }

    #[test]
    fn empty_template_clone_spec_reports_everything() {
        let spec = MachineSpec::V1(TemplateCloneSpec::default());
        let fields = field_names(validate_spec(&spec, true).unwrap_err());
        assert_eq!(
            fields,
            vec![
                "spec.datastoreCluster",
                "spec.templateVM",
                "spec.computeCluster",
                "spec.network",
                "spec.tags.cluster",
                "spec.tags.role",
            ]
        );
    }

    #[test]
    fn identity_tags_optional_when_not_required() {
        let spec = MachineSpec::V2(DeclarativeVmSpec {
            namespace: "ns".into(),
            image_name: "img".into(),
            class_name: "small".into(),
            network_name: "primary".into(),
            network_type: "nsx-t".into(),
            ..Default::default()
        });
        validate_spec(&spec, false).unwrap();
        let fields = field_names(validate_spec(&spec, true).unwrap_err());
        assert_eq!(fields, vec!["spec.tags.cluster", "spec.tags.role"]);
    }

    #[test]
    fn zero_sized_system_disk_is_rejected() {
        let spec = MachineSpec::V2(DeclarativeVmSpec {
            namespace: "ns".into(),
            image_name: "img".into(),
            class_name: "small".into(),
            network_name: "primary".into(),
            network_type: "nsx-t".into(),
            system_disk: Some(SystemDisk { size: 0 }),
            tags: identity_tags(),
            ..Default::default()
        });
        let fields = field_names(validate_spec(&spec, true).unwrap_err());
        assert_eq!(fields, vec!["spec.systemDisk.size"]);
    }
}
