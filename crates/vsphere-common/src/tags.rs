//! Cluster/role identity derived from machine tags
//!
//! A machine belongs to a cluster and a node role. Either fact can be spelled
//! two ways:
//! - prefixed key: `kubernetes.io/cluster/<name>` / `kubernetes.io/role/<role>`
//!   (value ignored)
//! - flat key/value: `mcm.gardener.cloud/cluster=<name>` /
//!   `mcm.gardener.cloud/role=<role>`
//!
//! VMs carry the same tags as custom fields or labels, so list and delete can
//! recognise the VMs they own.

use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Tag keys
// =============================================================================

/// Key prefix of the prefixed cluster convention
pub const TAG_CLUSTER_PREFIX: &str = "kubernetes.io/cluster/";

/// Key prefix of the prefixed role convention
pub const TAG_NODE_ROLE_PREFIX: &str = "kubernetes.io/role/";

/// Key of the flat cluster convention
pub const TAG_MCM_CLUSTER_NAME: &str = "mcm.gardener.cloud/cluster";

/// Key of the flat role convention
pub const TAG_MCM_ROLE: &str = "mcm.gardener.cloud/role";

/// Label marking resources created by this provider
pub const LABEL_MCM_VSPHERE: &str = "mcm.gardener.cloud/machine";

/// Why a tag set does not identify a machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagError {
    /// Neither cluster convention is present
    MissingCluster,
    /// Neither role convention is present
    MissingRole,
}

impl fmt::Display for TagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagError::MissingCluster => write!(
                f,
                "tag required of the form '{TAG_MCM_CLUSTER_NAME}=****' or '{TAG_CLUSTER_PREFIX}****=1'"
            ),
            TagError::MissingRole => write!(
                f,
                "tag required of the form '{TAG_MCM_ROLE}=****' or '{TAG_NODE_ROLE_PREFIX}****=1'"
            ),
        }
    }
}

impl std::error::Error for TagError {}

/// The (cluster, role) identity of a machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelevantTags {
    cluster_name_key: String,
    cluster_name: String,
    node_role_key: String,
    node_role: String,
}

impl RelevantTags {
    /// Derive the identity from a tag map
    ///
    /// Both failures are reported when both facts are missing.
    pub fn derive(tags: &BTreeMap<String, String>) -> Result<Self, Vec<TagError>> {
        let mut cluster: Option<(String, String)> = None;
        let mut role: Option<(String, String)> = None;

        for (key, value) in tags {
            if let Some(name) = key.strip_prefix(TAG_CLUSTER_PREFIX) {
                cluster = Some((key.clone(), name.to_string()));
            } else if key == TAG_MCM_CLUSTER_NAME {
                cluster = Some((format!("{TAG_CLUSTER_PREFIX}{value}"), value.clone()));
            } else if let Some(name) = key.strip_prefix(TAG_NODE_ROLE_PREFIX) {
                role = Some((key.clone(), name.to_string()));
            } else if key == TAG_MCM_ROLE {
                role = Some((format!("{TAG_NODE_ROLE_PREFIX}{value}"), value.clone()));
            }
        }

        match (cluster, role) {
            (Some((cluster_name_key, cluster_name)), Some((node_role_key, node_role))) => {
                Ok(Self {
                    cluster_name_key,
                    cluster_name,
                    node_role_key,
                    node_role,
                })
            }
            (cluster, role) => {
                let mut errors = Vec::with_capacity(2);
                if cluster.is_none() {
                    errors.push(TagError::MissingCluster);
                }
                if role.is_none() {
                    errors.push(TagError::MissingRole);
                }
                Err(errors)
            }
        }
    }

    /// Cluster name
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Node role
    pub fn node_role(&self) -> &str {
        &self.node_role
    }

    /// Whether a candidate tag set shows the same cluster and the same role
    ///
    /// Each side may use either convention independently of the other.
    pub fn matches<'a, I>(&self, candidate: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut cluster_match = false;
        let mut role_match = false;
        for (key, value) in candidate {
            if key == self.cluster_name_key
                || (key == TAG_MCM_CLUSTER_NAME && value == self.cluster_name)
            {
                cluster_match = true;
            } else if key == self.node_role_key
                || (key == TAG_MCM_ROLE && value == self.node_role)
            {
                role_match = true;
            }
        }
        cluster_match && role_match
    }

    /// The identity in the flat convention, usable as Kubernetes labels
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (TAG_MCM_CLUSTER_NAME.to_string(), self.cluster_name.clone()),
            (TAG_MCM_ROLE.to_string(), self.node_role.clone()),
        ])
    }

    /// Every tag that is not a cluster or role tag in either convention
    pub fn non_relevant(&self, tags: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        tags.iter()
            .filter(|(key, _)| {
                let key = key.as_str();
                key != self.cluster_name_key
                    && key != self.node_role_key
                    && key != TAG_MCM_CLUSTER_NAME
                    && key != TAG_MCM_ROLE
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn as_pairs(map: &BTreeMap<String, String>) -> impl Iterator<Item = (&str, &str)> {
        map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[test]
    fn derives_from_prefixed_convention() {
        let rt = RelevantTags::derive(&tags(&[
            ("kubernetes.io/cluster/foo", "1"),
            ("kubernetes.io/role/node", "1"),
        ]))
        .unwrap();
        assert_eq!(rt.cluster_name(), "foo");
        assert_eq!(rt.node_role(), "node");
    }

    #[test]
    fn derives_from_flat_convention() {
        let rt = RelevantTags::derive(&tags(&[
            ("mcm.gardener.cloud/cluster", "foo"),
            ("mcm.gardener.cloud/role", "node"),
        ]))
        .unwrap();
        assert_eq!(rt.cluster_name(), "foo");
        assert_eq!(rt.node_role(), "node");
    }

    #[test]
    fn empty_tags_report_both_failures() {
        let errors = RelevantTags::derive(&BTreeMap::new()).unwrap_err();
        assert_eq!(errors, vec![TagError::MissingCluster, TagError::MissingRole]);
        assert_eq!(
            errors[0].to_string(),
            "tag required of the form 'mcm.gardener.cloud/cluster=****' or 'kubernetes.io/cluster/****=1'"
        );
    }

    #[test]
    fn missing_role_is_reported_alone() {
        let errors =
            RelevantTags::derive(&tags(&[("kubernetes.io/cluster/foo", "1"), ("env", "dev")]))
                .unwrap_err();
        assert_eq!(errors, vec![TagError::MissingRole]);
    }

    // ==========================================================================
    // Matching across conventions
    // ==========================================================================

    #[test]
    fn flat_identity_matches_prefixed_candidate() {
        let rt = RelevantTags::derive(&tags(&[
            ("mcm.gardener.cloud/cluster", "foo"),
            ("mcm.gardener.cloud/role", "node"),
        ]))
        .unwrap();
        let candidate = tags(&[
            ("kubernetes.io/cluster/foo", "1"),
            ("kubernetes.io/role/node", "1"),
        ]);
        assert!(rt.matches(as_pairs(&candidate)));
    }

    #[test]
    fn prefixed_identity_matches_mixed_candidate() {
        let rt = RelevantTags::derive(&tags(&[
            ("kubernetes.io/cluster/foo", "1"),
            ("kubernetes.io/role/node", "1"),
        ]))
        .unwrap();
        let candidate = tags(&[
            ("mcm.gardener.cloud/cluster", "foo"),
            ("kubernetes.io/role/node", "1"),
        ]);
        assert!(rt.matches(as_pairs(&candidate)));
    }

    #[test]
    fn different_role_does_not_match() {
        let rt = RelevantTags::derive(&tags(&[
            ("kubernetes.io/cluster/foo", "1"),
            ("kubernetes.io/role/node", "1"),
        ]))
        .unwrap();
        let candidate = tags(&[
            ("kubernetes.io/cluster/foo", "1"),
            ("kubernetes.io/role/other", "1"),
        ]);
        assert!(!rt.matches(as_pairs(&candidate)));
    }

    #[test]
    fn different_cluster_does_not_match() {
        let rt = RelevantTags::derive(&tags(&[
            ("kubernetes.io/cluster/cluster1", "1"),
            ("kubernetes.io/role/node", "1"),
        ]))
        .unwrap();

        let prefixed = tags(&[
            ("kubernetes.io/cluster/cluster2", "1"),
            ("kubernetes.io/role/node", "1"),
        ]);
        assert!(!rt.matches(as_pairs(&prefixed)));

        let flat = tags(&[
            ("mcm.gardener.cloud/cluster", "cluster2"),
            ("mcm.gardener.cloud/role", "node"),
        ]);
        assert!(!rt.matches(as_pairs(&flat)));
    }

    #[test]
    fn flat_identity_rejects_other_cluster_in_either_convention() {
        let rt = RelevantTags::derive(&tags(&[
            ("mcm.gardener.cloud/cluster", "cluster1"),
            ("mcm.gardener.cloud/role", "node"),
        ]))
        .unwrap();

        let prefixed = tags(&[
            ("kubernetes.io/cluster/cluster2", "1"),
            ("kubernetes.io/role/node", "1"),
        ]);
        assert!(!rt.matches(as_pairs(&prefixed)));

        let flat = tags(&[
            ("mcm.gardener.cloud/cluster", "cluster2"),
            ("mcm.gardener.cloud/role", "node"),
        ]);
        assert!(!rt.matches(as_pairs(&flat)));
    }

    #[test]
    fn cluster_only_candidate_does_not_match() {
        let rt = RelevantTags::derive(&tags(&[
            ("kubernetes.io/cluster/foo", "1"),
            ("kubernetes.io/role/node", "1"),
        ]))
        .unwrap();
        let candidate = tags(&[("mcm.gardener.cloud/cluster", "foo")]);
        assert!(!rt.matches(as_pairs(&candidate)));
    }

    #[test]
    fn labels_use_flat_convention() {
        let rt = RelevantTags::derive(&tags(&[
            ("kubernetes.io/cluster/shoot--dev", "1"),
            ("kubernetes.io/role/node", "1"),
        ]))
        .unwrap();
        assert_eq!(
            rt.labels(),
            tags(&[
                ("mcm.gardener.cloud/cluster", "shoot--dev"),
                ("mcm.gardener.cloud/role", "node"),
            ])
        );
    }

    #[test]
    fn non_relevant_drops_both_conventions() {
        let all = tags(&[
            ("kubernetes.io/cluster/foo", "1"),
            ("kubernetes.io/role/node", "1"),
            ("mcm.gardener.cloud/cluster", "foo"),
            ("mcm.gardener.cloud/role", "node"),
            ("owner", "team-a"),
        ]);
        let rt = RelevantTags::derive(&all).unwrap();
        assert_eq!(rt.non_relevant(&all), tags(&[("owner", "team-a")]));
    }
}
