//! vSphere volume IDs of persistent volumes

use k8s_openapi::api::core::v1::PersistentVolumeSpec;

/// CSI driver name of vSphere volumes
pub const VSPHERE_CSI_DRIVER: &str = "csi.vsphere.vmware.com";

/// IDs of the vSphere-backed volumes among `specs`, in order
///
/// In-tree volumes yield their volume path, CSI volumes of the vSphere driver
/// their volume handle. Other volumes are skipped.
pub fn volume_ids(specs: &[PersistentVolumeSpec]) -> Vec<String> {
    specs
        .iter()
        .filter_map(|spec| {
            if let Some(volume) = &spec.vsphere_volume {
                return Some(volume.volume_path.clone());
            }
            spec.csi
                .as_ref()
                .filter(|csi| csi.driver == VSPHERE_CSI_DRIVER)
                .map(|csi| csi.volume_handle.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        AWSElasticBlockStoreVolumeSource, CSIPersistentVolumeSource,
        VsphereVirtualDiskVolumeSource,
    };

    #[test]
    fn collects_in_tree_and_csi_vsphere_volumes() {
        let specs = vec![
            PersistentVolumeSpec {
                vsphere_volume: Some(VsphereVirtualDiskVolumeSource {
                    volume_path: "[ds1] kubevols/pv-1.vmdk".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            PersistentVolumeSpec {
                aws_elastic_block_store: Some(AWSElasticBlockStoreVolumeSource {
                    volume_id: "vol-123".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            PersistentVolumeSpec {
                csi: Some(CSIPersistentVolumeSource {
                    driver: VSPHERE_CSI_DRIVER.into(),
                    volume_handle: "0b1c-fcd".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            PersistentVolumeSpec {
                csi: Some(CSIPersistentVolumeSource {
                    driver: "ebs.csi.aws.com".into(),
                    volume_handle: "vol-456".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ];

        assert_eq!(
            volume_ids(&specs),
            vec!["[ds1] kubevols/pv-1.vmdk".to_string(), "0b1c-fcd".to_string()]
        );
    }
}
