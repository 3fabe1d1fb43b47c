use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, HostPathVolumeSource, Volume, VolumeMount,
};

/// Directory the container scripts config map is mounted into.
pub const SCRIPTS_MOUNT_PATH: &str = "/usr/local/bin/container-scripts";

const HOST_ROOT: &str = "/var/home/core";

/// Name of the config map holding the container scripts.
pub fn scripts_config_map_name(name: &str) -> String {
    format!("{name}-scripts")
}

fn host_path_volume(name: &str, path: String) -> Volume {
    Volume {
        name: name.to_owned(),
        host_path: Some(HostPathVolumeSource {
            path,
            type_: Some("DirectoryOrCreate".to_owned()),
        }),
        ..Default::default()
    }
}

fn mount(name: &str, mount_path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_owned(),
        mount_path: mount_path.to_owned(),
        ..Default::default()
    }
}

fn scripts_mount() -> VolumeMount {
    VolumeMount {
        read_only: Some(true),
        ..mount("scripts", SCRIPTS_MOUNT_PATH)
    }
}

/// Volumes shared by both daemon sets.
///
/// Host state is kept per namespace so multiple deployments on the same node do not share a
/// database.
pub fn volumes(name: &str, namespace: &str) -> Vec<Volume> {
    let root = format!("{HOST_ROOT}/{namespace}");
    vec![
        host_path_volume("etc-ovs", format!("{root}/etc/ovs")),
        host_path_volume("var-run", format!("{root}/var/run/openvswitch")),
        host_path_volume("var-log", format!("{root}/var/log/openvswitch")),
        host_path_volume("var-lib", format!("{root}/var/lib/openvswitch")),
        host_path_volume("var-log-ovn", format!("{root}/var/log/ovn")),
        Volume {
            name: "scripts".to_owned(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(scripts_config_map_name(name)),
                default_mode: Some(0o755),
                ..Default::default()
            }),
            ..Default::default()
        },
    ]
}

pub fn ovsdb_volume_mounts() -> Vec<VolumeMount> {
    vec![
        mount("etc-ovs", "/etc/openvswitch"),
        mount("var-run", "/var/run/openvswitch"),
        mount("var-log", "/var/log/openvswitch"),
        mount("var-lib", "/var/lib/openvswitch"),
        scripts_mount(),
    ]
}

pub fn vswitchd_volume_mounts() -> Vec<VolumeMount> {
    vec![
        mount("var-run", "/var/run/openvswitch"),
        mount("var-log", "/var/log/openvswitch"),
        mount("var-lib", "/var/lib/openvswitch"),
        scripts_mount(),
    ]
}

pub fn ovn_controller_volume_mounts() -> Vec<VolumeMount> {
    vec![
        mount("var-run", "/var/run/openvswitch"),
        mount("var-log-ovn", "/var/log/ovn"),
        scripts_mount(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(volumes: &[Volume]) -> Vec<&str> {
        volumes.iter().map(|v| v.name.as_str()).collect()
    }

    #[test]
    fn host_paths_are_namespaced() {
        let volumes = volumes("ovn-controller", "openstack");
        assert_eq!(
            names(&volumes),
            vec!["etc-ovs", "var-run", "var-log", "var-lib", "var-log-ovn", "scripts"]
        );
        let paths: Vec<_> = volumes
            .iter()
            .filter_map(|v| v.host_path.as_ref())
            .map(|h| h.path.as_str())
            .collect();
        assert_eq!(
            paths,
            vec![
                "/var/home/core/openstack/etc/ovs",
                "/var/home/core/openstack/var/run/openvswitch",
                "/var/home/core/openstack/var/log/openvswitch",
                "/var/home/core/openstack/var/lib/openvswitch",
                "/var/home/core/openstack/var/log/ovn",
            ]
        );
        let scripts = volumes[5].config_map.as_ref().expect("config map volume");
        assert_eq!(scripts.name.as_deref(), Some("ovn-controller-scripts"));
        assert_eq!(scripts.default_mode, Some(0o755));
    }

    #[test]
    fn every_mount_refers_to_a_volume() {
        let volumes = volumes("test", "default");
        let names = names(&volumes);
        for mount in ovsdb_volume_mounts()
            .iter()
            .chain(vswitchd_volume_mounts().iter())
            .chain(ovn_controller_volume_mounts().iter())
        {
            assert!(names.contains(&mount.name.as_str()), "{}", mount.name);
        }
    }

    #[test]
    fn scripts_are_mounted_read_only() {
        for mounts in [
            ovsdb_volume_mounts(),
            vswitchd_volume_mounts(),
            ovn_controller_volume_mounts(),
        ] {
            let scripts = mounts
                .iter()
                .find(|m| m.name == "scripts")
                .expect("scripts mount");
            assert_eq!(scripts.mount_path, SCRIPTS_MOUNT_PATH);
            assert_eq!(scripts.read_only, Some(true));
        }
    }
}
