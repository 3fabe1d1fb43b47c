use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{DaemonSet, DaemonSetSpec},
        core::v1::{
            Capabilities, Container, EnvVar, ExecAction, Lifecycle, LifecycleHandler, PodSpec,
            PodTemplateSpec, Probe, SecurityContext, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use kube::{core::ObjectMeta, ResourceExt};

use crate::ovn_controller::{
    scripts::{NET_SETUP_SCRIPT, START_OVSDB_SERVER_SCRIPT},
    tls::{
        ServiceCert, OVN_DB_CA_CERT_PATH, OVN_DB_CERT_PATH, OVN_DB_KEY_PATH,
        SERVICE_NAME_OVN_CONTROLLER,
    },
    volumes::{
        ovn_controller_volume_mounts, ovsdb_volume_mounts, volumes, vswitchd_volume_mounts,
        SCRIPTS_MOUNT_PATH,
    },
    OVNController, OVNControllerSpec,
};
use crate::utils::override_env_vars;

pub const OVN_CONTROLLER_DAEMON_SET_NAME: &str = "ovn-controller";
pub const OVS_DAEMON_SET_NAME: &str = "ovn-controller-ovs";

/// Images with all defaults resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageConfig {
    pub ovs_image: String,
    pub ovn_image: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            ovs_image: "quay.io/podified-antelope-centos9/openstack-ovn-base:current-podified"
                .to_owned(),
            ovn_image:
                "quay.io/podified-antelope-centos9/openstack-ovn-controller:current-podified"
                    .to_owned(),
        }
    }
}

impl From<&OVNControllerSpec> for ImageConfig {
    fn from(value: &OVNControllerSpec) -> Self {
        let default = Self::default();
        Self {
            ovs_image: value
                .ovs_container_image
                .to_owned()
                .unwrap_or(default.ovs_image),
            ovn_image: value
                .ovn_container_image
                .to_owned()
                .unwrap_or(default.ovn_image),
        }
    }
}

/// ContainerConfig defines which properties of a container differ between the daemons.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub pre_stop: Vec<String>,
    pub liveness_probe: Option<Probe>,
    pub volume_mounts: Vec<VolumeMount>,
}

/// DaemonSetConfig defines which properties of the DaemonSet can be customized.
#[derive(Debug, Clone, Default)]
pub struct DaemonSetConfig {
    pub name: String,
    pub containers: Vec<ContainerConfig>,
    pub volumes: Vec<Volume>,
    pub config_hash: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

fn strings<const N: usize>(values: [&str; N]) -> Vec<String> {
    values.into_iter().map(ToOwned::to_owned).collect()
}

fn security_context() -> SecurityContext {
    SecurityContext {
        capabilities: Some(Capabilities {
            add: Some(strings(["NET_ADMIN", "SYS_ADMIN", "SYS_NICE"])),
            ..Default::default()
        }),
        run_as_user: Some(0),
        privileged: Some(true),
        ..Default::default()
    }
}

fn exec_liveness_probe(command: Vec<String>) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(command),
        }),
        timeout_seconds: Some(5),
        period_seconds: Some(3),
        initial_delay_seconds: Some(3),
        ..Default::default()
    }
}

/// Assemble a DaemonSet running the given containers with the privileges OVS and OVN need.
pub fn daemon_set(instance: &OVNController, config: DaemonSetConfig) -> DaemonSet {
    let mut env = vec![];
    override_env_vars(
        &mut env,
        &Some(BTreeMap::from_iter([(
            "CONFIG_HASH".to_owned(),
            config.config_hash.to_owned(),
        )])),
    );

    let containers = config
        .containers
        .into_iter()
        .map(|container| Container {
            name: container.name,
            command: Some(container.command),
            args: Some(container.args),
            lifecycle: Some(Lifecycle {
                pre_stop: Some(LifecycleHandler {
                    exec: Some(ExecAction {
                        command: Some(container.pre_stop),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            image: Some(container.image),
            security_context: Some(security_context()),
            env: Some(env.clone()),
            volume_mounts: Some(container.volume_mounts),
            resources: instance.spec.resources.clone(),
            termination_message_policy: Some("FallbackToLogsOnError".to_owned()),
            liveness_probe: container.liveness_probe,
            ..Default::default()
        })
        .collect();

    let node_selector = instance
        .spec
        .node_selector
        .clone()
        .filter(|selector| !selector.is_empty());
    let annotations = Some(config.annotations).filter(|annotations| !annotations.is_empty());

    DaemonSet {
        metadata: ObjectMeta {
            name: Some(config.name),
            namespace: instance.metadata.namespace.clone(),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(config.labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(config.labels),
                    annotations,
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(instance.rbac_resource_name()),
                    containers,
                    volumes: Some(config.volumes),
                    node_selector,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// DaemonSet running ovn-controller against the node local ovsdb-server.
pub fn ovn_daemon_set(
    instance: &OVNController,
    config_hash: &str,
    labels: BTreeMap<String, String>,
) -> DaemonSet {
    let images = ImageConfig::from(&instance.spec);
    let tls = &instance.spec.tls;
    let mut volumes = volumes(
        &instance.name_any(),
        instance.metadata.namespace.as_deref().unwrap_or_default(),
    );
    let mut volume_mounts = ovn_controller_volume_mounts();

    if tls.ca_bundle().is_some() {
        volumes.push(tls.ca_bundle_volume());
        volume_mounts.append(&mut tls.ca_bundle_volume_mounts());
    }

    let mut ovn_controller_args = vec!["ovn-controller".to_owned()];
    if let Some(secret_name) = tls.secret_name.as_deref().filter(|_| tls.enabled()) {
        let cert = ServiceCert::ovn_db(secret_name);
        volumes.push(cert.volume(SERVICE_NAME_OVN_CONTROLLER));
        volume_mounts.append(&mut cert.volume_mounts(SERVICE_NAME_OVN_CONTROLLER));
        ovn_controller_args.extend([
            format!("--certificate={OVN_DB_CERT_PATH}"),
            format!("--private-key={OVN_DB_KEY_PATH}"),
            format!("--ca-cert={OVN_DB_CA_CERT_PATH}"),
        ]);
    }
    ovn_controller_args.extend(strings(["--pidfile", "unix:/run/openvswitch/db.sock"]));

    daemon_set(
        instance,
        DaemonSetConfig {
            name: OVN_CONTROLLER_DAEMON_SET_NAME.to_owned(),
            containers: vec![ContainerConfig {
                name: "ovn-controller".to_owned(),
                image: images.ovn_image,
                command: strings(["/bin/bash", "-c"]),
                args: vec![ovn_controller_args.join(" ")],
                pre_stop: strings(["/usr/share/ovn/scripts/ovn-ctl", "stop_controller"]),
                liveness_probe: None,
                volume_mounts,
            }],
            volumes,
            config_hash: config_hash.to_owned(),
            labels,
            annotations: BTreeMap::new(),
        },
    )
}

/// DaemonSet running ovsdb-server and ovs-vswitchd side by side.
pub fn ovs_daemon_set(
    instance: &OVNController,
    config_hash: &str,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
) -> DaemonSet {
    let images = ImageConfig::from(&instance.spec);
    let volumes = volumes(
        &instance.name_any(),
        instance.metadata.namespace.as_deref().unwrap_or_default(),
    );

    daemon_set(
        instance,
        DaemonSetConfig {
            name: OVS_DAEMON_SET_NAME.to_owned(),
            containers: vec![
                ContainerConfig {
                    name: "ovsdb-server".to_owned(),
                    image: images.ovs_image.clone(),
                    command: strings(["/usr/bin/dumb-init"]),
                    args: vec![
                        "--single-child".to_owned(),
                        "--".to_owned(),
                        format!("{SCRIPTS_MOUNT_PATH}/{START_OVSDB_SERVER_SCRIPT}"),
                    ],
                    pre_stop: strings([
                        "/usr/share/openvswitch/scripts/ovs-ctl",
                        "stop",
                        "--no-ovs-vswitchd",
                    ]),
                    liveness_probe: Some(exec_liveness_probe(strings([
                        "/usr/bin/ovs-vsctl",
                        "show",
                    ]))),
                    volume_mounts: ovsdb_volume_mounts(),
                },
                ContainerConfig {
                    name: "ovs-vswitchd".to_owned(),
                    image: images.ovs_image,
                    command: strings(["/bin/bash", "-c"]),
                    args: vec![
                        format!(
                            "{SCRIPTS_MOUNT_PATH}/{NET_SETUP_SCRIPT} && /usr/sbin/ovs-vswitchd --pidfile"
                        ),
                        "--mlockall".to_owned(),
                    ],
                    pre_stop: strings([
                        "/usr/share/openvswitch/scripts/ovs-ctl",
                        "stop",
                        "--no-ovsdb-server",
                    ]),
                    liveness_probe: Some(exec_liveness_probe(strings([
                        "/usr/bin/ovs-appctl",
                        "bond/show",
                    ]))),
                    volume_mounts: vswitchd_volume_mounts(),
                },
            ],
            volumes,
            config_hash: config_hash.to_owned(),
            labels,
            annotations,
        },
    )
}
