//! Place all spec types into a single module so they can be used as a lightweight dependency
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Primary CRD for deploying OVN controller and Open vSwitch on every eligible node.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "ovn.openstack.org",
    version = "v1beta1",
    kind = "OVNController",
    plural = "ovncontrollers",
    status = "OVNControllerStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OVNControllerSpec {
    /// Image used for the ovsdb-server and ovs-vswitchd containers.
    pub ovs_container_image: Option<String>,
    /// Image used for the ovn-controller container.
    pub ovn_container_image: Option<String>,
    /// Compute resources applied to every container, both requests and limits.
    pub resources: Option<ResourceRequirements>,
    /// Only nodes matching all of these labels run the daemon sets.
    pub node_selector: Option<BTreeMap<String, String>>,
    /// TLS settings for the connection to the OVN southbound database.
    #[serde(default)]
    pub tls: TlsSpec,
    /// External IDs written into the local Open_vSwitch table.
    pub external_ids: Option<ExternalIdsSpec>,
    /// Maps physical network names to host NICs.
    /// One OVS bridge is created per mapping.
    pub nic_mappings: Option<BTreeMap<String, String>>,
    /// Name of a NetworkAttachmentDefinition attached to the OVS pods.
    pub network_attachment: Option<String>,
}

/// Describes where TLS material for the OVN databases is found.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    /// Name of a secret holding a combined CA bundle under the `tls-ca-bundle.pem` key.
    pub ca_bundle_secret_name: Option<String>,
    /// Name of a secret holding `tls.crt`, `tls.key` and `ca.crt` for the OVN database clients.
    /// TLS is enabled when this is set.
    pub secret_name: Option<String>,
}

/// External IDs configured on each chassis.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIdsSpec {
    /// Chassis system id, `random` generates one per node.
    pub system_id: Option<String>,
    /// Integration bridge name.
    pub ovn_bridge: Option<String>,
    /// Tunnel encapsulation type.
    pub ovn_encap_type: Option<String>,
    /// Connection string of the OVN southbound database.
    pub ovn_remote: Option<String>,
}

/// Current status of the OVN controller deployment.
#[derive(Default, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OVNControllerStatus {
    /// Number of nodes running a ready ovn-controller pod.
    pub number_ready: i32,
    /// Number of nodes that should run an ovn-controller pod.
    pub desired_number_scheduled: i32,
    /// Number of nodes running a ready OVS pod.
    pub ovs_number_ready: i32,
    /// Number of nodes that should run an OVS pod.
    pub ovs_desired_number_scheduled: i32,
    /// Hashes of the generated configuration, keyed by name.
    pub hash: BTreeMap<String, String>,
}

impl OVNController {
    /// Name of the service account, role and role binding used by the pods.
    pub fn rbac_resource_name(&self) -> String {
        format!("ovncontroller-{}", self.name_any())
    }
}
