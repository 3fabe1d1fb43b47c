//! Scripts run inside the OVS containers, shipped through a config map.
use std::collections::BTreeMap;

use crate::ovn_controller::{ExternalIdsSpec, OVNControllerSpec};

pub const START_OVSDB_SERVER_SCRIPT: &str = "start-ovsdb-server.sh";
pub const NET_SETUP_SCRIPT: &str = "net_setup.sh";

const START_OVSDB_SERVER: &str = r#"#!/bin/bash

set -ex

DB_FILE=/etc/openvswitch/conf.db
SCHEMA=/usr/share/openvswitch/vswitch.ovsschema

if [ ! -f "$DB_FILE" ]; then
    ovsdb-tool create "$DB_FILE" "$SCHEMA"
elif [ "$(ovsdb-tool needs-conversion "$DB_FILE" "$SCHEMA")" == "yes" ]; then
    ovsdb-tool convert "$DB_FILE" "$SCHEMA"
fi

exec /usr/sbin/ovsdb-server "$DB_FILE" \
    --remote=punix:/var/run/openvswitch/db.sock \
    --remote=db:Open_vSwitch,Open_vSwitch,manager_options \
    --pidfile=/var/run/openvswitch/ovsdb-server.pid \
    --log-file=/var/log/openvswitch/ovsdb-server.log
"#;

/// External IDs with all defaults resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalIdsConfig {
    pub system_id: String,
    pub ovn_bridge: String,
    pub ovn_encap_type: String,
    pub ovn_remote: Option<String>,
}

impl Default for ExternalIdsConfig {
    fn default() -> Self {
        Self {
            system_id: "random".to_owned(),
            ovn_bridge: "br-int".to_owned(),
            ovn_encap_type: "geneve".to_owned(),
            ovn_remote: None,
        }
    }
}

impl From<Option<ExternalIdsSpec>> for ExternalIdsConfig {
    fn from(value: Option<ExternalIdsSpec>) -> Self {
        let default = Self::default();
        if let Some(value) = value {
            Self {
                system_id: value.system_id.unwrap_or(default.system_id),
                ovn_bridge: value.ovn_bridge.unwrap_or(default.ovn_bridge),
                ovn_encap_type: value.ovn_encap_type.unwrap_or(default.ovn_encap_type),
                ovn_remote: value.ovn_remote.or(default.ovn_remote),
            }
        } else {
            default
        }
    }
}

/// Name of the OVS bridge backing a physical network.
fn bridge_name(physnet: &str) -> String {
    format!("br-{physnet}")
}

fn net_setup(external_ids: &ExternalIdsConfig, nic_mappings: &BTreeMap<String, String>) -> String {
    let mut lines = vec![
        "#!/bin/bash".to_owned(),
        "".to_owned(),
        "set -ex".to_owned(),
        "".to_owned(),
        "# Wait for ovsdb-server to accept connections".to_owned(),
        "until ovs-vsctl --no-wait --timeout=5 show > /dev/null; do sleep 1; done".to_owned(),
        "".to_owned(),
        format!("SYSTEM_ID={}", external_ids.system_id),
        r#"if [ "$SYSTEM_ID" == "random" ]; then"#.to_owned(),
        r#"    SYSTEM_ID=$(ovs-vsctl --no-wait --if-exists get open . external-ids:system-id | tr -d '"')"#.to_owned(),
        r#"    [ -n "$SYSTEM_ID" ] || SYSTEM_ID=$(cat /proc/sys/kernel/random/uuid)"#.to_owned(),
        "fi".to_owned(),
        "".to_owned(),
    ];

    let mut ids = vec![
        r#"external-ids:system-id="$SYSTEM_ID""#.to_owned(),
        format!("external-ids:ovn-bridge={}", external_ids.ovn_bridge),
        format!("external-ids:ovn-encap-type={}", external_ids.ovn_encap_type),
    ];
    if let Some(remote) = &external_ids.ovn_remote {
        ids.push(format!("external-ids:ovn-remote={remote}"));
    }
    if !nic_mappings.is_empty() {
        let mappings = nic_mappings
            .keys()
            .map(|physnet| format!("{physnet}:{}", bridge_name(physnet)))
            .collect::<Vec<_>>()
            .join(",");
        ids.push(format!("external-ids:ovn-bridge-mappings={mappings}"));
    }
    lines.push(format!("ovs-vsctl --no-wait set open . {}", ids.join(" ")));

    for (physnet, nic) in nic_mappings {
        let bridge = bridge_name(physnet);
        lines.push("".to_owned());
        lines.push(format!(
            "ovs-vsctl --no-wait --may-exist add-br {bridge} -- set bridge {bridge} fail-mode=standalone"
        ));
        lines.push(format!(
            "ovs-vsctl --no-wait --may-exist add-port {bridge} {nic}"
        ));
    }
    lines.push("".to_owned());
    lines.join("\n")
}

/// Data of the scripts config map mounted into every container.
pub fn config_map_data(spec: &OVNControllerSpec) -> BTreeMap<String, String> {
    let external_ids = ExternalIdsConfig::from(spec.external_ids.clone());
    let nic_mappings = spec.nic_mappings.clone().unwrap_or_default();
    BTreeMap::from_iter(vec![
        (
            START_OVSDB_SERVER_SCRIPT.to_owned(),
            START_OVSDB_SERVER.to_owned(),
        ),
        (
            NET_SETUP_SCRIPT.to_owned(),
            net_setup(&external_ids, &nic_mappings),
        ),
    ])
}
