//! Utils is shared functions and constants for the controller

use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::{
    api::{
        apps::v1::{DaemonSet, DaemonSetStatus},
        core::v1::{ConfigMap, EnvVar, ServiceAccount},
        rbac::v1::{Role, RoleBinding},
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{
    api::{Patch, PatchParams},
    client::Client,
    core::ObjectMeta,
    Api,
};
use sha2::{Digest, Sha256};

use crate::{
    labels::{managed_labels, managed_labels_extend},
    CONTROLLER_NAME,
};

/// Operator Context
pub struct Context {
    /// Kube client
    pub k_client: Client,
}

impl Context {
    /// Create new context
    pub fn new(k_client: Client) -> Self {
        Context { k_client }
    }
}

/// Apply a daemon set in namespace.
///
/// The daemon set must already carry its name and namespace; owner references and the managed
/// labels are added here.
pub async fn apply_daemon_set(
    cx: Arc<Context>,
    orefs: Vec<OwnerReference>,
    daemon_set: DaemonSet,
) -> Result<Option<DaemonSetStatus>, kube::error::Error> {
    let serverside = PatchParams::apply(CONTROLLER_NAME);
    let name = daemon_set.metadata.name.clone().unwrap_or_default();
    let ns = daemon_set.metadata.namespace.clone().unwrap_or_default();
    let daemon_sets: Api<DaemonSet> = Api::namespaced(cx.k_client.clone(), &ns);

    // Server-side apply daemon set
    let daemon_set = DaemonSet {
        metadata: ObjectMeta {
            owner_references: Some(orefs),
            labels: managed_labels_extend(daemon_set.metadata.labels),
            ..daemon_set.metadata
        },
        ..daemon_set
    };
    let daemon_set = daemon_sets
        .patch(&name, &serverside, &Patch::Apply(daemon_set))
        .await?;
    Ok(daemon_set.status)
}

/// Apply account in namespace
pub async fn apply_account(
    cx: Arc<Context>,
    ns: &str,
    orefs: Vec<OwnerReference>,
    name: &str,
) -> Result<ServiceAccount, kube::error::Error> {
    let serverside = PatchParams::apply(CONTROLLER_NAME);
    let accounts: Api<ServiceAccount> = Api::namespaced(cx.k_client.clone(), ns);

    // Server-side apply account
    let account: ServiceAccount = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            owner_references: Some(orefs),
            labels: managed_labels(),
            ..ObjectMeta::default()
        },
        ..Default::default()
    };
    let account = accounts
        .patch(name, &serverside, &Patch::Apply(account))
        .await?;
    Ok(account)
}

/// Apply role in namespace
pub async fn apply_role(
    cx: Arc<Context>,
    ns: &str,
    orefs: Vec<OwnerReference>,
    name: &str,
    role: Role,
) -> Result<Role, kube::error::Error> {
    let serverside = PatchParams::apply(CONTROLLER_NAME);
    let roles: Api<Role> = Api::namespaced(cx.k_client.clone(), ns);

    // Server-side apply role
    let role: Role = Role {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            owner_references: Some(orefs),
            labels: managed_labels(),
            ..role.metadata
        },
        ..role
    };
    let role = roles.patch(name, &serverside, &Patch::Apply(role)).await?;
    Ok(role)
}

/// Apply role binding in namespace
pub async fn apply_role_binding(
    cx: Arc<Context>,
    ns: &str,
    orefs: Vec<OwnerReference>,
    name: &str,
    rb: RoleBinding,
) -> Result<RoleBinding, kube::error::Error> {
    let serverside = PatchParams::apply(CONTROLLER_NAME);
    let role_bindings: Api<RoleBinding> = Api::namespaced(cx.k_client.clone(), ns);

    // Server-side apply role binding
    let role_binding: RoleBinding = RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            owner_references: Some(orefs),
            labels: managed_labels(),
            ..rb.metadata
        },
        ..rb
    };
    let role_binding = role_bindings
        .patch(name, &serverside, &Patch::Apply(role_binding))
        .await?;
    Ok(role_binding)
}

/// Apply a config map
pub async fn apply_config_map(
    cx: Arc<Context>,
    ns: &str,
    orefs: Vec<OwnerReference>,
    name: &str,
    data: BTreeMap<String, String>,
) -> Result<(), kube::error::Error> {
    let serverside = PatchParams::apply(CONTROLLER_NAME);
    let config_maps: Api<ConfigMap> = Api::namespaced(cx.k_client.clone(), ns);
    // Apply config map
    let map_data = ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            owner_references: Some(orefs),
            labels: managed_labels(),
            ..ObjectMeta::default()
        },
        data: Some(data),
        ..Default::default()
    };
    config_maps
        .patch(name, &serverside, &Patch::Apply(map_data))
        .await?;
    Ok(())
}

/// Hex encoded sha256 of the data, stable across runs.
pub fn config_hash(data: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Apply override env vars to an existing env var list
pub fn override_env_vars(env: &mut Vec<EnvVar>, overrides: &Option<BTreeMap<String, String>>) {
    if let Some(override_env) = &overrides {
        override_env.iter().for_each(|(key, value)| {
            if let Some((pos, _)) = env.iter().enumerate().find(|(_, var)| &var.name == key) {
                env.swap_remove(pos);
            }
            env.push(EnvVar {
                name: key.to_string(),
                value: Some(value.to_string()),
                ..Default::default()
            })
        });
        // Sort env vars so we can have stable tests
        env.sort_unstable_by(|a, b| a.name.cmp(&b.name));
    }
}
