use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::anyhow;
use futures::stream::StreamExt;
use k8s_openapi::api::{
    apps::v1::{DaemonSet, DaemonSetStatus},
    core::v1::{ConfigMap, ServiceAccount},
    rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject},
};
use kube::{
    api::{Patch, PatchParams},
    client::Client,
    runtime::{
        controller::Action,
        watcher::{self, Config},
        Controller,
    },
    Api, Resource, ResourceExt,
};
use opentelemetry::{global, KeyValue};
use tracing::{debug, error, info};

use crate::{
    labels::{selector_labels, MANAGED_BY_LABEL_SELECTOR},
    ovn_controller::{
        daemon_set::{
            ovn_daemon_set, ovs_daemon_set, OVN_CONTROLLER_DAEMON_SET_NAME, OVS_DAEMON_SET_NAME,
        },
        scripts,
        volumes::scripts_config_map_name,
        OVNController, OVNControllerStatus,
    },
    utils::{
        apply_account, apply_config_map, apply_daemon_set, apply_role, apply_role_binding,
        config_hash, Context,
    },
};

/// Key of the scripts config map hash in the status.
pub const SCRIPTS_HASH_KEY: &str = "scripts";
/// Pod annotation listing the network attachments of a pod.
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";

/// Handle errors during reconciliation.
fn on_error(instance: Arc<OVNController>, error: &Error, _context: Arc<Context>) -> Action {
    error!(name = %instance.name_any(), %error, "reconcile failed");
    Action::requeue(Duration::from_secs(5))
}

/// Errors produced by the reconcile function.
#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("App error: {source}")]
    App {
        #[from]
        source: anyhow::Error,
    },
    #[error("Kube error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },
}

/// Start a controller for the OVNController CRD.
pub async fn run() -> Result<(), kube::Error> {
    let k_client = Client::try_default().await?;
    let context = Arc::new(Context::new(k_client.clone()));

    let instances: Api<OVNController> = Api::all(k_client.clone());
    let daemon_sets = Api::<DaemonSet>::all(k_client.clone());
    let config_maps = Api::<ConfigMap>::all(k_client.clone());
    let accounts = Api::<ServiceAccount>::all(k_client.clone());

    Controller::new(instances, Config::default())
        .owns(
            daemon_sets,
            watcher::Config::default().labels(MANAGED_BY_LABEL_SELECTOR),
        )
        .owns(
            config_maps,
            watcher::Config::default().labels(MANAGED_BY_LABEL_SELECTOR),
        )
        .owns(
            accounts,
            watcher::Config::default().labels(MANAGED_BY_LABEL_SELECTOR),
        )
        .run(reconcile, on_error, context)
        .for_each(|rec_res| async move {
            match rec_res {
                Ok((instance, _)) => {
                    info!(name = %instance.name, "reconcile success");
                }
                Err(err) => {
                    error!(?err, "reconcile error")
                }
            }
        })
        .await;
    Ok(())
}

/// Perform a reconcile pass for the OVNController CRD
async fn reconcile(instance: Arc<OVNController>, cx: Arc<Context>) -> Result<Action, Error> {
    let meter = global::meter("ovn-operator");
    let runs = meter
        .u64_counter("ovn_controller_reconcile_count")
        .with_description("Number of ovn controller reconciles")
        .init();

    match reconcile_(instance, cx).await {
        Ok(action) => {
            runs.add(1, &[KeyValue::new("result", "ok")]);
            Ok(action)
        }
        Err(err) => {
            runs.add(1, &[KeyValue::new("result", "err")]);
            Err(err)
        }
    }
}

async fn reconcile_(instance: Arc<OVNController>, cx: Arc<Context>) -> Result<Action, Error> {
    let spec = &instance.spec;
    debug!(?spec, "reconcile");

    let ns = instance
        .namespace()
        .ok_or_else(|| anyhow!("OVNController {} has no namespace", instance.name_any()))?;
    let name = instance.name_any();
    let orefs = instance
        .controller_owner_ref(&())
        .map(|oref| vec![oref])
        .unwrap_or_default();

    let rbac_name = instance.rbac_resource_name();
    let role_name = format!("{rbac_name}-role");
    apply_account(cx.clone(), &ns, orefs.clone(), &rbac_name).await?;
    apply_role(cx.clone(), &ns, orefs.clone(), &role_name, role()).await?;
    apply_role_binding(
        cx.clone(),
        &ns,
        orefs.clone(),
        &format!("{rbac_name}-rolebinding"),
        role_binding(&ns, &rbac_name, &role_name),
    )
    .await?;

    let scripts = scripts::config_map_data(spec);
    let hash = config_hash(&scripts);
    apply_config_map(
        cx.clone(),
        &ns,
        orefs.clone(),
        &scripts_config_map_name(&name),
        scripts,
    )
    .await?;

    let ovn_status = apply_daemon_set(
        cx.clone(),
        orefs.clone(),
        ovn_daemon_set(
            &instance,
            &hash,
            selector_labels(OVN_CONTROLLER_DAEMON_SET_NAME),
        ),
    )
    .await?;
    let ovs_status = apply_daemon_set(
        cx.clone(),
        orefs,
        ovs_daemon_set(
            &instance,
            &hash,
            selector_labels(OVS_DAEMON_SET_NAME),
            network_annotations(instance.spec.network_attachment.as_deref(), &ns),
        ),
    )
    .await?;

    let ready = is_ready(&ovn_status) && is_ready(&ovs_status);
    let (number_ready, desired_number_scheduled) = counts(&ovn_status);
    let (ovs_number_ready, ovs_desired_number_scheduled) = counts(&ovs_status);
    let status = OVNControllerStatus {
        number_ready,
        desired_number_scheduled,
        ovs_number_ready,
        ovs_desired_number_scheduled,
        hash: BTreeMap::from_iter([(SCRIPTS_HASH_KEY.to_owned(), hash)]),
    };
    debug!(?status, ready, "daemon sets applied");

    let instances: Api<OVNController> = Api::namespaced(cx.k_client.clone(), &ns);
    let _patched = instances
        .patch_status(
            &name,
            &PatchParams::default(),
            &Patch::Merge(serde_json::json!({ "status": status })),
        )
        .await?;

    if ready {
        Ok(Action::requeue(Duration::from_secs(30)))
    } else {
        Ok(Action::requeue(Duration::from_secs(10)))
    }
}

fn counts(status: &Option<DaemonSetStatus>) -> (i32, i32) {
    status
        .as_ref()
        .map(|status| (status.number_ready, status.desired_number_scheduled))
        .unwrap_or_default()
}

fn is_ready(status: &Option<DaemonSetStatus>) -> bool {
    status
        .as_ref()
        .map(|status| status.number_ready == status.desired_number_scheduled)
        .unwrap_or(false)
}

/// Annotations attaching the OVS pods to the given network, if any.
fn network_annotations(attachment: Option<&str>, ns: &str) -> BTreeMap<String, String> {
    attachment
        .filter(|attachment| !attachment.is_empty())
        .map(|attachment| {
            BTreeMap::from_iter([(
                NETWORKS_ANNOTATION.to_owned(),
                serde_json::json!([{ "name": attachment, "namespace": ns }]).to_string(),
            )])
        })
        .unwrap_or_default()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

// The daemons run privileged, on OpenShift this requires the matching security context
// constraint.
fn role() -> Role {
    Role {
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(strings(&["security.openshift.io"])),
                resource_names: Some(strings(&["anyuid", "privileged"])),
                resources: Some(strings(&["securitycontextconstraints"])),
                verbs: strings(&["use"]),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(strings(&[""])),
                resources: Some(strings(&["pods"])),
                verbs: strings(&["get", "list", "watch"]),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

fn role_binding(ns: &str, account: &str, role: &str) -> RoleBinding {
    RoleBinding {
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_owned(),
            kind: "Role".to_owned(),
            name: role.to_owned(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_owned(),
            name: account.to_owned(),
            namespace: Some(ns.to_owned()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ovn_controller::{OVNControllerSpec, NET_SETUP_SCRIPT, START_OVSDB_SERVER_SCRIPT},
        utils::test::{expect_request, timeout_after_1s, ApiServerHandle},
    };
    use serde_json::{json, Value};
    use tracing_test::traced_test;

    const NS_PATH: &str = "namespaces/default";

    fn daemon_set_status(ready: i32, desired: i32) -> Value {
        json!({
            "currentNumberScheduled": desired,
            "desiredNumberScheduled": desired,
            "numberMisscheduled": 0,
            "numberReady": ready,
        })
    }

    fn with_status(mut body: Value, status: Value) -> Value {
        body["status"] = status;
        body
    }

    fn config_hash_env(body: &Value, container: usize) -> &Value {
        &body["spec"]["template"]["spec"]["containers"][container]["env"][0]
    }

    /// Serve the requests of a full reconcile pass.
    /// Daemon sets report the given statuses, and the status patch is checked by `check_status`.
    async fn serve_reconcile(
        mut handle: ApiServerHandle,
        instance: OVNController,
        ovn_status: Option<Value>,
        ovs_status: Option<Value>,
        check_status: impl FnOnce(&OVNControllerStatus),
        check_ovs: impl FnOnce(&Value),
    ) {
        let account = expect_request(
            &mut handle,
            "PATCH",
            &format!("/api/v1/{NS_PATH}/serviceaccounts/ovncontroller-test"),
            None,
        )
        .await;
        assert_eq!(account.body["metadata"]["labels"]["managed-by"], "ovn-operator");
        assert_eq!(account.body["metadata"]["ownerReferences"][0]["uid"], "1234");

        let role = expect_request(
            &mut handle,
            "PATCH",
            &format!(
                "/apis/rbac.authorization.k8s.io/v1/{NS_PATH}/roles/ovncontroller-test-role"
            ),
            None,
        )
        .await;
        assert_eq!(role.body["rules"][0]["verbs"], json!(["use"]));

        let binding = expect_request(
            &mut handle,
            "PATCH",
            &format!(
                "/apis/rbac.authorization.k8s.io/v1/{NS_PATH}/rolebindings/ovncontroller-test-rolebinding"
            ),
            None,
        )
        .await;
        assert_eq!(binding.body["roleRef"]["name"], "ovncontroller-test-role");
        assert_eq!(
            binding.body["subjects"][0]["name"],
            "ovncontroller-test"
        );

        let scripts = expect_request(
            &mut handle,
            "PATCH",
            &format!("/api/v1/{NS_PATH}/configmaps/test-scripts"),
            None,
        )
        .await;
        let data: BTreeMap<String, String> =
            serde_json::from_value(scripts.body["data"].clone()).expect("config map data");
        assert!(data.contains_key(NET_SETUP_SCRIPT));
        assert!(data.contains_key(START_OVSDB_SERVER_SCRIPT));
        let hash = config_hash(&data);

        let ovn = handle_daemon_set(&mut handle, OVN_CONTROLLER_DAEMON_SET_NAME, ovn_status).await;
        assert_eq!(ovn["metadata"]["labels"]["managed-by"], "ovn-operator");
        assert_eq!(
            ovn["spec"]["selector"]["matchLabels"],
            json!({ "service": "ovn-controller" })
        );
        assert_eq!(
            config_hash_env(&ovn, 0),
            &json!({ "name": "CONFIG_HASH", "value": hash })
        );

        let ovs = handle_daemon_set(&mut handle, OVS_DAEMON_SET_NAME, ovs_status).await;
        assert_eq!(
            ovs["spec"]["selector"]["matchLabels"],
            json!({ "service": "ovn-controller-ovs" })
        );
        assert_eq!(
            config_hash_env(&ovs, 1),
            &json!({ "name": "CONFIG_HASH", "value": hash })
        );
        check_ovs(&ovs);

        let (request, send) = handle.next_request().await.expect("service not called");
        assert_eq!(request.method(), "PATCH");
        assert_eq!(
            request.uri().path(),
            format!("/apis/ovn.openstack.org/v1beta1/{NS_PATH}/ovncontrollers/test/status")
        );
        let body = hyper::body::to_bytes(request.into_body())
            .await
            .expect("status body");
        let body: Value = serde_json::from_slice(&body).expect("status should be JSON");
        let status: OVNControllerStatus =
            serde_json::from_value(body["status"].clone()).expect("valid status");
        assert_eq!(status.hash.get(SCRIPTS_HASH_KEY), Some(&hash));
        check_status(&status);

        let instance = instance.with_status(status);
        send.send_response(
            http::Response::builder()
                .body(hyper::Body::from(
                    serde_json::to_vec(&instance).expect("instance should serialize"),
                ))
                .expect("response should build"),
        );
    }

    async fn handle_daemon_set(
        handle: &mut ApiServerHandle,
        name: &str,
        status: Option<Value>,
    ) -> Value {
        let path = format!("/apis/apps/v1/{NS_PATH}/daemonsets/{name}");
        let (request, send) = handle.next_request().await.expect("service not called");
        let request = crate::utils::test::Request::from_request(request)
            .await
            .expect("request should be readable");
        assert_eq!(request.method, "PATCH");
        assert_eq!(request.path, path);
        let response = match status {
            Some(status) => with_status(request.body.clone(), status),
            None => request.body.clone(),
        };
        send.send_response(
            http::Response::builder()
                .body(hyper::Body::from(
                    serde_json::to_vec(&response).expect("response should serialize"),
                ))
                .expect("response should build"),
        );
        request.body
    }

    #[tokio::test]
    #[traced_test]
    async fn reconcile_from_empty() {
        let instance = OVNController::test();
        let (testctx, handle) = Context::test();
        let mocksrv = tokio::spawn(serve_reconcile(
            handle,
            instance.clone(),
            None,
            None,
            |status| {
                assert_eq!(status.number_ready, 0);
                assert_eq!(status.desired_number_scheduled, 0);
                assert_eq!(status.ovs_number_ready, 0);
                assert_eq!(status.ovs_desired_number_scheduled, 0);
            },
            |ovs| {
                assert_eq!(ovs["spec"]["template"]["metadata"].get("annotations"), None);
            },
        ));
        let action = reconcile(Arc::new(instance), testctx)
            .await
            .expect("reconciler");
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        timeout_after_1s(mocksrv).await;
        assert!(logs_contain("reconcile"));
    }

    #[tokio::test]
    async fn reconcile_ready_with_network_attachment() {
        let instance = OVNController::test().with_spec(OVNControllerSpec {
            network_attachment: Some("tenant".to_owned()),
            ..Default::default()
        });
        let (testctx, handle) = Context::test();
        let mocksrv = tokio::spawn(serve_reconcile(
            handle,
            instance.clone(),
            Some(daemon_set_status(3, 3)),
            Some(daemon_set_status(3, 3)),
            |status| {
                assert_eq!(status.number_ready, 3);
                assert_eq!(status.desired_number_scheduled, 3);
                assert_eq!(status.ovs_number_ready, 3);
                assert_eq!(status.ovs_desired_number_scheduled, 3);
            },
            |ovs| {
                assert_eq!(
                    ovs["spec"]["template"]["metadata"]["annotations"][NETWORKS_ANNOTATION],
                    r#"[{"name":"tenant","namespace":"default"}]"#
                );
            },
        ));
        let action = reconcile(Arc::new(instance), testctx)
            .await
            .expect("reconciler");
        assert_eq!(action, Action::requeue(Duration::from_secs(30)));
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn reconcile_partially_ready() {
        let instance = OVNController::test();
        let (testctx, handle) = Context::test();
        let mocksrv = tokio::spawn(serve_reconcile(
            handle,
            instance.clone(),
            Some(daemon_set_status(3, 3)),
            Some(daemon_set_status(1, 3)),
            |status| {
                assert_eq!(status.number_ready, 3);
                assert_eq!(status.ovs_number_ready, 1);
                assert_eq!(status.ovs_desired_number_scheduled, 3);
            },
            |_| {},
        ));
        let action = reconcile(Arc::new(instance), testctx)
            .await
            .expect("reconciler");
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn reconcile_requires_namespace() {
        let mut instance = OVNController::test();
        instance.metadata.namespace = None;
        let (testctx, _handle) = Context::test();
        let err = reconcile(Arc::new(instance), testctx)
            .await
            .expect_err("reconcile should fail without a namespace");
        assert!(matches!(err, Error::App { .. }));
    }

    #[test]
    fn network_annotations_only_when_attached() {
        assert!(network_annotations(None, "default").is_empty());
        assert!(network_annotations(Some(""), "default").is_empty());
        let annotations = network_annotations(Some("internalapi"), "openstack");
        assert_eq!(
            annotations.get(NETWORKS_ANNOTATION).map(String::as_str),
            Some(r#"[{"name":"internalapi","namespace":"openstack"}]"#)
        );
    }
}
