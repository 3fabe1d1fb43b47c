//! Volumes and mounts carrying TLS material into the containers.
use k8s_openapi::api::core::v1::{SecretVolumeSource, Volume, VolumeMount};

use crate::ovn_controller::TlsSpec;

/// Client certificate used to connect to the OVN databases.
pub const OVN_DB_CERT_PATH: &str = "/etc/pki/tls/certs/ovndb.crt";
/// Client private key used to connect to the OVN databases.
pub const OVN_DB_KEY_PATH: &str = "/etc/pki/tls/private/ovndb.key";
/// CA certificate used to verify the OVN databases.
pub const OVN_DB_CA_CERT_PATH: &str = "/etc/pki/tls/certs/ovndbca.crt";

/// Service name the OVN database client certificates are issued for.
pub const SERVICE_NAME_OVN_CONTROLLER: &str = "ovn-controller";

const CA_BUNDLE_VOLUME_NAME: &str = "combined-ca-bundle";
const CA_BUNDLE_KEY: &str = "tls-ca-bundle.pem";
const CA_BUNDLE_MOUNT_PATH: &str = "/etc/pki/ca-trust/extracted/pem/tls-ca-bundle.pem";

impl TlsSpec {
    /// Reports whether the OVN database connections should use TLS.
    pub fn enabled(&self) -> bool {
        self.secret_name
            .as_deref()
            .map(|name| !name.is_empty())
            .unwrap_or(false)
    }

    /// Reports the CA bundle secret name, if any.
    pub fn ca_bundle(&self) -> Option<&str> {
        self.ca_bundle_secret_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// Volume exposing the CA bundle secret.
    pub fn ca_bundle_volume(&self) -> Volume {
        Volume {
            name: CA_BUNDLE_VOLUME_NAME.to_owned(),
            secret: Some(SecretVolumeSource {
                secret_name: self.ca_bundle_secret_name.clone(),
                default_mode: Some(0o444),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Mounts placing the CA bundle where the system trust store expects it.
    pub fn ca_bundle_volume_mounts(&self) -> Vec<VolumeMount> {
        vec![VolumeMount {
            name: CA_BUNDLE_VOLUME_NAME.to_owned(),
            mount_path: CA_BUNDLE_MOUNT_PATH.to_owned(),
            sub_path: Some(CA_BUNDLE_KEY.to_owned()),
            read_only: Some(true),
            ..Default::default()
        }]
    }
}

/// A service certificate secret and where each of its keys is mounted.
#[derive(Debug, Clone)]
pub struct ServiceCert {
    pub secret_name: String,
    pub cert_mount: Option<String>,
    pub key_mount: Option<String>,
    pub ca_mount: Option<String>,
}

impl ServiceCert {
    /// Certificate for the OVN database clients mounted at the well known paths.
    pub fn ovn_db(secret_name: &str) -> Self {
        Self {
            secret_name: secret_name.to_owned(),
            cert_mount: Some(OVN_DB_CERT_PATH.to_owned()),
            key_mount: Some(OVN_DB_KEY_PATH.to_owned()),
            ca_mount: Some(OVN_DB_CA_CERT_PATH.to_owned()),
        }
    }

    fn volume_name(service: &str) -> String {
        format!("{service}-tls-certs")
    }

    pub fn volume(&self, service: &str) -> Volume {
        Volume {
            name: Self::volume_name(service),
            secret: Some(SecretVolumeSource {
                secret_name: Some(self.secret_name.clone()),
                default_mode: Some(0o440),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn volume_mounts(&self, service: &str) -> Vec<VolumeMount> {
        [
            (&self.cert_mount, "tls.crt"),
            (&self.key_mount, "tls.key"),
            (&self.ca_mount, "ca.crt"),
        ]
        .into_iter()
        .filter_map(|(mount, key)| {
            mount.as_ref().map(|path| VolumeMount {
                name: Self::volume_name(service),
                mount_path: path.to_owned(),
                sub_path: Some(key.to_owned()),
                read_only: Some(true),
                ..Default::default()
            })
        })
        .collect()
    }
}
