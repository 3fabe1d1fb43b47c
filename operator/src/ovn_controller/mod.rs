//! OVNController is a k8s custom resource that runs OVN controller and Open vSwitch on every
//! eligible node.

// Export all spec types
mod spec;
pub use spec::*;

// All other mods are behind the controller flag to keep the deps to a minimum
#[cfg(feature = "controller")]
pub(crate) mod controller;
/// DaemonSet builders for the OVN and OVS daemons.
#[cfg(feature = "controller")]
pub mod daemon_set;
/// Container scripts shipped to the OVS pods.
#[cfg(feature = "controller")]
pub mod scripts;
/// TLS volumes and mounts.
#[cfg(feature = "controller")]
pub mod tls;
/// Host and config map volumes shared by the daemons.
#[cfg(feature = "controller")]
pub mod volumes;

#[cfg(feature = "controller")]
pub use controller::run;
#[cfg(feature = "controller")]
pub use scripts::{NET_SETUP_SCRIPT, START_OVSDB_SERVER_SCRIPT};
