//! Provides API for the operator and related tooling.
#![warn(missing_docs)]

/// Labels module for managing resource labels.
#[cfg(feature = "controller")]
pub(crate) mod labels;
/// OVN controller module for deploying OVN and OVS daemons.
pub mod ovn_controller;
/// Utils module for shared utility functions.
#[cfg(feature = "controller")]
pub mod utils;

/// Field manager used for all server-side applies
#[cfg(feature = "controller")]
const CONTROLLER_NAME: &str = "ovn-operator";
