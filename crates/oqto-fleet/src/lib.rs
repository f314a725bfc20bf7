//! Oqto fleet: per-session service provisioning.
//!
//! Places session volumes on worker nodes, drives the control plane through
//! the provisioning pipeline, and reconciles volumes left behind by failed
//! teardown.

pub mod api;
pub mod control_plane;
pub mod db;
pub mod nodes;
pub mod reconcile;
pub mod remote;
pub mod service;
pub mod volume;

#[cfg(test)]
mod testing;
