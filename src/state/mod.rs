//! Persisted state module for the fleet planner.
//!
//! This module provides the read-only view of what a previous deployment
//! left behind: instance records with their applied specs, agent-reported
//! state and published DNS records.

mod snapshot;
mod types;

pub use snapshot::{DeploymentSnapshot, SNAPSHOT_FILE, SNAPSHOT_VERSION, SnapshotStore};
pub use types::{
    AgentState, AppliedSpec, DnsRecord, InstanceRecord, InstanceState, NetworkSetting,
    NetworkSettingsHash, PersistentDisk,
};
