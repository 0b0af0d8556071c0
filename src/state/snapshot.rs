//! File-backed deployment snapshot.
//!
//! A snapshot is the persisted view of a deployment the planner reads from:
//! instance records, the last agent-reported state per instance and the DNS
//! records currently published.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{PlannerError, Result, StateError};

use super::types::{AgentState, DnsRecord, InstanceRecord};

/// Current version of the snapshot format.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Default snapshot file name.
pub const SNAPSHOT_FILE: &str = "fleet.state.json";

/// The persisted view of one deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSnapshot {
    /// Snapshot format version.
    pub version: String,
    /// Deployment name.
    pub deployment: String,
    /// Instance records across all instance groups.
    #[serde(default)]
    pub instances: Vec<InstanceRecord>,
    /// Last agent-reported state keyed by instance uuid.
    #[serde(default)]
    pub agent_states: BTreeMap<String, AgentState>,
    /// Published DNS records.
    #[serde(default)]
    pub dns_records: Vec<DnsRecord>,
    /// When the snapshot was last written.
    pub last_updated: DateTime<Utc>,
}

impl DeploymentSnapshot {
    /// Creates an empty snapshot for a deployment.
    #[must_use]
    pub fn new(deployment: &str) -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            deployment: deployment.to_string(),
            instances: Vec::new(),
            agent_states: BTreeMap::new(),
            dns_records: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Returns the records belonging to an instance group, in index order.
    #[must_use]
    pub fn instances_for_job(&self, job: &str) -> Vec<&InstanceRecord> {
        let mut records: Vec<&InstanceRecord> =
            self.instances.iter().filter(|r| r.job == job).collect();
        records.sort_by_key(|r| r.index);
        records
    }

    /// Returns the agent state for each record uuid that has one.
    #[must_use]
    pub fn states_by_uuid(&self) -> HashMap<String, AgentState> {
        self.agent_states
            .iter()
            .map(|(uuid, state)| (uuid.clone(), state.clone()))
            .collect()
    }

    /// Adds or replaces a record, keyed by uuid.
    pub fn set_instance(&mut self, record: InstanceRecord) {
        self.instances.retain(|r| r.uuid != record.uuid);
        self.instances.push(record);
        self.last_updated = Utc::now();
    }
}

/// Loads and saves snapshots as JSON files.
#[derive(Debug)]
pub struct SnapshotStore {
    /// Path to the snapshot file.
    path: PathBuf,
}

impl SnapshotStore {
    /// Creates a store for the given snapshot file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the snapshot path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the snapshot file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, corrupted or of
    /// an unsupported version.
    pub fn load(&self) -> Result<DeploymentSnapshot> {
        if !self.path.exists() {
            return Err(PlannerError::State(StateError::NotFound {
                path: self.path.clone(),
            }));
        }

        info!("Loading state snapshot from: {}", self.path.display());
        let content = std::fs::read_to_string(&self.path)?;

        let snapshot: DeploymentSnapshot = serde_json::from_str(&content).map_err(|e| {
            PlannerError::State(StateError::Corrupted {
                message: format!("Failed to parse snapshot: {e}"),
            })
        })?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PlannerError::State(StateError::VersionMismatch {
                expected: SNAPSHOT_VERSION.to_string(),
                found: snapshot.version,
            }));
        }

        debug!(
            "Loaded snapshot for {} with {} instances",
            snapshot.deployment,
            snapshot.instances.len()
        );
        Ok(snapshot)
    }

    /// Loads the snapshot, or returns an empty one if none exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be loaded.
    pub fn load_or_empty(&self, deployment: &str) -> Result<DeploymentSnapshot> {
        if self.exists() {
            self.load()
        } else {
            debug!("No snapshot at {}, starting empty", self.path.display());
            Ok(DeploymentSnapshot::new(deployment))
        }
    }

    /// Saves the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn save(&self, snapshot: &DeploymentSnapshot) -> Result<()> {
        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| StateError::serialization(format!("Failed to serialize snapshot: {e}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(&self.path, content)?;
        debug!("Saved snapshot to {}", self.path.display());
        Ok(())
    }
}
