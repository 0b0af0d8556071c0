//! State types for persisted instance records.
//!
//! These types represent what a previous deployment left behind: one
//! record per instance with the configuration last applied to it, plus the
//! agent-reported runtime state. The planner only ever reads them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use crate::config::{CloudProperties, Env, Stemcell, VmType};

/// Persisted administrative state of an instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Jobs should be running.
    #[default]
    Started,
    /// Jobs stopped, VM kept.
    Stopped,
    /// Jobs stopped and VM deleted, disk kept.
    Detached,
}

/// A persisted instance record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceRecord {
    /// Instance group (job) name.
    pub job: String,
    /// Index within the instance group.
    pub index: u32,
    /// Stable unique identifier.
    pub uuid: String,
    /// Owning deployment name.
    pub deployment: String,
    /// Availability zone the instance was placed in.
    #[serde(default)]
    pub availability_zone: Option<String>,
    /// Whether this instance is the group's bootstrap instance.
    #[serde(default)]
    pub bootstrap: bool,
    /// Administrative state.
    #[serde(default)]
    pub state: InstanceState,
    /// Cloud identifier of the VM, if one exists.
    #[serde(default)]
    pub vm_cid: Option<String>,
    /// Agent environment recorded for the VM.
    #[serde(default)]
    pub env: Option<Env>,
    /// Last applied configuration snapshot.
    #[serde(default)]
    pub apply_spec: AppliedSpec,
    /// Attached persistent disk.
    #[serde(default)]
    pub persistent_disk: Option<PersistentDisk>,
}

/// The configuration last applied to an instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppliedSpec {
    /// Network settings by network name.
    #[serde(default)]
    pub networks: NetworkSettingsHash,
    /// Stemcell the VM was created from.
    #[serde(default)]
    pub stemcell: Stemcell,
    /// VM type the VM was created with.
    #[serde(default)]
    pub vm_type: VmType,
    /// Effective cloud properties (az merged with vm type).
    #[serde(default)]
    pub cloud_properties: CloudProperties,
    /// Fingerprint of the colocated jobs.
    #[serde(default)]
    pub job_hash: Option<String>,
    /// Fingerprint of the rendered configuration.
    #[serde(default)]
    pub configuration_hash: Option<String>,
    /// Fingerprint of the compiled packages.
    #[serde(default)]
    pub packages_hash: Option<String>,
    /// Fingerprint of the installed trusted certificates.
    #[serde(default)]
    pub trusted_certs_hash: Option<String>,
}

/// A persistent disk attached to an instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistentDisk {
    /// Cloud identifier of the disk.
    pub disk_cid: String,
    /// Size in MiB.
    pub size: u64,
    /// Cloud properties the disk was created with.
    #[serde(default)]
    pub cloud_properties: CloudProperties,
}

/// Network settings for one network, as applied to the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkSetting {
    /// Network type (`manual`, `dynamic`, `vip`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Assigned address, if known.
    #[serde(default)]
    pub ip: Option<IpAddr>,
    /// Default purposes served by this network.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default: Vec<String>,
    /// Index-based DNS record name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_record_name: Option<String>,
}

/// Network settings keyed by network name.
pub type NetworkSettingsHash = BTreeMap<String, NetworkSetting>;

/// The last agent-reported state of an instance.
///
/// The document is opaque to the planner apart from the job state and the
/// per-network addresses reported for dynamic networks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct AgentState(pub Value);

/// A DNS record as stored by the DNS collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DnsRecord {
    /// Fully qualified record name.
    pub name: String,
    /// Address the record resolves to.
    pub ip: String,
}

impl InstanceRecord {
    /// Creates a fresh, unsaved record for a new instance.
    #[must_use]
    pub fn new(job: &str, index: u32, uuid: &str, deployment: &str) -> Self {
        Self {
            job: job.to_string(),
            index,
            uuid: uuid.to_string(),
            deployment: deployment.to_string(),
            availability_zone: None,
            bootstrap: false,
            state: InstanceState::Started,
            vm_cid: None,
            env: None,
            apply_spec: AppliedSpec::default(),
            persistent_disk: None,
        }
    }

    /// Returns the `job/index` name used in logs.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}/{}", self.job, self.index)
    }
}

impl fmt::Display for InstanceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.job, self.index, self.uuid)
    }
}

impl AgentState {
    /// Wraps an agent state document.
    #[must_use]
    pub const fn new(document: Value) -> Self {
        Self(document)
    }

    /// Returns the agent-reported job state (`running`, `failing`, ...).
    #[must_use]
    pub fn job_state(&self) -> Option<&str> {
        self.0.get("job_state").and_then(Value::as_str)
    }

    /// Returns the address the agent reports on a network.
    #[must_use]
    pub fn network_ip(&self, network: &str) -> Option<IpAddr> {
        self.0
            .get("networks")
            .and_then(|networks| networks.get(network))
            .and_then(|settings| settings.get("ip"))
            .and_then(Value::as_str)
            .and_then(|ip| ip.parse().ok())
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Detached => "detached",
        };
        write!(f, "{state}")
    }
}
