//! Manifest specification types for a deployment.
//!
//! This module defines the structs that map to the deployment manifest, plus
//! the structured value types (`VmType`, `Stemcell`, `DiskType`, `Env`,
//! `CloudProperties`) shared by the manifest, the persisted applied specs and
//! the drift checks. Equality on these value types is structural, so drift
//! comparisons never depend on key order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use crate::planner::VirtualState;

/// The root manifest structure for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentManifest {
    /// Deployment name.
    pub name: String,
    /// Recreate every instance on the next apply.
    #[serde(default)]
    pub recreate: bool,
    /// Trusted CA certificates installed on every instance.
    #[serde(default)]
    pub trusted_certs: Option<String>,
    /// DNS record management settings.
    #[serde(default)]
    pub dns: DnsConfig,
    /// Declared availability zones.
    #[serde(default)]
    pub availability_zones: Vec<AvailabilityZoneConfig>,
    /// Declared VM types.
    #[serde(default)]
    pub vm_types: Vec<VmType>,
    /// Declared stemcells.
    #[serde(default)]
    pub stemcells: Vec<StemcellConfig>,
    /// Declared persistent disk types.
    #[serde(default)]
    pub disk_types: Vec<DiskType>,
    /// Declared networks.
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
    /// Instance groups to deploy.
    pub instance_groups: Vec<InstanceGroupConfig>,
}

/// DNS record management settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsConfig {
    /// Whether DNS records are managed for this deployment.
    #[serde(default)]
    pub enabled: bool,
    /// Domain appended to every record name.
    #[serde(default = "default_dns_domain")]
    pub domain: String,
}

/// An availability zone declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityZoneConfig {
    /// Zone name.
    pub name: String,
    /// Cloud properties merged into every VM placed in this zone.
    #[serde(default)]
    pub cloud_properties: CloudProperties,
}

/// A stemcell declaration referenced by alias.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StemcellConfig {
    /// Alias used by instance groups.
    pub alias: String,
    /// Stemcell name.
    pub name: String,
    /// Stemcell version.
    pub version: String,
}

/// A network declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Network name.
    pub name: String,
    /// Network type.
    #[serde(rename = "type", default)]
    pub kind: NetworkKind,
}

/// Network types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    /// Addresses are assigned by the deployment.
    #[default]
    Manual,
    /// Addresses are assigned by the infrastructure.
    Dynamic,
    /// Externally routable addresses.
    Vip,
}

/// Configuration for a single instance group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceGroupConfig {
    /// Unique name for the instance group within this deployment.
    pub name: String,
    /// Desired number of instances.
    pub instances: u32,
    /// Availability zones instances may be placed in.
    #[serde(default)]
    pub azs: Vec<String>,
    /// VM type name.
    pub vm_type: String,
    /// Stemcell alias.
    pub stemcell: String,
    /// Persistent disk type name (optional).
    #[serde(default)]
    pub persistent_disk_type: Option<String>,
    /// Networks instances attach to.
    #[serde(default)]
    pub networks: Vec<InstanceGroupNetworkConfig>,
    /// Agent environment.
    #[serde(default)]
    pub env: Env,
    /// Requested lifecycle state.
    #[serde(default)]
    pub state: Option<VirtualState>,
    /// Jobs (release templates) colocated on each instance.
    #[serde(default)]
    pub jobs: Vec<JobTemplateConfig>,
}

/// Network attachment for an instance group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceGroupNetworkConfig {
    /// Network name.
    pub name: String,
    /// Static IPs, one per instance slot.
    #[serde(default)]
    pub static_ips: Vec<IpAddr>,
    /// Default purposes (`dns`, `gateway`) served by this network.
    #[serde(default)]
    pub default: Vec<String>,
}

/// A release job template colocated on an instance group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobTemplateConfig {
    /// Job name.
    pub name: String,
    /// Release providing the job.
    pub release: String,
    /// Job properties.
    #[serde(default)]
    pub properties: Value,
    /// Packages the job depends on.
    #[serde(default)]
    pub packages: Vec<String>,
}

/// Opaque cloud properties with structural equality.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CloudProperties(pub Map<String, Value>);

/// A resolved VM type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmType {
    /// VM type name.
    pub name: String,
    /// Cloud properties passed to the infrastructure.
    #[serde(default)]
    pub cloud_properties: CloudProperties,
}

/// A resolved stemcell.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stemcell {
    /// Stemcell name.
    pub name: String,
    /// Stemcell version.
    pub version: String,
}

/// A persistent disk type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskType {
    /// Disk type name.
    pub name: String,
    /// Disk size in MiB.
    pub disk_size: u64,
    /// Cloud properties passed to the infrastructure.
    #[serde(default)]
    pub cloud_properties: CloudProperties,
}

/// Agent environment with structural equality.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Env(pub BTreeMap<String, Value>);

fn default_dns_domain() -> String {
    String::from("bosh")
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            domain: default_dns_domain(),
        }
    }
}

impl DeploymentManifest {
    /// Returns instance group names.
    #[must_use]
    pub fn instance_group_names(&self) -> Vec<&str> {
        self.instance_groups.iter().map(|g| g.name.as_str()).collect()
    }

    /// Returns the total number of desired instances across all groups.
    #[must_use]
    pub fn total_instances(&self) -> u32 {
        self.instance_groups.iter().map(|g| g.instances).sum()
    }

    /// Finds an availability zone by name.
    #[must_use]
    pub fn availability_zone(&self, name: &str) -> Option<&AvailabilityZoneConfig> {
        self.availability_zones.iter().find(|az| az.name == name)
    }

    /// Finds a VM type by name.
    #[must_use]
    pub fn vm_type(&self, name: &str) -> Option<&VmType> {
        self.vm_types.iter().find(|v| v.name == name)
    }

    /// Finds a stemcell by alias.
    #[must_use]
    pub fn stemcell(&self, alias: &str) -> Option<&StemcellConfig> {
        self.stemcells.iter().find(|s| s.alias == alias)
    }

    /// Finds a disk type by name.
    #[must_use]
    pub fn disk_type(&self, name: &str) -> Option<&DiskType> {
        self.disk_types.iter().find(|d| d.name == name)
    }

    /// Finds a network by name.
    #[must_use]
    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.name == name)
    }
}

impl CloudProperties {
    /// Returns true if no properties are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a copy of `self` with `other` layered on top.
    #[must_use]
    pub fn merged_with(&self, other: &Self) -> Self {
        let mut merged = self.0.clone();
        for (key, value) in &other.0 {
            merged.insert(key.clone(), value.clone());
        }
        Self(merged)
    }
}

impl fmt::Display for CloudProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

impl fmt::Display for VmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.cloud_properties)
    }
}

impl fmt::Display for Stemcell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

impl From<&StemcellConfig> for Stemcell {
    fn from(config: &StemcellConfig) -> Self {
        Self {
            name: config.name.clone(),
            version: config.version.clone(),
        }
    }
}

impl Env {
    /// Returns true if no environment keys are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map: Map<String, Value> = self.0.clone().into_iter().collect();
        write!(f, "{}", Value::Object(map))
    }
}

impl NetworkKind {
    /// Returns the manifest name of the network type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Dynamic => "dynamic",
            Self::Vip => "vip",
        }
    }

    /// Parses a manifest network type name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "manual" => Some(Self::Manual),
            "dynamic" => Some(Self::Dynamic),
            "vip" => Some(Self::Vip),
            _ => None,
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl InstanceGroupNetworkConfig {
    /// Returns true if this network serves the given default purpose.
    #[must_use]
    pub fn is_default_for(&self, purpose: &str) -> bool {
        self.default.iter().any(|d| d == purpose)
    }
}

impl JobTemplateConfig {
    /// Returns true if the job declares properties.
    #[must_use]
    pub fn has_properties(&self) -> bool {
        !self.properties.is_null()
    }
}
