//! Resolved instance group descriptors.
//!
//! An [`InstanceGroup`] is a manifest instance group with every named
//! reference (availability zones, vm type, stemcell, disk type, networks)
//! resolved to its value. It is the "job" the planner reconciles.

use std::net::IpAddr;
use tracing::debug;

use crate::config::{
    CloudProperties, DeploymentManifest, DiskType, Env, InstanceGroupConfig, JobTemplateConfig,
    NetworkKind, Stemcell, VmType,
};
use crate::error::{ConfigError, Result};
use crate::state::InstanceRecord;

use super::desired::VirtualState;

/// A resolved availability zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityZone {
    /// Zone name.
    pub name: String,
    /// Cloud properties merged into VMs placed in the zone.
    pub cloud_properties: CloudProperties,
}

/// A network an instance group attaches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNetwork {
    /// Network name.
    pub name: String,
    /// Network type.
    pub kind: NetworkKind,
    /// Static IPs available to the group's instances.
    pub static_ips: Vec<IpAddr>,
}

/// Which network serves each default purpose.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultNetwork {
    /// Network providing DNS.
    pub dns: Option<String>,
    /// Network providing the default gateway.
    pub gateway: Option<String>,
}

/// A resolved instance group.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceGroup {
    /// Instance group name.
    pub name: String,
    /// Owning deployment name.
    pub deployment_name: String,
    /// Desired number of instances.
    pub instances: u32,
    /// Zones instances may be placed in.
    pub availability_zones: Vec<AvailabilityZone>,
    /// VM type.
    pub vm_type: VmType,
    /// Stemcell.
    pub stemcell: Stemcell,
    /// Agent environment.
    pub env: Env,
    /// Persistent disk type, if the group has a disk.
    pub persistent_disk_type: Option<DiskType>,
    /// Attached networks.
    pub networks: Vec<JobNetwork>,
    /// Default purposes by network.
    pub default_network: DefaultNetwork,
    /// Colocated release jobs.
    pub jobs: Vec<JobTemplateConfig>,
    /// Requested lifecycle state.
    pub state: Option<VirtualState>,
}

impl DefaultNetwork {
    /// Returns the purposes the given network serves, sorted.
    #[must_use]
    pub fn purposes_for(&self, network: &str) -> Vec<String> {
        let mut purposes = Vec::new();
        if self.dns.as_deref() == Some(network) {
            purposes.push(String::from("dns"));
        }
        if self.gateway.as_deref() == Some(network) {
            purposes.push(String::from("gateway"));
        }
        purposes
    }
}

impl InstanceGroup {
    /// Creates an instance group with no zones, networks or disk.
    #[must_use]
    pub fn new(name: &str, deployment_name: &str) -> Self {
        Self {
            name: name.to_string(),
            deployment_name: deployment_name.to_string(),
            instances: 0,
            availability_zones: Vec::new(),
            vm_type: VmType::default(),
            stemcell: Stemcell::default(),
            env: Env::default(),
            persistent_disk_type: None,
            networks: Vec::new(),
            default_network: DefaultNetwork::default(),
            jobs: Vec::new(),
            state: None,
        }
    }

    /// Resolves a manifest instance group against the manifest declarations.
    ///
    /// # Errors
    ///
    /// Returns an error if any referenced declaration is missing.
    pub fn resolve(manifest: &DeploymentManifest, config: &InstanceGroupConfig) -> Result<Self> {
        let unknown =
            |kind: &str, name: &str| ConfigError::unknown_reference(kind, name, &config.name);

        let availability_zones = config
            .azs
            .iter()
            .map(|name| {
                manifest
                    .availability_zone(name)
                    .map(|az| AvailabilityZone {
                        name: az.name.clone(),
                        cloud_properties: az.cloud_properties.clone(),
                    })
                    .ok_or_else(|| unknown("availability zone", name))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let vm_type = manifest
            .vm_type(&config.vm_type)
            .cloned()
            .ok_or_else(|| unknown("vm type", &config.vm_type))?;

        let stemcell = manifest
            .stemcell(&config.stemcell)
            .map(Stemcell::from)
            .ok_or_else(|| unknown("stemcell", &config.stemcell))?;

        let persistent_disk_type = match &config.persistent_disk_type {
            Some(name) => Some(
                manifest
                    .disk_type(name)
                    .cloned()
                    .ok_or_else(|| unknown("disk type", name))?,
            ),
            None => None,
        };

        let networks = config
            .networks
            .iter()
            .map(|network| {
                manifest
                    .network(&network.name)
                    .map(|declared| JobNetwork {
                        name: network.name.clone(),
                        kind: declared.kind,
                        static_ips: network.static_ips.clone(),
                    })
                    .ok_or_else(|| unknown("network", &network.name))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // A single network serves every default purpose
        let default_network = if config.networks.len() == 1 {
            let only = config.networks[0].name.clone();
            DefaultNetwork {
                dns: Some(only.clone()),
                gateway: Some(only),
            }
        } else {
            DefaultNetwork {
                dns: config
                    .networks
                    .iter()
                    .find(|n| n.is_default_for("dns"))
                    .map(|n| n.name.clone()),
                gateway: config
                    .networks
                    .iter()
                    .find(|n| n.is_default_for("gateway"))
                    .map(|n| n.name.clone()),
            }
        };

        debug!(
            "Resolved instance group {} ({} azs, {} networks)",
            config.name,
            availability_zones.len(),
            networks.len()
        );

        Ok(Self {
            name: config.name.clone(),
            deployment_name: manifest.name.clone(),
            instances: config.instances,
            availability_zones,
            vm_type,
            stemcell,
            env: config.env.clone(),
            persistent_disk_type,
            networks,
            default_network,
            jobs: config.jobs.clone(),
            state: config.state,
        })
    }

    /// Builds a placeholder group from what was last applied to a record.
    ///
    /// Used for instances whose group is no longer in the manifest.
    #[must_use]
    pub fn from_record(record: &InstanceRecord) -> Self {
        let mut group = Self::new(&record.job, &record.deployment);
        group.vm_type = record.apply_spec.vm_type.clone();
        group.stemcell = record.apply_spec.stemcell.clone();
        group.env = record.env.clone().unwrap_or_default();
        group
    }

    /// Returns true if the group is placed in availability zones.
    #[must_use]
    pub fn has_availability_zones(&self) -> bool {
        !self.availability_zones.is_empty()
    }

    /// Finds one of the group's availability zones by name.
    #[must_use]
    pub fn availability_zone(&self, name: &str) -> Option<&AvailabilityZone> {
        self.availability_zones.iter().find(|az| az.name == name)
    }

    /// Returns true if an instance recorded in `az` may stay in this group.
    ///
    /// Zone-less instances are only compatible with zone-less groups.
    #[must_use]
    pub fn accepts_availability_zone(&self, az: Option<&str>) -> bool {
        match az {
            Some(name) => self.availability_zone(name).is_some(),
            None => !self.has_availability_zones(),
        }
    }

    /// Finds one of the group's networks by name.
    #[must_use]
    pub fn network(&self, name: &str) -> Option<&JobNetwork> {
        self.networks.iter().find(|n| n.name == name)
    }
}
