//! Snapshot-backed instance repository.

use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::DeploymentManifest;
use crate::error::{RepositoryError, Result};
use crate::planner::{
    AvailabilityZone, DesiredInstance, Instance, InstanceGroup, InstanceRepository,
};
use crate::state::{AgentState, InstanceRecord, InstanceState};

use super::bound::BoundInstance;

/// Binds snapshot records to the instance groups of a manifest.
#[derive(Debug, Clone)]
pub struct SnapshotRepository {
    deployment: String,
    groups: Vec<Arc<InstanceGroup>>,
    availability_zones: Vec<AvailabilityZone>,
    trusted_certs: Option<String>,
}

impl SnapshotRepository {
    /// Resolves every instance group of the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if an instance group references an undeclared item.
    pub fn from_manifest(manifest: &DeploymentManifest) -> Result<Self> {
        let groups = manifest
            .instance_groups
            .iter()
            .map(|config| InstanceGroup::resolve(manifest, config).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        let availability_zones = manifest
            .availability_zones
            .iter()
            .map(|az| AvailabilityZone {
                name: az.name.clone(),
                cloud_properties: az.cloud_properties.clone(),
            })
            .collect();

        debug!(
            "Resolved {} instance groups for deployment {}",
            groups.len(),
            manifest.name
        );

        Ok(Self {
            deployment: manifest.name.clone(),
            groups,
            availability_zones,
            trusted_certs: manifest.trusted_certs.clone(),
        })
    }

    /// Returns the deployment name.
    #[must_use]
    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    /// Resolved instance groups in manifest order.
    #[must_use]
    pub fn instance_groups(&self) -> &[Arc<InstanceGroup>] {
        &self.groups
    }

    /// Looks up a resolved instance group by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest has no such group.
    pub fn instance_group(&self, name: &str) -> Result<Arc<InstanceGroup>> {
        self.groups
            .iter()
            .find(|group| group.name == name)
            .cloned()
            .ok_or_else(|| {
                RepositoryError::UnknownInstanceGroup {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Zone an obsolete record was placed in.
    ///
    /// Zones removed from the manifest keep their name with no cloud properties.
    fn recorded_zone(&self, record: &InstanceRecord) -> Option<AvailabilityZone> {
        let name = record.availability_zone.as_deref()?;
        Some(
            self.availability_zones
                .iter()
                .find(|az| az.name == name)
                .cloned()
                .unwrap_or_else(|| AvailabilityZone {
                    name: name.to_string(),
                    cloud_properties: crate::config::CloudProperties::default(),
                }),
        )
    }
}

/// Administrative state a desired slot converges to.
fn target_state(desired: &DesiredInstance) -> InstanceState {
    desired
        .virtual_state()
        .map_or(InstanceState::Started, |state| state.instance_state())
}

impl InstanceRepository for SnapshotRepository {
    fn fetch_existing(
        &self,
        desired: &DesiredInstance,
        record: &InstanceRecord,
        state: &AgentState,
    ) -> Result<Box<dyn Instance>> {
        if record.deployment != desired.deployment {
            return Err(RepositoryError::LookupFailed {
                instance: record.to_string(),
                message: format!(
                    "record belongs to deployment '{}', not '{}'",
                    record.deployment, desired.deployment
                ),
            }
            .into());
        }

        trace!("Binding existing instance {record}");
        let instance = BoundInstance::new(Arc::clone(&desired.job), record.clone())
            .with_index(desired.index.unwrap_or(record.index))
            .with_availability_zone(desired.az.clone())
            .with_state(target_state(desired))
            .with_current_state(state.clone())
            .with_trusted_certs(self.trusted_certs.clone());

        Ok(Box::new(instance))
    }

    fn fetch_obsolete(&self, record: &InstanceRecord) -> Result<Box<dyn Instance>> {
        let job = self
            .groups
            .iter()
            .find(|group| group.name == record.job)
            .cloned()
            .unwrap_or_else(|| Arc::new(InstanceGroup::from_record(record)));

        trace!("Binding obsolete instance {record}");
        let instance = BoundInstance::new(job, record.clone())
            .with_availability_zone(self.recorded_zone(record))
            .obsolete();

        Ok(Box::new(instance))
    }

    fn create(&self, desired: &DesiredInstance, index: u32) -> Result<Box<dyn Instance>> {
        let job = &desired.job;
        if let Some(az) = desired.az_name() {
            if job.availability_zone(az).is_none() {
                return Err(RepositoryError::UnknownAvailabilityZone {
                    az: az.to_string(),
                    instance: format!("{}/{index}", job.name),
                }
                .into());
            }
        }

        let uuid = Uuid::new_v4().to_string();
        let mut record = InstanceRecord::new(&job.name, index, &uuid, &desired.deployment);
        record.availability_zone = desired.az_name().map(str::to_string);
        record.state = target_state(desired);
        debug!("Creating instance {record}");

        let instance = BoundInstance::new(Arc::clone(job), record)
            .with_availability_zone(desired.az.clone())
            .with_trusted_certs(self.trusted_certs.clone());

        Ok(Box::new(instance))
    }
}
