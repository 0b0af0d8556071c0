//! Instances bound to persisted records.

use std::sync::Arc;
use tracing::debug;

use crate::config::{CloudProperties, ConfigHasher, NetworkKind};
use crate::planner::{AvailabilityZone, Instance, InstanceGroup, Reservation, ReservationKind};
use crate::state::{AgentState, AppliedSpec, InstanceRecord, InstanceState, NetworkSettingsHash};

/// An instance backed by a snapshot record.
///
/// Drift on jobs, packages, configuration and trusted certificates is
/// detected by comparing fingerprints of the desired manifest with those
/// recorded in the applied spec. Obsolete instances never report drift on
/// those attributes.
#[derive(Debug, Clone)]
pub struct BoundInstance {
    job: Arc<InstanceGroup>,
    index: u32,
    uuid: String,
    availability_zone: Option<AvailabilityZone>,
    bootstrap: bool,
    model: Option<InstanceRecord>,
    state: InstanceState,
    current_state: AgentState,
    reservations: Vec<Reservation>,
    trusted_certs: Option<String>,
    obsolete: bool,
    hasher: ConfigHasher,
}

impl BoundInstance {
    /// Binds a record to a resolved instance group.
    #[must_use]
    pub fn new(job: Arc<InstanceGroup>, record: InstanceRecord) -> Self {
        let reservations = reservations_from(&record.apply_spec.networks);
        Self {
            job,
            index: record.index,
            uuid: record.uuid.clone(),
            availability_zone: None,
            bootstrap: record.bootstrap,
            state: record.state,
            model: Some(record),
            current_state: AgentState::default(),
            reservations,
            trusted_certs: None,
            obsolete: false,
            hasher: ConfigHasher::new(),
        }
    }

    /// Places the instance in an availability zone.
    #[must_use]
    pub fn with_availability_zone(mut self, az: Option<AvailabilityZone>) -> Self {
        self.availability_zone = az;
        self
    }

    /// Overrides the index.
    #[must_use]
    pub const fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    /// Sets the administrative state the instance should be in.
    #[must_use]
    pub const fn with_state(mut self, state: InstanceState) -> Self {
        self.state = state;
        self
    }

    /// Sets the last agent-reported state.
    #[must_use]
    pub fn with_current_state(mut self, current_state: AgentState) -> Self {
        self.current_state = current_state;
        self
    }

    /// Sets the trusted certificates the instance should carry.
    #[must_use]
    pub fn with_trusted_certs(mut self, trusted_certs: Option<String>) -> Self {
        self.trusted_certs = trusted_certs;
        self
    }

    /// Marks the instance as being torn down.
    #[must_use]
    pub const fn obsolete(mut self) -> Self {
        self.obsolete = true;
        self
    }

    /// Effective cloud properties: zone properties overlaid with the VM type's.
    #[must_use]
    pub fn cloud_properties(&self) -> CloudProperties {
        self.availability_zone
            .as_ref()
            .map(|az| az.cloud_properties.clone())
            .unwrap_or_default()
            .merged_with(&self.job.vm_type.cloud_properties)
    }

    /// Returns the spec converging this instance would apply.
    #[must_use]
    pub fn desired_applied_spec(&self, networks: NetworkSettingsHash) -> AppliedSpec {
        AppliedSpec {
            networks,
            stemcell: self.job.stemcell.clone(),
            vm_type: self.job.vm_type.clone(),
            cloud_properties: self.cloud_properties(),
            job_hash: Some(self.hasher.hash_jobs(&self.job.jobs)),
            configuration_hash: Some(self.hasher.hash_configuration(&self.job.jobs)),
            packages_hash: Some(self.hasher.hash_packages(&self.job.jobs)),
            trusted_certs_hash: Some(self.hasher.hash_trusted_certs(self.trusted_certs.as_deref())),
        }
    }

    fn applied(&self) -> Option<&AppliedSpec> {
        self.model.as_ref().map(|model| &model.apply_spec)
    }

    /// Compares a recorded fingerprint with the desired one.
    fn fingerprint_changed(&self, what: &str, applied: Option<&String>, desired: &str) -> bool {
        if self.obsolete {
            return false;
        }
        let changed = applied.map(String::as_str) != Some(desired);
        if changed {
            let old = applied.map_or_else(|| String::from("none"), |hash| self.hasher.short_hash(hash));
            debug!(
                "{what} changed FROM: {old} TO: {} on instance {}",
                self.hasher.short_hash(desired),
                self.name()
            );
        }
        changed
    }
}

impl Instance for BoundInstance {
    fn job(&self) -> &InstanceGroup {
        &self.job
    }

    fn deployment_name(&self) -> &str {
        &self.job.deployment_name
    }

    fn index(&self) -> u32 {
        self.index
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn availability_zone(&self) -> Option<&AvailabilityZone> {
        self.availability_zone.as_ref()
    }

    fn is_bootstrap(&self) -> bool {
        self.bootstrap
    }

    fn model(&self) -> Option<&InstanceRecord> {
        self.model.as_ref()
    }

    fn state(&self) -> InstanceState {
        self.state
    }

    fn current_state(&self) -> &AgentState {
        &self.current_state
    }

    fn existing_network_reservations(&self) -> &[Reservation] {
        &self.reservations
    }

    fn packages_changed(&self) -> bool {
        let desired = self.hasher.hash_packages(&self.job.jobs);
        self.fingerprint_changed(
            "packages",
            self.applied().and_then(|a| a.packages_hash.as_ref()),
            &desired,
        )
    }

    fn configuration_changed(&self) -> bool {
        let desired = self.hasher.hash_configuration(&self.job.jobs);
        self.fingerprint_changed(
            "configuration",
            self.applied().and_then(|a| a.configuration_hash.as_ref()),
            &desired,
        )
    }

    fn job_changed(&self) -> bool {
        let desired = self.hasher.hash_jobs(&self.job.jobs);
        self.fingerprint_changed(
            "job",
            self.applied().and_then(|a| a.job_hash.as_ref()),
            &desired,
        )
    }

    fn trusted_certs_changed(&self) -> bool {
        let desired = self.hasher.hash_trusted_certs(self.trusted_certs.as_deref());
        self.fingerprint_changed(
            "trusted_certs",
            self.applied().and_then(|a| a.trusted_certs_hash.as_ref()),
            &desired,
        )
    }

    fn cloud_properties_changed(&self) -> bool {
        if self.obsolete {
            return false;
        }
        let Some(applied) = self.applied() else {
            return false;
        };
        let desired = self.cloud_properties();
        let changed = applied.cloud_properties != desired;
        if changed {
            debug!(
                "cloud_properties changed FROM: {} TO: {desired} on instance {}",
                applied.cloud_properties,
                self.name()
            );
        }
        changed
    }
}

/// Rebuilds held reservations from applied network settings.
fn reservations_from(networks: &NetworkSettingsHash) -> Vec<Reservation> {
    networks
        .iter()
        .map(|(name, setting)| {
            let network_kind = NetworkKind::from_name(&setting.kind).unwrap_or_default();
            let kind = match (network_kind, setting.ip) {
                (NetworkKind::Manual | NetworkKind::Vip, Some(_)) => ReservationKind::Static,
                _ => ReservationKind::Dynamic,
            };
            Reservation {
                network: name.clone(),
                network_kind,
                ip: setting.ip,
                kind,
            }
        })
        .collect()
}
