//! Instance plans and change detection.
//!
//! An [`InstancePlan`] pairs an optional persisted record with an optional
//! desired slot and the bound [`Instance`] for that slot:
//!
//! - both present: the instance is kept (`existing`)
//! - no desired slot: the instance is torn down (`obsolete`)
//! - no record: the instance is created (`new`)
//!
//! The change set of a plan is computed on first access and then frozen
//! for the lifetime of the plan. Network plan mutators do not invalidate
//! it, so callers must read [`InstancePlan::changes`] before applying
//! network changes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::config::CloudProperties;
use crate::error::{PlanError, Result};
use crate::state::{InstanceRecord, InstanceState, NetworkSettingsHash};

use super::desired::{DesiredInstance, VirtualState};
use super::instance::{DnsManager, Instance};
use super::network::{NetworkPlan, NetworkSettings, Reservation};

/// A category of drift between applied and desired configuration.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    /// Jobs must be restarted.
    Restart,
    /// VM must be recreated.
    Recreate,
    /// Effective cloud properties changed.
    CloudProperties,
    /// VM type changed.
    VmType,
    /// Stemcell changed.
    Stemcell,
    /// Agent environment changed.
    Env,
    /// Network reservations changed.
    Network,
    /// Compiled packages changed.
    Packages,
    /// Persistent disk must be created, resized or released.
    PersistentDisk,
    /// Rendered configuration changed.
    Configuration,
    /// Colocated job templates changed.
    Job,
    /// Lifecycle state must change.
    State,
    /// DNS records are missing.
    Dns,
    /// Trusted certificates changed.
    TrustedCerts,
}

impl Change {
    /// Returns the tag name of the change.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Recreate => "recreate",
            Self::CloudProperties => "cloud_properties",
            Self::VmType => "vm_type",
            Self::Stemcell => "stemcell",
            Self::Env => "env",
            Self::Network => "network",
            Self::Packages => "packages",
            Self::PersistentDisk => "persistent_disk",
            Self::Configuration => "configuration",
            Self::Job => "job",
            Self::State => "state",
            Self::Dns => "dns",
            Self::TrustedCerts => "trusted_certs",
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unordered set of changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ChangeSet(BTreeSet<Change>);

impl ChangeSet {
    /// Returns true if no change was detected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the set holds the given change.
    #[must_use]
    pub fn contains(&self, change: Change) -> bool {
        self.0.contains(&change)
    }

    /// Iterates over the changes in tag order.
    pub fn iter(&self) -> impl Iterator<Item = Change> + '_ {
        self.0.iter().copied()
    }

    fn insert(&mut self, change: Change) {
        self.0.insert(change);
    }
}

impl FromIterator<Change> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = Change>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.iter().map(Change::as_str).collect();
        write!(f, "{}", tags.join(", "))
    }
}

/// The plan for one instance slot.
#[derive(Debug)]
pub struct InstancePlan {
    existing_instance: Option<InstanceRecord>,
    desired_instance: Option<DesiredInstance>,
    instance: Box<dyn Instance>,
    network_plans: Vec<NetworkPlan>,
    skip_drain: bool,
    recreate_deployment: bool,
    dns_manager: Arc<dyn DnsManager>,
    changes: OnceLock<ChangeSet>,
}

impl InstancePlan {
    /// Creates a plan keeping an existing instance in a desired slot.
    #[must_use]
    pub fn for_existing(
        existing: InstanceRecord,
        desired: DesiredInstance,
        instance: Box<dyn Instance>,
        dns_manager: Arc<dyn DnsManager>,
    ) -> Self {
        Self::new(Some(existing), Some(desired), instance, dns_manager)
    }

    /// Creates a plan for a new instance.
    #[must_use]
    pub fn for_new(
        desired: DesiredInstance,
        instance: Box<dyn Instance>,
        dns_manager: Arc<dyn DnsManager>,
    ) -> Self {
        Self::new(None, Some(desired), instance, dns_manager)
    }

    /// Creates a plan tearing down an instance that has no desired slot.
    #[must_use]
    pub fn for_obsolete(
        existing: InstanceRecord,
        instance: Box<dyn Instance>,
        dns_manager: Arc<dyn DnsManager>,
    ) -> Self {
        Self::new(Some(existing), None, instance, dns_manager)
    }

    fn new(
        existing_instance: Option<InstanceRecord>,
        desired_instance: Option<DesiredInstance>,
        instance: Box<dyn Instance>,
        dns_manager: Arc<dyn DnsManager>,
    ) -> Self {
        Self {
            existing_instance,
            desired_instance,
            instance,
            network_plans: Vec::new(),
            skip_drain: false,
            recreate_deployment: false,
            dns_manager,
            changes: OnceLock::new(),
        }
    }

    /// Sets the network plans.
    #[must_use]
    pub fn with_network_plans(mut self, network_plans: Vec<NetworkPlan>) -> Self {
        self.network_plans = network_plans;
        self
    }

    /// Sets whether draining is skipped when the instance is stopped.
    #[must_use]
    pub const fn with_skip_drain(mut self, skip_drain: bool) -> Self {
        self.skip_drain = skip_drain;
        self
    }

    /// Sets whether the whole deployment is being recreated.
    #[must_use]
    pub const fn with_recreate_deployment(mut self, recreate_deployment: bool) -> Self {
        self.recreate_deployment = recreate_deployment;
        self
    }

    /// Persisted record, absent for new instances.
    #[must_use]
    pub const fn existing_instance(&self) -> Option<&InstanceRecord> {
        self.existing_instance.as_ref()
    }

    /// Desired slot, absent for obsolete instances.
    #[must_use]
    pub const fn desired_instance(&self) -> Option<&DesiredInstance> {
        self.desired_instance.as_ref()
    }

    pub(crate) fn desired_instance_mut(&mut self) -> Option<&mut DesiredInstance> {
        self.desired_instance.as_mut()
    }

    /// Bound instance.
    #[must_use]
    pub fn instance(&self) -> &dyn Instance {
        self.instance.as_ref()
    }

    /// Network plans of the slot.
    #[must_use]
    pub fn network_plans(&self) -> &[NetworkPlan] {
        &self.network_plans
    }

    /// Replaces the network plans of the slot.
    pub fn set_network_plans(&mut self, network_plans: Vec<NetworkPlan>) {
        self.network_plans = network_plans;
    }

    /// Whether draining is skipped.
    #[must_use]
    pub const fn skip_drain(&self) -> bool {
        self.skip_drain
    }

    /// Whether the whole deployment is being recreated.
    #[must_use]
    pub const fn recreate_deployment(&self) -> bool {
        self.recreate_deployment
    }

    /// Returns true if the instance has no desired slot.
    #[must_use]
    pub const fn is_obsolete(&self) -> bool {
        self.desired_instance.is_none()
    }

    /// Returns true if the instance has no persisted record.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.existing_instance.is_none()
    }

    /// Returns true if an existing instance keeps a desired slot.
    #[must_use]
    pub const fn is_existing(&self) -> bool {
        !self.is_new() && !self.is_obsolete()
    }

    /// Returns true if the slot hosts the bootstrap instance.
    #[must_use]
    pub fn is_bootstrap(&self) -> bool {
        self.desired_instance
            .as_ref()
            .is_some_and(DesiredInstance::is_bootstrap)
    }

    /// Returns the availability zone of the desired slot.
    #[must_use]
    pub fn desired_az_name(&self) -> Option<&str> {
        self.desired_instance.as_ref().and_then(DesiredInstance::az_name)
    }

    /// Returns true if any change was detected.
    ///
    /// # Errors
    ///
    /// Returns an error if the change set cannot be computed.
    pub fn changed(&self) -> Result<bool> {
        Ok(!self.changes()?.is_empty())
    }

    /// Returns every change between the applied and the desired instance.
    ///
    /// Computed once, then frozen.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::ModelNotBound`] if the disk of an instance with
    /// no bound record has to be inspected.
    pub fn changes(&self) -> Result<&ChangeSet> {
        if let Some(changes) = self.changes.get() {
            return Ok(changes);
        }
        let computed = self.compute_changes()?;
        Ok(self.changes.get_or_init(|| computed))
    }

    fn compute_changes(&self) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        let instance = self.instance.as_ref();

        if self.needs_restart() {
            changes.insert(Change::Restart);
        }
        if self.needs_recreate() {
            changes.insert(Change::Recreate);
        }
        if instance.cloud_properties_changed() {
            changes.insert(Change::CloudProperties);
        }
        if self.vm_type_changed() {
            changes.insert(Change::VmType);
        }
        if self.stemcell_changed() {
            changes.insert(Change::Stemcell);
        }
        if self.env_changed() {
            changes.insert(Change::Env);
        }
        if self.networks_changed() {
            changes.insert(Change::Network);
        }
        if instance.packages_changed() {
            changes.insert(Change::Packages);
        }
        if self.persistent_disk_changed()? {
            changes.insert(Change::PersistentDisk);
        }
        if instance.configuration_changed() {
            changes.insert(Change::Configuration);
        }
        if instance.job_changed() {
            changes.insert(Change::Job);
        }
        if self.state_changed() {
            changes.insert(Change::State);
        }
        if self.dns_changed() {
            changes.insert(Change::Dns);
        }
        if instance.trusted_certs_changed() {
            changes.insert(Change::TrustedCerts);
        }

        debug!("Changes for {}: [{changes}]", instance.name());
        Ok(changes)
    }

    /// Returns true if the VM has to be stopped before converging.
    #[must_use]
    pub fn needs_shutting_down(&self) -> bool {
        self.is_obsolete()
            || self.vm_type_changed()
            || self.stemcell_changed()
            || self.env_changed()
            || self.needs_recreate()
    }

    fn desired_state(&self) -> Option<VirtualState> {
        self.desired_instance
            .as_ref()
            .and_then(DesiredInstance::virtual_state)
    }

    fn needs_restart(&self) -> bool {
        self.desired_state() == Some(VirtualState::Restart)
    }

    fn needs_recreate(&self) -> bool {
        if self.recreate_deployment {
            debug!("needs_recreate: deployment is configured with \"recreate\" state");
            return true;
        }
        self.desired_state() == Some(VirtualState::Recreate)
    }

    fn vm_type_changed(&self) -> bool {
        let Some(existing) = &self.existing_instance else {
            return false;
        };
        let vm_type = &self.instance.job().vm_type;
        let changed = *vm_type != existing.apply_spec.vm_type;
        if changed {
            self.log_change("vm_type", &existing.apply_spec.vm_type, vm_type);
        }
        changed
    }

    fn stemcell_changed(&self) -> bool {
        let Some(existing) = &self.existing_instance else {
            return false;
        };
        let applied = &existing.apply_spec.stemcell;
        let stemcell = &self.instance.job().stemcell;

        if stemcell.name != applied.name {
            self.log_change("stemcell", &applied.name, &stemcell.name);
            return true;
        }
        if stemcell.version != applied.version {
            self.log_change(
                "stemcell",
                format!("version: {}", applied.version),
                format!("version: {}", stemcell.version),
            );
            return true;
        }
        false
    }

    fn env_changed(&self) -> bool {
        let Some(applied) = self.existing_instance.as_ref().and_then(|e| e.env.as_ref()) else {
            return false;
        };
        let env = &self.instance.job().env;
        let changed = env != applied;
        if changed {
            self.log_change("env", applied, env);
        }
        changed
    }

    fn networks_changed(&self) -> bool {
        let changed = self
            .network_plans
            .iter()
            .any(|plan| plan.is_desired() || plan.is_obsolete());
        if changed {
            let previous = self
                .existing_instance
                .as_ref()
                .map(|e| e.apply_spec.networks.clone())
                .unwrap_or_default();
            self.log_change(
                "networks",
                format_networks(&previous),
                format_networks(&self.network_settings().to_hash()),
            );
        }
        changed
    }

    fn persistent_disk_changed(&self) -> Result<bool> {
        if self.is_obsolete() {
            return Ok(self
                .existing_instance
                .as_ref()
                .is_some_and(|e| e.persistent_disk.is_some()));
        }

        let (new_size, new_cloud_properties) = self
            .instance
            .job()
            .persistent_disk_type
            .as_ref()
            .map_or((0, CloudProperties::default()), |disk| {
                (disk.disk_size, disk.cloud_properties.clone())
            });
        let (size, cloud_properties) = self.current_disk()?;

        if new_size != size {
            self.log_change(
                "persistent_disk",
                format!("disk size: {size}"),
                format!("disk size: {new_size}"),
            );
            return Ok(true);
        }

        let changed = new_size != 0 && new_cloud_properties != cloud_properties;
        if changed {
            self.log_change("persistent_disk", &cloud_properties, &new_cloud_properties);
        }
        Ok(changed)
    }

    fn current_disk(&self) -> Result<(u64, CloudProperties)> {
        let model = self
            .instance
            .model()
            .ok_or_else(|| PlanError::model_not_bound(self.instance.name()))?;
        Ok(model.persistent_disk.as_ref().map_or_else(
            || (0, CloudProperties::default()),
            |disk| (disk.size, disk.cloud_properties.clone()),
        ))
    }

    fn state_changed(&self) -> bool {
        if self.is_obsolete() {
            return false;
        }

        if self.desired_state() == Some(VirtualState::Detached) {
            let applied = self.existing_instance.as_ref().map(|e| e.state);
            if applied != Some(InstanceState::Detached) {
                debug!("Instance '{}' needs to be detached", self.instance.name());
                return true;
            }
        }

        let state = self.instance.state();
        let job_state = self.instance.current_job_state();
        let running = job_state == Some("running");
        let drifted = match state {
            InstanceState::Stopped => running,
            InstanceState::Started => !running,
            InstanceState::Detached => false,
        };
        if drifted {
            debug!(
                "Instance state is '{state}' and agent reports '{}'",
                job_state.unwrap_or("")
            );
        }
        drifted
    }

    fn dns_changed(&self) -> bool {
        if !self.dns_manager.dns_enabled() {
            return false;
        }

        self.network_settings()
            .dns_record_info()
            .iter()
            .any(|(name, ip)| {
                let missing = self.dns_manager.find_dns_record(name, ip).is_none();
                if missing {
                    debug!(
                        "dns_changed: the requested dns record with name '{name}' and ip '{ip}' was not found"
                    );
                }
                missing
            })
    }

    fn log_change(&self, what: &str, old: impl fmt::Display, new: impl fmt::Display) {
        debug!(
            "{what} changed FROM: {old} TO: {new} on instance {}",
            self.instance.name()
        );
    }

    /// Marks every desired network plan as applied.
    pub fn mark_desired_network_plans_as_existing(&mut self) {
        self.network_plans
            .iter_mut()
            .filter(|plan| plan.is_desired())
            .for_each(NetworkPlan::mark_existing);
    }

    /// Drops every obsolete network plan.
    pub fn release_obsolete_network_plans(&mut self) {
        self.network_plans.retain(|plan| !plan.is_obsolete());
    }

    /// Drops every network plan.
    pub fn release_all_network_plans(&mut self) {
        self.network_plans.clear();
    }

    /// Finds the network plan for a network.
    #[must_use]
    pub fn network_plan_for_network(&self, network: &str) -> Option<&NetworkPlan> {
        self.network_plans
            .iter()
            .find(|plan| plan.reservation.network == network)
    }

    /// Finds the reservation the instance already holds on a network.
    #[must_use]
    pub fn find_existing_reservation_for_network(&self, network: &str) -> Option<&Reservation> {
        self.instance
            .existing_network_reservations()
            .iter()
            .find(|reservation| reservation.network == network)
    }

    /// Computes the network settings from the surviving reservations.
    #[must_use]
    pub fn network_settings(&self) -> NetworkSettings {
        let instance = self.instance.as_ref();
        let job = instance.job();
        let reservations = self
            .network_plans
            .iter()
            .filter(|plan| !plan.is_obsolete())
            .map(|plan| plan.reservation.clone())
            .collect();

        NetworkSettings::new(
            &job.name,
            instance.deployment_name(),
            job.default_network.clone(),
            reservations,
            instance.current_state().clone(),
            instance.availability_zone().cloned(),
            instance.index(),
            instance.uuid(),
            self.dns_manager.dns_domain_name(),
        )
    }

    /// Returns the network settings to apply.
    ///
    /// Obsolete plans, and plans with no surviving reservation, report the
    /// settings last applied to the instance.
    #[must_use]
    pub fn network_settings_hash(&self) -> NetworkSettingsHash {
        let settings = if self.is_obsolete() {
            NetworkSettingsHash::new()
        } else {
            self.network_settings().to_hash()
        };

        if settings.is_empty() {
            self.existing_instance
                .as_ref()
                .map(|e| e.apply_spec.networks.clone())
                .unwrap_or_default()
        } else {
            settings
        }
    }

    /// Returns the address of the instance on each network.
    #[must_use]
    pub fn network_addresses(&self) -> BTreeMap<String, String> {
        self.network_settings().network_addresses()
    }
}

fn format_networks(networks: &NetworkSettingsHash) -> String {
    serde_json::to_string(networks).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiskType, Env, NetworkKind, VmType};
    use crate::planner::testing::{self, FakeDnsManager, FakeInstance};
    use crate::planner::{InstanceGroup, NetworkPlan, Reservation};
    use crate::state::{DnsRecord, PersistentDisk};
    use serde_json::json;

    fn disk(size: u64, cloud_properties: serde_json::Value) -> PersistentDisk {
        PersistentDisk {
            disk_cid: String::from("disk-cid"),
            size,
            cloud_properties: testing::cloud_properties(cloud_properties),
        }
    }

    fn disk_type(size: u64, cloud_properties: serde_json::Value) -> DiskType {
        DiskType {
            name: String::from("disk"),
            disk_size: size,
            cloud_properties: testing::cloud_properties(cloud_properties),
        }
    }

    /// Plan for an instance whose record matches the group exactly.
    fn existing_plan(job: &InstanceGroup, record: InstanceRecord) -> InstancePlan {
        let desired = testing::desired(job, Some(VirtualState::Started));
        let instance = FakeInstance::new(job, record.index).with_model(record.clone());
        InstancePlan::for_existing(record, desired, instance.boxed(), testing::no_dns())
    }

    #[test]
    fn test_unchanged_instance_has_no_changes() {
        let job = testing::group("foo-job");
        let record = testing::record(&job, 0);
        let plan = existing_plan(&job, record).with_network_plans(vec![NetworkPlan::existing(
            Reservation::dynamic("private", NetworkKind::Manual),
        )]);

        assert!(plan.changes().unwrap().is_empty());
        assert!(!plan.changed().unwrap());
        assert!(!plan.needs_shutting_down());
        assert!(plan.is_existing());
    }

    #[test]
    fn test_classification() {
        let job = testing::group("foo-job");
        let new_plan = InstancePlan::for_new(
            testing::desired(&job, None),
            FakeInstance::new(&job, 0).boxed(),
            testing::no_dns(),
        );
        assert!(new_plan.is_new());
        assert!(!new_plan.is_obsolete());
        assert!(!new_plan.is_existing());

        let record = testing::record(&job, 1);
        let obsolete = InstancePlan::for_obsolete(
            record,
            FakeInstance::new(&job, 1).boxed(),
            testing::no_dns(),
        );
        assert!(obsolete.is_obsolete());
        assert!(!obsolete.is_new());
        assert!(obsolete.needs_shutting_down());
        assert_eq!(obsolete.desired_az_name(), None);
    }

    #[test]
    fn test_restart_and_recreate_markers() {
        let job = testing::group("foo-job");
        let record = testing::record(&job, 0);
        let instance = || FakeInstance::new(&job, 0).with_model(record.clone()).boxed();

        let restart = InstancePlan::for_existing(
            record.clone(),
            testing::desired(&job, Some(VirtualState::Restart)),
            instance(),
            testing::no_dns(),
        );
        let changes = restart.changes().unwrap();
        assert!(changes.contains(Change::Restart));
        assert!(!changes.contains(Change::Recreate));
        assert!(!restart.needs_shutting_down());

        let recreate = InstancePlan::for_existing(
            record.clone(),
            testing::desired(&job, Some(VirtualState::Recreate)),
            instance(),
            testing::no_dns(),
        );
        assert!(recreate.changes().unwrap().contains(Change::Recreate));
        assert!(recreate.needs_shutting_down());

        let deployment_recreate = existing_plan(&job, record).with_recreate_deployment(true);
        assert!(deployment_recreate.recreate_deployment());
        assert_eq!(
            deployment_recreate.changes().unwrap().iter().collect::<Vec<_>>(),
            vec![Change::Recreate]
        );
    }

    #[test]
    fn test_vm_type_and_stemcell_changes() {
        let mut job = testing::group("foo-job");
        let record = testing::record(&job, 0);
        job.vm_type = VmType {
            name: String::from("large"),
            cloud_properties: testing::cloud_properties(json!({"instance_type": "m1.large"})),
        };
        job.stemcell.version = String::from("2");

        let plan = existing_plan(&job, record);
        let changes = plan.changes().unwrap();
        assert!(changes.contains(Change::VmType));
        assert!(changes.contains(Change::Stemcell));
        assert!(plan.needs_shutting_down());
    }

    #[test]
    fn test_vm_type_not_checked_for_new_instances() {
        let job = testing::group("foo-job");
        let plan = InstancePlan::for_new(
            testing::desired(&job, Some(VirtualState::Started)),
            FakeInstance::new(&job, 0).boxed(),
            testing::no_dns(),
        );
        let changes = plan.changes().unwrap();
        assert!(!changes.contains(Change::VmType));
        assert!(!changes.contains(Change::Stemcell));
        assert!(!changes.contains(Change::Env));
    }

    #[test]
    fn test_env_change_requires_recorded_env() {
        let mut job = testing::group("foo-job");
        job.env = Env([(String::from("bosh"), json!({"password": "new"}))].into());

        let record = testing::record(&job, 0);
        assert!(record.env.is_none());
        assert!(!existing_plan(&job, record.clone()).changes().unwrap().contains(Change::Env));

        let mut with_env = record;
        with_env.env = Some(Env([(String::from("bosh"), json!({"password": "old"}))].into()));
        let plan = existing_plan(&job, with_env);
        assert!(plan.changes().unwrap().contains(Change::Env));
        assert!(plan.needs_shutting_down());
    }

    #[test]
    fn test_network_change_on_desired_or_obsolete_plans() {
        let job = testing::group("foo-job");
        let record = testing::record(&job, 0);
        let reservation = Reservation::dynamic("private", NetworkKind::Manual);

        let desired = existing_plan(&job, record.clone())
            .with_network_plans(vec![NetworkPlan::desired(reservation.clone())]);
        assert!(desired.changes().unwrap().contains(Change::Network));

        let obsolete = existing_plan(&job, record)
            .with_network_plans(vec![NetworkPlan::obsolete(reservation)]);
        assert!(obsolete.changes().unwrap().contains(Change::Network));
    }

    #[test]
    fn test_persistent_disk_grows_from_zero() {
        let mut job = testing::group("foo-job");
        let record = testing::record(&job, 0);
        job.persistent_disk_type = Some(disk_type(2048, json!({})));

        let plan = existing_plan(&job, record);
        assert!(plan.changes().unwrap().contains(Change::PersistentDisk));
    }

    #[test]
    fn test_persistent_disk_cloud_properties() {
        let mut job = testing::group("foo-job");
        job.persistent_disk_type = Some(disk_type(2048, json!({"type": "gp3"})));

        let mut record = testing::record(&job, 0);
        record.persistent_disk = Some(disk(2048, json!({"type": "gp3"})));
        assert!(!existing_plan(&job, record.clone())
            .changes()
            .unwrap()
            .contains(Change::PersistentDisk));

        record.persistent_disk = Some(disk(2048, json!({"type": "io1"})));
        assert!(existing_plan(&job, record)
            .changes()
            .unwrap()
            .contains(Change::PersistentDisk));
    }

    #[test]
    fn test_obsolete_persistent_disk_released_only_if_present() {
        let job = testing::group("foo-job");
        let mut record = testing::record(&job, 0);
        record.persistent_disk = Some(disk(2048, json!({})));

        let with_disk = InstancePlan::for_obsolete(
            record.clone(),
            FakeInstance::new(&job, 0).boxed(),
            testing::no_dns(),
        );
        assert!(with_disk.changes().unwrap().contains(Change::PersistentDisk));

        record.persistent_disk = None;
        let without_disk = InstancePlan::for_obsolete(
            record,
            FakeInstance::new(&job, 0).boxed(),
            testing::no_dns(),
        );
        assert!(!without_disk.changes().unwrap().contains(Change::PersistentDisk));
    }

    #[test]
    fn test_unbound_model_is_a_precondition_violation() {
        let job = testing::group("foo-job");
        let plan = InstancePlan::for_new(
            testing::desired(&job, None),
            FakeInstance::new(&job, 3).unbound().boxed(),
            testing::no_dns(),
        );

        let err = plan.changes().unwrap_err();
        assert!(err.is_precondition_violation());
        assert!(err.to_string().contains("foo-job/3 (foo-job-uuid-3)"));
    }

    #[test]
    fn test_state_drift() {
        let job = testing::group("foo-job");
        let record = testing::record(&job, 0);

        let detach = InstancePlan::for_existing(
            record.clone(),
            testing::desired(&job, Some(VirtualState::Detached)),
            FakeInstance::new(&job, 0)
                .with_model(record.clone())
                .with_state(InstanceState::Detached)
                .boxed(),
            testing::no_dns(),
        );
        assert!(detach.changes().unwrap().contains(Change::State));

        let stopped_but_running = InstancePlan::for_existing(
            record.clone(),
            testing::desired(&job, Some(VirtualState::Stopped)),
            FakeInstance::new(&job, 0)
                .with_model(record.clone())
                .with_state(InstanceState::Stopped)
                .boxed(),
            testing::no_dns(),
        );
        assert!(stopped_but_running.changes().unwrap().contains(Change::State));

        let failing = InstancePlan::for_existing(
            record.clone(),
            testing::desired(&job, Some(VirtualState::Started)),
            FakeInstance::new(&job, 0)
                .with_model(record)
                .with_job_state("failing")
                .boxed(),
            testing::no_dns(),
        );
        assert!(failing.changes().unwrap().contains(Change::State));
    }

    #[test]
    fn test_obsolete_instance_has_no_state_drift() {
        let job = testing::group("foo-job");
        let record = testing::record(&job, 0);

        for instance in [
            FakeInstance::new(&job, 0),
            FakeInstance::new(&job, 0).with_job_state("failing"),
            FakeInstance::new(&job, 0).with_state(InstanceState::Stopped).with_job_state("running"),
        ] {
            let plan = InstancePlan::for_obsolete(record.clone(), instance.boxed(), testing::no_dns());
            assert!(!plan.changes().unwrap().contains(Change::State));
        }
    }

    #[test]
    fn test_dns_records_checked_only_when_enabled() {
        let job = testing::group("foo-job");
        let record = testing::record(&job, 0);
        let reservation =
            Reservation::static_ip("private", NetworkKind::Manual, "10.0.0.5".parse().unwrap());
        let plan_with = |dns: FakeDnsManager| {
            InstancePlan::for_existing(
                record.clone(),
                testing::desired(&job, Some(VirtualState::Started)),
                FakeInstance::new(&job, 0).with_model(record.clone()).boxed(),
                Arc::new(dns),
            )
            .with_network_plans(vec![NetworkPlan::existing(reservation.clone())])
        };

        assert!(!plan_with(FakeDnsManager::disabled()).changes().unwrap().contains(Change::Dns));
        assert!(plan_with(FakeDnsManager::enabled(Vec::new()))
            .changes()
            .unwrap()
            .contains(Change::Dns));

        let published = vec![
            DnsRecord {
                name: String::from("0.foo-job.private.simple.bosh"),
                ip: String::from("10.0.0.5"),
            },
            DnsRecord {
                name: String::from("foo-job-uuid-0.foo-job.private.simple.bosh"),
                ip: String::from("10.0.0.5"),
            },
        ];
        assert!(!plan_with(FakeDnsManager::enabled(published))
            .changes()
            .unwrap()
            .contains(Change::Dns));
    }

    #[test]
    fn test_delegated_predicates() {
        let job = testing::group("foo-job");
        let record = testing::record(&job, 0);
        let instance = FakeInstance::new(&job, 0)
            .with_model(record.clone())
            .with_drift(Change::Packages)
            .with_drift(Change::Configuration)
            .with_drift(Change::Job)
            .with_drift(Change::TrustedCerts)
            .with_drift(Change::CloudProperties);
        let plan = InstancePlan::for_existing(
            record,
            testing::desired(&job, Some(VirtualState::Started)),
            instance.boxed(),
            testing::no_dns(),
        );

        let expected: ChangeSet = [
            Change::Packages,
            Change::Configuration,
            Change::Job,
            Change::TrustedCerts,
            Change::CloudProperties,
        ]
        .into_iter()
        .collect();
        assert_eq!(plan.changes().unwrap(), &expected);
        assert_eq!(
            expected.to_string(),
            "cloud_properties, packages, configuration, job, trusted_certs"
        );
    }

    #[test]
    fn test_changes_are_frozen_after_first_read() {
        let job = testing::group("foo-job");
        let record = testing::record(&job, 0);
        let mut plan = existing_plan(&job, record).with_network_plans(vec![NetworkPlan::desired(
            Reservation::dynamic("private", NetworkKind::Manual),
        )]);

        assert!(plan.changes().unwrap().contains(Change::Network));
        plan.mark_desired_network_plans_as_existing();
        assert!(plan.network_plans()[0].is_existing());
        assert!(plan.changes().unwrap().contains(Change::Network));
    }

    #[test]
    fn test_network_plan_helpers() {
        let job = testing::group("foo-job");
        let record = testing::record(&job, 0);
        let held = Reservation::dynamic("private", NetworkKind::Manual);
        let instance = FakeInstance::new(&job, 0)
            .with_model(record.clone())
            .with_reservations(vec![held.clone()]);
        let mut plan = InstancePlan::for_existing(
            record,
            testing::desired(&job, Some(VirtualState::Started)).with_az(testing::az("foo-az")),
            instance.boxed(),
            testing::no_dns(),
        )
        .with_network_plans(vec![
            NetworkPlan::existing(held.clone()),
            NetworkPlan::obsolete(Reservation::dynamic("old", NetworkKind::Dynamic)),
        ]);

        assert_eq!(plan.desired_az_name(), Some("foo-az"));
        assert_eq!(plan.find_existing_reservation_for_network("private"), Some(&held));
        assert!(plan.find_existing_reservation_for_network("old").is_none());
        assert!(plan.network_plan_for_network("old").is_some());

        plan.release_obsolete_network_plans();
        assert!(plan.network_plan_for_network("old").is_none());
        assert_eq!(plan.network_plans().len(), 1);

        plan.release_all_network_plans();
        assert!(plan.network_plans().is_empty());
    }

    #[test]
    fn test_network_settings_hash_falls_back_to_applied_networks() {
        let job = testing::group("foo-job");
        let mut record = testing::record(&job, 0);
        let settings_plan = existing_plan(&job, record.clone()).with_network_plans(vec![
            NetworkPlan::existing(Reservation::static_ip(
                "private",
                NetworkKind::Manual,
                "10.0.0.5".parse().unwrap(),
            )),
        ]);
        let applied = settings_plan.network_settings_hash();
        assert_eq!(applied["private"].ip, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(
            settings_plan.network_addresses()["private"],
            String::from("10.0.0.5")
        );

        record.apply_spec.networks = applied.clone();
        let obsolete = InstancePlan::for_obsolete(
            record.clone(),
            FakeInstance::new(&job, 0).boxed(),
            testing::no_dns(),
        );
        assert_eq!(obsolete.network_settings_hash(), applied);

        let empty = existing_plan(&job, record);
        assert_eq!(empty.network_settings_hash(), applied);
    }

    #[test]
    fn test_bootstrap_and_skip_drain() {
        let job = testing::group("foo-job");
        let mut desired = testing::desired(&job, None);
        desired.mark_as_bootstrap();
        let plan = InstancePlan::for_new(desired, FakeInstance::new(&job, 0).boxed(), testing::no_dns())
            .with_skip_drain(true);
        assert!(plan.is_bootstrap());
        assert!(plan.skip_drain());
    }
}
