//! Whole-deployment reconciliation.
//!
//! This module runs the instance planner over every instance group of a
//! manifest against a deployment snapshot, attaches network plans and
//! summarizes what converging the deployment would do.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ConfigHasher, DeploymentManifest};
use crate::error::{Result, StateError};
use crate::inventory::{DnsRecordStore, SnapshotRepository};
use crate::planner::{
    ChangeSet, DesiredInstance, DnsManager, InstanceGroup, InstancePlan, InstancePlanner,
    InstanceWithAz, NetworkPlanner, StaticIpClaims,
};
use crate::state::DeploymentSnapshot;

/// Plans the convergence of a deployment.
#[derive(Debug)]
pub struct Reconciler<'a> {
    /// Desired deployment.
    manifest: &'a DeploymentManifest,
    /// Manifest hasher.
    hasher: ConfigHasher,
    /// Network planner.
    network_planner: NetworkPlanner,
    /// Skip draining on every instance.
    skip_drain: bool,
}

/// Plans of one instance group.
#[derive(Debug)]
pub struct GroupPlan {
    /// Instance group name.
    pub name: String,
    /// Surviving plans in slot order, then obsolete plans.
    pub plans: Vec<InstancePlan>,
}

/// Result of a reconciliation pass.
#[derive(Debug)]
pub struct ReconciliationPlan {
    /// Deployment name.
    pub deployment: String,
    /// Fingerprint of the manifest the plan was computed from.
    pub manifest_hash: String,
    /// When the plan was computed.
    pub created_at: DateTime<Utc>,
    groups: Vec<GroupPlan>,
    obsolete_groups: Vec<InstancePlan>,
}

/// What converging an instance involves.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    /// Create a new instance.
    Create,
    /// Update an existing instance.
    Update,
    /// Nothing to do.
    Keep,
    /// Delete an obsolete instance.
    Delete,
}

/// Number of plans by kind.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct PlanCounts {
    /// New instances.
    pub new: usize,
    /// Matched instances.
    pub existing: usize,
    /// Instances to delete.
    pub obsolete: usize,
    /// Matched instances with at least one change.
    pub changed: usize,
}

/// Serializable view of one instance plan.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    /// `job/index` name.
    pub name: String,
    /// Instance uuid.
    pub uuid: String,
    /// Availability zone.
    pub az: Option<String>,
    /// Action converging the instance.
    pub action: PlanAction,
    /// Whether the instance is its group's bootstrap instance.
    pub bootstrap: bool,
    /// Detected changes.
    pub changes: ChangeSet,
    /// Address on each network.
    pub addresses: BTreeMap<String, String>,
}

/// Serializable view of a reconciliation plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    /// Deployment name.
    pub deployment: String,
    /// Manifest fingerprint.
    pub manifest_hash: String,
    /// When the plan was computed.
    pub created_at: DateTime<Utc>,
    /// Plan counts.
    pub counts: PlanCounts,
    /// Every planned instance.
    pub instances: Vec<InstanceSummary>,
}

/// Report of drift detection.
#[derive(Debug, Serialize)]
pub struct DriftReport {
    /// Deployment name.
    pub deployment: String,
    /// Whether drift was detected.
    pub has_drift: bool,
    /// Instances that have drifted, are missing or are obsolete.
    pub drifted: Vec<InstanceSummary>,
    /// Number of instances the manifest asks for.
    pub total_instances: u32,
    /// Number of instances recorded in the snapshot.
    pub observed_count: usize,
}

impl<'a> Reconciler<'a> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(manifest: &'a DeploymentManifest) -> Self {
        Self {
            manifest,
            hasher: ConfigHasher::new(),
            network_planner: NetworkPlanner::new(),
            skip_drain: false,
        }
    }

    /// Skips draining on every planned instance.
    #[must_use]
    pub const fn with_skip_drain(mut self, skip_drain: bool) -> Self {
        self.skip_drain = skip_drain;
        self
    }

    /// Plans every instance of the deployment.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot belongs to another deployment, if an
    /// instance group cannot be resolved, or if planning fails.
    pub fn reconcile(&self, snapshot: &DeploymentSnapshot) -> Result<ReconciliationPlan> {
        info!("Starting reconciliation for {}", self.manifest.name);

        if snapshot.deployment != self.manifest.name {
            return Err(StateError::DeploymentMismatch {
                expected: self.manifest.name.clone(),
                found: snapshot.deployment.clone(),
            }
            .into());
        }

        let repository = SnapshotRepository::from_manifest(self.manifest)?;
        let dns_manager: Arc<dyn DnsManager> =
            Arc::new(DnsRecordStore::from_snapshot(&self.manifest.dns, snapshot));
        let planner = InstancePlanner::new(&repository, dns_manager)
            .with_recreate_deployment(self.manifest.recreate)
            .with_skip_drain(self.skip_drain);
        let states = snapshot.states_by_uuid();

        let mut groups = Vec::with_capacity(repository.instance_groups().len());
        for job in repository.instance_groups() {
            let existing: Vec<InstanceWithAz> = snapshot
                .instances_for_job(&job.name)
                .into_iter()
                .cloned()
                .map(InstanceWithAz::from)
                .collect();

            let mut plans =
                planner.plan_job_instances(job, desired_instances(job), &existing, &states)?;
            self.attach_network_plans(&mut plans);
            groups.push(GroupPlan {
                name: job.name.clone(),
                plans,
            });
        }

        let mut obsolete_groups =
            planner.plan_obsolete_jobs(repository.instance_groups(), &snapshot.instances)?;
        self.attach_network_plans(&mut obsolete_groups);

        let plan = ReconciliationPlan {
            deployment: self.manifest.name.clone(),
            manifest_hash: self.hasher.hash_manifest(self.manifest),
            created_at: Utc::now(),
            groups,
            obsolete_groups,
        };

        let counts = plan.counts()?;
        info!(
            "Plan: {} new, {} existing ({} changed), {} obsolete",
            counts.new, counts.existing, counts.changed, counts.obsolete
        );

        Ok(plan)
    }

    /// Reports every instance that converging would create, update or delete.
    ///
    /// # Errors
    ///
    /// Returns an error if reconciliation fails.
    pub fn check_drift(&self, snapshot: &DeploymentSnapshot) -> Result<DriftReport> {
        info!("Checking for drift in {}", self.manifest.name);

        let plan = self.reconcile(snapshot)?;
        let drifted: Vec<InstanceSummary> = plan
            .summaries()?
            .into_iter()
            .filter(|summary| summary.action != PlanAction::Keep)
            .collect();

        Ok(DriftReport {
            deployment: plan.deployment,
            has_drift: !drifted.is_empty(),
            drifted,
            total_instances: self.manifest.total_instances(),
            observed_count: snapshot.instances.len(),
        })
    }

    /// Attaches network plans; must run before any change set is read.
    ///
    /// `plans` belong to one group, or are all obsolete.
    fn attach_network_plans(&self, plans: &mut [InstancePlan]) {
        let mut claims = StaticIpClaims::new();
        for plan in plans.iter().filter(|plan| !plan.is_obsolete()) {
            let instance = plan.instance();
            claims.hold(instance.job(), instance.existing_network_reservations());
        }

        for plan in plans.iter_mut() {
            let instance = plan.instance();
            let held = instance.existing_network_reservations();
            let network_plans = if plan.is_obsolete() {
                self.network_planner.plan_obsolete(held)
            } else {
                self.network_planner.plan(instance.job(), held, &mut claims)
            };
            debug!(
                "Attaching {} network plans to {}",
                network_plans.len(),
                instance.name()
            );
            plan.set_network_plans(network_plans);
        }
    }
}

/// Builds the desired slots of a group, spread over its zones round-robin.
fn desired_instances(job: &Arc<InstanceGroup>) -> Vec<DesiredInstance> {
    (0..job.instances as usize)
        .map(|slot| {
            let desired = DesiredInstance::new(Arc::clone(job), job.state, &job.deployment_name);
            match job.availability_zones.iter().cycle().nth(slot) {
                Some(az) => desired.with_az(az.clone()),
                None => desired,
            }
        })
        .collect()
}

impl ReconciliationPlan {
    /// Per-group plans in manifest order.
    #[must_use]
    pub fn groups(&self) -> &[GroupPlan] {
        &self.groups
    }

    /// Plans of instances whose group left the manifest.
    #[must_use]
    pub fn obsolete_groups(&self) -> &[InstancePlan] {
        &self.obsolete_groups
    }

    /// Every plan: groups in manifest order, then removed groups.
    pub fn plans(&self) -> impl Iterator<Item = &InstancePlan> {
        self.groups
            .iter()
            .flat_map(|group| group.plans.iter())
            .chain(self.obsolete_groups.iter())
    }

    /// Counts plans by kind.
    ///
    /// # Errors
    ///
    /// Returns an error if a change set cannot be computed.
    pub fn counts(&self) -> Result<PlanCounts> {
        let mut counts = PlanCounts::default();
        for plan in self.plans() {
            if plan.is_obsolete() {
                counts.obsolete += 1;
            } else if plan.is_new() {
                counts.new += 1;
            } else {
                counts.existing += 1;
                if plan.changed()? {
                    counts.changed += 1;
                }
            }
        }
        Ok(counts)
    }

    /// Returns true if converging the deployment involves any action.
    ///
    /// # Errors
    ///
    /// Returns an error if a change set cannot be computed.
    pub fn has_changes(&self) -> Result<bool> {
        let counts = self.counts()?;
        Ok(counts.new + counts.obsolete + counts.changed > 0)
    }

    /// Summarizes every plan.
    ///
    /// # Errors
    ///
    /// Returns an error if a change set cannot be computed.
    pub fn summaries(&self) -> Result<Vec<InstanceSummary>> {
        self.plans().map(InstanceSummary::from_plan).collect()
    }

    /// Builds the serializable report of the plan.
    ///
    /// # Errors
    ///
    /// Returns an error if a change set cannot be computed.
    pub fn report(&self) -> Result<PlanReport> {
        Ok(PlanReport {
            deployment: self.deployment.clone(),
            manifest_hash: self.manifest_hash.clone(),
            created_at: self.created_at,
            counts: self.counts()?,
            instances: self.summaries()?,
        })
    }
}

impl InstanceSummary {
    fn from_plan(plan: &InstancePlan) -> Result<Self> {
        let instance = plan.instance();
        let changes = plan.changes()?.clone();
        let action = if plan.is_obsolete() {
            PlanAction::Delete
        } else if plan.is_new() {
            PlanAction::Create
        } else if changes.is_empty() {
            PlanAction::Keep
        } else {
            PlanAction::Update
        };

        Ok(Self {
            name: format!("{}/{}", instance.job().name, instance.index()),
            uuid: instance.uuid().to_string(),
            az: instance.availability_zone().map(|az| az.name.clone()),
            action,
            bootstrap: !plan.is_obsolete() && plan.is_bootstrap(),
            changes,
            addresses: plan.network_addresses(),
        })
    }
}

impl DriftReport {
    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift
    }
}

impl std::fmt::Display for PlanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let action = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Keep => "keep",
            Self::Delete => "delete",
        };
        write!(f, "{action}")
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift {
            writeln!(f, "Drift detected:")?;
            for instance in &self.drifted {
                if instance.changes.is_empty() {
                    writeln!(f, "  - {} ({})", instance.name, instance.action)?;
                } else {
                    writeln!(
                        f,
                        "  - {} ({}): {}",
                        instance.name, instance.action, instance.changes
                    )?;
                }
            }
        } else {
            write!(f, "No drift detected - deployment is converged")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for PlanCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.new,
            self.changed,
            self.obsolete,
            self.existing - self.changed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::planner::{Change, Instance};
    use crate::state::{AgentState, AppliedSpec, InstanceRecord};
    use serde_json::json;

    const MANIFEST: &str = r"
name: simple
trusted_certs: '-----CERT-----'
availability_zones:
  - name: z1
    cloud_properties: {zone: a}
  - name: z2
    cloud_properties: {zone: b}
vm_types:
  - name: small
    cloud_properties: {instance_type: m1.small}
stemcells:
  - alias: default
    name: ubuntu-jammy
    version: '1.1'
networks:
  - name: private
    type: manual
instance_groups:
  - name: web
    instances: 3
    azs: [z1, z2]
    vm_type: small
    stemcell: default
    networks:
      - name: private
        static_ips: [10.0.0.10, 10.0.0.11, 10.0.0.12]
    jobs:
      - name: nginx
        release: web
        properties: {port: 80}
        packages: [nginx, openssl]
";

    fn manifest() -> DeploymentManifest {
        ConfigParser::new()
            .parse_yaml(MANIFEST, None)
            .expect("manifest should parse")
    }

    /// Records every surviving plan as converged and running.
    fn apply(plan: &ReconciliationPlan, manifest: &DeploymentManifest) -> DeploymentSnapshot {
        let hasher = ConfigHasher::new();
        let mut snapshot = DeploymentSnapshot::new(&manifest.name);

        for plan in plan.plans().filter(|plan| !plan.is_obsolete()) {
            let instance = plan.instance();
            let job = instance.job();
            let mut record = instance.model().cloned().expect("model should be bound");
            record.index = instance.index();
            record.bootstrap = plan.is_bootstrap();
            record.availability_zone = instance.availability_zone().map(|az| az.name.clone());
            record.apply_spec = AppliedSpec {
                networks: plan.network_settings_hash(),
                stemcell: job.stemcell.clone(),
                vm_type: job.vm_type.clone(),
                cloud_properties: instance
                    .availability_zone()
                    .map(|az| az.cloud_properties.clone())
                    .unwrap_or_default()
                    .merged_with(&job.vm_type.cloud_properties),
                job_hash: Some(hasher.hash_jobs(&job.jobs)),
                configuration_hash: Some(hasher.hash_configuration(&job.jobs)),
                packages_hash: Some(hasher.hash_packages(&job.jobs)),
                trusted_certs_hash: Some(hasher.hash_trusted_certs(manifest.trusted_certs.as_deref())),
            };
            snapshot
                .agent_states
                .insert(record.uuid.clone(), AgentState::new(json!({"job_state": "running"})));
            snapshot.set_instance(record);
        }
        snapshot
    }

    fn converged(manifest: &DeploymentManifest) -> DeploymentSnapshot {
        let reconciler = Reconciler::new(manifest);
        let plan = reconciler
            .reconcile(&DeploymentSnapshot::new(&manifest.name))
            .unwrap();
        apply(&plan, manifest)
    }

    #[test]
    fn test_fresh_deployment_creates_every_instance() {
        let manifest = manifest();
        let plan = Reconciler::new(&manifest)
            .reconcile(&DeploymentSnapshot::new("simple"))
            .unwrap();

        let counts = plan.counts().unwrap();
        assert_eq!(counts.new, 3);
        assert_eq!(counts.obsolete, 0);
        assert!(plan.has_changes().unwrap());

        let summaries = plan.summaries().unwrap();
        let names: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["web/0", "web/1", "web/2"]);
        let azs: Vec<Option<&str>> = summaries.iter().map(|s| s.az.as_deref()).collect();
        assert_eq!(azs, vec![Some("z1"), Some("z2"), Some("z1")]);
        assert_eq!(summaries.iter().filter(|s| s.bootstrap).count(), 1);
        assert!(summaries[0].bootstrap);
        assert_eq!(summaries[1].addresses.get("private").map(String::as_str), Some("10.0.0.11"));
        assert!(summaries[0].changes.contains(Change::Network));
    }

    #[test]
    fn test_converged_deployment_has_no_changes() {
        let manifest = manifest();
        let snapshot = converged(&manifest);

        let plan = Reconciler::new(&manifest).reconcile(&snapshot).unwrap();
        let counts = plan.counts().unwrap();
        assert_eq!(counts.existing, 3);
        assert_eq!(counts.changed, 0);
        assert!(!plan.has_changes().unwrap());

        let report = Reconciler::new(&manifest).check_drift(&snapshot).unwrap();
        assert!(report.is_converged());
        assert_eq!(report.observed_count, 3);
        assert_eq!(report.to_string(), "No drift detected - deployment is converged");
    }

    #[test]
    fn test_scale_down_obsoletes_highest_indices() {
        let mut manifest = manifest();
        let snapshot = converged(&manifest);
        manifest.instance_groups[0].instances = 2;

        let plan = Reconciler::new(&manifest).reconcile(&snapshot).unwrap();
        let deleted: Vec<String> = plan
            .summaries()
            .unwrap()
            .into_iter()
            .filter(|s| s.action == PlanAction::Delete)
            .map(|s| s.name)
            .collect();
        assert_eq!(deleted, vec!["web/2"]);
    }

    #[test]
    fn test_configuration_drift_is_reported() {
        let mut manifest = manifest();
        let snapshot = converged(&manifest);
        manifest.instance_groups[0].jobs[0].properties = json!({"port": 8080});

        let report = Reconciler::new(&manifest).check_drift(&snapshot).unwrap();
        assert!(report.has_drift);
        assert_eq!(report.drifted.len(), 3);
        assert!(report.drifted.iter().all(|s| s.action == PlanAction::Update));
        assert!(report.drifted[0].changes.contains(Change::Configuration));
        assert!(!report.drifted[0].changes.contains(Change::Packages));
    }

    /// Static IPs requested or kept by every surviving plan.
    fn live_static_ips(plan: &ReconciliationPlan) -> Vec<String> {
        plan.plans()
            .filter(|plan| !plan.is_obsolete())
            .flat_map(|plan| plan.network_plans().iter())
            .filter(|network_plan| !network_plan.is_obsolete())
            .filter_map(|network_plan| network_plan.reservation.ip)
            .map(|ip| ip.to_string())
            .collect()
    }

    #[test]
    fn test_removed_zone_keeps_survivor_static_ips() {
        let mut manifest = manifest();
        let snapshot = converged(&manifest);
        manifest.instance_groups[0].azs = vec![String::from("z1")];

        let plan = Reconciler::new(&manifest).reconcile(&snapshot).unwrap();
        let counts = plan.counts().unwrap();
        assert_eq!(counts.new, 1);
        assert_eq!(counts.obsolete, 1);
        assert_eq!(counts.changed, 0);

        let summaries = plan.summaries().unwrap();
        let action_of = |name: &str| {
            summaries
                .iter()
                .find(|s| s.name == name)
                .map(|s| (s.action, s.addresses.get("private").cloned()))
        };
        assert_eq!(action_of("web/0"), Some((PlanAction::Keep, Some(String::from("10.0.0.10")))));
        assert_eq!(action_of("web/2"), Some((PlanAction::Keep, Some(String::from("10.0.0.12")))));
        assert_eq!(action_of("web/3"), Some((PlanAction::Create, Some(String::from("10.0.0.11")))));

        let deleted = summaries.iter().find(|s| s.name == "web/1").unwrap();
        assert_eq!(deleted.action, PlanAction::Delete);
        assert!(!deleted.changes.contains(Change::State));

        let mut ips = live_static_ips(&plan);
        ips.sort();
        assert_eq!(ips, vec!["10.0.0.10", "10.0.0.11", "10.0.0.12"]);
    }

    #[test]
    fn test_zone_order_does_not_move_static_ips() {
        let mut manifest = manifest();
        let snapshot = converged(&manifest);
        manifest.instance_groups[0].azs = vec![String::from("z2"), String::from("z1")];

        let plan = Reconciler::new(&manifest).reconcile(&snapshot).unwrap();
        let counts = plan.counts().unwrap();
        assert_eq!(counts.existing, 3);
        assert_eq!(counts.changed, 0);
        assert!(!plan.has_changes().unwrap());
        assert!(plan
            .plans()
            .flat_map(|plan| plan.network_plans().iter())
            .all(|network_plan| network_plan.is_existing()));
    }

    #[test]
    fn test_obsolete_instances_report_no_state_drift() {
        let mut manifest = manifest();
        let snapshot = converged(&manifest);
        manifest.instance_groups[0].instances = 1;

        let report = Reconciler::new(&manifest).check_drift(&snapshot).unwrap();
        assert_eq!(report.drifted.len(), 2);
        for summary in &report.drifted {
            assert_eq!(summary.action, PlanAction::Delete);
            assert!(!summary.changes.contains(Change::State));
        }
    }

    #[test]
    fn test_failing_agent_is_state_drift() {
        let manifest = manifest();
        let mut snapshot = converged(&manifest);
        let uuid = snapshot.instances_for_job("web")[1].uuid.clone();
        snapshot
            .agent_states
            .insert(uuid, AgentState::new(json!({"job_state": "failing"})));

        let report = Reconciler::new(&manifest).check_drift(&snapshot).unwrap();
        assert_eq!(report.drifted.len(), 1);
        assert_eq!(report.drifted[0].name, "web/1");
        assert_eq!(report.drifted[0].changes.iter().collect::<Vec<_>>(), vec![Change::State]);
    }

    #[test]
    fn test_removed_group_instances_are_obsolete() {
        let manifest = manifest();
        let mut snapshot = converged(&manifest);
        snapshot.set_instance(InstanceRecord::new("worker", 0, "worker-uuid", "simple"));

        let plan = Reconciler::new(&manifest).reconcile(&snapshot).unwrap();
        assert_eq!(plan.obsolete_groups().len(), 1);
        let counts = plan.counts().unwrap();
        assert_eq!(counts.obsolete, 1);
        assert_eq!(counts.existing, 3);
        assert_eq!(counts.to_string(), "0 to create, 0 to update, 1 to delete, 3 unchanged");
    }

    #[test]
    fn test_recreate_marks_every_instance() {
        let mut manifest = manifest();
        let snapshot = converged(&manifest);
        manifest.recreate = true;

        let plan = Reconciler::new(&manifest).reconcile(&snapshot).unwrap();
        for plan in plan.plans() {
            assert!(plan.recreate_deployment());
            assert!(plan.changes().unwrap().contains(Change::Recreate));
        }
    }

    #[test]
    fn test_snapshot_of_other_deployment_is_rejected() {
        let manifest = manifest();
        let err = Reconciler::new(&manifest)
            .reconcile(&DeploymentSnapshot::new("other"))
            .unwrap_err();
        assert!(err.to_string().contains("belongs to deployment 'other'"));
    }

    #[test]
    fn test_report_serializes_changes_as_tags() {
        let manifest = manifest();
        let plan = Reconciler::new(&manifest)
            .reconcile(&DeploymentSnapshot::new("simple"))
            .unwrap();

        let report = serde_json::to_value(plan.report().unwrap()).unwrap();
        assert_eq!(report["deployment"], "simple");
        assert_eq!(report["counts"]["new"], 3);
        assert_eq!(report["instances"][0]["action"], "create");
        assert!(report["instances"][0]["changes"]
            .as_array()
            .unwrap()
            .contains(&json!("network")));
    }
}
