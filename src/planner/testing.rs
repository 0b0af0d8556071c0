//! Test doubles and builders for planner tests.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::{CloudProperties, Stemcell, VmType};
use crate::state::{AgentState, AppliedSpec, DnsRecord, InstanceRecord, InstanceState};

use super::desired::{DesiredInstance, VirtualState};
use super::instance::{DnsManager, Instance};
use super::job::{AvailabilityZone, InstanceGroup};
use super::network::Reservation;
use super::plan::Change;

/// Deployment every test group belongs to.
pub const DEPLOYMENT: &str = "simple";

/// A configurable bound instance.
#[derive(Debug, Clone)]
pub struct FakeInstance {
    pub job: InstanceGroup,
    pub index: u32,
    pub uuid: String,
    pub az: Option<AvailabilityZone>,
    pub bootstrap: bool,
    pub model: Option<InstanceRecord>,
    pub state: InstanceState,
    pub current_state: AgentState,
    pub reservations: Vec<Reservation>,
    pub drift: Vec<Change>,
}

impl FakeInstance {
    /// A started, running instance bound to a record matching `job`.
    pub fn new(job: &InstanceGroup, index: u32) -> Self {
        Self {
            job: job.clone(),
            index,
            uuid: uuid_for(job, index),
            az: job.availability_zones.first().cloned(),
            bootstrap: false,
            model: Some(record(job, index)),
            state: InstanceState::Started,
            current_state: running(),
            reservations: Vec::new(),
            drift: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: InstanceRecord) -> Self {
        self.uuid.clone_from(&model.uuid);
        self.model = Some(model);
        self
    }

    pub fn unbound(mut self) -> Self {
        self.model = None;
        self
    }

    pub const fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub const fn with_state(mut self, state: InstanceState) -> Self {
        self.state = state;
        self
    }

    pub fn with_job_state(mut self, job_state: &str) -> Self {
        self.current_state = AgentState::new(json!({ "job_state": job_state }));
        self
    }

    pub fn with_reservations(mut self, reservations: Vec<Reservation>) -> Self {
        self.reservations = reservations;
        self
    }

    /// Makes the delegated predicate for `change` report drift.
    pub fn with_drift(mut self, change: Change) -> Self {
        self.drift.push(change);
        self
    }

    pub fn boxed(self) -> Box<dyn Instance> {
        Box::new(self)
    }
}

impl Instance for FakeInstance {
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
        self.az.as_ref()
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
        self.drift.contains(&Change::Packages)
    }

    fn configuration_changed(&self) -> bool {
        self.drift.contains(&Change::Configuration)
    }

    fn job_changed(&self) -> bool {
        self.drift.contains(&Change::Job)
    }

    fn trusted_certs_changed(&self) -> bool {
        self.drift.contains(&Change::TrustedCerts)
    }

    fn cloud_properties_changed(&self) -> bool {
        self.drift.contains(&Change::CloudProperties)
    }
}

/// An in-memory DNS manager.
#[derive(Debug, Default)]
pub struct FakeDnsManager {
    pub enabled: bool,
    pub records: Vec<DnsRecord>,
}

impl FakeDnsManager {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub const fn enabled(records: Vec<DnsRecord>) -> Self {
        Self {
            enabled: true,
            records,
        }
    }
}

impl DnsManager for FakeDnsManager {
    fn dns_enabled(&self) -> bool {
        self.enabled
    }

    fn dns_domain_name(&self) -> &str {
        "bosh"
    }

    fn find_dns_record(&self, name: &str, ip: &str) -> Option<DnsRecord> {
        self.records
            .iter()
            .find(|record| record.name == name && record.ip == ip)
            .cloned()
    }
}

pub fn no_dns() -> Arc<dyn DnsManager> {
    Arc::new(FakeDnsManager::disabled())
}

pub fn cloud_properties(value: Value) -> CloudProperties {
    match value {
        Value::Object(map) => CloudProperties(map),
        _ => CloudProperties::default(),
    }
}

pub fn az(name: &str) -> AvailabilityZone {
    AvailabilityZone {
        name: name.to_string(),
        cloud_properties: CloudProperties::default(),
    }
}

/// A group placed in `foo-az` with a small VM type and a stemcell.
pub fn group(name: &str) -> InstanceGroup {
    let mut group = zoneless_group(name);
    group.availability_zones = vec![az("foo-az")];
    group
}

/// A group with no availability zones.
pub fn zoneless_group(name: &str) -> InstanceGroup {
    let mut group = InstanceGroup::new(name, DEPLOYMENT);
    group.vm_type = VmType {
        name: String::from("small"),
        cloud_properties: cloud_properties(json!({"instance_type": "m1.small"})),
    };
    group.stemcell = Stemcell {
        name: String::from("ubuntu-jammy"),
        version: String::from("1"),
    };
    group
}

pub fn uuid_for(job: &InstanceGroup, index: u32) -> String {
    format!("{}-uuid-{index}", job.name)
}

/// A record whose applied spec matches `job`, placed in its first zone.
pub fn record(job: &InstanceGroup, index: u32) -> InstanceRecord {
    let mut record = InstanceRecord::new(&job.name, index, &uuid_for(job, index), DEPLOYMENT);
    record.availability_zone = job.availability_zones.first().map(|az| az.name.clone());
    record.apply_spec = AppliedSpec {
        vm_type: job.vm_type.clone(),
        stemcell: job.stemcell.clone(),
        ..AppliedSpec::default()
    };
    record
}

pub fn record_in(job: &InstanceGroup, index: u32, az: Option<&str>) -> InstanceRecord {
    let mut record = record(job, index);
    record.availability_zone = az.map(str::to_string);
    record
}

pub fn desired(job: &InstanceGroup, state: Option<VirtualState>) -> DesiredInstance {
    DesiredInstance::new(Arc::new(job.clone()), state, DEPLOYMENT)
}

pub fn running() -> AgentState {
    AgentState::new(json!({"job_state": "running"}))
}
