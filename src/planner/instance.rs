//! Collaborator interfaces used by the planner.
//!
//! The planner never builds instances or looks up DNS records itself. It
//! asks an [`InstanceRepository`] for bound [`Instance`] aggregates and a
//! [`DnsManager`] for published records, so both can be swapped for
//! snapshot-backed implementations or test doubles.

use std::fmt;

use crate::error::Result;
use crate::state::{AgentState, DnsRecord, InstanceRecord, InstanceState};

use super::desired::DesiredInstance;
use super::job::{AvailabilityZone, InstanceGroup};
use super::network::Reservation;

/// A bound runtime instance.
///
/// An instance pairs a resolved instance group with at most one persisted
/// record. It alone knows how to evaluate drift on the attributes that
/// depend on rendered templates, compiled packages or cloud configuration.
pub trait Instance: fmt::Debug + Send + Sync {
    /// Resolved instance group.
    fn job(&self) -> &InstanceGroup;

    /// Owning deployment name.
    fn deployment_name(&self) -> &str;

    /// Index within the instance group.
    fn index(&self) -> u32;

    /// Stable unique identifier.
    fn uuid(&self) -> &str;

    /// Availability zone the instance is placed in.
    fn availability_zone(&self) -> Option<&AvailabilityZone>;

    /// Whether the instance is currently the group's bootstrap instance.
    fn is_bootstrap(&self) -> bool;

    /// Persisted record backing the instance, if bound.
    fn model(&self) -> Option<&InstanceRecord>;

    /// Administrative state the instance should be in.
    fn state(&self) -> InstanceState;

    /// Last agent-reported state.
    fn current_state(&self) -> &AgentState;

    /// Last agent-reported job state.
    fn current_job_state(&self) -> Option<&str> {
        self.current_state().job_state()
    }

    /// Network reservations the instance already holds.
    fn existing_network_reservations(&self) -> &[Reservation];

    /// Whether compiled packages differ from the applied ones.
    fn packages_changed(&self) -> bool;

    /// Whether rendered configuration differs from the applied one.
    fn configuration_changed(&self) -> bool;

    /// Whether the colocated job templates differ from the applied ones.
    fn job_changed(&self) -> bool;

    /// Whether trusted certificates differ from the installed ones.
    fn trusted_certs_changed(&self) -> bool;

    /// Whether effective cloud properties differ from the applied ones.
    fn cloud_properties_changed(&self) -> bool;

    /// Returns the `job/index (uuid)` name used in logs and errors.
    fn name(&self) -> String {
        format!("{}/{} ({})", self.job().name, self.index(), self.uuid())
    }
}

/// Builds bound instances for the planner.
///
/// Every operation may fail; failures abort the planning pass.
#[cfg_attr(test, mockall::automock)]
pub trait InstanceRepository {
    /// Binds an existing record to a desired slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance cannot be bound.
    fn fetch_existing(
        &self,
        desired: &DesiredInstance,
        record: &InstanceRecord,
        state: &AgentState,
    ) -> Result<Box<dyn Instance>>;

    /// Binds a record that has no desired slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance cannot be bound.
    fn fetch_obsolete(&self, record: &InstanceRecord) -> Result<Box<dyn Instance>>;

    /// Creates a new instance for a desired slot at the given index.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance cannot be created.
    fn create(&self, desired: &DesiredInstance, index: u32) -> Result<Box<dyn Instance>>;
}

/// Access to published DNS records.
pub trait DnsManager: fmt::Debug + Send + Sync {
    /// Whether DNS records are managed for the deployment.
    fn dns_enabled(&self) -> bool;

    /// Domain appended to record names.
    fn dns_domain_name(&self) -> &str;

    /// Finds a published record by name and address.
    fn find_dns_record(&self, name: &str, ip: &str) -> Option<DnsRecord>;
}
