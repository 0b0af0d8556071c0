//! Instance planning.
//!
//! This module matches the desired instance slots of each instance group
//! against the instances a previous deployment left behind, and computes
//! what changed for every instance that survives.

mod desired;
mod instance;
mod instance_planner;
mod job;
mod network;
mod plan;

#[cfg(test)]
pub(crate) mod testing;

pub use desired::{DesiredInstance, VirtualState};
pub use instance::{DnsManager, Instance, InstanceRepository};
pub use instance_planner::{InstancePlanner, InstanceWithAz};
pub use job::{AvailabilityZone, DefaultNetwork, InstanceGroup, JobNetwork};
pub use network::{
    NetworkPlan, NetworkPlanTag, NetworkPlanner, NetworkSettings, Reservation, ReservationKind,
    StaticIpClaims,
};
pub use plan::{Change, ChangeSet, InstancePlan};
