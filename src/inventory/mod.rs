//! Snapshot-backed planner collaborators.
//!
//! Binds the records of a [`DeploymentSnapshot`](crate::state::DeploymentSnapshot)
//! to the instance groups of a manifest and serves its published DNS records.

mod bound;
mod dns;
mod repository;

pub use bound::BoundInstance;
pub use dns::DnsRecordStore;
pub use repository::SnapshotRepository;
