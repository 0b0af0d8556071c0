// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Fleet Planner
//!
//! An instance reconciliation engine for declarative deployments.
//!
//! ## Overview
//!
//! Given a deployment manifest (instance groups, each wanting N instances
//! across a set of availability zones) and a snapshot of what a previous
//! deployment left behind, the planner:
//!
//! - Matches existing instances to desired slots, keeping indices stable
//! - Allocates indices for new instances
//! - Elects exactly one bootstrap instance per instance group
//! - Classifies every instance as new, existing or obsolete
//! - Computes what changed for every surviving instance
//!
//! ## Architecture
//!
//! The system is built around the concept of **desired state reconciliation**:
//!
//! 1. **Desired State**: Defined in `fleet.deploy.yaml`
//! 2. **Recorded State**: Read from the `fleet.state.json` snapshot
//! 3. **Reconciler**: Plans every instance group and reports drift
//!
//! ## Modules
//!
//! - [`config`]: Manifest parsing, validation and fingerprinting
//! - [`state`]: Persisted instance records and snapshots
//! - [`planner`]: Instance planning and change detection
//! - [`inventory`]: Snapshot-backed planner collaborators
//! - [`reconciler`]: Whole-deployment reconciliation
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! name: cf
//!
//! availability_zones:
//!   - name: z1
//!   - name: z2
//!
//! vm_types:
//!   - name: small
//!     cloud_properties: {instance_type: m1.small}
//!
//! stemcells:
//!   - alias: default
//!     name: ubuntu-jammy
//!     version: "1.1"
//!
//! networks:
//!   - name: private
//!
//! instance_groups:
//!   - name: router
//!     instances: 2
//!     azs: [z1, z2]
//!     vm_type: small
//!     stemcell: default
//!     networks:
//!       - name: private
//!     jobs:
//!       - name: gorouter
//!         release: routing
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod inventory;
pub mod planner;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeploymentManifest};
pub use error::{PlannerError, Result};
pub use inventory::{BoundInstance, DnsRecordStore, SnapshotRepository};
pub use planner::{
    Change, ChangeSet, DesiredInstance, DnsManager, Instance, InstanceGroup, InstancePlan,
    InstancePlanner, InstanceRepository, InstanceWithAz,
};
pub use reconciler::{DriftReport, PlanReport, ReconciliationPlan, Reconciler};
pub use state::{DeploymentSnapshot, InstanceRecord, SnapshotStore};
