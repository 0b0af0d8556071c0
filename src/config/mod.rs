//! Manifest module for the fleet planner.
//!
//! This module handles all manifest-related functionality:
//! - Parsing and deserializing deployment manifests
//! - Validation of manifest values and references
//! - Computing fingerprints for drift detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    AvailabilityZoneConfig, CloudProperties, DeploymentManifest, DiskType, DnsConfig, Env,
    InstanceGroupConfig, InstanceGroupNetworkConfig, JobTemplateConfig, NetworkConfig,
    NetworkKind, Stemcell, StemcellConfig, VmType,
};
pub use parser::{ConfigParser, DEFAULT_MANIFEST_FILES, find_manifest_file};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::ConfigHasher;
