//! Manifest validation.
//!
//! This module validates deployment manifests before planning, ensuring
//! every name is well formed and every reference resolves.

use crate::error::{ConfigError, PlannerError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{DeploymentManifest, InstanceGroupConfig};

/// Validator for deployment manifests.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment manifest.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, manifest: &DeploymentManifest) -> Result<ValidationResult> {
        let result = self.check(manifest);

        if result.errors.is_empty() {
            debug!("Manifest validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(PlannerError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Runs every check and collects all errors and warnings.
    #[must_use]
    pub fn check(&self, manifest: &DeploymentManifest) -> ValidationResult {
        let mut result = ValidationResult::default();

        if manifest.name.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("name"),
                message: String::from("Deployment name cannot be empty"),
            });
        } else if !is_valid_name(&manifest.name) {
            result.errors.push(ValidationError {
                field: String::from("name"),
                message: format!(
                    "Deployment name '{}' is invalid. Must be lowercase alphanumeric with hyphens or underscores.",
                    manifest.name
                ),
            });
        }

        Self::validate_declarations(manifest, &mut result);
        Self::validate_instance_groups(manifest, &mut result);

        result
    }

    /// Validates that declared names are unique per kind.
    fn validate_declarations(manifest: &DeploymentManifest, result: &mut ValidationResult) {
        check_unique(
            "availability_zones",
            manifest.availability_zones.iter().map(|az| az.name.as_str()),
            result,
        );
        check_unique("vm_types", manifest.vm_types.iter().map(|v| v.name.as_str()), result);
        check_unique("stemcells", manifest.stemcells.iter().map(|s| s.alias.as_str()), result);
        check_unique("disk_types", manifest.disk_types.iter().map(|d| d.name.as_str()), result);
        check_unique("networks", manifest.networks.iter().map(|n| n.name.as_str()), result);
    }

    /// Validates all instance groups.
    fn validate_instance_groups(manifest: &DeploymentManifest, result: &mut ValidationResult) {
        if manifest.instance_groups.is_empty() {
            result
                .warnings
                .push(String::from("No instance groups defined in manifest"));
            return;
        }

        let mut seen_names = HashSet::new();

        for (i, group) in manifest.instance_groups.iter().enumerate() {
            let prefix = format!("instance_groups[{i}]");

            if !seen_names.insert(group.name.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!("Duplicate instance group name: {}", group.name),
                });
            }

            if !is_valid_name(&group.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!(
                        "Instance group name '{}' is invalid. Must be lowercase alphanumeric with hyphens or underscores.",
                        group.name
                    ),
                });
            }

            if group.instances == 0 {
                result.warnings.push(format!(
                    "{prefix}.instances: Instance group '{}' has no instances; existing ones will be deleted",
                    group.name
                ));
            }

            Self::validate_references(manifest, group, &prefix, result);
            Self::validate_networks(manifest, group, &prefix, result);
        }
    }

    /// Validates that every named reference in a group resolves.
    fn validate_references(
        manifest: &DeploymentManifest,
        group: &InstanceGroupConfig,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        for (i, az) in group.azs.iter().enumerate() {
            if manifest.availability_zone(az).is_none() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.azs[{i}]"),
                    message: format!("Unknown availability zone '{az}'"),
                });
            }
        }

        if manifest.vm_type(&group.vm_type).is_none() {
            result.errors.push(ValidationError {
                field: format!("{prefix}.vm_type"),
                message: format!("Unknown vm type '{}'", group.vm_type),
            });
        }

        if manifest.stemcell(&group.stemcell).is_none() {
            result.errors.push(ValidationError {
                field: format!("{prefix}.stemcell"),
                message: format!("Unknown stemcell alias '{}'", group.stemcell),
            });
        }

        if let Some(disk_type) = &group.persistent_disk_type {
            if manifest.disk_type(disk_type).is_none() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.persistent_disk_type"),
                    message: format!("Unknown disk type '{disk_type}'"),
                });
            }
        }
    }

    /// Validates network attachments of a group.
    fn validate_networks(
        manifest: &DeploymentManifest,
        group: &InstanceGroupConfig,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        if group.networks.is_empty() {
            result.warnings.push(format!(
                "{prefix}.networks: Instance group '{}' is not attached to any network",
                group.name
            ));
            return;
        }

        let mut seen = HashSet::new();
        let mut all_ips = HashSet::new();

        for (i, network) in group.networks.iter().enumerate() {
            let field = format!("{prefix}.networks[{i}]");

            if manifest.network(&network.name).is_none() {
                result.errors.push(ValidationError {
                    field: format!("{field}.name"),
                    message: format!("Unknown network '{}'", network.name),
                });
            }

            if !seen.insert(network.name.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{field}.name"),
                    message: format!("Network '{}' attached twice", network.name),
                });
            }

            let static_count = network.static_ips.len();
            if static_count > 0 && static_count < group.instances as usize {
                result.errors.push(ValidationError {
                    field: format!("{field}.static_ips"),
                    message: format!(
                        "Instance group '{}' has {} instances but only {static_count} static IPs on network '{}'",
                        group.name, group.instances, network.name
                    ),
                });
            }

            for ip in &network.static_ips {
                if !all_ips.insert(*ip) {
                    result.errors.push(ValidationError {
                        field: format!("{field}.static_ips"),
                        message: format!("Static IP {ip} is listed more than once"),
                    });
                }
            }

            for purpose in &network.default {
                if purpose != "dns" && purpose != "gateway" {
                    result.warnings.push(format!(
                        "{field}.default: Unknown default purpose '{purpose}'"
                    ));
                }
            }
        }
    }
}

/// Records an error for every name declared more than once.
fn check_unique<'a>(
    kind: &str,
    names: impl Iterator<Item = &'a str>,
    result: &mut ValidationResult,
) {
    let mut seen = HashSet::new();
    for (i, name) in names.enumerate() {
        if !seen.insert(name) {
            result.errors.push(ValidationError {
                field: format!("{kind}[{i}].name"),
                message: ConfigError::DuplicateName {
                    resource_type: kind.to_string(),
                    name: name.to_string(),
                }
                .to_string(),
            });
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens or underscores, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
