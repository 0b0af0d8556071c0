//! Fingerprinting for change detection.
//!
//! This module provides deterministic hashing of manifest fragments. The
//! fingerprints are recorded in an instance's applied spec and compared on
//! the next planning pass to detect job, package, configuration and
//! trusted-certificate drift.

use sha2::{Digest, Sha256};

use super::spec::{DeploymentManifest, JobTemplateConfig};

/// Hasher for computing manifest fingerprints.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire manifest.
    #[must_use]
    pub fn hash_manifest(&self, manifest: &DeploymentManifest) -> String {
        let mut hasher = Sha256::new();

        hasher.update(manifest.name.as_bytes());
        hasher.update(if manifest.recreate { [1u8] } else { [0u8] });

        // serde_json maps are sorted, so the rendering is deterministic
        let rendered = serde_json::to_string(&manifest.instance_groups).unwrap_or_default();
        hasher.update(rendered.as_bytes());

        if let Some(certs) = &manifest.trusted_certs {
            hasher.update(certs.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes the job fingerprint: which templates from which releases.
    #[must_use]
    pub fn hash_jobs(&self, jobs: &[JobTemplateConfig]) -> String {
        let mut hasher = Sha256::new();

        let mut templates: Vec<_> = jobs.iter().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        for template in templates {
            hasher.update(template.name.as_bytes());
            hasher.update(b"\0");
            hasher.update(template.release.as_bytes());
            hasher.update(b"\0");
        }

        hex::encode(hasher.finalize())
    }

    /// Computes the configuration fingerprint from job properties.
    #[must_use]
    pub fn hash_configuration(&self, jobs: &[JobTemplateConfig]) -> String {
        let mut hasher = Sha256::new();

        let mut templates: Vec<_> = jobs.iter().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        for template in templates {
            hasher.update(template.name.as_bytes());
            hasher.update(b"\0");
            hasher.update(template.properties.to_string().as_bytes());
            hasher.update(b"\0");
        }

        hex::encode(hasher.finalize())
    }

    /// Computes the package fingerprint across all jobs.
    #[must_use]
    pub fn hash_packages(&self, jobs: &[JobTemplateConfig]) -> String {
        let mut hasher = Sha256::new();

        let mut packages: Vec<(&str, &str)> = jobs
            .iter()
            .flat_map(|job| {
                job.packages
                    .iter()
                    .map(move |package| (job.release.as_str(), package.as_str()))
            })
            .collect();
        packages.sort_unstable();
        packages.dedup();
        for (release, package) in packages {
            hasher.update(release.as_bytes());
            hasher.update(b"/");
            hasher.update(package.as_bytes());
            hasher.update(b"\0");
        }

        hex::encode(hasher.finalize())
    }

    /// Computes the trusted certificates fingerprint.
    ///
    /// Absent certificates hash the same as an empty bundle.
    #[must_use]
    pub fn hash_trusted_certs(&self, certs: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(certs.unwrap_or_default().trim().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}
