//! Manifest parser for loading deployment manifests.
//!
//! This module handles loading manifests from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, PlannerError, Result};
use std::path::Path;
use tracing::{debug, info};

use super::spec::DeploymentManifest;

/// Manifest parser for loading deployment manifests.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<std::path::PathBuf>,
}

impl ConfigParser {
    /// Creates a new manifest parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeploymentManifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(PlannerError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            PlannerError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeploymentManifest> {
        debug!("Parsing YAML manifest");

        let manifest: DeploymentManifest = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            PlannerError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Successfully parsed manifest for deployment: {}", manifest.name);
        Ok(manifest)
    }

    /// Loads a manifest with environment variable overrides.
    ///
    /// Recognized variables: `FLEETPLAN_DEPLOYMENT_NAME`,
    /// `FLEETPLAN_RECREATE` and `FLEETPLAN_DNS_ENABLED`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeploymentManifest> {
        let mut manifest = self.load_file(path)?;
        Self::apply_env_overrides(&mut manifest);
        Ok(manifest)
    }

    /// Applies environment variable overrides to the manifest.
    fn apply_env_overrides(manifest: &mut DeploymentManifest) {
        if let Ok(name) = std::env::var("FLEETPLAN_DEPLOYMENT_NAME") {
            debug!("Overriding name from environment");
            manifest.name = name;
        }

        if let Some(recreate) = env_flag("FLEETPLAN_RECREATE") {
            debug!("Overriding recreate from environment");
            manifest.recreate = recreate;
        }

        if let Some(enabled) = env_flag("FLEETPLAN_DNS_ENABLED") {
            debug!("Overriding dns.enabled from environment");
            manifest.dns.enabled = enabled;
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                PlannerError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Reads a boolean flag from the environment.
fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Default manifest file names to search for.
pub const DEFAULT_MANIFEST_FILES: &[&str] = &[
    "fleet.deploy.yaml",
    "fleet.deploy.yml",
    "deployment.yaml",
    "deployment.yml",
];

/// Finds the manifest file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no manifest file is found.
pub fn find_manifest_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_MANIFEST_FILES {
            let manifest_path = current.join(filename);
            if manifest_path.exists() {
                info!("Found manifest file: {}", manifest_path.display());
                return Ok(manifest_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(PlannerError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_MANIFEST_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::VirtualState;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_manifest() {
        let yaml = r"
name: cf
instance_groups: []
";
        let parser = ConfigParser::new();
        let result = parser.parse_yaml(yaml, None);
        assert!(result.is_ok());

        let manifest = result.unwrap();
        assert_eq!(manifest.name, "cf");
        assert!(!manifest.recreate);
        assert!(!manifest.dns.enabled);
    }

    #[test]
    fn test_parse_full_manifest() {
        let yaml = r#"
name: cf
recreate: false
dns:
  enabled: true
  domain: internal
availability_zones:
  - name: z1
    cloud_properties:
      zone: us-east-1a
vm_types:
  - name: small
    cloud_properties:
      instance_type: m5.large
stemcells:
  - alias: default
    name: ubuntu-jammy
    version: "1.200"
disk_types:
  - name: ten
    disk_size: 10240
networks:
  - name: private
    type: manual
instance_groups:
  - name: router
    instances: 2
    azs: [z1]
    vm_type: small
    stemcell: default
    persistent_disk_type: ten
    state: started
    networks:
      - name: private
        static_ips: [10.0.0.10, 10.0.0.11]
    jobs:
      - name: gorouter
        release: routing
        properties:
          port: 80
        packages: [gorouter, openssl]
"#;
        let parser = ConfigParser::new();
        let result = parser.parse_yaml(yaml, None);
        assert!(result.is_ok());

        let manifest = result.unwrap();
        assert_eq!(manifest.instance_groups.len(), 1);
        let group = &manifest.instance_groups[0];
        assert_eq!(group.name, "router");
        assert_eq!(group.state, Some(VirtualState::Started));
        assert_eq!(group.networks[0].static_ips.len(), 2);
        assert_eq!(manifest.dns.domain, "internal");
        assert_eq!(manifest.disk_type("ten").map(|d| d.disk_size), Some(10240));
    }

    #[test]
    fn test_invalid_yaml_reports_location() {
        let parser = ConfigParser::new();
        let result = parser.parse_yaml("name: [", Some(Path::new("broken.yml")));
        match result {
            Err(PlannerError::Config(ConfigError::ParseError { location, .. })) => {
                assert_eq!(location.as_deref(), Some("broken.yml"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_find_manifest_file_walks_up() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("Failed to create dirs");
        std::fs::write(temp.path().join("fleet.deploy.yaml"), "name: x\ninstance_groups: []\n")
            .expect("Failed to write manifest");

        let found = find_manifest_file(&nested).expect("manifest should be found");
        assert_eq!(found, temp.path().join("fleet.deploy.yaml"));
    }

    #[test]
    fn test_load_missing_file() {
        let parser = ConfigParser::new();
        let result = parser.load_file("/definitely/not/here.yml");
        assert!(matches!(
            result,
            Err(PlannerError::Config(ConfigError::FileNotFound { .. }))
        ));
    }
}
