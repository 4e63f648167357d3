//! Daemon configuration
//!
//! One TOML file, loaded once at startup and validated before any
//! backend call. Each backend gets its own optional section; a daemon
//! with zero backend sections has nothing to do and is rejected.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use ansible_provider::AnsibleConfig;
use gantry_core::Backoff;
use openstack_provider::OpenStackConfig;
use vsphere_provider::VSphereConfig;

use crate::error::{OrchestratorError, Result};

fn default_retry_initial_ms() -> u64 {
    500
}

fn default_retry_max_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    4
}

fn default_reconcile_interval_secs() -> u64 {
    60
}

/// Engine-wide policy knobs
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// First retry delay for transient failures, in milliseconds
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Upper bound on any retry delay, in seconds
    #[serde(default = "default_retry_max_secs")]
    pub retry_max_secs: u64,

    /// Total attempts for a transiently failing operation
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// How often the reconciliation sweep re-queries Error resources,
    /// Seconds between reconciliation sweeps
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_secs: default_retry_max_secs(),
            retry_attempts: default_retry_attempts(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

impl EngineConfig {
    /// Backoff schedule for transient retries
    pub fn retry_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.retry_initial_ms),
            Duration::from_secs(self.retry_max_secs),
        )
    }

    /// Interval between reconciliation sweeps
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

/// Full daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GantryConfig {
    /// Engine policy
    #[serde(default)]
    pub engine: EngineConfig,

    /// OpenStack-style backend, if wired
    pub openstack: Option<OpenStackConfig>,

    /// vSphere-style backend, if wired
    pub vsphere: Option<VSphereConfig>,

    /// Playbook-driven backend, if wired
    pub ansible: Option<AnsibleConfig>,
}

impl GantryConfig {
    /// Parse configuration from a TOML string
    pub fn parse(text: &str) -> Result<Self> {
        let config: GantryConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// How many backend sections are present
    pub fn backend_count(&self) -> usize {
        [
            self.openstack.is_some(),
            self.vsphere.is_some(),
            self.ansible.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }

    /// Reject configurations no daemon could run with
    pub fn validate(&self) -> Result<()> {
        if self.backend_count() == 0 {
            return Err(OrchestratorError::Config(
                "at least one backend section ([openstack], [vsphere], [ansible]) is required"
                    .to_string(),
            ));
        }
        if let Some(openstack) = &self.openstack {
            openstack.validate()?;
        }
        if let Some(vsphere) = &self.vsphere {
            vsphere.validate()?;
        }
        if let Some(ansible) = &self.ansible {
            ansible.validate()?;
        }
        if self.engine.retry_attempts == 0 {
            return Err(OrchestratorError::Config(
                "engine.retry_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[openstack]
auth_url = "https://keystone.example:5000/v3"
project = "marketplace"
provider_tag = "dc-east"
"#;

    const FULL: &str = r#"
[engine]
retry_initial_ms = 100
retry_attempts = 2
reconcile_interval_secs = 5

[openstack]
auth_url = "https://keystone.example:5000/v3"
project = "marketplace"
provider_tag = "dc-east"
ready_deadline_secs = 120

[vsphere]
endpoint = "https://vcenter.example/sdk"
datacenter = "dc1"
cluster = "general"
datastore = "vsan-1"
network = "tenant-net"
provider_tag = "dc-west"

[ansible]
playbook_dir = "/opt/gantry/playbooks"
provider_tag = "edge-rack"
playbooks = { provision = "provision.yml", teardown = "teardown.yml" }

[[ansible.hosts]]
name = "edge1"
address = "10.9.0.4"
"#;

    #[test]
    fn test_minimal_config_applies_defaults() {
        let config = GantryConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.backend_count(), 1);
        assert_eq!(config.engine.retry_attempts, 4);
        assert_eq!(config.engine.reconcile_interval(), Duration::from_secs(60));
        assert_eq!(config.openstack.unwrap().ready_deadline_secs, 300);
    }

    #[test]
    fn test_full_config_parses_all_backends() {
        let config = GantryConfig::parse(FULL).unwrap();
        assert_eq!(config.backend_count(), 3);
        assert_eq!(config.engine.retry_attempts, 2);
        let ansible = config.ansible.unwrap();
        assert_eq!(ansible.hosts.len(), 1);
        assert_eq!(ansible.playbooks.provision, "provision.yml");
        assert!(ansible.playbooks.start.is_none());
    }

    #[test]
    fn test_no_backends_rejected() {
        let err = GantryConfig::parse("[engine]\nretry_attempts = 3\n").unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)), "got {err}");
    }

    #[test]
    fn test_invalid_backend_section_rejected() {
        let text = r#"
[openstack]
auth_url = ""
project = "marketplace"
provider_tag = "dc-east"
"#;
        let err = GantryConfig::parse(text).unwrap_err();
        assert!(err.to_string().contains("auth_url"), "got {err}");
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = GantryConfig::parse("[openstack\nauth_url = 3").unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigParse(_)), "got {err}");
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gantry.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = GantryConfig::load(&path).unwrap();
        assert_eq!(config.backend_count(), 1);

        let err = GantryConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, OrchestratorError::Io(_)), "got {err}");
    }
}
