//! Deployment manifests
//!
//! A manifest is the versioned descriptor the marketplace submits for
//! one deployment. It is validated once at intake and treated as
//! immutable afterwards; adapters receive it by reference and never
//! edit it.

use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, Result};

/// Major manifest version this build understands
///
/// Minor bumps are additive and accepted; an unknown major version is
/// rejected at intake.
pub const SUPPORTED_MAJOR_VERSION: u32 = 1;

/// Compute resources requested for a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// CPU request in millicores (1000 = one core)
    pub cpu_millis: u64,

    /// Memory request in bytes
    pub memory_bytes: u64,

    /// Number of GPU devices
    #[serde(default)]
    pub gpu_units: u32,

    /// GPU model constraint, e.g. "a100"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<String>,
}

impl ResourceRequest {
    /// Create a CPU/memory request
    pub fn new(cpu_millis: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
            ..Default::default()
        }
    }

    /// Add a GPU requirement
    pub fn with_gpu(mut self, units: u32, gpu_type: impl Into<String>) -> Self {
        self.gpu_units = units;
        self.gpu_type = Some(gpu_type.into());
        self
    }

    /// Sum another request into this one
    pub fn add(&mut self, other: &ResourceRequest) {
        self.cpu_millis += other.cpu_millis;
        self.memory_bytes += other.memory_bytes;
        self.gpu_units += other.gpu_units;
        if self.gpu_type.is_none() {
            self.gpu_type = other.gpu_type.clone();
        }
    }
}

/// One service (workload) within a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service name, unique within the manifest
    pub name: String,

    /// Image or template the backend should boot from
    pub image: String,

    /// Requested compute resources
    pub resources: ResourceRequest,

    /// Service ports to expose
    #[serde(default)]
    pub expose: Vec<u16>,
}

impl ServiceSpec {
    /// Create a service spec
    pub fn new(name: impl Into<String>, image: impl Into<String>, resources: ResourceRequest) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            resources,
            expose: Vec::new(),
        }
    }

    /// Expose a port
    pub fn with_port(mut self, port: u16) -> Self {
        self.expose.push(port);
        self
    }
}

/// Reachability class of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    /// Reachable only from other resources of the deployment
    Internal,
    /// Routed to the outside
    External,
}

/// One virtual network within a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Network name, unique within the manifest
    pub name: String,

    /// Reachability class
    pub kind: NetworkKind,

    /// Address range in CIDR notation, e.g. "10.0.8.0/24"
    pub cidr: String,
}

impl NetworkSpec {
    /// Create a network spec
    pub fn new(name: impl Into<String>, kind: NetworkKind, cidr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            cidr: cidr.into(),
        }
    }
}

/// Storage class of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    /// Block device attached to one server
    Block,
    /// Filesystem shared across services
    Shared,
}

/// One storage volume within a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Volume name, unique within the manifest
    pub name: String,

    /// Storage class
    pub kind: VolumeKind,

    /// Requested capacity in bytes
    pub size_bytes: u64,
}

impl VolumeSpec {
    /// Create a volume spec
    pub fn new(name: impl Into<String>, kind: VolumeKind, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            size_bytes,
        }
    }
}

/// Versioned deployment descriptor submitted by the marketplace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Schema version as "MAJOR.MINOR"
    pub version: String,

    /// Services to provision
    #[serde(default)]
    pub services: Vec<ServiceSpec>,

    /// Networks to create
    #[serde(default)]
    pub networks: Vec<NetworkSpec>,

    /// Volumes to create and attach
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
}

impl Manifest {
    /// Create an empty manifest at the given schema version
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            services: Vec::new(),
            networks: Vec::new(),
            volumes: Vec::new(),
        }
    }

    /// Add a service
    pub fn with_service(mut self, service: ServiceSpec) -> Self {
        self.services.push(service);
        self
    }

    /// Add a network
    pub fn with_network(mut self, network: NetworkSpec) -> Self {
        self.networks.push(network);
        self
    }

    /// Add a volume
    pub fn with_volume(mut self, volume: VolumeSpec) -> Self {
        self.volumes.push(volume);
        self
    }

    /// Parse the major component of the version field
    pub fn major_version(&self) -> Result<u32> {
        let major = self
            .version
            .split('.')
            .next()
            .unwrap_or_default()
            .parse::<u32>()
            .map_err(|_| {
                AdapterError::manifest(format!("version {:?} is not MAJOR.MINOR", self.version))
            })?;
        Ok(major)
    }

    /// Validate the manifest for intake
    ///
    /// Checks the schema version and the structural rules every backend
    /// relies on. A manifest that passes here is safe to hand to any
    /// adapter unchanged.
    pub fn validate(&self) -> Result<()> {
        let major = self.major_version()?;
        if major != SUPPORTED_MAJOR_VERSION {
            return Err(AdapterError::manifest(format!(
                "unsupported manifest version {} (supported major: {})",
                self.version, SUPPORTED_MAJOR_VERSION
            )));
        }

        if self.services.is_empty() {
            return Err(AdapterError::manifest("manifest declares no services"));
        }

        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            if service.name.is_empty() {
                return Err(AdapterError::manifest("service with empty name"));
            }
            if !seen.insert(service.name.as_str()) {
                return Err(AdapterError::manifest(format!(
                    "duplicate service name {:?}",
                    service.name
                )));
            }
            if service.image.is_empty() {
                return Err(AdapterError::manifest(format!(
                    "service {:?} has no image",
                    service.name
                )));
            }
            if service.resources.cpu_millis == 0 {
                return Err(AdapterError::manifest(format!(
                    "service {:?} requests zero CPU",
                    service.name
                )));
            }
            if service.resources.memory_bytes == 0 {
                return Err(AdapterError::manifest(format!(
                    "service {:?} requests zero memory",
                    service.name
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for network in &self.networks {
            if network.name.is_empty() {
                return Err(AdapterError::manifest("network with empty name"));
            }
            if !seen.insert(network.name.as_str()) {
                return Err(AdapterError::manifest(format!(
                    "duplicate network name {:?}",
                    network.name
                )));
            }
            if !network.cidr.contains('/') {
                return Err(AdapterError::manifest(format!(
                    "network {:?} has malformed CIDR {:?}",
                    network.name, network.cidr
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for volume in &self.volumes {
            if volume.name.is_empty() {
                return Err(AdapterError::manifest("volume with empty name"));
            }
            if !seen.insert(volume.name.as_str()) {
                return Err(AdapterError::manifest(format!(
                    "duplicate volume name {:?}",
                    volume.name
                )));
            }
            if volume.size_bytes == 0 {
                return Err(AdapterError::manifest(format!(
                    "volume {:?} has zero size",
                    volume.name
                )));
            }
        }

        Ok(())
    }

    /// Total resources across all services
    ///
    /// Backends that provision one server per deployment size it from
    /// this aggregate.
    pub fn aggregate_resources(&self) -> ResourceRequest {
        let mut total = ResourceRequest::default();
        for service in &self.services {
            total.add(&service.resources);
        }
        total
    }

    /// Image of the first service, which backends boot the server from
    pub fn primary_image(&self) -> Result<&str> {
        self.services
            .first()
            .map(|s| s.image.as_str())
            .ok_or_else(|| AdapterError::manifest("manifest declares no services"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        Manifest::new("1.0")
            .with_service(ServiceSpec::new(
                "web",
                "ubuntu-24.04",
                ResourceRequest::new(2000, 2 * 1024 * 1024 * 1024),
            ))
            .with_network(NetworkSpec::new("net0", NetworkKind::Internal, "10.0.8.0/24"))
            .with_volume(VolumeSpec::new("data", VolumeKind::Block, 10 * 1024 * 1024 * 1024))
    }

    #[test]
    fn test_valid_manifest_passes() {
        assert!(manifest().validate().is_ok());
    }

    #[test]
    fn test_minor_version_bump_accepted() {
        let mut m = manifest();
        m.version = "1.7".to_string();
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_unknown_major_version_rejected() {
        let mut m = manifest();
        m.version = "2.0".to_string();
        let err = m.validate().unwrap_err();
        assert!(matches!(err, AdapterError::Manifest(_)), "got {err}");
    }

    #[test]
    fn test_malformed_version_rejected() {
        let mut m = manifest();
        m.version = "one.zero".to_string();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_empty_services_rejected() {
        let m = Manifest::new("1.0");
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_duplicate_service_name_rejected() {
        let m = manifest().with_service(ServiceSpec::new(
            "web",
            "ubuntu-24.04",
            ResourceRequest::new(1000, 1024),
        ));
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_zero_cpu_rejected() {
        let m = Manifest::new("1.0").with_service(ServiceSpec::new(
            "web",
            "ubuntu-24.04",
            ResourceRequest::new(0, 1024),
        ));
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_malformed_cidr_rejected() {
        let m = manifest().with_network(NetworkSpec::new("bad", NetworkKind::Internal, "10.0.9.0"));
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_aggregate_resources_sums_services() {
        let m = Manifest::new("1.0")
            .with_service(ServiceSpec::new(
                "web",
                "ubuntu-24.04",
                ResourceRequest::new(2000, 2048),
            ))
            .with_service(ServiceSpec::new(
                "worker",
                "ubuntu-24.04",
                ResourceRequest::new(4000, 4096).with_gpu(1, "a100"),
            ));

        let total = m.aggregate_resources();
        assert_eq!(total.cpu_millis, 6000);
        assert_eq!(total.memory_bytes, 6144);
        assert_eq!(total.gpu_units, 1);
        assert_eq!(total.gpu_type.as_deref(), Some("a100"));
    }

    #[test]
    fn test_manifest_round_trips_through_json() {
        let m = manifest();
        let json = serde_json::to_string(&m).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, m.version);
        assert_eq!(back.services.len(), 1);
        assert_eq!(back.networks[0].kind, NetworkKind::Internal);
    }
}
