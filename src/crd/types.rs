//! Supporting types for the Cluster and InstanceGroup CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Supported infrastructure provider types
///
/// Every provider is reached through its Cluster API infrastructure provider,
/// so the rolling update engine never branches on this value.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ProviderType {
    /// Docker/Kind provider for local development
    #[default]
    Docker,
    /// Amazon Web Services
    Aws,
    /// Google Cloud Platform
    Gcp,
    /// Microsoft Azure
    Azure,
    /// OpenStack
    #[serde(rename = "openstack")]
    OpenStack,
}

impl std::str::FromStr for ProviderType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "aws" => Ok(Self::Aws),
            "gcp" | "gce" => Ok(Self::Gcp),
            "azure" => Ok(Self::Azure),
            "openstack" => Ok(Self::OpenStack),
            _ => Err(crate::Error::config(format!(
                "invalid provider type: {s}, expected one of: docker, aws, gcp, azure, openstack"
            ))),
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Aws => write!(f, "aws"),
            Self::Gcp => write!(f, "gcp"),
            Self::Azure => write!(f, "azure"),
            Self::OpenStack => write!(f, "openstack"),
        }
    }
}

/// Role an instance group plays in the cluster
///
/// The declaration order is the rolling update order: bastions are access
/// infrastructure and go first, the control plane goes before workload
/// capacity.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
    Hash,
)]
#[non_exhaustive]
pub enum InstanceGroupRole {
    /// SSH bastion hosts; not part of the Kubernetes cluster
    Bastion,
    /// Control plane instances
    Master,
    /// Worker instances
    #[default]
    Node,
}

impl InstanceGroupRole {
    /// All roles in rolling update order
    pub const ORDERED: [InstanceGroupRole; 3] = [Self::Bastion, Self::Master, Self::Node];

    /// Returns true for bastions, which are never drained or validated
    pub fn is_bastion(&self) -> bool {
        matches!(self, Self::Bastion)
    }
}

impl std::str::FromStr for InstanceGroupRole {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bastion" => Ok(Self::Bastion),
            "master" | "controlplane" | "control-plane" => Ok(Self::Master),
            "node" | "worker" => Ok(Self::Node),
            _ => Err(crate::Error::config(format!(
                "invalid instance group role: {s}, expected one of: bastion, master, node"
            ))),
        }
    }
}

impl std::fmt::Display for InstanceGroupRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bastion => write!(f, "Bastion"),
            Self::Master => write!(f, "Master"),
            Self::Node => write!(f, "Node"),
        }
    }
}

/// Kubernetes version configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct KubernetesSpec {
    /// Kubernetes version the cluster should run (e.g., "1.32.0")
    pub version: String,
}

impl KubernetesSpec {
    /// Version with a leading "v", as Cluster API stores it
    pub fn capi_version(&self) -> String {
        normalize_version(&self.version)
    }
}

/// Normalize a Kubernetes version to the "vX.Y.Z" form
pub fn normalize_version(version: &str) -> String {
    format!("v{}", version.trim().trim_start_matches('v'))
}
