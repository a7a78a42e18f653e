//! Custom Resource Definitions for rolling updates
//!
//! The Cluster and InstanceGroup resources describe the expected topology a
//! rolling update validates against.

mod cluster;
mod instance_group;
mod types;

pub use cluster::{Cluster, ClusterSpec};
pub use instance_group::{InstanceGroup, InstanceGroupList, InstanceGroupSpec};
pub use types::{normalize_version, InstanceGroupRole, KubernetesSpec, ProviderType};
