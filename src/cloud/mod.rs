//! Provider-agnostic view of the compute instances backing a cluster
//!
//! A [`CloudInstanceGroup`] is a point-in-time snapshot of one instance group:
//! which members run stale configuration and which are current. The rolling
//! update engine consumes snapshots and calls back into a [`CloudProvider`]
//! for destructive actions; it never branches on which provider is behind
//! the trait.

mod capi;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

pub use capi::CapiCloud;

use crate::crd::{Cluster, InstanceGroup, InstanceGroupList, InstanceGroupRole, ProviderType};
use crate::Error;

/// One compute instance plus its Kubernetes Node, if it registered one
#[derive(Clone, Debug, PartialEq)]
pub struct CloudInstanceGroupMember {
    /// Cloud instance ID (for Cluster API, the Machine name)
    pub id: String,
    /// Node object observed when the snapshot was taken
    pub node: Option<Node>,
}

impl CloudInstanceGroupMember {
    /// Create a member without a registered node
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node: None,
        }
    }

    /// Attach the Node this instance registered as
    pub fn with_node(mut self, node: Node) -> Self {
        self.node = Some(node);
        self
    }

    /// Name of the registered Kubernetes node, if it has one
    pub fn node_name(&self) -> Option<String> {
        self.node
            .as_ref()
            .map(|n| n.name_any())
            .filter(|name| !name.is_empty())
    }
}

/// Reference to the provider-native scaling construct behind a group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScalingGroupRef {
    /// Kind of the construct (e.g., "MachineDeployment")
    pub kind: String,
    /// Name of the construct
    pub name: String,
    /// Namespace, when the construct is namespaced
    pub namespace: Option<String>,
}

impl fmt::Display for ScalingGroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// All compute instances implementing one instance group role
///
/// `need_update` and `ready` are disjoint: [`add_member`](Self::add_member)
/// refuses an instance ID already present in either partition.
#[derive(Clone, Debug, PartialEq)]
pub struct CloudInstanceGroup {
    /// The instance group this snapshot belongs to
    pub instance_group: InstanceGroup,
    /// Human-readable name used in logs and the plan table
    pub human_name: String,
    /// Backing scaling construct
    pub scaling_group: ScalingGroupRef,
    /// Minimum group size
    pub min_size: u32,
    /// Maximum group size
    pub max_size: u32,
    need_update: Vec<CloudInstanceGroupMember>,
    ready: Vec<CloudInstanceGroupMember>,
}

impl CloudInstanceGroup {
    /// Create an empty snapshot for an instance group
    pub fn new(
        instance_group: InstanceGroup,
        human_name: impl Into<String>,
        scaling_group: ScalingGroupRef,
    ) -> Self {
        let min_size = instance_group.spec.min_size;
        let max_size = instance_group.spec.max_size;
        Self {
            instance_group,
            human_name: human_name.into(),
            scaling_group,
            min_size,
            max_size,
            need_update: Vec::new(),
            ready: Vec::new(),
        }
    }

    /// Name of the instance group
    pub fn name(&self) -> String {
        self.instance_group.name_any()
    }

    /// Role of the instance group
    pub fn role(&self) -> InstanceGroupRole {
        self.instance_group.spec.role
    }

    /// Add a member to the `need_update` or `ready` partition
    pub fn add_member(
        &mut self,
        member: CloudInstanceGroupMember,
        needs_update: bool,
    ) -> Result<(), Error> {
        if self.members().any(|m| m.id == member.id) {
            return Err(Error::provider(format!(
                "instance {} is already a member of group {}",
                member.id,
                self.name()
            )));
        }
        if needs_update {
            self.need_update.push(member);
        } else {
            self.ready.push(member);
        }
        Ok(())
    }

    /// Members running stale configuration
    pub fn need_update(&self) -> &[CloudInstanceGroupMember] {
        &self.need_update
    }

    /// Members running current configuration
    pub fn ready(&self) -> &[CloudInstanceGroupMember] {
        &self.ready
    }

    /// Every member, stale ones first
    pub fn members(&self) -> impl Iterator<Item = &CloudInstanceGroupMember> {
        self.need_update.iter().chain(self.ready.iter())
    }

    /// Number of members that registered a Kubernetes node
    pub fn registered_nodes(&self) -> usize {
        self.members().filter(|m| m.node.is_some()).count()
    }
}

/// Destructive and listing operations a cloud provider exposes to rolling updates
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Terminate one instance
    async fn delete_instance(&self, member: &CloudInstanceGroupMember) -> Result<(), Error>;

    /// Delete the scaling construct behind a group and all of its instances
    async fn delete_group(&self, group: &CloudInstanceGroup) -> Result<(), Error>;

    /// Snapshot every instance group, keyed by instance group name
    ///
    /// `nodes` links instances to the Kubernetes nodes they registered as;
    /// pass an empty slice when running without cluster access.
    async fn list_instance_groups(
        &self,
        cluster: &Cluster,
        instance_groups: &InstanceGroupList,
        nodes: &[Node],
    ) -> Result<BTreeMap<String, CloudInstanceGroup>, Error>;
}

/// Create the cloud provider for a cluster
///
/// Every provider type is served by its Cluster API infrastructure provider,
/// so all of them resolve to [`CapiCloud`] against the management cluster.
pub fn create_cloud(
    provider: ProviderType,
    client: Client,
    namespace: impl Into<String>,
) -> Arc<dyn CloudProvider> {
    tracing::debug!(provider = %provider, "Selecting Cluster API cloud provider");
    Arc::new(CapiCloud::new(client, namespace))
}

/// Names of instance groups in `groups` that are absent from `list`
pub(crate) fn unknown_groups<'a>(
    groups: impl IntoIterator<Item = &'a str>,
    list: &InstanceGroupList,
) -> BTreeSet<String> {
    groups
        .into_iter()
        .filter(|name| list.get(name).is_none())
        .map(str::to_string)
        .collect()
}
