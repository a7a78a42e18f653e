//! Cluster health validation
//!
//! A validation compares the observed cluster with the expected topology
//! described by the instance group list. Every call produces a fresh
//! [`ValidationResult`]; nothing is cached between attempts.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{Cluster, InstanceGroupList, InstanceGroupRole};
use crate::Error;

const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";
const SYSTEM_NAMESPACE: &str = "kube-system";

/// One specific reason the cluster is not healthy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Kind of object that failed (e.g., "Node", "Pod", "InstanceGroup")
    pub kind: String,
    /// Name of the object
    pub name: String,
    /// Human-readable description
    pub message: String,
}

impl ValidationFailure {
    /// Create a failure record
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}: {}", self.kind, self.name, self.message)
    }
}

/// Outcome of one validation attempt
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Failures in the order they were found
    pub failures: Vec<ValidationFailure>,
}

impl ValidationResult {
    /// True when no failures were found
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failure descriptions in order
    pub fn messages(&self) -> Vec<String> {
        self.failures.iter().map(ToString::to_string).collect()
    }
}

/// Determines whether a cluster is healthy
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterValidator: Send + Sync {
    /// Validate the cluster against the expected topology
    ///
    /// An `Err` means validation could not be performed; an unhealthy cluster
    /// is reported through [`ValidationResult::failures`].
    async fn validate_cluster(
        &self,
        cluster: &Cluster,
        instance_groups: &InstanceGroupList,
    ) -> Result<ValidationResult, Error>;
}

/// ClusterValidator backed by the workload cluster's API
pub struct KubeClusterValidator {
    client: Client,
}

impl KubeClusterValidator {
    /// Create a validator over the workload cluster
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterValidator for KubeClusterValidator {
    async fn validate_cluster(
        &self,
        cluster: &Cluster,
        instance_groups: &InstanceGroupList,
    ) -> Result<ValidationResult, Error> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let nodes = nodes.list(&ListParams::default()).await?.items;

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), SYSTEM_NAMESPACE);
        let pods = pods.list(&ListParams::default()).await?.items;

        let result = evaluate(instance_groups, &nodes, &pods);
        debug!(
            cluster = %cluster.name_any(),
            failures = result.failures.len(),
            "Validated cluster"
        );
        Ok(result)
    }
}

fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

fn node_role(node: &Node) -> InstanceGroupRole {
    if node.labels().contains_key(CONTROL_PLANE_LABEL) {
        InstanceGroupRole::Master
    } else {
        InstanceGroupRole::Node
    }
}

fn pod_is_healthy(pod: &Pod) -> Result<(), String> {
    let Some(status) = pod.status.as_ref() else {
        return Err("pod has no status".to_string());
    };
    match status.phase.as_deref() {
        Some("Succeeded") => return Ok(()),
        Some("Running") => {}
        Some(phase) => return Err(format!("pod is {phase}")),
        None => return Err("pod phase unknown".to_string()),
    }

    let not_ready: Vec<&str> = status
        .container_statuses
        .iter()
        .flatten()
        .filter(|cs| !cs.ready)
        .map(|cs| cs.name.as_str())
        .collect();
    if not_ready.is_empty() {
        Ok(())
    } else {
        Err(format!("containers not ready: {}", not_ready.join(", ")))
    }
}

/// Compare observed nodes and system pods with the expected topology
///
/// Bastions never register nodes and are not counted.
pub(crate) fn evaluate(
    instance_groups: &InstanceGroupList,
    nodes: &[Node],
    system_pods: &[Pod],
) -> ValidationResult {
    let mut failures = Vec::new();
    let mut ready_by_role: BTreeMap<InstanceGroupRole, u32> = BTreeMap::new();

    for node in nodes {
        if node_is_ready(node) {
            *ready_by_role.entry(node_role(node)).or_default() += 1;
        } else {
            failures.push(ValidationFailure::new(
                "Node",
                node.name_any(),
                "node is not ready",
            ));
        }
    }

    for role in [InstanceGroupRole::Master, InstanceGroupRole::Node] {
        let expected = instance_groups.min_size_for_role(role);
        let ready = ready_by_role.get(&role).copied().unwrap_or(0);
        if ready < expected {
            failures.push(ValidationFailure::new(
                "InstanceGroup",
                role.to_string(),
                format!("expected at least {expected} ready nodes, found {ready}"),
            ));
        }
    }

    for pod in system_pods {
        if let Err(message) = pod_is_healthy(pod) {
            failures.push(ValidationFailure::new(
                "Pod",
                format!("{SYSTEM_NAMESPACE}/{}", pod.name_any()),
                message,
            ));
        }
    }

    ValidationResult { failures }
}
