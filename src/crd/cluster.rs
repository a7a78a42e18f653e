//! Cluster Custom Resource Definition
//!
//! The Cluster CRD names a cluster whose instances are rolled, the provider
//! backing it and the Kubernetes version every instance should run.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{KubernetesSpec, ProviderType};

/// Specification for a Cluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rollout.lattice.dev",
    version = "v1alpha1",
    derive = "PartialEq",
    kind = "Cluster",
    plural = "clusters",
    shortname = "rc",
    namespaced = false,
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.provider"}"#,
    printcolumn = r#"{"name":"K8s","type":"string","jsonPath":".spec.kubernetes.version"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Infrastructure provider backing the cluster's instances
    #[serde(default)]
    pub provider: ProviderType,

    /// Kubernetes version every instance should run
    pub kubernetes: KubernetesSpec,

    /// Namespace holding the cluster's Cluster API resources
    ///
    /// Defaults to `capi-<cluster name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capi_namespace: Option<String>,
}

impl Cluster {
    /// Namespace holding this cluster's Cluster API resources
    pub fn capi_namespace(&self) -> String {
        self.spec
            .capi_namespace
            .clone()
            .unwrap_or_else(|| format!("capi-{}", self.name_any()))
    }

    /// Check the fields a rolling update depends on
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.metadata.name.as_deref().unwrap_or_default().is_empty() {
            return Err(crate::Error::config("cluster must have metadata.name"));
        }
        if self.spec.kubernetes.version.trim().is_empty() {
            return Err(crate::Error::config(format!(
                "cluster {} must set spec.kubernetes.version",
                self.name_any()
            )));
        }
        Ok(())
    }
}
