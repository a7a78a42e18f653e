//! Node drain helper
//!
//! Draining happens client side: cordon the node so nothing new schedules on
//! it, then evict its pods through the Eviction API so PodDisruptionBudgets are
//! respected, then wait for the evicted pods to disappear.
//!
//! DaemonSet pods and static mirror pods are left alone. Pods using emptyDir
//! storage and pods without a controller are evicted; a PodDisruptionBudget is
//! the way to protect them.

use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, EvictParams, ListParams};
use kube::{Client, ResourceExt};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::retry::{retry_with_backoff_if, RetryConfig};
use crate::Error;

const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Cordons nodes and evicts their workloads
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeDrainer: Send + Sync {
    /// Mark a node unschedulable (`cordon = true`) or schedulable again
    async fn cordon_or_uncordon(&self, node: &Node, cordon: bool) -> Result<(), Error>;

    /// Evict every drainable pod from a node and wait for them to terminate
    async fn drain_node(&self, node_name: &str) -> Result<(), Error>;
}

/// Tuning for [`KubeDrainer`]
#[derive(Clone, Debug)]
pub struct DrainConfig {
    /// Pods evicted concurrently, including the wait for their deletion
    pub concurrent_evictions: usize,
    /// Backoff for evictions refused with 429 or 500
    pub eviction_retry: RetryConfig,
    /// Interval between checks that an evicted pod is gone
    pub deletion_check_interval: Duration,
    /// Maximum time to wait for one evicted pod to be deleted
    pub deletion_timeout: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            concurrent_evictions: 5,
            eviction_retry: RetryConfig {
                max_attempts: 60,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(5),
                backoff_multiplier: 2.0,
            },
            deletion_check_interval: Duration::from_secs(5),
            deletion_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// NodeDrainer backed by the Kubernetes API
pub struct KubeDrainer {
    client: Client,
    config: DrainConfig,
}

impl KubeDrainer {
    /// Create a drainer with default tuning
    pub fn new(client: Client) -> Self {
        Self::with_config(client, DrainConfig::default())
    }

    /// Create a drainer with explicit tuning
    pub fn with_config(client: Client, config: DrainConfig) -> Self {
        Self { client, config }
    }

    fn pod_api(&self, pod: &Pod) -> Api<Pod> {
        match pod.metadata.namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }

    async fn evict_pod(&self, pod: &Pod) -> Result<(), kube::Error> {
        let api = self.pod_api(pod);
        let name = pod.name_any();

        retry_with_backoff_if(
            &self.config.eviction_retry,
            "evict_pod",
            is_retriable_eviction_error,
            || async {
                match api.evict(&name, &EvictParams::default()).await {
                    Ok(_) => {
                        debug!(pod = %name, "Evicted pod");
                        Ok(())
                    }
                    Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
                    Err(e) => Err(e),
                }
            },
        )
        .await
    }

    async fn wait_for_deletion(&self, pod: &Pod) -> Result<(), String> {
        let api = self.pod_api(pod);
        let name = pod.name_any();
        let uid = pod.metadata.uid.clone();
        let deadline = Instant::now() + self.config.deletion_timeout;

        loop {
            match api.get(&name).await {
                Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
                // a StatefulSet may already have recreated a pod with the same name
                Ok(current) if current.metadata.uid != uid => return Ok(()),
                Ok(_) => debug!(pod = %name, "Pod not yet deleted"),
                Err(e) => warn!(pod = %name, error = %e, "Could not check pod deletion"),
            }

            if Instant::now() >= deadline {
                return Err(format!(
                    "pod {name} was not deleted within {:?}",
                    self.config.deletion_timeout
                ));
            }
            tokio::time::sleep(self.config.deletion_check_interval).await;
        }
    }
}

/// Throttling (PodDisruptionBudget) and server errors may clear; transport
/// errors are retried as well
fn is_retriable_eviction_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => ae.code == 429 || ae.code == 500,
        _ => true,
    }
}

/// Pods a drain must evict: everything except DaemonSet and mirror pods
fn pods_to_evict(pods: impl IntoIterator<Item = Pod>) -> Vec<Pod> {
    pods.into_iter()
        .filter(|pod| {
            let daemonset = pod
                .owner_references()
                .iter()
                .any(|r| r.controller == Some(true) && r.kind == "DaemonSet");
            if daemonset {
                debug!(pod = %pod.name_any(), "Not draining DaemonSet pod");
                return false;
            }
            if pod.annotations().contains_key(MIRROR_POD_ANNOTATION) {
                debug!(pod = %pod.name_any(), "Not draining static mirror pod");
                return false;
            }
            true
        })
        .collect()
}

#[async_trait]
impl NodeDrainer for KubeDrainer {
    async fn cordon_or_uncordon(&self, node: &Node, cordon: bool) -> Result<(), Error> {
        let name = node.name_any();
        let unschedulable = node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false);
        if unschedulable == cordon {
            debug!(node = %name, cordon, "Node already in desired schedulable state");
            return Ok(());
        }

        let api: Api<Node> = Api::all(self.client.clone());
        let result = if cordon {
            api.cordon(&name).await
        } else {
            api.uncordon(&name).await
        };
        result.map_err(|e| Error::drain(&name, format!("cordon={cordon}: {e}")))?;

        info!(node = %name, cordon, "Updated node schedulability");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn drain_node(&self, node_name: &str) -> Result<(), Error> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let pods = api
            .list(&ListParams::default().fields(&format!("spec.nodeName={node_name}")))
            .await
            .map_err(|e| Error::drain(node_name, format!("failed to list pods: {e}")))?;

        let targets = pods_to_evict(pods.items);
        info!(node = %node_name, pods = targets.len(), "Draining node");

        let failures: Vec<String> = stream::iter(targets)
            .map(|pod| async move {
                let name = format!(
                    "{}/{}",
                    pod.namespace().unwrap_or_default(),
                    pod.name_any()
                );
                if let Err(e) = self.evict_pod(&pod).await {
                    return Some(format!("evicting {name}: {e}"));
                }
                self.wait_for_deletion(&pod).await.err()
            })
            .buffer_unordered(self.config.concurrent_evictions.max(1))
            .filter_map(|failure| async move { failure })
            .collect()
            .await;

        if !failures.is_empty() {
            return Err(Error::drain(node_name, failures.join("; ")));
        }

        info!(node = %node_name, "Drained node");
        Ok(())
    }
}
