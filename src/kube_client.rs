//! Kubernetes client helpers
//!
//! Client construction, API discovery for Cluster API kinds, and the Node
//! deletion seam used by the rolling update engine.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DeleteParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a client from an explicit kubeconfig, or infer one from the environment
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::config(format!(
                    "failed to read kubeconfig {}: {e}",
                    path.display()
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {e}")))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer kube config: {e}")))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(Error::from)
}

/// Build an ApiResource using discovery to find the served version of a kind
///
/// Cluster API kinds move between versions (v1beta1, v1beta2) independently,
/// so the version is never hard-coded.
pub async fn build_api_resource_with_discovery(
    client: &Client,
    group: &str,
    kind: &str,
) -> Result<ApiResource, Error> {
    use kube::discovery::Discovery;

    let discovery = Discovery::new(client.clone())
        .filter(&[group])
        .run()
        .await
        .map_err(|e| Error::provider(format!("API discovery for {group} failed: {e}")))?;

    for api_group in discovery.groups() {
        if api_group.name() != group {
            continue;
        }
        for (ar, _caps) in api_group.resources_by_stability() {
            if ar.kind == kind {
                return Ok(ar);
            }
        }
    }

    Err(Error::provider(format!(
        "resource {group}/{kind} not found in API discovery"
    )))
}

/// Removes Node objects from the Kubernetes API
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Delete a Node by name; a Node that is already gone counts as deleted
    async fn delete_node(&self, name: &str) -> Result<(), Error>;
}

/// NodeClient backed by the Kubernetes API
pub struct KubeNodeClient {
    client: Client,
}

impl KubeNodeClient {
    /// Create a new node client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeClient for KubeNodeClient {
    async fn delete_node(&self, name: &str) -> Result<(), Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(node = %name, "Deleted node");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(node = %name, "Node already deleted");
                Ok(())
            }
            Err(e) => Err(Error::node_delete(name, e.to_string())),
        }
    }
}
