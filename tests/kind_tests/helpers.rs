//! Shared setup for the kind tests

use k8s_openapi::api::core::v1::{Namespace, Node};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::Client;

use lattice_rollout::kube_client::create_client;

/// Connect to the cluster from the default kubeconfig and make sure it answers
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let client = create_client(None)
        .await
        .map_err(|e| format!("failed to create client: {e}"))?;
    Api::<Namespace>::all(client.clone())
        .list(&ListParams::default().limit(1))
        .await
        .map_err(|e| format!("cluster is not reachable: {e}"))?;
    Ok(client)
}

/// Register a Node object with no kubelet behind it
pub async fn create_fake_node(client: &Client, name: &str) -> Node {
    let api: Api<Node> = Api::all(client.clone());
    let _ = api.delete(name, &DeleteParams::default()).await;

    let node = Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                [("rollout.lattice.dev/test".to_string(), "true".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    };
    api.create(&PostParams::default(), &node)
        .await
        .expect("failed to create node")
}

/// Remove a node, ignoring whether it exists
pub async fn cleanup_node(client: &Client, name: &str) {
    let api: Api<Node> = Api::all(client.clone());
    let _ = api.delete(name, &DeleteParams::default()).await;
}
