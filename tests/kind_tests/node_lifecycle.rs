//! Stories about what happens to a Node object while its instance is replaced

use k8s_openapi::api::core::v1::Node;
use kube::api::Api;

use lattice_rollout::drain::{KubeDrainer, NodeDrainer};
use lattice_rollout::kube_client::{KubeNodeClient, NodeClient};

use super::helpers::{cleanup_node, create_fake_node, ensure_test_cluster};

/// Story: a node is cordoned, drained and removed before its instance goes
///
/// The node has no kubelet, so nothing is scheduled on it and the drain has
/// nothing to evict. What matters is that each step is visible in the API.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_node_is_cordoned_drained_and_deleted() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let name = "rollout-test-lifecycle";
    let node = create_fake_node(&client, name).await;
    let api: Api<Node> = Api::all(client.clone());

    let drainer = KubeDrainer::new(client.clone());
    drainer
        .cordon_or_uncordon(&node, true)
        .await
        .expect("cordon should succeed");
    let cordoned = api.get(name).await.expect("node should exist");
    assert_eq!(
        cordoned.spec.and_then(|s| s.unschedulable),
        Some(true),
        "node should be unschedulable after cordon"
    );

    drainer
        .drain_node(name)
        .await
        .expect("drain of an empty node should succeed");

    let nodes = KubeNodeClient::new(client.clone());
    nodes.delete_node(name).await.expect("delete should succeed");
    let gone = api.get_opt(name).await.expect("get should succeed");
    assert!(gone.is_none(), "node should be gone after delete");

    cleanup_node(&client, name).await;
}

/// Story: deleting a node that is already gone is not an error
///
/// A rolling update resumed after a crash may find the node already removed.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_deleting_a_missing_node_succeeds_twice() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let name = "rollout-test-missing";
    cleanup_node(&client, name).await;

    let nodes = KubeNodeClient::new(client.clone());
    nodes
        .delete_node(name)
        .await
        .expect("first delete of a missing node should succeed");
    nodes
        .delete_node(name)
        .await
        .expect("second delete of a missing node should succeed");
}

/// Story: uncordon restores scheduling on a node that was cordoned
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_uncordon_restores_scheduling() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let name = "rollout-test-uncordon";
    let node = create_fake_node(&client, name).await;
    let api: Api<Node> = Api::all(client.clone());
    let drainer = KubeDrainer::new(client.clone());

    drainer
        .cordon_or_uncordon(&node, true)
        .await
        .expect("cordon should succeed");
    let cordoned = api.get(name).await.expect("node should exist");
    drainer
        .cordon_or_uncordon(&cordoned, false)
        .await
        .expect("uncordon should succeed");

    let node = api.get(name).await.expect("node should exist");
    assert_ne!(node.spec.and_then(|s| s.unschedulable), Some(true));

    cleanup_node(&client, name).await;
}
