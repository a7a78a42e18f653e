//! Stories about storing instance groups in the API server

use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, CustomResourceExt};

use lattice_rollout::crd::{Cluster, InstanceGroup, InstanceGroupRole, InstanceGroupSpec};

use super::helpers::ensure_test_cluster;

/// Apply both CRDs and wait until the InstanceGroup API answers
async fn install_crds(client: &Client) {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("lattice-rollout-test").force();
    for crd in [Cluster::crd(), InstanceGroup::crd()] {
        let name = crd.metadata.name.clone().expect("crd has a name");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .expect("failed to apply crd");
    }

    let groups: Api<InstanceGroup> = Api::namespaced(client.clone(), "default");
    for _ in 0..30 {
        if groups.list(&ListParams::default().limit(1)).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("InstanceGroup CRD never became established");
}

/// Story: an instance group written to the API reads back unchanged
///
/// Operators may keep instance groups in the management cluster instead of a
/// bundle file; the stored form must carry role, sizes and scaling group.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_instance_group_round_trips_through_the_api() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    install_crds(&client).await;

    let api: Api<InstanceGroup> = Api::namespaced(client.clone(), "default");
    let name = "rollout-test-masters";
    let _ = api.delete(name, &DeleteParams::default()).await;

    let group = InstanceGroup::new(
        name,
        InstanceGroupSpec {
            role: InstanceGroupRole::Master,
            min_size: 3,
            max_size: 3,
            zones: vec!["us-east-1a".to_string(), "us-east-1b".to_string()],
            scaling_group: Some("prod-control-plane".to_string()),
        },
    );
    api.create(&PostParams::default(), &group)
        .await
        .expect("failed to create instance group");

    let stored = api.get(name).await.expect("instance group should exist");
    assert_eq!(stored.spec, group.spec);
    assert_eq!(stored.scaling_group_name(), "prod-control-plane");

    api.delete(name, &DeleteParams::default())
        .await
        .expect("failed to delete instance group");
}
