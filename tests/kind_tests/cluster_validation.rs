//! Stories about validating a live cluster

use kube::api::ObjectMeta;

use lattice_rollout::crd::{
    Cluster, ClusterSpec, InstanceGroup, InstanceGroupList, InstanceGroupRole, InstanceGroupSpec,
    KubernetesSpec, ProviderType,
};
use lattice_rollout::validation::{ClusterValidator, KubeClusterValidator};

use super::helpers::ensure_test_cluster;

fn cluster() -> Cluster {
    Cluster {
        metadata: ObjectMeta {
            name: Some("kind".to_string()),
            ..Default::default()
        },
        spec: ClusterSpec {
            provider: ProviderType::Docker,
            kubernetes: KubernetesSpec {
                version: "1.32.0".to_string(),
            },
            capi_namespace: None,
        },
    }
}

fn instance_group(name: &str, role: InstanceGroupRole, min_size: u32) -> InstanceGroup {
    InstanceGroup::new(
        name,
        InstanceGroupSpec {
            role,
            min_size,
            max_size: min_size.max(1),
            zones: vec![],
            scaling_group: None,
        },
    )
}

/// Story: an instance group larger than the cluster fails validation
///
/// The validator compares ready nodes per role with the minimum sizes of the
/// instance groups, so asking for more masters than kind runs must fail
/// with a message naming the role.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_undersized_masters_fail_validation() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let validator = KubeClusterValidator::new(client);
    let list = InstanceGroupList::new(vec![instance_group(
        "masters",
        InstanceGroupRole::Master,
        50,
    )]);

    let result = validator
        .validate_cluster(&cluster(), &list)
        .await
        .expect("validator should reach the cluster");

    assert!(!result.passed());
    assert!(result
        .failures
        .iter()
        .any(|f| f.kind == "InstanceGroup" && f.name == "Master"));
}

/// Story: a bastion-only topology places no node requirements
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_bastions_are_not_counted() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let validator = KubeClusterValidator::new(client);
    let list = InstanceGroupList::new(vec![instance_group(
        "bastions",
        InstanceGroupRole::Bastion,
        3,
    )]);

    let result = validator
        .validate_cluster(&cluster(), &list)
        .await
        .expect("validator should reach the cluster");

    assert!(!result
        .failures
        .iter()
        .any(|f| f.kind == "InstanceGroup"));
}
