//! Cluster API backed cloud provider
//!
//! Instances are CAPI Machines. Node and bastion groups are backed by a
//! MachineDeployment, master groups by a KubeadmControlPlane. Terminating an
//! instance deletes its Machine and lets the owning controller create the
//! replacement.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use tracing::{debug, info, warn};

use super::{CloudInstanceGroup, CloudInstanceGroupMember, CloudProvider, ScalingGroupRef};
use crate::crd::{normalize_version, Cluster, InstanceGroup, InstanceGroupList, InstanceGroupRole};
use crate::kube_client::build_api_resource_with_discovery;
use crate::Error;

const CLUSTER_API_GROUP: &str = "cluster.x-k8s.io";
const CONTROL_PLANE_GROUP: &str = "controlplane.cluster.x-k8s.io";

const MACHINE_KIND: &str = "Machine";
const MACHINE_DEPLOYMENT_KIND: &str = "MachineDeployment";
const CONTROL_PLANE_KIND: &str = "KubeadmControlPlane";

const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";
const DEPLOYMENT_NAME_LABEL: &str = "cluster.x-k8s.io/deployment-name";
const CONTROL_PLANE_NAME_LABEL: &str = "cluster.x-k8s.io/control-plane-name";

/// Cloud provider that drives instances through Cluster API resources
pub struct CapiCloud {
    client: Client,
    namespace: String,
}

impl CapiCloud {
    /// Create a provider over the CAPI resources in `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    async fn api_for(&self, group: &str, kind: &str) -> Result<Api<DynamicObject>, Error> {
        let ar: ApiResource = build_api_resource_with_discovery(&self.client, group, kind).await?;
        Ok(Api::namespaced_with(self.client.clone(), &self.namespace, &ar))
    }

    async fn owner_api(&self, role: InstanceGroupRole) -> Result<Api<DynamicObject>, Error> {
        let (group, kind) = owner_kind(role);
        self.api_for(group, kind).await
    }
}

/// API group and kind of the object owning a role's Machines
fn owner_kind(role: InstanceGroupRole) -> (&'static str, &'static str) {
    match role {
        InstanceGroupRole::Master => (CONTROL_PLANE_GROUP, CONTROL_PLANE_KIND),
        _ => (CLUSTER_API_GROUP, MACHINE_DEPLOYMENT_KIND),
    }
}

/// Label linking a Machine to the owning object of a role
fn owner_label(role: InstanceGroupRole) -> &'static str {
    match role {
        InstanceGroupRole::Master => CONTROL_PLANE_NAME_LABEL,
        _ => DEPLOYMENT_NAME_LABEL,
    }
}

fn str_at<'a>(obj: &'a DynamicObject, path: &[&str]) -> Option<&'a str> {
    let mut value = &obj.data;
    for key in path {
        value = value.get(key)?;
    }
    value.as_str()
}

/// Kubernetes version the owning object wants its Machines to run
fn desired_version(role: InstanceGroupRole, owner: &DynamicObject) -> Option<String> {
    let path: &[&str] = match role {
        InstanceGroupRole::Master => &["spec", "version"],
        _ => &["spec", "template", "spec", "version"],
    };
    str_at(owner, path).map(normalize_version)
}

fn machine_version(machine: &DynamicObject) -> Option<String> {
    str_at(machine, &["spec", "version"]).map(normalize_version)
}

fn machine_node_name(machine: &DynamicObject) -> Option<&str> {
    str_at(machine, &["status", "nodeRef", "name"])
}

/// Build one group snapshot from the Machines labelled as its members
///
/// Machines already being deleted are left out; their replacement is in
/// flight and touching them again would only repeat the termination.
fn build_group(
    instance_group: &InstanceGroup,
    scaling_group: ScalingGroupRef,
    desired: &str,
    machines: &[DynamicObject],
    nodes: &BTreeMap<String, Node>,
) -> Result<CloudInstanceGroup, Error> {
    let label = owner_label(instance_group.spec.role);
    let human_name = format!("{} ({})", instance_group.name_any(), scaling_group);
    let owner_name = scaling_group.name.clone();
    let mut group = CloudInstanceGroup::new(instance_group.clone(), human_name, scaling_group);

    for machine in machines {
        if machine.labels().get(label) != Some(&owner_name) {
            continue;
        }
        if machine.metadata.deletion_timestamp.is_some() {
            debug!(machine = %machine.name_any(), "Skipping machine that is being deleted");
            continue;
        }

        let mut member = CloudInstanceGroupMember::new(machine.name_any());
        if let Some(node) = machine_node_name(machine).and_then(|n| nodes.get(n)) {
            member = member.with_node(node.clone());
        }

        let needs_update = machine_version(machine).as_deref() != Some(desired);
        group.add_member(member, needs_update)?;
    }

    Ok(group)
}

#[async_trait]
impl CloudProvider for CapiCloud {
    async fn delete_instance(&self, member: &CloudInstanceGroupMember) -> Result<(), Error> {
        let node = member.node_name();
        let api = self
            .api_for(CLUSTER_API_GROUP, MACHINE_KIND)
            .await
            .map_err(|e| Error::instance_termination(&member.id, node.as_deref(), e.to_string()))?;

        match api.delete(&member.id, &DeleteParams::default()).await {
            Ok(_) => {
                info!(instance = %member.id, node = ?node, "Deleted machine");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(instance = %member.id, "Machine already deleted");
                Ok(())
            }
            Err(e) => Err(Error::instance_termination(
                &member.id,
                node.as_deref(),
                e.to_string(),
            )),
        }
    }

    async fn delete_group(&self, group: &CloudInstanceGroup) -> Result<(), Error> {
        let api = self.owner_api(group.role()).await?;
        let name = &group.scaling_group.name;

        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(group = %group.name(), scaling_group = %group.scaling_group, "Deleted scaling group");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(group = %group.name(), "Scaling group already deleted");
                Ok(())
            }
            Err(e) => Err(Error::provider(format!(
                "failed to delete {}: {e}",
                group.scaling_group
            ))),
        }
    }

    async fn list_instance_groups(
        &self,
        cluster: &Cluster,
        instance_groups: &InstanceGroupList,
        nodes: &[Node],
    ) -> Result<BTreeMap<String, CloudInstanceGroup>, Error> {
        let cluster_name = cluster.name_any();
        let machine_api = self.api_for(CLUSTER_API_GROUP, MACHINE_KIND).await?;
        let selector = format!("{CLUSTER_NAME_LABEL}={cluster_name}");
        let machines = machine_api
            .list(&ListParams::default().labels(&selector))
            .await?
            .items;

        let nodes: BTreeMap<String, Node> = nodes
            .iter()
            .map(|n| (n.name_any(), n.clone()))
            .collect();
        let fallback_version = cluster.spec.kubernetes.capi_version();

        let mut groups = BTreeMap::new();
        for ig in &instance_groups.items {
            let role = ig.spec.role;
            let (_, kind) = owner_kind(role);
            let scaling_group = ScalingGroupRef {
                kind: kind.to_string(),
                name: ig.scaling_group_name(),
                namespace: Some(self.namespace.clone()),
            };

            let owner_api = self.owner_api(role).await?;
            let desired = match owner_api.get(&scaling_group.name).await {
                Ok(owner) => desired_version(role, &owner),
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    warn!(group = %ig.name_any(), scaling_group = %scaling_group, "Scaling group not found");
                    None
                }
                Err(e) => return Err(e.into()),
            }
            .unwrap_or_else(|| fallback_version.clone());

            let group = build_group(ig, scaling_group, &desired, &machines, &nodes)?;
            debug!(
                group = %group.name(),
                need_update = group.need_update().len(),
                ready = group.ready().len(),
                desired_version = %desired,
                "Listed instance group"
            );
            groups.insert(ig.name_any(), group);
        }

        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::InstanceGroupSpec;
    use kube::api::ObjectMeta;
    use serde_json::json;

    fn machine(name: &str, owner_label: &str, owner: &str, version: &str, node: Option<&str>) -> DynamicObject {
        let mut labels = BTreeMap::new();
        labels.insert(owner_label.to_string(), owner.to_string());
        labels.insert(CLUSTER_NAME_LABEL.to_string(), "prod".to_string());

        let mut data = json!({ "spec": { "version": version } });
        if let Some(node) = node {
            data["status"] = json!({ "nodeRef": { "kind": "Node", "name": node } });
        }

        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            data,
        }
    }

    fn node(name: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn instance_group(name: &str, role: InstanceGroupRole) -> InstanceGroup {
        InstanceGroup::new(
            name,
            InstanceGroupSpec {
                role,
                min_size: 1,
                max_size: 3,
                zones: vec![],
                scaling_group: None,
            },
        )
    }

    fn scaling_ref(kind: &str, name: &str) -> ScalingGroupRef {
        ScalingGroupRef {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: Some("capi-prod".to_string()),
        }
    }

    /// Story: Machines on an old version land in the need-update partition
    ///
    /// After bumping the MachineDeployment's version, existing Machines keep
    /// their old version until replaced; only they need a rolling update.
    #[test]
    fn story_stale_machines_need_update() {
        let ig = instance_group("nodes", InstanceGroupRole::Node);
        let machines = vec![
            machine("nodes-a", DEPLOYMENT_NAME_LABEL, "nodes", "v1.31.4", Some("ip-1")),
            machine("nodes-b", DEPLOYMENT_NAME_LABEL, "nodes", "v1.32.0", Some("ip-2")),
            machine("gpu-a", DEPLOYMENT_NAME_LABEL, "gpu", "v1.31.4", None),
        ];
        let nodes: BTreeMap<_, _> = [("ip-1".to_string(), node("ip-1"))].into_iter().collect();

        let group = build_group(
            &ig,
            scaling_ref(MACHINE_DEPLOYMENT_KIND, "nodes"),
            "v1.32.0",
            &machines,
            &nodes,
        )
        .expect("group builds");

        assert_eq!(group.need_update().len(), 1);
        assert_eq!(group.need_update()[0].id, "nodes-a");
        assert_eq!(group.need_update()[0].node_name().as_deref(), Some("ip-1"));
        assert_eq!(group.ready().len(), 1);
        assert_eq!(group.ready()[0].id, "nodes-b");
        // ip-2 was not in the observed node set
        assert!(group.ready()[0].node.is_none());
    }

    #[test]
    fn story_master_machines_match_by_control_plane_label() {
        let ig = instance_group("masters", InstanceGroupRole::Master);
        let machines = vec![
            machine("cp-a", CONTROL_PLANE_NAME_LABEL, "masters", "1.32.0", None),
            machine("md-a", DEPLOYMENT_NAME_LABEL, "masters", "1.31.0", None),
        ];

        let group = build_group(
            &ig,
            scaling_ref(CONTROL_PLANE_KIND, "masters"),
            "v1.32.0",
            &machines,
            &BTreeMap::new(),
        )
        .expect("group builds");

        assert_eq!(group.members().count(), 1);
        assert_eq!(group.ready()[0].id, "cp-a");
    }

    #[test]
    fn test_deleting_machines_are_skipped() {
        let ig = instance_group("nodes", InstanceGroupRole::Node);
        let mut deleting = machine("nodes-a", DEPLOYMENT_NAME_LABEL, "nodes", "v1.31.0", None);
        deleting.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                k8s_openapi::chrono::Utc::now(),
            ),
        );

        let group = build_group(
            &ig,
            scaling_ref(MACHINE_DEPLOYMENT_KIND, "nodes"),
            "v1.32.0",
            &[deleting],
            &BTreeMap::new(),
        )
        .expect("group builds");
        assert_eq!(group.members().count(), 0);
    }

    #[test]
    fn test_machine_without_version_needs_update() {
        let ig = instance_group("nodes", InstanceGroupRole::Node);
        let mut m = machine("nodes-a", DEPLOYMENT_NAME_LABEL, "nodes", "v1.32.0", None);
        m.data = json!({ "spec": {} });

        let group = build_group(
            &ig,
            scaling_ref(MACHINE_DEPLOYMENT_KIND, "nodes"),
            "v1.32.0",
            &[m],
            &BTreeMap::new(),
        )
        .expect("group builds");
        assert_eq!(group.need_update().len(), 1);
    }

    #[test]
    fn test_desired_version_paths() {
        let md = DynamicObject {
            types: None,
            metadata: ObjectMeta::default(),
            data: json!({ "spec": { "template": { "spec": { "version": "1.32.0" } } } }),
        };
        assert_eq!(
            desired_version(InstanceGroupRole::Node, &md).as_deref(),
            Some("v1.32.0")
        );
        assert_eq!(desired_version(InstanceGroupRole::Master, &md), None);

        let kcp = DynamicObject {
            types: None,
            metadata: ObjectMeta::default(),
            data: json!({ "spec": { "version": "v1.31.4" } }),
        };
        assert_eq!(
            desired_version(InstanceGroupRole::Master, &kcp).as_deref(),
            Some("v1.31.4")
        );
    }

    #[test]
    fn test_owner_kinds_by_role() {
        assert_eq!(owner_kind(InstanceGroupRole::Master).1, CONTROL_PLANE_KIND);
        assert_eq!(owner_kind(InstanceGroupRole::Node).1, MACHINE_DEPLOYMENT_KIND);
        assert_eq!(owner_kind(InstanceGroupRole::Bastion).1, MACHINE_DEPLOYMENT_KIND);
    }
}
