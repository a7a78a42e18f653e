//! InstanceGroup Custom Resource Definition
//!
//! An InstanceGroup is a named role within a cluster (a master zone, a node
//! pool, a bastion pool) implemented by one provider scaling construct.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::InstanceGroupRole;

/// Specification for an InstanceGroup
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rollout.lattice.dev",
    version = "v1alpha1",
    derive = "PartialEq",
    kind = "InstanceGroup",
    plural = "instancegroups",
    shortname = "ig",
    namespaced,
    printcolumn = r#"{"name":"Role","type":"string","jsonPath":".spec.role"}"#,
    printcolumn = r#"{"name":"Min","type":"integer","jsonPath":".spec.minSize"}"#,
    printcolumn = r#"{"name":"Max","type":"integer","jsonPath":".spec.maxSize"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InstanceGroupSpec {
    /// Role of the instances in this group
    pub role: InstanceGroupRole,

    /// Minimum number of instances
    #[serde(default)]
    pub min_size: u32,

    /// Maximum number of instances
    #[serde(default)]
    pub max_size: u32,

    /// Zones the group spans
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,

    /// Name of the backing scaling construct (MachineDeployment or
    /// KubeadmControlPlane); defaults to the group name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling_group: Option<String>,
}

impl InstanceGroup {
    /// Name of the provider scaling construct implementing this group
    pub fn scaling_group_name(&self) -> String {
        self.spec
            .scaling_group
            .clone()
            .unwrap_or_else(|| self.name_any())
    }
}

/// Every instance group of one cluster
///
/// The validator needs the whole list to know the expected topology, even
/// when only one group is being updated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceGroupList {
    /// The instance groups
    pub items: Vec<InstanceGroup>,
}

impl InstanceGroupList {
    /// Create a list from instance groups
    pub fn new(items: Vec<InstanceGroup>) -> Self {
        Self { items }
    }

    /// Returns true if the list holds no groups
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Find a group by name
    pub fn get(&self, name: &str) -> Option<&InstanceGroup> {
        self.items.iter().find(|ig| ig.name_any() == name)
    }

    /// Groups with the given role
    pub fn with_role(&self, role: InstanceGroupRole) -> impl Iterator<Item = &InstanceGroup> {
        self.items.iter().filter(move |ig| ig.spec.role == role)
    }

    /// Sum of `minSize` across groups with the given role
    pub fn min_size_for_role(&self, role: InstanceGroupRole) -> u32 {
        self.with_role(role).map(|ig| ig.spec.min_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str, role: InstanceGroupRole, min: u32) -> InstanceGroup {
        InstanceGroup::new(
            name,
            InstanceGroupSpec {
                role,
                min_size: min,
                max_size: min,
                zones: vec!["us-east-1a".to_string()],
                scaling_group: None,
            },
        )
    }

    #[test]
    fn test_scaling_group_defaults_to_name() {
        let mut ig = group("nodes-us-east-1a", InstanceGroupRole::Node, 2);
        assert_eq!(ig.scaling_group_name(), "nodes-us-east-1a");

        ig.spec.scaling_group = Some("prod-md-0".to_string());
        assert_eq!(ig.scaling_group_name(), "prod-md-0");
    }

    #[test]
    fn test_list_lookups() {
        let list = InstanceGroupList::new(vec![
            group("master-us-east-1a", InstanceGroupRole::Master, 1),
            group("nodes-a", InstanceGroupRole::Node, 2),
            group("nodes-b", InstanceGroupRole::Node, 3),
            group("bastions", InstanceGroupRole::Bastion, 1),
        ]);

        assert!(list.get("nodes-b").is_some());
        assert!(list.get("nodes-c").is_none());
        assert_eq!(list.min_size_for_role(InstanceGroupRole::Node), 5);
        assert_eq!(list.min_size_for_role(InstanceGroupRole::Master), 1);
        assert_eq!(list.with_role(InstanceGroupRole::Bastion).count(), 1);
        assert!(!list.is_empty());
        assert!(InstanceGroupList::default().is_empty());
    }

    #[test]
    fn test_lists_compare_by_content() {
        let a = InstanceGroupList::new(vec![group("nodes", InstanceGroupRole::Node, 2)]);
        let b = InstanceGroupList::new(vec![group("nodes", InstanceGroupRole::Node, 2)]);
        let c = InstanceGroupList::new(vec![group("nodes", InstanceGroupRole::Node, 3)]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_spec_parses_from_yaml() {
        let yaml = r#"
apiVersion: rollout.lattice.dev/v1alpha1
kind: InstanceGroup
metadata:
  name: master-us-east-1a
spec:
  role: Master
  minSize: 1
  maxSize: 1
  scalingGroup: prod-control-plane
"#;
        let ig: InstanceGroup = serde_yaml::from_str(yaml).expect("should parse");
        assert_eq!(ig.spec.role, InstanceGroupRole::Master);
        assert_eq!(ig.scaling_group_name(), "prod-control-plane");
        assert!(ig.spec.zones.is_empty());
    }
}
