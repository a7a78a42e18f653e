//! Update orchestration across instance groups
//!
//! Groups are processed one at a time in role order: bastions first, then
//! masters, then nodes. Within a role, groups go in name order. A failed group
//! stops the run unless fail-fast is turned off, in which case the remaining
//! groups are still attempted and every failure is reported at the end. An
//! operator stop always ends the run immediately.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::cloud::{unknown_groups, CloudInstanceGroup, CloudProvider};
use crate::config::RollingUpdateOptions;
use crate::crd::{Cluster, InstanceGroupList, InstanceGroupRole};
use crate::drain::{KubeDrainer, NodeDrainer};
use crate::kube_client::{KubeNodeClient, NodeClient};
use crate::prompt::{Prompter, TerminalPrompter};
use crate::rolling_update::{GroupUpdateParams, PromptSession, RollingUpdateInstanceGroup};
use crate::validation::{ClusterValidator, KubeClusterValidator};
use crate::{Error, Result};

/// Kubernetes-side collaborators; absent when running cloud-only
#[derive(Clone)]
pub struct KubeCollaborators {
    /// Node deletion
    pub nodes: Arc<dyn NodeClient>,
    /// Cordon and drain
    pub drainer: Arc<dyn NodeDrainer>,
    /// Cluster health checks
    pub validator: Arc<dyn ClusterValidator>,
}

impl KubeCollaborators {
    /// Collaborators backed by a workload cluster client
    pub fn from_client(client: Client) -> Self {
        Self {
            nodes: Arc::new(KubeNodeClient::new(client.clone())),
            drainer: Arc::new(KubeDrainer::new(client.clone())),
            validator: Arc::new(KubeClusterValidator::new(client)),
        }
    }
}

/// Session parameters and collaborators shared by every group in a run
pub struct RollingUpdateCluster {
    cloud: Arc<dyn CloudProvider>,
    kube: Option<KubeCollaborators>,
    prompter: Option<Arc<dyn Prompter>>,
    options: RollingUpdateOptions,
}

/// Builder for [`RollingUpdateCluster`]
pub struct RollingUpdateClusterBuilder {
    cloud: Arc<dyn CloudProvider>,
    kube: Option<KubeCollaborators>,
    prompter: Option<Arc<dyn Prompter>>,
    options: RollingUpdateOptions,
}

impl RollingUpdateClusterBuilder {
    fn new(cloud: Arc<dyn CloudProvider>) -> Self {
        Self {
            cloud,
            kube: None,
            prompter: None,
            options: RollingUpdateOptions::default(),
        }
    }

    /// Set the Kubernetes collaborators
    pub fn kube(mut self, kube: KubeCollaborators) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the prompter (primarily for testing)
    pub fn prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Set the session options
    pub fn options(mut self, options: RollingUpdateOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the session; interactive sessions default to prompting on stdio
    pub fn build(self) -> RollingUpdateCluster {
        let prompter = match (self.prompter, self.options.interactive) {
            (Some(p), _) => Some(p),
            (None, true) => Some(Arc::new(TerminalPrompter::stdio()) as Arc<dyn Prompter>),
            (None, false) => None,
        };
        RollingUpdateCluster {
            cloud: self.cloud,
            kube: self.kube,
            prompter,
            options: self.options,
        }
    }
}

/// Outcome of one instance group in a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupStatus {
    /// Every member of the update set was replaced
    Updated {
        /// Number of instances replaced
        instances: usize,
    },
    /// Nothing needed updating
    UpToDate,
    /// The group failed
    Failed {
        /// Error description
        message: String,
    },
}

/// One row of a [`RollingUpdateReport`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupOutcome {
    /// Instance group name
    pub group: String,
    /// Instance group role
    pub role: InstanceGroupRole,
    /// What happened
    pub status: GroupStatus,
}

/// Per-group outcomes of a run, in processing order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RollingUpdateReport {
    /// Outcomes in processing order
    pub groups: Vec<GroupOutcome>,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl RollingUpdateReport {
    /// Total instances replaced
    pub fn updated_instances(&self) -> usize {
        self.groups
            .iter()
            .map(|g| match g.status {
                GroupStatus::Updated { instances } => instances,
                _ => 0,
            })
            .sum()
    }

    /// Names of failed groups
    pub fn failed_groups(&self) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|g| matches!(g.status, GroupStatus::Failed { .. }))
            .map(|g| g.group.as_str())
            .collect()
    }
}

impl RollingUpdateCluster {
    /// Start building a session over a cloud provider
    pub fn builder(cloud: Arc<dyn CloudProvider>) -> RollingUpdateClusterBuilder {
        RollingUpdateClusterBuilder::new(cloud)
    }

    /// The cloud provider
    pub fn cloud(&self) -> &Arc<dyn CloudProvider> {
        &self.cloud
    }

    /// Kubernetes collaborators, if configured
    pub fn kube(&self) -> Option<&KubeCollaborators> {
        self.kube.as_ref()
    }

    /// Operator prompter, if configured
    pub fn prompter(&self) -> Option<&Arc<dyn Prompter>> {
        self.prompter.as_ref()
    }

    /// Session options
    pub fn options(&self) -> &RollingUpdateOptions {
        &self.options
    }

    /// Parameters for a group of the given role
    pub fn params_for(&self, role: InstanceGroupRole) -> GroupUpdateParams {
        let sleep_after_terminate = match role {
            InstanceGroupRole::Bastion => self.options.bastion_interval,
            InstanceGroupRole::Master => self.options.master_interval,
            InstanceGroupRole::Node => self.options.node_interval,
        };
        GroupUpdateParams {
            is_bastion: role.is_bastion(),
            sleep_after_terminate,
            validation_timeout: self.options.validation_timeout,
        }
    }

    /// Roll every group in `groups`, bastions first, then masters, then nodes
    ///
    /// `instance_groups` must list every instance group of the cluster, not
    /// just the ones selected for this run.
    #[instrument(skip_all, fields(groups = groups.len()))]
    pub async fn rolling_update(
        &self,
        groups: &BTreeMap<String, CloudInstanceGroup>,
        cluster: &Cluster,
        instance_groups: &InstanceGroupList,
    ) -> Result<RollingUpdateReport> {
        let start = Instant::now();
        let mut session = PromptSession::new(self.options.interactive);
        let mut report = RollingUpdateReport::default();
        let mut failures: Vec<(String, Error)> = Vec::new();

        for role in InstanceGroupRole::ORDERED {
            for (name, group) in groups.iter().filter(|(_, g)| g.role() == role) {
                let engine = RollingUpdateInstanceGroup::new(self.cloud.clone(), group.clone());
                let result = engine
                    .rolling_update(
                        self,
                        &mut session,
                        cluster,
                        instance_groups,
                        self.params_for(role),
                    )
                    .await;

                match result {
                    Ok(0) => report.groups.push(GroupOutcome {
                        group: name.clone(),
                        role,
                        status: GroupStatus::UpToDate,
                    }),
                    Ok(instances) => report.groups.push(GroupOutcome {
                        group: name.clone(),
                        role,
                        status: GroupStatus::Updated { instances },
                    }),
                    Err(e) if e.is_user_stopped() => return Err(e),
                    Err(e) => {
                        error!(group = %name, role = %role, error = %e, "Instance group update failed");
                        if self.options.fail_fast {
                            return Err(Error::group_update(name, e));
                        }
                        report.groups.push(GroupOutcome {
                            group: name.clone(),
                            role,
                            status: GroupStatus::Failed {
                                message: e.to_string(),
                            },
                        });
                        failures.push((name.clone(), e));
                    }
                }
            }
        }

        report.elapsed = start.elapsed();
        info!(
            updated = report.updated_instances(),
            failed = failures.len(),
            elapsed = ?report.elapsed,
            "Rolling update finished"
        );

        let mut failures = failures.into_iter();
        match failures.next() {
            None => Ok(report),
            Some((first_group, first)) => {
                let mut names = vec![first_group];
                names.extend(failures.map(|(name, _)| name));
                warn!(groups = ?names, "Some instance groups failed to update");
                Err(Error::GroupsFailed {
                    groups: names,
                    first: Box::new(first),
                })
            }
        }
    }

    /// Delete one instance group's scaling construct and all of its instances
    pub async fn delete_group(&self, group: CloudInstanceGroup) -> Result<()> {
        RollingUpdateInstanceGroup::new(self.cloud.clone(), group)
            .delete()
            .await
    }
}

/// Restricts a run to some instance groups
///
/// An empty selector selects everything. Names and roles combine: a group is
/// selected when it matches both filters that are set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupSelector {
    /// Instance group names to include
    pub names: Vec<String>,
    /// Roles to include
    pub roles: Vec<InstanceGroupRole>,
}

impl GroupSelector {
    /// Filter group snapshots, rejecting names the cluster does not have
    pub fn select(
        &self,
        groups: BTreeMap<String, CloudInstanceGroup>,
        instance_groups: &InstanceGroupList,
    ) -> Result<BTreeMap<String, CloudInstanceGroup>> {
        let unknown = unknown_groups(self.names.iter().map(String::as_str), instance_groups);
        if !unknown.is_empty() {
            return Err(Error::config(format!(
                "unknown instance groups: {}",
                unknown.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        Ok(groups
            .into_iter()
            .filter(|(name, _)| self.names.is_empty() || self.names.contains(name))
            .filter(|(_, g)| self.roles.is_empty() || self.roles.contains(&g.role()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{CloudInstanceGroupMember, MockCloudProvider, ScalingGroupRef};
    use crate::crd::{ClusterSpec, InstanceGroup, InstanceGroupSpec, KubernetesSpec, ProviderType};
    use std::sync::Mutex;

    fn instance_group(name: &str, role: InstanceGroupRole) -> InstanceGroup {
        InstanceGroup::new(
            name,
            InstanceGroupSpec {
                role,
                min_size: 1,
                max_size: 1,
                zones: vec![],
                scaling_group: None,
            },
        )
    }

    fn cloud_group(name: &str, role: InstanceGroupRole, stale: &[&str]) -> CloudInstanceGroup {
        let mut group = CloudInstanceGroup::new(
            instance_group(name, role),
            name,
            ScalingGroupRef {
                kind: "MachineDeployment".to_string(),
                name: name.to_string(),
                namespace: None,
            },
        );
        for id in stale {
            group
                .add_member(CloudInstanceGroupMember::new(*id), true)
                .expect("unique member");
        }
        group
    }

    fn cluster() -> Cluster {
        Cluster::new(
            "prod",
            ClusterSpec {
                provider: ProviderType::Aws,
                kubernetes: KubernetesSpec {
                    version: "1.32.0".to_string(),
                },
                capi_namespace: None,
            },
        )
    }

    fn fixture() -> (BTreeMap<String, CloudInstanceGroup>, InstanceGroupList) {
        let groups = vec![
            cloud_group("nodes-b", InstanceGroupRole::Node, &["nb-1"]),
            cloud_group("masters", InstanceGroupRole::Master, &["m-1"]),
            cloud_group("nodes-a", InstanceGroupRole::Node, &["na-1"]),
            cloud_group("bastions", InstanceGroupRole::Bastion, &["b-1"]),
        ];
        let list = InstanceGroupList::new(groups.iter().map(|g| g.instance_group.clone()).collect());
        let map = groups.into_iter().map(|g| (g.name(), g)).collect();
        (map, list)
    }

    fn cloud_only(fail_fast: bool) -> RollingUpdateOptions {
        RollingUpdateOptions {
            cloud_only: true,
            fail_fast,
            master_interval: Duration::ZERO,
            node_interval: Duration::ZERO,
            bastion_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Story: bastions go first, then the control plane, then workers
    #[tokio::test]
    async fn story_groups_roll_in_role_order() {
        let terminated = Arc::new(Mutex::new(Vec::new()));
        let t = terminated.clone();
        let mut cloud = MockCloudProvider::new();
        cloud.expect_delete_instance().returning(move |m| {
            t.lock().unwrap().push(m.id.clone());
            Ok(())
        });

        let ctx = RollingUpdateCluster::builder(Arc::new(cloud))
            .options(cloud_only(true))
            .build();
        let (groups, list) = fixture();

        let report = ctx
            .rolling_update(&groups, &cluster(), &list)
            .await
            .expect("run succeeds");

        assert_eq!(*terminated.lock().unwrap(), vec!["b-1", "m-1", "na-1", "nb-1"]);
        assert_eq!(report.updated_instances(), 4);
        let order: Vec<_> = report.groups.iter().map(|g| g.group.as_str()).collect();
        assert_eq!(order, vec!["bastions", "masters", "nodes-a", "nodes-b"]);
    }

    /// Story: fail-fast stops at the first failed group
    #[tokio::test]
    async fn story_fail_fast_stops_at_first_failed_group() {
        let terminated = Arc::new(Mutex::new(Vec::new()));
        let t = terminated.clone();
        let mut cloud = MockCloudProvider::new();
        cloud.expect_delete_instance().returning(move |m| {
            t.lock().unwrap().push(m.id.clone());
            if m.id == "m-1" {
                Err(Error::provider("quota exceeded"))
            } else {
                Ok(())
            }
        });

        let ctx = RollingUpdateCluster::builder(Arc::new(cloud))
            .options(cloud_only(true))
            .build();
        let (groups, list) = fixture();

        let err = ctx
            .rolling_update(&groups, &cluster(), &list)
            .await
            .expect_err("run must fail");

        assert!(matches!(err, Error::GroupUpdate { ref group, .. } if group == "masters"));
        assert!(err.to_string().contains("m-1"));
        assert_eq!(*terminated.lock().unwrap(), vec!["b-1", "m-1"]);
    }

    /// Story: without fail-fast every group is attempted and failures are listed
    #[tokio::test]
    async fn story_continue_on_error_attempts_every_group() {
        let mut cloud = MockCloudProvider::new();
        cloud.expect_delete_instance().returning(|m| {
            if m.id == "m-1" || m.id == "nb-1" {
                Err(Error::provider("quota exceeded"))
            } else {
                Ok(())
            }
        });

        let ctx = RollingUpdateCluster::builder(Arc::new(cloud))
            .options(cloud_only(false))
            .build();
        let (groups, list) = fixture();

        let err = ctx
            .rolling_update(&groups, &cluster(), &list)
            .await
            .expect_err("run must fail");

        match err {
            Error::GroupsFailed { groups, first } => {
                assert_eq!(groups, vec!["masters", "nodes-b"]);
                assert!(first.to_string().contains("m-1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_kube_client_is_config_error() {
        let cloud = MockCloudProvider::new();
        let ctx = RollingUpdateCluster::builder(Arc::new(cloud)).build();
        let (groups, list) = fixture();

        let err = ctx
            .rolling_update(&groups, &cluster(), &list)
            .await
            .expect_err("run must fail");
        assert!(matches!(err, Error::GroupUpdate { ref source, .. } if matches!(**source, Error::Config(_))));
    }

    #[tokio::test]
    async fn test_delete_group_delegates_to_cloud() {
        let mut cloud = MockCloudProvider::new();
        cloud
            .expect_delete_group()
            .withf(|g| g.name() == "nodes-a")
            .times(1)
            .returning(|_| Ok(()));

        let ctx = RollingUpdateCluster::builder(Arc::new(cloud)).build();
        let (mut groups, _) = fixture();
        let group = groups.remove("nodes-a").expect("group exists");
        ctx.delete_group(group).await.expect("delete succeeds");
    }

    #[test]
    fn test_params_follow_role() {
        let cloud = MockCloudProvider::new();
        let options = RollingUpdateOptions {
            master_interval: Duration::from_secs(1),
            node_interval: Duration::from_secs(2),
            bastion_interval: Duration::from_secs(3),
            ..Default::default()
        };
        let ctx = RollingUpdateCluster::builder(Arc::new(cloud))
            .options(options)
            .build();

        assert_eq!(ctx.params_for(InstanceGroupRole::Master).sleep_after_terminate, Duration::from_secs(1));
        assert_eq!(ctx.params_for(InstanceGroupRole::Node).sleep_after_terminate, Duration::from_secs(2));
        let bastion = ctx.params_for(InstanceGroupRole::Bastion);
        assert!(bastion.is_bastion);
        assert_eq!(bastion.sleep_after_terminate, Duration::from_secs(3));
    }

    #[test]
    fn test_selector_filters_by_name_and_role() {
        let (groups, list) = fixture();

        let selected = GroupSelector::default()
            .select(groups.clone(), &list)
            .expect("select all");
        assert_eq!(selected.len(), 4);

        let selector = GroupSelector {
            names: vec![],
            roles: vec![InstanceGroupRole::Node],
        };
        let selected = selector.select(groups.clone(), &list).expect("select nodes");
        assert_eq!(selected.keys().collect::<Vec<_>>(), vec!["nodes-a", "nodes-b"]);

        let selector = GroupSelector {
            names: vec!["masters".to_string(), "nodes-a".to_string()],
            roles: vec![InstanceGroupRole::Node],
        };
        let selected = selector.select(groups.clone(), &list).expect("select");
        assert_eq!(selected.keys().collect::<Vec<_>>(), vec!["nodes-a"]);

        let selector = GroupSelector {
            names: vec!["gpu".to_string()],
            roles: vec![],
        };
        let err = selector.select(groups, &list).expect_err("unknown group");
        assert!(err.to_string().contains("gpu"));
    }
}
