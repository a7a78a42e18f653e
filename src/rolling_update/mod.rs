//! Rolling update engine for a single instance group
//!
//! Replaces the stale members of one [`CloudInstanceGroup`] strictly one at a
//! time. For each member:
//!
//! 1. cordon and drain its node
//! 2. delete the Node object so a same-named replacement is not left cordoned
//! 3. terminate the instance
//! 4. wait for the provider to start the replacement
//! 5. validate the cluster
//! 6. ask the operator, when interactive
//!
//! Bastions and cloud-only runs skip every Kubernetes step. The group
//! snapshot is taken once before the run and never re-listed; validation after
//! each termination is what catches drift.

mod phase;
mod validate;

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use tracing::{debug, error, info, instrument, warn};

pub use phase::{MemberPhase, PromptSession};
pub use validate::{validate_cluster, validate_cluster_with_duration};

use phase::MemberProgress;

use crate::cloud::{CloudInstanceGroup, CloudInstanceGroupMember, CloudProvider};
use crate::crd::{Cluster, InstanceGroupList};
use crate::orchestrator::{KubeCollaborators, RollingUpdateCluster};
use crate::prompt::PromptDecision;
use crate::{Error, Result};

fn drain_error(node: &str, context: &str, err: Error) -> Error {
    match err {
        Error::Drain { .. } => err,
        other => Error::drain(node, format!("{context}: {other}")),
    }
}

/// Rolling update of one instance group
pub struct RollingUpdateInstanceGroup {
    cloud: Arc<dyn CloudProvider>,
    group: CloudInstanceGroup,
}

/// Per-group parameters that vary with the group's role
#[derive(Clone, Copy, Debug)]
pub struct GroupUpdateParams {
    /// The group holds bastions, which are outside the Kubernetes cluster
    pub is_bastion: bool,
    /// Pacing delay after each termination
    pub sleep_after_terminate: Duration,
    /// Maximum time to wait for the cluster to validate after each termination
    pub validation_timeout: Duration,
}

impl RollingUpdateInstanceGroup {
    /// Create an engine for one group snapshot
    pub fn new(cloud: Arc<dyn CloudProvider>, group: CloudInstanceGroup) -> Self {
        Self { cloud, group }
    }

    /// Members this run would replace
    pub fn update_set(&self, force: bool) -> Vec<&CloudInstanceGroupMember> {
        let mut update: Vec<_> = self.group.need_update().iter().collect();
        if force {
            update.extend(self.group.ready().iter());
        }
        update
    }

    /// Replace the group's stale members, returning how many were replaced
    ///
    /// `instance_groups` must describe every instance group of the cluster;
    /// the validator needs the full topology. A Kubernetes client set is
    /// required unless the run is cloud-only.
    #[instrument(skip_all, fields(group = %self.group.name()))]
    pub async fn rolling_update(
        &self,
        ctx: &RollingUpdateCluster,
        session: &mut PromptSession,
        cluster: &Cluster,
        instance_groups: &InstanceGroupList,
        params: GroupUpdateParams,
    ) -> Result<usize> {
        let options = ctx.options();

        let kube = match (options.cloud_only, ctx.kube()) {
            (true, _) => None,
            (false, Some(kube)) => Some(kube),
            (false, None) => {
                return Err(Error::config(
                    "rolling update is missing a Kubernetes client",
                ))
            }
        };
        if instance_groups.is_empty() {
            return Err(Error::config(
                "rolling update is missing the instance group list",
            ));
        }

        let update = self.update_set(options.force);
        if update.is_empty() {
            info!(group = %self.group.human_name, "No instances need updating");
            return Ok(0);
        }

        // Kubernetes steps only apply to cluster members
        let cluster_kube = kube.filter(|_| !params.is_bastion);

        match cluster_kube {
            Some(kube) => {
                if let Err(e) = validate_cluster(kube.validator.as_ref(), cluster, instance_groups).await {
                    if options.fail_on_validate {
                        return Err(e);
                    }
                    warn!(
                        error = %e,
                        "Cluster validation failed, proceeding since fail-on-validate is not set"
                    );
                }
            }
            None if params.is_bastion => {
                debug!("Not validating the cluster as the group holds bastions")
            }
            None => debug!("Not validating the cluster in cloud-only mode"),
        }

        info!(
            group = %self.group.human_name,
            instances = update.len(),
            "Starting rolling update"
        );

        for member in &update {
            self.replace_member(ctx, session, cluster, instance_groups, cluster_kube, member, params)
                .await?;
        }

        info!(group = %self.group.human_name, instances = update.len(), "Rolling update complete");
        Ok(update.len())
    }

    #[allow(clippy::too_many_arguments)]
    async fn replace_member(
        &self,
        ctx: &RollingUpdateCluster,
        session: &mut PromptSession,
        cluster: &Cluster,
        instance_groups: &InstanceGroupList,
        kube: Option<&KubeCollaborators>,
        member: &CloudInstanceGroupMember,
        params: GroupUpdateParams,
    ) -> Result<()> {
        let options = ctx.options();
        let node_name = member.node_name();
        let mut progress = MemberProgress::new(&member.id, node_name.as_deref());

        let registered = member.node.as_ref().zip(node_name.as_deref());
        match (kube, registered) {
            (Some(kube), Some((node, name))) => {
                progress.advance(MemberPhase::Draining);
                info!(instance = %member.id, node = %name, "Draining node");
                match self.drain_node(kube, node, name).await {
                    Ok(()) => {
                        if !options.post_drain_delay.is_zero() {
                            info!(
                                node = %name,
                                delay = ?options.post_drain_delay,
                                "Waiting for pods to stabilize after draining"
                            );
                            tokio::time::sleep(options.post_drain_delay).await;
                        }
                    }
                    Err(e) if options.fail_on_drain_error => {
                        error!(instance = %member.id, node = %name, error = %e, "Failed to drain node");
                        return Err(progress.abort(e));
                    }
                    Err(e) => {
                        warn!(
                            instance = %member.id,
                            node = %name,
                            error = %e,
                            "Ignoring drain failure since fail-on-drain-error is not set"
                        );
                    }
                }

                progress.advance(MemberPhase::NodeDeleting);
                info!(node = %name, "Deleting node from Kubernetes");
                match kube.nodes.delete_node(name).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => debug!(node = %name, "Node already deleted"),
                    Err(e) => {
                        let e = match e {
                            Error::NodeDelete { .. } => e,
                            other => Error::node_delete(name, other.to_string()),
                        };
                        return Err(progress.abort(e));
                    }
                }
            }
            (Some(_), None) if member.node.is_some() => {
                warn!(
                    instance = %member.id,
                    "Skipping drain and node deletion, registered node has no name"
                );
            }
            (Some(_), None) => {
                warn!(
                    instance = %member.id,
                    "Skipping drain and node deletion, instance is not registered in Kubernetes"
                );
            }
            (None, _) if params.is_bastion => {}
            (None, _) => warn!(instance = %member.id, "Not draining in cloud-only mode"),
        }

        progress.advance(MemberPhase::Terminating);
        match &node_name {
            Some(node) => info!(
                instance = %member.id,
                node = %node,
                group = %self.group.human_name,
                "Terminating instance"
            ),
            None => info!(instance = %member.id, group = %self.group.human_name, "Terminating instance"),
        }
        if let Err(e) = self.cloud.delete_instance(member).await {
            error!(instance = %member.id, node = ?node_name, error = %e, "Failed to terminate instance");
            let e = match e {
                Error::InstanceTermination { .. } => e,
                other => Error::instance_termination(&member.id, node_name.as_deref(), other.to_string()),
            };
            return Err(progress.abort(e));
        }
        progress.advance(MemberPhase::Terminated);

        info!(delay = ?params.sleep_after_terminate, "Waiting after terminating instance");
        tokio::time::sleep(params.sleep_after_terminate).await;

        if params.is_bastion {
            info!(instance = %member.id, "Terminated bastion instance, continuing");
            progress.advance(MemberPhase::Done);
            return Ok(());
        }

        if let Some(kube) = kube {
            progress.advance(MemberPhase::Validating);
            info!("Validating the cluster");
            if let Err(e) = validate_cluster_with_duration(
                kube.validator.as_ref(),
                cluster,
                instance_groups,
                params.validation_timeout,
            )
            .await
            {
                if options.fail_on_validate {
                    error!(
                        instance = %member.id,
                        timeout = ?params.validation_timeout,
                        "Cluster did not validate after removing instance"
                    );
                    return Err(progress.abort(e));
                }
                warn!(
                    instance = %member.id,
                    error = %e,
                    "Cluster validation failed after removing instance, proceeding since fail-on-validate is not set"
                );
            }
            progress.advance(MemberPhase::Validated);
        } else {
            warn!("Not validating the cluster in cloud-only mode");
        }
        progress.advance(MemberPhase::Done);

        if session.is_interactive() {
            let prompter = ctx
                .prompter()
                .ok_or_else(|| Error::config("interactive rolling update has no prompter"))?;
            match prompter.prompt(&member.id, node_name.as_deref()).await? {
                PromptDecision::Continue => {}
                PromptDecision::AlwaysContinue => {
                    info!("Prompting disabled for the rest of the run");
                    session.disable_prompting();
                }
                PromptDecision::Stop => {
                    warn!(instance = %member.id, "Operator stopped the rolling update");
                    return Err(Error::UserStopped);
                }
            }
        }

        debug!(instance = %member.id, phase = %progress.phase(), "Member replaced");
        Ok(())
    }

    async fn drain_node(&self, kube: &KubeCollaborators, node: &Node, name: &str) -> Result<()> {
        kube.drainer
            .cordon_or_uncordon(node, true)
            .await
            .map_err(|e| drain_error(name, "error cordoning node", e))?;
        kube.drainer
            .drain_node(name)
            .await
            .map_err(|e| drain_error(name, "error draining node", e))
    }

    /// Delete the group's scaling construct and every instance in it
    pub async fn delete(&self) -> Result<()> {
        info!(group = %self.group.human_name, "Deleting instance group");
        self.cloud.delete_group(&self.group).await
    }
}
