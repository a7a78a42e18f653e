//! Cluster validation with a deadline

use std::time::Duration;

use kube::ResourceExt;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, instrument};

use crate::crd::{Cluster, InstanceGroupList};
use crate::validation::ClusterValidator;
use crate::{Error, Result, VALIDATION_TICK};

/// Validate the cluster once
///
/// Both a validator error and a non-empty failure list fail the check.
pub async fn validate_cluster(
    validator: &dyn ClusterValidator,
    cluster: &Cluster,
    instance_groups: &InstanceGroupList,
) -> Result<()> {
    let name = cluster.name_any();
    let result = validator
        .validate_cluster(cluster, instance_groups)
        .await
        .map_err(|e| Error::validation(&name, e.to_string()))?;

    if result.passed() {
        Ok(())
    } else {
        Err(Error::validation(&name, result.messages().join(", ")))
    }
}

/// Validate repeatedly until the cluster passes or `duration` elapses
///
/// One attempt is made immediately, then one per 30s tick, so a duration
/// shorter than a tick still gets exactly one try.
pub async fn validate_cluster_with_duration(
    validator: &dyn ClusterValidator,
    cluster: &Cluster,
    instance_groups: &InstanceGroupList,
    duration: Duration,
) -> Result<()> {
    validate_with_tick(validator, cluster, instance_groups, duration, VALIDATION_TICK).await
}

#[instrument(skip_all, fields(cluster = %cluster.name_any(), duration = ?duration))]
pub(crate) async fn validate_with_tick(
    validator: &dyn ClusterValidator,
    cluster: &Cluster,
    instance_groups: &InstanceGroupList,
    duration: Duration,
    tick: Duration,
) -> Result<()> {
    if try_validate(validator, cluster, instance_groups, duration, tick).await {
        return Ok(());
    }

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut deadline => {
                return Err(Error::ValidationTimeout { duration });
            }
            _ = ticker.tick() => {
                if try_validate(validator, cluster, instance_groups, duration, tick).await {
                    return Ok(());
                }
            }
        }
    }
}

async fn try_validate(
    validator: &dyn ClusterValidator,
    cluster: &Cluster,
    instance_groups: &InstanceGroupList,
    duration: Duration,
    tick: Duration,
) -> bool {
    match validator.validate_cluster(cluster, instance_groups).await {
        Err(e) => {
            info!(
                error = %e,
                retry_in = ?tick,
                duration = ?duration,
                "Cluster did not validate, will try again"
            );
            false
        }
        Ok(result) if !result.passed() => {
            info!(
                failures = %result.messages().join(", "),
                retry_in = ?tick,
                duration = ?duration,
                "Cluster did not pass validation, will try again"
            );
            false
        }
        Ok(_) => {
            info!("Cluster validated");
            true
        }
    }
}
