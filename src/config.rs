//! Rolling update options and cluster bundle loading
//!
//! A cluster bundle is a multi-document YAML file holding one `Cluster` and
//! the cluster's `InstanceGroup`s:
//!
//! ```yaml
//! apiVersion: rollout.lattice.dev/v1alpha1
//! kind: Cluster
//! metadata:
//!   name: prod
//! spec:
//!   provider: aws
//!   kubernetes:
//!     version: "1.32.0"
//! ---
//! apiVersion: rollout.lattice.dev/v1alpha1
//! kind: InstanceGroup
//! metadata:
//!   name: nodes-us-east-1a
//! spec:
//!   role: Node
//!   minSize: 3
//!   maxSize: 5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::crd::{Cluster, InstanceGroup, InstanceGroupList};
use crate::{Error, Result};

/// Parse a duration string
///
/// Supports `Nh` (hours), `Nm` (minutes), `Ns` (seconds) and plain seconds.
/// Examples: "1h", "30m", "35s", "90".
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || Error::config(format!("invalid duration '{s}', expected e.g. 1h, 30m, 35s"));

    let (digits, multiplier) = if let Some(hours) = s.strip_suffix('h') {
        (hours, 3600)
    } else if let Some(minutes) = s.strip_suffix('m') {
        (minutes, 60)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1)
    } else {
        (s, 1)
    };

    let n: u64 = digits.trim().parse().map_err(|_| invalid())?;
    let secs = n.checked_mul(multiplier).ok_or_else(invalid)?;
    Ok(Duration::from_secs(secs))
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Session parameters for a rolling update
///
/// Fixed for the duration of a run. Prompting can only be switched off
/// mid-run, and that state lives in the engine's prompt session.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RollingUpdateOptions {
    /// Replace members that are already current
    pub force: bool,
    /// Ask the operator before moving past each replaced instance
    pub interactive: bool,
    /// Abort when the cluster fails validation
    pub fail_on_validate: bool,
    /// Abort when a node fails to drain
    pub fail_on_drain_error: bool,
    /// Skip every Kubernetes API interaction
    pub cloud_only: bool,
    /// Wait after a successful drain for pods to reschedule
    #[serde(deserialize_with = "deserialize_duration")]
    pub post_drain_delay: Duration,
    /// Maximum time to wait for the cluster to validate after a termination
    #[serde(deserialize_with = "deserialize_duration")]
    pub validation_timeout: Duration,
    /// Pacing delay after terminating a master instance
    #[serde(deserialize_with = "deserialize_duration")]
    pub master_interval: Duration,
    /// Pacing delay after terminating a node instance
    #[serde(deserialize_with = "deserialize_duration")]
    pub node_interval: Duration,
    /// Pacing delay after terminating a bastion instance
    #[serde(deserialize_with = "deserialize_duration")]
    pub bastion_interval: Duration,
    /// Stop at the first failed instance group
    pub fail_fast: bool,
}

impl Default for RollingUpdateOptions {
    fn default() -> Self {
        Self {
            force: false,
            interactive: false,
            fail_on_validate: false,
            fail_on_drain_error: true,
            cloud_only: false,
            post_drain_delay: crate::DEFAULT_POST_DRAIN_DELAY,
            validation_timeout: crate::DEFAULT_VALIDATION_TIMEOUT,
            master_interval: crate::DEFAULT_MASTER_INTERVAL,
            node_interval: crate::DEFAULT_NODE_INTERVAL,
            bastion_interval: crate::DEFAULT_BASTION_INTERVAL,
            fail_fast: true,
        }
    }
}

/// A cluster and every one of its instance groups
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterBundle {
    /// The cluster
    pub cluster: Cluster,
    /// All of the cluster's instance groups
    pub instance_groups: InstanceGroupList,
}

impl ClusterBundle {
    /// Load a bundle from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse a bundle from multi-document YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut cluster: Option<Cluster> = None;
        let mut groups = Vec::new();

        for document in serde_yaml::Deserializer::from_str(content) {
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|e| Error::serialization(e.to_string()))?;
            if value.is_null() {
                continue;
            }

            let kind = value
                .get("kind")
                .and_then(|k| k.as_str())
                .unwrap_or_default()
                .to_string();
            match kind.as_str() {
                "Cluster" => {
                    if cluster.is_some() {
                        return Err(Error::config("bundle contains more than one Cluster"));
                    }
                    let parsed: Cluster = serde_yaml::from_value(value)
                        .map_err(|e| Error::serialization(format!("invalid Cluster: {e}")))?;
                    cluster = Some(parsed);
                }
                "InstanceGroup" => {
                    let parsed: InstanceGroup = serde_yaml::from_value(value).map_err(|e| {
                        Error::serialization(format!("invalid InstanceGroup: {e}"))
                    })?;
                    groups.push(parsed);
                }
                other => warn!(kind = %other, "Skipping unsupported document in cluster bundle"),
            }
        }

        let cluster = cluster.ok_or_else(|| Error::config("bundle does not contain a Cluster"))?;
        cluster.validate()?;

        Ok(Self {
            cluster,
            instance_groups: InstanceGroupList::new(groups),
        })
    }
}
