//! Error types for rolling updates
//!
//! Every variant carries the identifiers an operator needs to correlate a
//! failure with cloud state: instance IDs, node names and group names.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Process exit code used when the operator stops a rolling update at the prompt
pub const EXIT_CODE_USER_STOPPED: i32 = 3;

/// Process exit code for every other failure
pub const EXIT_CODE_FAILURE: i32 = 1;

/// Main error type for rolling update operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Missing or inconsistent session parameters
    #[error("configuration error: {0}")]
    Config(String),

    /// Cloud provider error outside of instance termination (listing, group deletion)
    #[error("provider error: {0}")]
    Provider(String),

    /// Cordon or eviction failed for a node
    #[error("failed to drain node {node:?}: {message}")]
    Drain {
        /// Kubernetes node name
        node: String,
        /// Description of what failed
        message: String,
    },

    /// The Node object could not be removed from the Kubernetes API
    #[error("error deleting node {node:?}: {message}")]
    NodeDelete {
        /// Kubernetes node name
        node: String,
        /// Description of what failed
        message: String,
    },

    /// The cloud provider failed to terminate an instance
    #[error("error deleting instance {instance:?}{}: {message}", node_suffix(.node))]
    InstanceTermination {
        /// Cloud instance ID
        instance: String,
        /// Kubernetes node name, when the instance was registered
        node: Option<String>,
        /// Description of what failed
        message: String,
    },

    /// Cluster validation failed
    #[error("cluster {cluster:?} did not pass validation: {message}")]
    Validation {
        /// Name of the cluster being validated
        cluster: String,
        /// Joined failure messages or the validator error
        message: String,
    },

    /// Cluster did not validate before the deadline
    #[error("cluster did not validate within a duration of {duration:?}")]
    ValidationTimeout {
        /// The validation timeout that elapsed
        duration: Duration,
    },

    /// Operator input could not be read
    #[error("unable to interpret input: {0}")]
    Prompt(String),

    /// The operator answered "no" at the interactive prompt
    #[error("user signaled to stop")]
    UserStopped,

    /// A single instance group failed to update
    #[error("rolling update of instance group {group:?} failed: {source}")]
    GroupUpdate {
        /// Instance group name
        group: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Several instance groups failed when running without fail-fast
    #[error("rolling update failed for instance groups {groups:?}: {first}")]
    GroupsFailed {
        /// Names of every failed group, in processing order
        groups: Vec<String>,
        /// The first failure encountered
        #[source]
        first: Box<Error>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A local file could not be read
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// File that was being read
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },
}

fn node_suffix(node: &Option<String>) -> String {
    node.as_deref()
        .map(|n| format!(", node {n:?}"))
        .unwrap_or_default()
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a provider error with the given message
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a drain error for the given node
    pub fn drain(node: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Drain {
            node: node.into(),
            message: msg.into(),
        }
    }

    /// Create a node deletion error for the given node
    pub fn node_delete(node: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::NodeDelete {
            node: node.into(),
            message: msg.into(),
        }
    }

    /// Create an instance termination error
    pub fn instance_termination(
        instance: impl Into<String>,
        node: Option<&str>,
        msg: impl Into<String>,
    ) -> Self {
        Self::InstanceTermination {
            instance: instance.into(),
            node: node.map(str::to_string),
            message: msg.into(),
        }
    }

    /// Create a validation error for the given cluster
    pub fn validation(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a prompt I/O error
    pub fn prompt(msg: impl Into<String>) -> Self {
        Self::Prompt(msg.into())
    }

    /// Create an I/O error for the file at `path`
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Wrap an error with the name of the instance group it came from
    pub fn group_update(group: impl Into<String>, source: Error) -> Self {
        Self::GroupUpdate {
            group: group.into(),
            source: Box::new(source),
        }
    }

    /// Returns true if this is a 404 from the Kubernetes API
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }

    /// Returns true if the operator stopped the run, however deeply wrapped
    pub fn is_user_stopped(&self) -> bool {
        match self {
            Self::UserStopped => true,
            Self::GroupUpdate { source, .. } => source.is_user_stopped(),
            Self::GroupsFailed { first, .. } => first.is_user_stopped(),
            _ => false,
        }
    }

    /// Exit code the binary should terminate with for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_user_stopped() {
            EXIT_CODE_USER_STOPPED
        } else {
            EXIT_CODE_FAILURE
        }
    }
}
