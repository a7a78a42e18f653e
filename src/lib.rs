//! Lattice Rollout - rolling instance replacement for Kubernetes clusters
//!
//! Replaces the compute instances backing a running cluster one instance group
//! at a time: drain the node, remove it from the API, terminate the instance,
//! wait for the replacement, validate the cluster, and optionally ask the
//! operator before moving on.
//!
//! # Modules
//!
//! - [`crd`] - Cluster and InstanceGroup resources describing the expected topology
//! - [`cloud`] - Provider-agnostic view of instance groups and their members
//! - [`kube_client`] - Node deletion and client construction
//! - [`drain`] - Cordon and evict workloads from a node
//! - [`validation`] - Cluster health checks
//! - [`prompt`] - Interactive operator gate between instances
//! - [`rolling_update`] - Per-group rolling update engine
//! - [`orchestrator`] - Cross-group ordering and result aggregation
//! - [`plan`] - Preview of what a rolling update would touch
//! - [`config`] - Cluster bundle loading and rolling update options
//! - [`retry`] - Backoff helper for transient API failures
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cloud;
pub mod config;
pub mod crd;
pub mod drain;
pub mod error;
pub mod kube_client;
pub mod orchestrator;
pub mod plan;
pub mod prompt;
pub mod retry;
pub mod rolling_update;
pub mod validation;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

use std::time::Duration;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Shared by RollingUpdateOptions defaults, CLI flag defaults and tests.

/// Interval between cluster validation attempts after an instance is terminated
pub const VALIDATION_TICK: Duration = Duration::from_secs(30);

/// Default time to wait for the cluster to validate after each termination
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default time to wait for pods to stabilize after a drain
pub const DEFAULT_POST_DRAIN_DELAY: Duration = Duration::from_secs(5);

/// Default pacing delay after terminating a master instance
pub const DEFAULT_MASTER_INTERVAL: Duration = Duration::from_secs(15);

/// Default pacing delay after terminating a node instance
pub const DEFAULT_NODE_INTERVAL: Duration = Duration::from_secs(15);

/// Default pacing delay after terminating a bastion instance
pub const DEFAULT_BASTION_INTERVAL: Duration = Duration::from_secs(15);
