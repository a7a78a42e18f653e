//! Integration tests for the Kubernetes-facing collaborators
//!
//! # Test Organization
//!
//! - `crd_operations`: store an InstanceGroup through the API and read it back
//!
//! - `node_lifecycle`: cordon, drain and delete a Node object the way a
//!   rolling update does for every replaced instance
//!
//! - `cluster_validation`: run the cluster validator against a real control
//!   plane and check how it reports an undersized instance group
//!
//! # Running These Tests
//!
//! ```bash
//! kind create cluster --name rollout-test
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod cluster_validation;
mod crd_operations;
mod helpers;
mod node_lifecycle;
