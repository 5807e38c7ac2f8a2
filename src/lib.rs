//! capv - Cluster API infrastructure provider for Viettel Cloud
//!
//! capv drives cloud resources (VPC checks, security groups, the API server
//! load balancer) and nested control plane components toward the state
//! declared on Kubernetes objects, one idempotent reconcile pass at a time.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (ViettelCluster, NestedControlPlane, NestedCluster)
//! - [`controller`] - Reconcile loops for the provider's CRDs
//! - [`converge`] - Get-or-create convergence of cloud resource families
//! - [`cloud`] - Viettel Cloud API client and readiness polling
//! - [`retry`] - Bounded exponential backoff
//! - [`config`] - Requeue and polling configuration
//! - [`error`] - Error types for the provider

#![deny(missing_docs)]

pub mod cloud;
pub mod config;
pub mod controller;
pub mod converge;
pub mod crd;
pub mod error;
pub mod retry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Port the Kubernetes API server listens on behind the load balancer
pub const API_SERVER_PORT: u16 = 6443;

/// Lowest port of the Kubernetes NodePort range
pub const NODE_PORT_MIN: u16 = 30000;

/// Highest port of the Kubernetes NodePort range
pub const NODE_PORT_MAX: u16 = 32767;

/// Field manager used for every patch the provider issues
pub const FIELD_MANAGER: &str = "capv-controller";
