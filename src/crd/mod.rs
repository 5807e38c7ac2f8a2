//! Custom Resource Definitions for the Viettel Cloud provider
//!
//! This module contains the CRDs the provider owns (ViettelCluster,
//! NestedControlPlane, NestedCluster) and typed views of the Cluster API and
//! nested-component objects it reads or creates.

mod capi;
mod cluster;
mod nested;
mod types;

pub use capi::{
    api_group, Cluster, ClusterSpec, InfrastructureKind, InfrastructureTarget, OwnedByCluster,
    CAPI_GROUP, PAUSED_ANNOTATION,
};
pub use cluster::{ViettelCluster, ViettelClusterSpec, ViettelClusterStatus};
pub use nested::{
    ComponentState, DataStore, DataStoreSpec, DataStoreStatus, Etcd, EtcdSpec, EtcdStatus,
    NestedCluster, NestedClusterSpec, NestedClusterStatus, NestedComponent, NestedControlPlane,
    NestedControlPlaneSpec, NestedControlPlaneStatus, TenantControlPlane, TenantControlPlaneSpec,
    TenantControlPlaneStatus,
};
pub use types::{
    ApiEndpoint, ControlPlaneStage, FailureReason, LoadBalancerPackage, LoadBalancerTopology,
    ReportsFailure, ResourceRef,
};
