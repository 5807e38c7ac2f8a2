//! ViettelCluster Custom Resource Definition
//!
//! The ViettelCluster CRD is the infrastructure half of a Cluster API cluster
//! running on Viettel Cloud. Its spec names user-owned network resources and
//! load balancer sizing; its status records every resource the provider
//! created on the cluster's behalf.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ApiEndpoint, FailureReason, ReportsFailure, ResourceRef};

/// Specification for a ViettelCluster
///
/// Everything except `controlPlaneEndpoint` is immutable after creation.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.git.viettel.vn",
    version = "v1",
    kind = "ViettelCluster",
    plural = "viettelclusters",
    shortname = "vcl",
    status = "ViettelClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"VPC","type":"string","jsonPath":".spec.vpc"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.controlPlaneEndpoint.host"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.failureReason"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ViettelClusterSpec {
    /// ID of the existing VPC the cluster lives in
    pub vpc: String,

    /// ID of the existing subnet inside `vpc`
    pub subnet: String,

    /// Project (tenant) that scopes every cloud call
    pub project_id: String,

    /// Region ID used for the load balancer
    pub region: String,

    /// Free-form owner label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Load balancer topology (SINGLE or ACTIVE_STANDBY); set together with the package
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_topology: Option<String>,

    /// Load balancer package (SMALL, MEDIUM or LARGE); set together with the topology
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_package: Option<String>,

    /// Whether the provider creates and owns the cluster's security groups
    #[serde(default = "default_true")]
    pub managed_security_groups: bool,

    /// API server endpoint, filled in once the control plane is reachable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,
}

fn default_true() -> bool {
    true
}

/// Status for a ViettelCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViettelClusterStatus {
    /// True once every owned resource exists and is active
    #[serde(default)]
    pub ready: bool,

    /// The declared VPC, as observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<ResourceRef>,

    /// The declared subnet, as observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<ResourceRef>,

    /// API server load balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<ResourceRef>,

    /// Server group behind the load balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_group: Option<ResourceRef>,

    /// Listener on the load balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener: Option<ResourceRef>,

    /// Security group for control plane nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_security_group: Option<ResourceRef>,

    /// Security group for worker nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_security_group: Option<ResourceRef>,

    /// Reason of the last failed pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,

    /// Human-readable detail of the last failed pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl ReportsFailure for ViettelClusterStatus {
    fn failure_reason_mut(&mut self) -> &mut Option<FailureReason> {
        &mut self.failure_reason
    }

    fn failure_message_mut(&mut self) -> &mut Option<String> {
        &mut self.failure_message
    }
}
