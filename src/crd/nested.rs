//! Nested control plane CRDs and the external components they drive
//!
//! A NestedControlPlane is backed by three external objects, each named after
//! it: a druid `Etcd`, a Kamaji `DataStore` and a Kamaji `TenantControlPlane`.
//! Only the fields needed to judge readiness are modelled for those.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ApiEndpoint, ControlPlaneStage, FailureReason, ReportsFailure};

/// Specification for a NestedControlPlane
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "controlplane.cluster.x-k8s.io",
    version = "v1alpha4",
    kind = "NestedControlPlane",
    plural = "nestedcontrolplanes",
    shortname = "ncp",
    status = "NestedControlPlaneStatus",
    namespaced,
    printcolumn = r#"{"name":"Stage","type":"string","jsonPath":".status.stage"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NestedControlPlaneSpec {}

/// Status for a NestedControlPlane
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NestedControlPlaneStatus {
    /// True once the endpoint has been published
    #[serde(default)]
    pub ready: bool,

    /// True once the tenant control plane has been requested
    #[serde(default)]
    pub initialized: bool,

    /// Stage observed on the last pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<ControlPlaneStage>,

    /// Reason of the last failed pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,

    /// Human-readable detail of the last failed pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl ReportsFailure for NestedControlPlaneStatus {
    fn failure_reason_mut(&mut self) -> &mut Option<FailureReason> {
        &mut self.failure_reason
    }

    fn failure_message_mut(&mut self) -> &mut Option<String> {
        &mut self.failure_message
    }
}

/// Specification for a NestedCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha4",
    kind = "NestedCluster",
    plural = "nestedclusters",
    shortname = "nc",
    status = "NestedClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NestedClusterSpec {
    /// API server endpoint of the nested control plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,
}

/// Status for a NestedCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NestedClusterStatus {
    /// Mirrors the control plane being both initialized and ready
    #[serde(default)]
    pub ready: bool,
}

/// druid `Etcd`; created with an empty spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "druid.gardener.cloud",
    version = "v1alpha1",
    kind = "Etcd",
    plural = "etcds",
    status = "EtcdStatus",
    namespaced
)]
pub struct EtcdSpec {}

/// Observed state of an `Etcd`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct EtcdStatus {
    /// Set by druid once the cluster serves requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
}

/// Kamaji `DataStore`; created with an empty spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kamaji.clastix.io",
    version = "v1alpha1",
    kind = "DataStore",
    plural = "datastores",
    status = "DataStoreStatus",
    namespaced
)]
pub struct DataStoreSpec {}

/// Observed state of a `DataStore`
///
/// Kamaji writes the list of tenants using the store; any written status
/// means the store was accepted.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataStoreStatus {
    /// Tenant control planes using this store
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub used_by: Vec<String>,
}

/// Kamaji `TenantControlPlane`; created with an empty spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kamaji.clastix.io",
    version = "v1alpha1",
    kind = "TenantControlPlane",
    plural = "tenantcontrolplanes",
    shortname = "tcp",
    status = "TenantControlPlaneStatus",
    namespaced
)]
pub struct TenantControlPlaneSpec {}

/// Observed state of a `TenantControlPlane`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantControlPlaneStatus {
    /// `host:port` of the tenant API server, empty until it is reachable
    #[serde(default)]
    pub control_plane_endpoint: String,
}

/// Components of a nested control plane, in creation order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NestedComponent {
    /// Key-value store cluster
    Etcd,
    /// Backing data store registration
    DataStore,
    /// Tenant API server
    TenantControlPlane,
}

impl NestedComponent {
    /// All components, leaves first
    pub const CHAIN: [NestedComponent; 3] = [Self::Etcd, Self::DataStore, Self::TenantControlPlane];

    /// Stage recorded while this component exists but is not ready
    pub fn requested_stage(&self) -> ControlPlaneStage {
        match self {
            Self::Etcd => ControlPlaneStage::EtcdRequested,
            Self::DataStore => ControlPlaneStage::StoreRequested,
            Self::TenantControlPlane => ControlPlaneStage::ControlPlaneRequested,
        }
    }

    /// Stage reached once this component is ready
    pub fn ready_stage(&self) -> ControlPlaneStage {
        match self {
            Self::Etcd => ControlPlaneStage::EtcdReady,
            Self::DataStore => ControlPlaneStage::StoreReady,
            Self::TenantControlPlane => ControlPlaneStage::ControlPlaneReady,
        }
    }
}

impl std::fmt::Display for NestedComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Etcd => write!(f, "Etcd"),
            Self::DataStore => write!(f, "DataStore"),
            Self::TenantControlPlane => write!(f, "TenantControlPlane"),
        }
    }
}

/// What a pass observed about one nested component
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComponentState {
    /// The object does not exist
    Absent,
    /// The object exists but is not usable yet
    Pending,
    /// The object is usable; the tenant control plane also reports its endpoint
    Ready {
        /// Raw `host:port` endpoint, only for the tenant control plane
        endpoint: Option<String>,
    },
}

impl ComponentState {
    /// Returns true if the component is ready
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

impl From<&Etcd> for ComponentState {
    fn from(etcd: &Etcd) -> Self {
        match etcd.status.as_ref().and_then(|s| s.ready) {
            Some(true) => Self::Ready { endpoint: None },
            _ => Self::Pending,
        }
    }
}

impl From<&DataStore> for ComponentState {
    fn from(ds: &DataStore) -> Self {
        match ds.status {
            Some(_) => Self::Ready { endpoint: None },
            None => Self::Pending,
        }
    }
}

impl From<&TenantControlPlane> for ComponentState {
    fn from(tcp: &TenantControlPlane) -> Self {
        match tcp.status.as_ref().map(|s| s.control_plane_endpoint.as_str()) {
            Some(ep) if !ep.is_empty() => Self::Ready {
                endpoint: Some(ep.to_string()),
            },
            _ => Self::Pending,
        }
    }
}
