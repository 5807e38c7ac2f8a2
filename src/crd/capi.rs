//! Typed views of the Cluster API objects this provider reads
//!
//! Only the fields the controllers consume are modelled; unknown fields are
//! ignored on deserialization.

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of Cluster API core types
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";

/// Annotation that pauses reconciliation of a cluster or any of its parts
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Subset of the Cluster API `Cluster` spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    plural = "clusters",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Stops all reconciliation of the cluster when true
    #[serde(default)]
    pub paused: bool,

    /// Control plane provider object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ref: Option<ObjectReference>,

    /// Infrastructure provider object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

impl Cluster {
    /// Returns true if the cluster or the given dependent object is paused
    pub fn pauses<K: Resource>(&self, dependent: &K) -> bool {
        self.spec.paused
            || self.annotations().contains_key(PAUSED_ANNOTATION)
            || dependent.annotations().contains_key(PAUSED_ANNOTATION)
    }

    /// The infrastructure object this cluster points at, with its kind resolved
    pub fn infrastructure(&self) -> Result<Option<InfrastructureTarget>, crate::Error> {
        self.spec
            .infrastructure_ref
            .as_ref()
            .map(InfrastructureTarget::from_reference)
            .transpose()
    }
}

/// Owner-reference lookups for objects that belong to a Cluster API cluster
pub trait OwnedByCluster: Resource {
    /// The owning `Cluster` reference, if the object has been linked yet
    fn owner_cluster(&self) -> Option<&OwnerReference> {
        self.meta()
            .owner_references
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|r| r.kind == "Cluster" && api_group(&r.api_version) == CAPI_GROUP)
    }

    /// Name of the owning `Cluster`, if linked
    fn owner_cluster_name(&self) -> Option<&str> {
        self.owner_cluster().map(|r| r.name.as_str())
    }
}

impl<K: Resource> OwnedByCluster for K {}

/// Group part of an `apiVersion` string ("" for the core group)
pub fn api_group(api_version: &str) -> &str {
    api_version
        .split_once('/')
        .map(|(group, _)| group)
        .unwrap_or("")
}

/// Infrastructure cluster kinds this provider knows how to publish to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum InfrastructureKind {
    /// This provider's own ViettelCluster
    Viettel,
    /// Cluster API Provider OpenStack
    OpenStack,
    /// Cluster API Provider Docker; gets its endpoint elsewhere
    Docker,
}

impl InfrastructureKind {
    /// Returns true if the control plane endpoint must be written onto this kind
    pub fn accepts_endpoint(&self) -> bool {
        matches!(self, Self::Viettel | Self::OpenStack)
    }
}

impl std::str::FromStr for InfrastructureKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ViettelCluster" => Ok(Self::Viettel),
            "OpenStackCluster" => Ok(Self::OpenStack),
            "DockerCluster" => Ok(Self::Docker),
            _ => Err(crate::Error::unsupported(format!(
                "infrastructure kind {s} is not supported, expected one of: ViettelCluster, OpenStackCluster, DockerCluster"
            ))),
        }
    }
}

/// Fully resolved pointer to a cluster's infrastructure object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfrastructureTarget {
    /// Resolved kind
    pub kind: InfrastructureKind,
    /// `apiVersion` of the object
    pub api_version: String,
    /// Object name
    pub name: String,
    /// Object namespace, when the reference carries one
    pub namespace: Option<String>,
}

impl InfrastructureTarget {
    /// Resolve an `ObjectReference` into a typed target
    pub fn from_reference(r: &ObjectReference) -> Result<Self, crate::Error> {
        let kind_str = r.kind.as_deref().unwrap_or_default();
        let kind = kind_str.parse()?;
        let name = r
            .name
            .clone()
            .ok_or_else(|| crate::Error::unsupported("infrastructureRef has no name"))?;

        Ok(Self {
            kind,
            api_version: r.api_version.clone().unwrap_or_default(),
            name,
            namespace: r.namespace.clone(),
        })
    }

    /// Kind string as it appears on the wire
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            InfrastructureKind::Viettel => "ViettelCluster",
            InfrastructureKind::OpenStack => "OpenStackCluster",
            InfrastructureKind::Docker => "DockerCluster",
        }
    }
}
