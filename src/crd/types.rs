//! Supporting types shared by the provider CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a resource created in the cloud backend
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ResourceRef {
    /// Backend-assigned ID
    pub id: String,
    /// Human-assigned name
    #[serde(default)]
    pub name: String,
}

impl ResourceRef {
    /// Create a reference from an ID and name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// API server endpoint published to Cluster API
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ApiEndpoint {
    /// Hostname or IP address
    pub host: String,
    /// TCP port
    pub port: i32,
}

impl ApiEndpoint {
    /// Default Kubernetes API server port
    pub const DEFAULT_PORT: i32 = 6443;

    /// Parse a `host[:port]` string as written by tenant control planes
    pub fn parse(s: &str) -> Result<Self, crate::Error> {
        let s = s.trim();
        if s.is_empty() {
            return Err(crate::Error::serialization("empty control plane endpoint"));
        }

        // Bracketed IPv6 literals carry colons inside the host part
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !port.contains(']') => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| {
                        crate::Error::serialization(format!("invalid port in endpoint {s}"))
                    })?;
                (host, i32::from(port))
            }
            _ => (s, Self::DEFAULT_PORT),
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Returns true if no endpoint has been set
    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }
}

impl std::fmt::Display for ApiEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Structured failure reason written to an aggregate's status
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum FailureReason {
    /// Converging an already-ready cluster failed
    UpdateClusterError,
    /// Converging a cluster that was never ready failed
    CreateClusterError,
    /// Tearing down a cluster's resources failed
    DeleteClusterError,
    /// The spec asks for something that cannot be provisioned
    UnsupportedChangeError,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpdateClusterError => write!(f, "UpdateClusterError"),
            Self::CreateClusterError => write!(f, "CreateClusterError"),
            Self::DeleteClusterError => write!(f, "DeleteClusterError"),
            Self::UnsupportedChangeError => write!(f, "UnsupportedChangeError"),
        }
    }
}

/// Status types that carry a failure reason/message pair
pub trait ReportsFailure {
    /// Mutable access to the failure reason
    fn failure_reason_mut(&mut self) -> &mut Option<FailureReason>;
    /// Mutable access to the failure message
    fn failure_message_mut(&mut self) -> &mut Option<String>;
}

/// Load balancer topology offered by the backend
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum LoadBalancerTopology {
    /// One instance
    #[default]
    Single,
    /// Active/standby pair
    ActiveStandby,
}

impl std::str::FromStr for LoadBalancerTopology {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SINGLE" => Ok(Self::Single),
            "ACTIVE_STANDBY" | "ACTIVESTANDBY" => Ok(Self::ActiveStandby),
            _ => Err(crate::Error::unsupported(format!(
                "invalid load balancer topology: {s}, expected one of: SINGLE, ACTIVE_STANDBY"
            ))),
        }
    }
}

impl std::fmt::Display for LoadBalancerTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "SINGLE"),
            Self::ActiveStandby => write!(f, "ACTIVE_STANDBY"),
        }
    }
}

/// Load balancer size package offered by the backend
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum LoadBalancerPackage {
    /// Small
    Small,
    /// Medium
    #[default]
    Medium,
    /// Large
    Large,
}

impl std::str::FromStr for LoadBalancerPackage {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SMALL" => Ok(Self::Small),
            "MEDIUM" => Ok(Self::Medium),
            "LARGE" => Ok(Self::Large),
            _ => Err(crate::Error::unsupported(format!(
                "invalid load balancer package: {s}, expected one of: SMALL, MEDIUM, LARGE"
            ))),
        }
    }
}

impl std::fmt::Display for LoadBalancerPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "SMALL"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Large => write!(f, "LARGE"),
        }
    }
}

/// Progress of a nested control plane through its component chain
///
/// Always derived from the components observed on the current pass; the
/// value stored in status is informational.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
)]
pub enum ControlPlaneStage {
    /// Nothing created yet
    #[default]
    Uninitialized,
    /// Etcd created, not ready
    EtcdRequested,
    /// Etcd ready
    EtcdReady,
    /// DataStore created, not ready
    StoreRequested,
    /// DataStore ready
    StoreReady,
    /// TenantControlPlane created, no endpoint yet
    ControlPlaneRequested,
    /// TenantControlPlane reports an endpoint
    ControlPlaneReady,
    /// Endpoint written to the infrastructure cluster
    EndpointPublished,
    /// Control plane fully available
    Ready,
}

impl std::fmt::Display for ControlPlaneStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "Uninitialized",
            Self::EtcdRequested => "EtcdRequested",
            Self::EtcdReady => "EtcdReady",
            Self::StoreRequested => "StoreRequested",
            Self::StoreReady => "StoreReady",
            Self::ControlPlaneRequested => "ControlPlaneRequested",
            Self::ControlPlaneReady => "ControlPlaneReady",
            Self::EndpointPublished => "EndpointPublished",
            Self::Ready => "Ready",
        };
        write!(f, "{s}")
    }
}
