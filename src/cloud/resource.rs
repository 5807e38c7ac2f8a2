//! Resource families, observed records and desired attributes

use serde::{Deserialize, Serialize};

use crate::crd::{LoadBalancerPackage, LoadBalancerTopology, ResourceRef};

/// Every resource family the provider touches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// VPC, user-owned
    Network,
    /// Subnet, user-owned
    Subnet,
    /// Security group
    SecurityGroup,
    /// Rule inside a security group
    SecurityGroupRule,
    /// Load balancer fronting the API servers
    LoadBalancer,
    /// Backend pool of a load balancer
    ServerGroup,
    /// Port binding on a load balancer
    Listener,
}

impl ResourceKind {
    /// Path segment below the API root
    pub fn path(&self) -> &'static str {
        match self {
            Self::Network => "infra/vpcs",
            Self::Subnet => "infra/subnets",
            Self::SecurityGroup => "infra/security-groups",
            Self::SecurityGroupRule => "infra/security-group-rules",
            Self::LoadBalancer => "infra/load-balancing/load-balancers",
            Self::ServerGroup => "infra/load-balancing/server-groups",
            Self::Listener => "infra/load-balancing/listeners",
        }
    }

    /// Status combination that counts as ready for this family
    pub fn readiness(&self) -> Readiness {
        match self {
            Self::LoadBalancer | Self::Listener => Readiness::OnlineAndActive,
            Self::ServerGroup => Readiness::ProvisioningActive,
            Self::Network | Self::Subnet | Self::SecurityGroup | Self::SecurityGroupRule => {
                Readiness::Immediate
            }
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Subnet => "subnet",
            Self::SecurityGroup => "security group",
            Self::SecurityGroupRule => "security group rule",
            Self::LoadBalancer => "load balancer",
            Self::ServerGroup => "server group",
            Self::Listener => "listener",
        };
        write!(f, "{s}")
    }
}

/// Ready-state rule of a resource family
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// No provisioning state; usable as soon as it exists
    Immediate,
    /// `provisioning_status == ACTIVE`
    ProvisioningActive,
    /// `operating_status == ONLINE` and `provisioning_status == ACTIVE`
    OnlineAndActive,
}

impl Readiness {
    /// Returns true if the observed record satisfies this rule
    pub fn is_satisfied(&self, r: &ExternalResource) -> bool {
        let active = r.provisioning_status == Some(ProvisioningStatus::Active);
        match self {
            Self::Immediate => true,
            Self::ProvisioningActive => active,
            Self::OnlineAndActive => active && r.operating_status == Some(OperatingStatus::Online),
        }
    }
}

/// Operating status reported by load balancing resources
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatingStatus {
    /// Serving traffic
    Online,
    /// Administratively down
    Offline,
    /// Partially healthy
    Degraded,
    /// Failed
    Error,
    /// Health monitoring disabled
    NoMonitor,
    /// Anything this provider does not know
    #[serde(other)]
    Unknown,
}

/// Provisioning status reported by load balancing resources
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningStatus {
    /// Settled
    Active,
    /// Being created
    PendingCreate,
    /// Being reconfigured
    PendingUpdate,
    /// Being removed
    PendingDelete,
    /// Provisioning failed
    Error,
    /// Anything this provider does not know
    #[serde(other)]
    Unknown,
}

/// Traffic direction of a security rule
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Inbound
    Ingress,
    /// Outbound
    Egress,
}

/// Transport protocol
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum Protocol {
    /// TCP
    #[serde(rename = "TCP", alias = "tcp")]
    Tcp,
    /// UDP
    #[serde(rename = "UDP", alias = "udp")]
    Udp,
    /// Any other protocol (ICMP, ...); never part of the rules this provider installs
    #[serde(other)]
    Other,
}

/// Load balancing algorithm of a server group
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Algorithm {
    /// Rotate through members
    #[default]
    RoundRobin,
}

/// A resource as observed in the backend
///
/// Fields not reported by a family stay at their defaults.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ExternalResource {
    /// Backend-assigned ID
    pub id: String,
    /// Human-assigned name, not unique in the backend
    #[serde(default)]
    pub name: String,
    /// Operating status (load balancer, listener)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operating_status: Option<OperatingStatus>,
    /// Provisioning status (load balancer, listener, server group)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_status: Option<ProvisioningStatus>,
    /// Whether a VPC routes to the internet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_access: Option<bool>,
    /// Route tables of a VPC
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route_tables: Vec<String>,
    /// VPC a subnet belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc: Option<String>,
    /// Virtual IP of a load balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip_address: Option<String>,
    /// Group a rule belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group: Option<String>,
    /// Rule direction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// Rule protocol, absent for any-protocol rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    /// Rule lower port bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_min: Option<u16>,
    /// Rule upper port bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_max: Option<u16>,
    /// Peer group a rule admits traffic from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_group: Option<String>,
}

impl ExternalResource {
    /// Status reference to this resource
    pub fn to_ref(&self) -> ResourceRef {
        ResourceRef::new(self.id.clone(), self.name.clone())
    }
}

/// Server-side filter for list calls
///
/// Backends may match loosely, so callers re-check results with [`ListQuery::matches`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Exact name
    pub name: Option<String>,
    /// Owning security group (rules)
    pub security_group: Option<String>,
    /// Owning VPC (subnets)
    pub vpc: Option<String>,
}

impl ListQuery {
    /// Filter by exact name
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Rules of a security group
    pub fn in_group(security_group: impl Into<String>) -> Self {
        Self {
            security_group: Some(security_group.into()),
            ..Default::default()
        }
    }

    /// Subnets of a VPC
    pub fn in_vpc(vpc: impl Into<String>) -> Self {
        Self {
            vpc: Some(vpc.into()),
            ..Default::default()
        }
    }

    /// Returns true if the record satisfies every set filter
    pub fn matches(&self, r: &ExternalResource) -> bool {
        self.name.as_ref().is_none_or(|n| *n == r.name)
            && self
                .security_group
                .as_ref()
                .is_none_or(|g| r.security_group.as_ref() == Some(g))
            && self.vpc.as_ref().is_none_or(|v| r.vpc.as_ref() == Some(v))
    }

    /// Query-string pairs for the HTTP API
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(name) = &self.name {
            params.push(("name", name.clone()));
        }
        if let Some(group) = &self.security_group {
            params.push(("security_group", group.clone()));
        }
        if let Some(vpc) = &self.vpc {
            params.push(("vpc", vpc.clone()));
        }
        params
    }
}

/// Attributes of a new security group
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SecurityGroupSpec {
    /// Group name
    pub name: String,
    /// Group description
    pub description: String,
}

/// One ingress/egress rule of a security group
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SecurityRule {
    /// Group the rule is installed on
    pub security_group: String,
    /// Free-text label
    pub description: String,
    /// Traffic direction
    pub direction: Direction,
    /// Always IPv4
    pub ethertype: String,
    /// Protocol, `None` for any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    /// Lower port bound, `None` for all ports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_range_min: Option<u16>,
    /// Upper port bound, `None` for all ports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_range_max: Option<u16>,
    /// Peer group admitted by the rule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_group: Option<String>,
}

impl SecurityRule {
    /// Returns true if an existing rule is equivalent to this one
    ///
    /// Descriptions are labels only and do not take part.
    pub fn matches(&self, existing: &ExternalResource) -> bool {
        existing.security_group.as_deref() == Some(self.security_group.as_str())
            && existing.direction == Some(self.direction)
            && existing.protocol == self.protocol
            && existing.port_range_min == self.port_range_min
            && existing.port_range_max == self.port_range_max
            && existing.remote_group == self.remote_group
    }
}

/// Attributes of a new load balancer
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct LoadBalancerSpec {
    /// Load balancer name
    pub name: String,
    /// Size package
    pub package: LoadBalancerPackage,
    /// Instance topology
    pub topology: LoadBalancerTopology,
    /// Region ID
    pub region: String,
    /// VPC ID
    pub vpc: String,
    /// Subnet ID for the VIP
    pub subnet: String,
}

/// Attributes of a new server group
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ServerGroupSpec {
    /// Server group name
    pub name: String,
    /// Parent load balancer ID
    pub load_balancer: String,
    /// Balancing algorithm
    pub algorithm: Algorithm,
    /// Member protocol
    pub protocol: Protocol,
    /// Whether members are health checked
    pub health_check: bool,
}

/// Attributes of a new listener
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ListenerSpec {
    /// Listener name
    pub name: String,
    /// Parent load balancer ID
    pub load_balancer: String,
    /// Default server group ID
    pub server_group: String,
    /// Listener protocol
    pub protocol: Protocol,
    /// Port the listener binds
    pub protocol_port: u16,
}

/// Desired attributes of a resource to create
///
/// Networks and subnets are user-owned and never created.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ResourceSpec {
    /// Security group
    SecurityGroup(SecurityGroupSpec),
    /// Security group rule
    SecurityGroupRule(SecurityRule),
    /// Load balancer
    LoadBalancer(LoadBalancerSpec),
    /// Server group
    ServerGroup(ServerGroupSpec),
    /// Listener
    Listener(ListenerSpec),
}

impl ResourceSpec {
    /// Family of the resource described
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::SecurityGroup(_) => ResourceKind::SecurityGroup,
            Self::SecurityGroupRule(_) => ResourceKind::SecurityGroupRule,
            Self::LoadBalancer(_) => ResourceKind::LoadBalancer,
            Self::ServerGroup(_) => ResourceKind::ServerGroup,
            Self::Listener(_) => ResourceKind::Listener,
        }
    }

    /// Name used for uniqueness checks and diagnostics
    pub fn name(&self) -> &str {
        match self {
            Self::SecurityGroup(s) => &s.name,
            Self::SecurityGroupRule(r) => &r.description,
            Self::LoadBalancer(s) => &s.name,
            Self::ServerGroup(s) => &s.name,
            Self::Listener(s) => &s.name,
        }
    }
}
