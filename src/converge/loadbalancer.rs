//! API server load balancing: load balancer, server group, listener
//!
//! The three are created strictly in order. Each stage waits for its own
//! resource to be active, and for its parents before creating anything.

use tracing::info;

use super::{ensure_resource, teardown, ClusterKey};
use crate::cloud::{
    wait_provisioned, Algorithm, ExternalResource, ListQuery, ListenerSpec, LoadBalancerSpec,
    Protocol, ResourceKind, ResourceSpec, ServerGroupSpec, Session,
};
use crate::crd::{LoadBalancerPackage, LoadBalancerTopology, ViettelClusterSpec};
use crate::{Error, API_SERVER_PORT};

/// Name prefix of the load balancer
pub const LOAD_BALANCER_PREFIX: &str = "k8s-api-lb-";
/// Name prefix of the server group
pub const SERVER_GROUP_PREFIX: &str = "k8s-api-sg-";
/// Name prefix of the listener
pub const LISTENER_PREFIX: &str = "k8s-api-ls-";

/// Size and topology of the load balancer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadBalancerProfile {
    /// Instance topology
    pub topology: LoadBalancerTopology,
    /// Size package
    pub package: LoadBalancerPackage,
}

impl LoadBalancerProfile {
    /// Resolve the profile from the spec's optional strings
    ///
    /// Both values must be given together; omitting both selects the defaults.
    pub fn resolve(topology: Option<&str>, package: Option<&str>) -> Result<Self, Error> {
        match (topology, package) {
            (None, None) => Ok(Self::default()),
            (Some(topology), Some(package)) => Ok(Self {
                topology: topology.parse()?,
                package: package.parse()?,
            }),
            _ => Err(Error::unsupported(
                "loadBalancerTopology and loadBalancerPackage must be set together",
            )),
        }
    }
}

/// The cluster's load balancing resources
#[derive(Clone, Debug, PartialEq)]
pub struct LoadBalancing {
    /// Load balancer
    pub load_balancer: ExternalResource,
    /// Server group
    pub server_group: ExternalResource,
    /// Listener
    pub listener: ExternalResource,
}

/// Ensure the load balancer, server group and listener, in that order
pub async fn reconcile_load_balancing(
    session: &Session<'_>,
    key: &ClusterKey,
    spec: &ViettelClusterSpec,
) -> Result<LoadBalancing, Error> {
    let profile = LoadBalancerProfile::resolve(
        spec.load_balancer_topology.as_deref(),
        spec.load_balancer_package.as_deref(),
    )?;

    let load_balancer = ensure_resource(
        session,
        &ResourceSpec::LoadBalancer(LoadBalancerSpec {
            name: key.resource_name(LOAD_BALANCER_PREFIX),
            package: profile.package,
            topology: profile.topology,
            region: spec.region.clone(),
            vpc: spec.vpc.clone(),
            subnet: spec.subnet.clone(),
        }),
        &[],
    )
    .await?;

    let server_group = ensure_resource(
        session,
        &ResourceSpec::ServerGroup(ServerGroupSpec {
            name: key.resource_name(SERVER_GROUP_PREFIX),
            load_balancer: load_balancer.id.clone(),
            algorithm: Algorithm::RoundRobin,
            protocol: Protocol::Tcp,
            health_check: true,
        }),
        &[(ResourceKind::LoadBalancer, &load_balancer)],
    )
    .await?;

    let listener = ensure_resource(
        session,
        &ResourceSpec::Listener(ListenerSpec {
            name: key.resource_name(LISTENER_PREFIX),
            load_balancer: load_balancer.id.clone(),
            server_group: server_group.id.clone(),
            protocol: Protocol::Tcp,
            protocol_port: API_SERVER_PORT,
        }),
        &[
            (ResourceKind::LoadBalancer, &load_balancer),
            (ResourceKind::ServerGroup, &server_group),
        ],
    )
    .await?;

    info!(
        load_balancer = %load_balancer.id,
        server_group = %server_group.id,
        listener = %listener.id,
        "load balancing ready"
    );

    Ok(LoadBalancing {
        load_balancer,
        server_group,
        listener,
    })
}

/// Destroy listener, server group and load balancer, children first
///
/// Removing a child moves the load balancer into a pending update, so it is
/// waited on before the next destroy.
pub async fn teardown_load_balancing(session: &Session<'_>, key: &ClusterKey) -> Result<(), Error> {
    let load_balancer = key.resource_name(LOAD_BALANCER_PREFIX);

    for (kind, prefix) in [
        (ResourceKind::Listener, LISTENER_PREFIX),
        (ResourceKind::ServerGroup, SERVER_GROUP_PREFIX),
    ] {
        if teardown(session, kind, &key.resource_name(prefix)).await? {
            settle_load_balancer(session, &load_balancer).await?;
        }
    }

    teardown(session, ResourceKind::LoadBalancer, &load_balancer).await?;
    Ok(())
}

async fn settle_load_balancer(session: &Session<'_>, name: &str) -> Result<(), Error> {
    let found = session
        .list(ResourceKind::LoadBalancer, &ListQuery::by_name(name))
        .await?;
    // Absent needs no wait; duplicates fail in the teardown that follows
    if let [load_balancer] = found.as_slice() {
        wait_provisioned(session, ResourceKind::LoadBalancer, load_balancer).await?;
    }
    Ok(())
}
