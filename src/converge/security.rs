//! Security groups for control plane and worker nodes
//!
//! Each group admits traffic from itself and from the other group, plus the
//! node-port range. The control plane group also admits the API server port.
//! Rules are installed list-then-create-missing, so a pass may run against a
//! group that is already configured.

use tracing::info;

use super::{ensure_resource, teardown, ClusterKey};
use crate::cloud::{
    Direction, ExternalResource, ListQuery, Protocol, ResourceKind, ResourceSpec,
    SecurityGroupSpec, SecurityRule, Session,
};
use crate::{Error, API_SERVER_PORT, NODE_PORT_MAX, NODE_PORT_MIN};

/// Name prefix of security groups
pub const SECURITY_GROUP_PREFIX: &str = "k8s-api-sec-";

/// Which nodes a security group protects
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupRole {
    /// Control plane nodes
    ControlPlane,
    /// Worker nodes
    Worker,
}

impl GroupRole {
    fn suffix(&self) -> &'static str {
        match self {
            Self::ControlPlane => "controlplane",
            Self::Worker => "worker",
        }
    }

    /// Name of this role's group for a cluster
    pub fn group_name(&self, key: &ClusterKey) -> String {
        format!("{}-{}", key.resource_name(SECURITY_GROUP_PREFIX), self.suffix())
    }

    /// Full rule set of this role's group
    pub fn rules(&self, group_id: &str, peer_id: &str) -> Vec<SecurityRule> {
        let rule = |description: &str,
                    protocol: Option<Protocol>,
                    ports: Option<(u16, u16)>,
                    remote_group: Option<&str>| SecurityRule {
            security_group: group_id.to_string(),
            description: description.to_string(),
            direction: Direction::Ingress,
            ethertype: "IPv4".to_string(),
            protocol,
            port_range_min: ports.map(|(min, _)| min),
            port_range_max: ports.map(|(_, max)| max),
            remote_group: remote_group.map(str::to_string),
        };

        let node_ports = Some((NODE_PORT_MIN, NODE_PORT_MAX));
        let mut rules = Vec::with_capacity(5);
        if *self == Self::ControlPlane {
            rules.push(rule(
                "Kubernetes API",
                Some(Protocol::Tcp),
                Some((API_SERVER_PORT, API_SERVER_PORT)),
                None,
            ));
        }
        rules.push(rule("Node Port Services TCP", Some(Protocol::Tcp), node_ports, None));
        rules.push(rule("Node Port Services UDP", Some(Protocol::Udp), node_ports, None));
        rules.push(rule("In-cluster Ingress", None, None, Some(group_id)));
        rules.push(rule("Peer Group Ingress", None, None, Some(peer_id)));
        rules
    }
}

/// The cluster's two security groups
#[derive(Clone, Debug, PartialEq)]
pub struct SecurityGroups {
    /// Control plane group
    pub control_plane: ExternalResource,
    /// Worker group
    pub worker: ExternalResource,
}

fn group_spec(role: GroupRole, key: &ClusterKey) -> ResourceSpec {
    ResourceSpec::SecurityGroup(SecurityGroupSpec {
        name: role.group_name(key),
        description: format!("{} nodes of cluster {}/{}", role.suffix(), key.namespace, key.name),
    })
}

/// Ensure both groups exist and carry their full rule sets
pub async fn reconcile_security_groups(
    session: &Session<'_>,
    key: &ClusterKey,
) -> Result<SecurityGroups, Error> {
    let control_plane = ensure_resource(session, &group_spec(GroupRole::ControlPlane, key), &[]).await?;
    let worker = ensure_resource(session, &group_spec(GroupRole::Worker, key), &[]).await?;

    install_rules(
        session,
        &GroupRole::ControlPlane.rules(&control_plane.id, &worker.id),
    )
    .await?;
    install_rules(session, &GroupRole::Worker.rules(&worker.id, &control_plane.id)).await?;

    Ok(SecurityGroups {
        control_plane,
        worker,
    })
}

/// Create the members of `rules` that have no equivalent in their group yet.
///
/// All rules must belong to the same group. Returns the number created.
pub async fn install_rules(session: &Session<'_>, rules: &[SecurityRule]) -> Result<usize, Error> {
    let Some(group_id) = rules.first().map(|r| r.security_group.clone()) else {
        return Ok(0);
    };

    let existing = session
        .list(ResourceKind::SecurityGroupRule, &ListQuery::in_group(&group_id))
        .await?;

    let mut created = 0;
    for rule in rules
        .iter()
        .filter(|rule| !existing.iter().any(|e| rule.matches(e)))
    {
        session
            .create(&ResourceSpec::SecurityGroupRule(rule.clone()))
            .await
            .map_err(|e| Error::CreationFailed {
                kind: ResourceKind::SecurityGroupRule.to_string(),
                name: format!("{} on {group_id}", rule.description),
                message: e.to_string(),
            })?;
        created += 1;
    }

    if created > 0 {
        info!(security_group = %group_id, created, "installed security rules");
    }
    Ok(created)
}

/// Destroy both groups, worker first
pub async fn teardown_security_groups(session: &Session<'_>, key: &ClusterKey) -> Result<(), Error> {
    for role in [GroupRole::Worker, GroupRole::ControlPlane] {
        teardown(session, ResourceKind::SecurityGroup, &role.group_name(key)).await?;
    }
    Ok(())
}
