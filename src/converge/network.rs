//! User-owned network: the declared VPC and subnet
//!
//! Neither is ever created or destroyed. A missing one means the spec points
//! at something that does not exist, which retrying cannot fix.

use tracing::info;

use crate::cloud::{ExternalResource, ListQuery, ResourceKind, Session};
use crate::Error;

/// The declared network, as observed
#[derive(Clone, Debug, PartialEq)]
pub struct Network {
    /// VPC record
    pub vpc: ExternalResource,
    /// Subnet record
    pub subnet: ExternalResource,
}

/// Resolve the declared VPC and subnet, enabling internet access on the VPC if needed
pub async fn reconcile_network(
    session: &Session<'_>,
    vpc_id: &str,
    subnet_id: &str,
) -> Result<Network, Error> {
    let vpc = match session.retrieve(ResourceKind::Network, vpc_id).await {
        Ok(vpc) => vpc,
        Err(Error::NotFound { .. }) => {
            return Err(Error::unsupported(format!(
                "VPC {vpc_id} does not exist in project {}",
                session.scope.project_id
            )))
        }
        Err(e) => return Err(e),
    };

    if vpc.internet_access == Some(false) {
        for route_table in &vpc.route_tables {
            info!(vpc = %vpc.id, %route_table, "enabling internet access");
            session.enable_internet_access(route_table).await?;
        }
    }

    let subnets = session
        .list(ResourceKind::Subnet, &ListQuery::in_vpc(vpc_id))
        .await?;
    let subnet = subnets
        .into_iter()
        .find(|s| s.id == subnet_id)
        .ok_or_else(|| {
            Error::unsupported(format!("subnet {subnet_id} does not exist in VPC {vpc_id}"))
        })?;

    Ok(Network { vpc, subnet })
}
