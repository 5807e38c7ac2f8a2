//! NestedCluster controller implementation
//!
//! A NestedCluster is ready exactly when the NestedControlPlane its owning
//! Cluster points at is both initialized and ready.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use super::client::Context;
use super::{requeue_after_error, resolve_owner};
use crate::crd::{NestedCluster, NestedClusterStatus};
use crate::Error;

/// Reconcile a NestedCluster
#[instrument(
    skip(obj, ctx),
    fields(nested_cluster = %obj.name_any(), namespace = %obj.namespace().unwrap_or_default())
)]
pub async fn reconcile(obj: Arc<NestedCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();

    let Some(current) = ctx.kube.get_nested_cluster(&namespace, &name).await? else {
        debug!("NestedCluster no longer exists");
        return Ok(Action::await_change());
    };

    let owner = match resolve_owner(&current, &namespace, &ctx).await {
        Ok(owner) => owner,
        Err(Error::OwnerUnresolved(reason)) => {
            info!(%reason, "waiting for owning Cluster");
            return Ok(Action::requeue(ctx.config.owner_requeue));
        }
        Err(e) => return Err(e),
    };
    if owner.pauses(&current) {
        info!("reconciliation paused");
        return Ok(Action::await_change());
    }

    let Some(control_plane_ref) = owner.spec.control_plane_ref.as_ref() else {
        info!(cluster = %owner.name_any(), "Cluster has no controlPlaneRef yet");
        return Ok(Action::requeue(ctx.config.owner_requeue));
    };
    let kind = control_plane_ref.kind.as_deref().unwrap_or_default();
    if kind != "NestedControlPlane" {
        return Err(Error::unsupported(format!(
            "NestedCluster requires a NestedControlPlane, Cluster {namespace}/{} references {kind}",
            owner.name_any()
        )));
    }
    let cp_name = control_plane_ref.name.as_deref().unwrap_or_default();
    let cp_namespace = control_plane_ref.namespace.as_deref().unwrap_or(&namespace);

    let Some(control_plane) = ctx.kube.get_control_plane(cp_namespace, cp_name).await? else {
        debug!(control_plane = %cp_name, "NestedControlPlane not created yet");
        return Ok(Action::requeue(ctx.config.resource_wait_requeue));
    };

    let ready = control_plane
        .status
        .as_ref()
        .is_some_and(|s| s.initialized && s.ready);
    let status = NestedClusterStatus { ready };
    if current.status.as_ref() != Some(&status) {
        ctx.kube
            .patch_nested_cluster_status(&namespace, &name, &status)
            .await?;
        info!(ready, "NestedCluster status updated");
    }

    if ready {
        Ok(Action::requeue(ctx.config.ready_requeue))
    } else {
        Ok(Action::requeue(ctx.config.resource_wait_requeue))
    }
}

/// Error policy for the NestedCluster controller
pub fn error_policy(nc: Arc<NestedCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(?error, nested_cluster = %nc.name_any(), "reconciliation failed");
    requeue_after_error(error, &ctx.config)
}
