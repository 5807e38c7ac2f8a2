//! NestedControlPlane controller implementation
//!
//! The control plane is assembled from three external components that must
//! come up in order: Etcd, then a DataStore registered against it, then the
//! TenantControlPlane serving the API. Each pass walks that chain from the
//! start, so the recorded stage is only a report of what was observed.
//!
//! Once the tenant control plane reports an endpoint it is written onto the
//! owning cluster's infrastructure object and the control plane is ready.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument};

use super::client::Context;
use super::status::{record_outcome, ReconcilePath};
use super::{add_finalizer, has_finalizer, remove_finalizer, requeue_after_error, resolve_owner};
use crate::crd::{
    ApiEndpoint, Cluster, ComponentState, ControlPlaneStage, NestedComponent, NestedControlPlane,
    NestedControlPlaneStatus,
};
use crate::Error;

/// Finalizer held on a NestedControlPlane while the controller manages it
pub const CONTROL_PLANE_FINALIZER: &str = "nestedcontrolplane.controlplane.cluster.x-k8s.io";

/// Reconcile a NestedControlPlane
#[instrument(
    skip(obj, ctx),
    fields(control_plane = %obj.name_any(), namespace = %obj.namespace().unwrap_or_default())
)]
pub async fn reconcile(obj: Arc<NestedControlPlane>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();

    let Some(current) = ctx.kube.get_control_plane(&namespace, &name).await? else {
        debug!("NestedControlPlane no longer exists");
        return Ok(Action::await_change());
    };
    let deleting = current.metadata.deletion_timestamp.is_some();

    let owner = match resolve_owner(&current, &namespace, &ctx).await {
        Ok(owner) => {
            if owner.pauses(&current) {
                info!("reconciliation paused");
                return Ok(Action::await_change());
            }
            Some(owner)
        }
        Err(Error::OwnerUnresolved(reason)) if !deleting => {
            info!(%reason, "waiting for owning Cluster");
            return Ok(Action::requeue(ctx.config.owner_requeue));
        }
        Err(Error::OwnerUnresolved(_)) => None,
        Err(e) => return Err(e),
    };

    let was_ready = current.status.as_ref().is_some_and(|s| s.ready);
    let mut desired = current.clone();
    let (path, outcome) = match owner {
        Some(owner) if !deleting => (
            ReconcilePath::Normal,
            reconcile_normal(&mut desired, &owner, &ctx).await,
        ),
        _ => (ReconcilePath::Delete, Ok(reconcile_delete(&mut desired))),
    };

    record_outcome(
        desired.status.get_or_insert_with(Default::default),
        &outcome,
        path,
        was_ready,
    );
    let persisted = ctx.kube.persist_control_plane(&current, &desired).await;
    Error::merge(outcome, persisted)
}

fn enter_stage(status: &mut NestedControlPlaneStatus, stage: ControlPlaneStage) {
    if status.stage != Some(stage) {
        info!(from = ?status.stage, to = %stage, "control plane stage changed");
        status.stage = Some(stage);
    }
}

async fn reconcile_normal(
    ncp: &mut NestedControlPlane,
    owner: &Cluster,
    ctx: &Context,
) -> Result<Action, Error> {
    if !has_finalizer(ncp, CONTROL_PLANE_FINALIZER) {
        info!("adding finalizer");
        add_finalizer(ncp, CONTROL_PLANE_FINALIZER);
        return Ok(Action::requeue(ctx.config.immediate_requeue));
    }

    let namespace = ncp.namespace().unwrap_or_default();
    let name = ncp.name_any();
    let owner_ref = ncp.controller_owner_ref(&()).ok_or_else(|| {
        Error::missing_metadata("NestedControlPlane", format!("{namespace}/{name}"), "uid")
    })?;
    let status = ncp.status.get_or_insert_with(Default::default);

    let mut reported_endpoint = None;
    for component in NestedComponent::CHAIN {
        let state = ctx
            .kube
            .observe_component(&namespace, component, &name)
            .await?;
        let serving_api = component == NestedComponent::TenantControlPlane;
        if serving_api && state != ComponentState::Absent {
            status.initialized = true;
        }

        match state {
            ComponentState::Absent => {
                info!(%component, "requesting component");
                ctx.kube
                    .create_component(&namespace, component, &name, &owner_ref)
                    .await?;
                status.initialized |= serving_api;
                enter_stage(status, component.requested_stage());
                return Ok(Action::requeue(ctx.config.resource_wait_requeue));
            }
            ComponentState::Pending => {
                debug!(%component, "waiting for component");
                enter_stage(status, component.requested_stage());
                return Ok(Action::requeue(ctx.config.immediate_requeue));
            }
            ComponentState::Ready { endpoint } => {
                enter_stage(status, component.ready_stage());
                reported_endpoint = endpoint;
            }
        }
    }

    let Some(raw) = reported_endpoint else {
        return Ok(Action::requeue(ctx.config.immediate_requeue));
    };
    let endpoint = ApiEndpoint::parse(&raw)?;

    let Some(target) = owner.infrastructure()? else {
        info!(cluster = %owner.name_any(), "Cluster has no infrastructureRef yet");
        return Ok(Action::requeue(ctx.config.owner_requeue));
    };
    if target.kind.accepts_endpoint() {
        ctx.kube
            .publish_endpoint(&namespace, &target, &endpoint)
            .await?;
        debug!(%endpoint, infrastructure = %target.name, "published endpoint");
    } else {
        debug!(kind = target.kind_name(), "infrastructure provider sets its own endpoint");
    }
    enter_stage(status, ControlPlaneStage::EndpointPublished);

    status.ready = true;
    enter_stage(status, ControlPlaneStage::Ready);
    Ok(Action::requeue(ctx.config.ready_requeue))
}

/// Components are owned by the control plane and collected by the garbage
/// collector, so deletion only releases the finalizer.
fn reconcile_delete(ncp: &mut NestedControlPlane) -> Action {
    if let Some(status) = ncp.status.as_mut() {
        status.ready = false;
    }
    remove_finalizer(ncp, CONTROL_PLANE_FINALIZER);
    Action::await_change()
}

/// Error policy for the NestedControlPlane controller
pub fn error_policy(ncp: Arc<NestedControlPlane>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(?error, control_plane = %ncp.name_any(), "reconciliation failed");
    requeue_after_error(error, &ctx.config)
}
