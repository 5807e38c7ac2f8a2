//! Controller implementations for the provider's CRDs
//!
//! Each controller runs one idempotent pass per event: observe the object
//! and its owner, converge what it drives, and write the outcome back.

mod client;
mod cluster;
mod controlplane;
mod nested_cluster;
pub mod status;
pub mod watch;

pub use client::{Context, ContextBuilder, KubeClient, KubeClientImpl};
pub use cluster::{error_policy, reconcile, VIETTEL_CLUSTER_FINALIZER};
pub use controlplane::{
    error_policy as control_plane_error_policy, reconcile as reconcile_control_plane,
    CONTROL_PLANE_FINALIZER,
};
pub use nested_cluster::{
    error_policy as nested_cluster_error_policy, reconcile as reconcile_nested_cluster,
};

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};

use crate::config::ReconcileConfig;
use crate::crd::{Cluster, OwnedByCluster};
use crate::Error;

/// Resolve the Cluster API `Cluster` owning `obj`
///
/// Fails with [`Error::OwnerUnresolved`] until the owner reference is set
/// and the Cluster exists.
pub(crate) async fn resolve_owner<K: Resource>(
    obj: &K,
    namespace: &str,
    ctx: &Context,
) -> Result<Cluster, Error> {
    let Some(name) = obj.owner_cluster_name() else {
        return Err(Error::owner_unresolved(format!(
            "{namespace}/{} has no owning Cluster",
            obj.name_any()
        )));
    };

    ctx.kube
        .get_cluster(namespace, name)
        .await?
        .ok_or_else(|| Error::owner_unresolved(format!("Cluster {namespace}/{name} not found")))
}

pub(crate) fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

pub(crate) fn add_finalizer<K: Resource>(obj: &mut K, finalizer: &str) {
    if !has_finalizer(obj, finalizer) {
        obj.finalizers_mut().push(finalizer.to_string());
    }
}

pub(crate) fn remove_finalizer<K: Resource>(obj: &mut K, finalizer: &str) {
    obj.finalizers_mut().retain(|f| f != finalizer);
}

/// Requeue after a failed pass; failures that need human action back off longer
pub(crate) fn requeue_after_error(error: &Error, config: &ReconcileConfig) -> Action {
    if error.is_terminal() {
        Action::requeue(config.terminal_error_requeue)
    } else {
        Action::requeue(config.error_requeue)
    }
}
