//! Mappings from watched secondary objects to the objects they affect

use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Resource, ResourceExt};

use crate::crd::{Cluster, NestedCluster, NestedControlPlane, OwnedByCluster};

/// The infrastructure object of kind `K` a Cluster points at, if any
pub fn infrastructure_for_cluster<K>(cluster: &Cluster) -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    let infra = cluster.spec.infrastructure_ref.as_ref()?;
    let kind = K::kind(&());
    if infra.kind.as_deref() != Some(&*kind) {
        return None;
    }
    let name = infra.name.as_deref()?;
    let namespace = infra.namespace.clone().or_else(|| cluster.namespace())?;
    Some(ObjectRef::new(name).within(&namespace))
}

/// The NestedCluster that shares an owning Cluster with `control_plane`
///
/// Looks the owner up in `clusters`; returns nothing until the cache has it.
pub fn nested_cluster_for_control_plane(
    control_plane: &NestedControlPlane,
    clusters: &Store<Cluster>,
) -> Option<ObjectRef<NestedCluster>> {
    let namespace = control_plane.namespace()?;
    let owner = control_plane.owner_cluster_name()?;
    let cluster = clusters.get(&ObjectRef::new(owner).within(&namespace))?;
    infrastructure_for_cluster(&cluster)
}
