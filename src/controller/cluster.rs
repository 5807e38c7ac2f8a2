//! ViettelCluster controller implementation
//!
//! A pass re-fetches the object, resolves the owning Cluster and honors
//! pause before doing anything else. It then either tears down the owned
//! cloud resources or converges network, security groups and load balancing
//! in order. Every pass past the pause check persists the object exactly
//! once, with the failure pair reflecting its outcome.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use super::client::Context;
use super::status::{record_outcome, ReconcilePath};
use super::{add_finalizer, has_finalizer, remove_finalizer, requeue_after_error, resolve_owner};
use crate::cloud::{ProjectScope, Session};
use crate::converge::loadbalancer::{reconcile_load_balancing, teardown_load_balancing};
use crate::converge::network::reconcile_network;
use crate::converge::security::{reconcile_security_groups, teardown_security_groups};
use crate::converge::ClusterKey;
use crate::crd::ViettelCluster;
use crate::Error;

/// Finalizer guarding teardown of a ViettelCluster's cloud resources
pub const VIETTEL_CLUSTER_FINALIZER: &str = "viettelcluster.infrastructure.git.viettel.vn";

/// Reconcile a ViettelCluster
#[instrument(
    skip(obj, ctx),
    fields(cluster = %obj.name_any(), namespace = %obj.namespace().unwrap_or_default())
)]
pub async fn reconcile(obj: Arc<ViettelCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();

    let Some(current) = ctx.kube.get_viettel_cluster(&namespace, &name).await? else {
        debug!("ViettelCluster no longer exists");
        return Ok(Action::await_change());
    };
    let deleting = current.metadata.deletion_timestamp.is_some();

    match resolve_owner(&current, &namespace, &ctx).await {
        Ok(owner) => {
            if owner.pauses(&current) {
                info!("reconciliation paused");
                return Ok(Action::await_change());
            }
        }
        Err(Error::OwnerUnresolved(reason)) if !deleting => {
            info!(%reason, "waiting for owning Cluster");
            return Ok(Action::requeue(ctx.config.owner_requeue));
        }
        // The Cluster may already be gone while its infrastructure is deleted
        Err(Error::OwnerUnresolved(reason)) => debug!(%reason, "deleting without owner"),
        Err(e) => return Err(e),
    }

    let was_ready = current.status.as_ref().is_some_and(|s| s.ready);
    let mut desired = current.clone();
    let (path, outcome) = if deleting {
        (ReconcilePath::Delete, reconcile_delete(&mut desired, &ctx).await)
    } else {
        (ReconcilePath::Normal, reconcile_normal(&mut desired, &ctx).await)
    };

    record_outcome(
        desired.status.get_or_insert_with(Default::default),
        &outcome,
        path,
        was_ready,
    );
    let persisted = ctx.kube.persist_viettel_cluster(&current, &desired).await;
    Error::merge(outcome, persisted)
}

fn cluster_key(cluster: &ViettelCluster) -> ClusterKey {
    ClusterKey::new(cluster.namespace().unwrap_or_default(), cluster.name_any())
}

async fn reconcile_normal(cluster: &mut ViettelCluster, ctx: &Context) -> Result<Action, Error> {
    if !has_finalizer(cluster, VIETTEL_CLUSTER_FINALIZER) {
        info!("adding finalizer");
        add_finalizer(cluster, VIETTEL_CLUSTER_FINALIZER);
        return Ok(Action::requeue(ctx.config.immediate_requeue));
    }

    let key = cluster_key(cluster);
    let scope = ProjectScope::new(&cluster.spec.project_id);
    let session = Session::new(
        ctx.cloud.as_ref(),
        &scope,
        &ctx.config.poll,
        ctx.config.call_timeout,
    );
    let spec = &cluster.spec;
    let status = cluster.status.get_or_insert_with(Default::default);

    let network = reconcile_network(&session, &spec.vpc, &spec.subnet).await?;
    status.network = Some(network.vpc.to_ref());
    status.subnet = Some(network.subnet.to_ref());

    if spec.managed_security_groups {
        let groups = reconcile_security_groups(&session, &key).await?;
        status.control_plane_security_group = Some(groups.control_plane.to_ref());
        status.worker_security_group = Some(groups.worker.to_ref());
    }

    let lb = reconcile_load_balancing(&session, &key, spec).await?;
    status.load_balancer = Some(lb.load_balancer.to_ref());
    status.server_group = Some(lb.server_group.to_ref());
    status.listener = Some(lb.listener.to_ref());

    if !status.ready {
        info!(load_balancer = %lb.load_balancer.id, "cluster infrastructure ready");
    }
    status.ready = true;
    Ok(Action::requeue(ctx.config.ready_requeue))
}

async fn reconcile_delete(cluster: &mut ViettelCluster, ctx: &Context) -> Result<Action, Error> {
    if !has_finalizer(cluster, VIETTEL_CLUSTER_FINALIZER) {
        return Ok(Action::await_change());
    }

    let key = cluster_key(cluster);
    let scope = ProjectScope::new(&cluster.spec.project_id);
    let session = Session::new(
        ctx.cloud.as_ref(),
        &scope,
        &ctx.config.poll,
        ctx.config.call_timeout,
    );

    info!("tearing down cluster infrastructure");
    teardown_load_balancing(&session, &key).await?;
    if cluster.spec.managed_security_groups {
        teardown_security_groups(&session, &key).await?;
    }

    if let Some(status) = cluster.status.as_mut() {
        status.ready = false;
        status.load_balancer = None;
        status.server_group = None;
        status.listener = None;
        status.control_plane_security_group = None;
        status.worker_security_group = None;
    }
    remove_finalizer(cluster, VIETTEL_CLUSTER_FINALIZER);
    info!("cluster infrastructure removed");
    Ok(Action::await_change())
}

/// Error policy for the ViettelCluster controller
pub fn error_policy(cluster: Arc<ViettelCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cluster = %cluster.name_any(),
        terminal = error.is_terminal(),
        "reconciliation failed"
    );
    requeue_after_error(error, &ctx.config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::fake::FakeCloud;
    use crate::cloud::ResourceKind;
    use crate::config::ReconcileConfig;
    use crate::controller::client::MockKubeClient;
    use crate::crd::{
        Cluster, ClusterSpec, FailureReason, ViettelClusterSpec, ViettelClusterStatus,
        PAUSED_ANNOTATION,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
    use std::sync::Mutex;
    use std::time::Duration;

    fn owner_reference() -> OwnerReference {
        OwnerReference {
            api_version: "cluster.x-k8s.io/v1beta1".to_string(),
            kind: "Cluster".to_string(),
            name: "demo".to_string(),
            uid: "cluster-uid".to_string(),
            ..Default::default()
        }
    }

    /// A linked ViettelCluster that already carries the finalizer
    fn sample_cluster() -> ViettelCluster {
        let mut vc = ViettelCluster::new(
            "demo",
            ViettelClusterSpec {
                vpc: "vpc-1".to_string(),
                subnet: "subnet-1".to_string(),
                project_id: "p-1".to_string(),
                region: "r-1".to_string(),
                owner: None,
                load_balancer_topology: None,
                load_balancer_package: None,
                managed_security_groups: true,
                control_plane_endpoint: None,
            },
        );
        vc.metadata.namespace = Some("default".to_string());
        vc.metadata.owner_references = Some(vec![owner_reference()]);
        vc.metadata.finalizers = Some(vec![VIETTEL_CLUSTER_FINALIZER.to_string()]);
        vc
    }

    fn owner_cluster() -> Cluster {
        let mut cluster = Cluster::new("demo", ClusterSpec::default());
        cluster.metadata.namespace = Some("default".to_string());
        cluster
    }

    fn seeded_cloud() -> Arc<FakeCloud> {
        let cloud = Arc::new(FakeCloud::new());
        cloud.seed_network("vpc-1", true, &["rt-1"]);
        cloud.seed_subnet("subnet-1", "vpc-1");
        cloud
    }

    /// In-memory stand-in for the API server: reads return the last persisted
    /// version, and every persist is recorded for inspection.
    #[derive(Clone)]
    struct ObjectStore {
        object: Arc<Mutex<Option<ViettelCluster>>>,
        persists: Arc<Mutex<Vec<ViettelCluster>>>,
    }

    impl ObjectStore {
        fn new(object: Option<ViettelCluster>) -> Self {
            Self {
                object: Arc::new(Mutex::new(object)),
                persists: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn persist_count(&self) -> usize {
            self.persists.lock().unwrap().len()
        }

        fn last_persisted(&self) -> ViettelCluster {
            self.persists
                .lock()
                .unwrap()
                .last()
                .cloned()
                .expect("object was persisted")
        }

        fn last_status(&self) -> ViettelClusterStatus {
            self.last_persisted().status.expect("status was written")
        }

        fn mock(&self, owner: Option<Cluster>) -> MockKubeClient {
            let mut mock = MockKubeClient::new();

            let object = self.object.clone();
            mock.expect_get_viettel_cluster()
                .returning(move |_, _| Ok(object.lock().unwrap().clone()));
            mock.expect_get_cluster()
                .returning(move |_, _| Ok(owner.clone()));

            let object = self.object.clone();
            let persists = self.persists.clone();
            mock.expect_persist_viettel_cluster()
                .returning(move |_, after| {
                    persists.lock().unwrap().push(after.clone());
                    *object.lock().unwrap() = Some(after.clone());
                    Ok(())
                });
            mock
        }
    }

    fn context(kube: MockKubeClient, cloud: Arc<FakeCloud>) -> Arc<Context> {
        Arc::new(Context::for_testing(
            Arc::new(kube),
            cloud,
            ReconcileConfig::default(),
        ))
    }

    /// Run one pass triggered by the object currently in the store
    async fn run(store: &ObjectStore, ctx: &Arc<Context>) -> Result<Action, Error> {
        let trigger = store
            .object
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(sample_cluster);
        reconcile(Arc::new(trigger), ctx.clone()).await
    }

    // =========================================================================
    // Dispatch Stories
    // =========================================================================
    //
    // Before any cloud call the dispatcher re-fetches the object, resolves its
    // owner and checks pause. None of these early exits writes anything.

    mod dispatch {
        use super::*;

        #[tokio::test]
        async fn story_deleted_object_is_not_an_error() {
            let store = ObjectStore::new(None);
            let cloud = seeded_cloud();
            let ctx = context(store.mock(Some(owner_cluster())), cloud.clone());

            let action = run(&store, &ctx).await.unwrap();

            assert_eq!(action, Action::await_change());
            assert_eq!(store.persist_count(), 0);
            assert!(cloud.events().is_empty());
        }

        #[tokio::test]
        async fn story_unlinked_owner_waits_without_error() {
            let mut vc = sample_cluster();
            vc.metadata.owner_references = None;
            let store = ObjectStore::new(Some(vc));
            let cloud = seeded_cloud();
            let ctx = context(store.mock(Some(owner_cluster())), cloud.clone());

            let action = run(&store, &ctx).await.unwrap();

            assert_eq!(action, Action::requeue(Duration::from_secs(5)));
            assert_eq!(store.persist_count(), 0);
            assert!(cloud.events().is_empty());
        }

        #[tokio::test]
        async fn story_missing_owner_cluster_waits_without_error() {
            let store = ObjectStore::new(Some(sample_cluster()));
            let ctx = context(store.mock(None), seeded_cloud());

            let action = run(&store, &ctx).await.unwrap();

            assert_eq!(action, Action::requeue(Duration::from_secs(5)));
            assert_eq!(store.persist_count(), 0);
        }

        #[tokio::test]
        async fn story_paused_cluster_is_left_alone() {
            let mut owner = owner_cluster();
            owner.spec.paused = true;
            let store = ObjectStore::new(Some(sample_cluster()));
            let cloud = seeded_cloud();
            let ctx = context(store.mock(Some(owner)), cloud.clone());

            let action = run(&store, &ctx).await.unwrap();

            assert_eq!(action, Action::await_change());
            assert_eq!(store.persist_count(), 0);
            assert!(cloud.events().is_empty());
        }

        #[tokio::test]
        async fn story_pause_annotation_on_object_is_honored() {
            let mut vc = sample_cluster();
            vc.metadata.annotations = Some(
                [(PAUSED_ANNOTATION.to_string(), "true".to_string())]
                    .into_iter()
                    .collect(),
            );
            let store = ObjectStore::new(Some(vc));
            let cloud = seeded_cloud();
            let ctx = context(store.mock(Some(owner_cluster())), cloud.clone());

            run(&store, &ctx).await.unwrap();

            assert_eq!(store.persist_count(), 0);
            assert!(cloud.events().is_empty());
        }

        #[tokio::test]
        async fn story_first_pass_only_adds_finalizer() {
            let mut vc = sample_cluster();
            vc.metadata.finalizers = None;
            let store = ObjectStore::new(Some(vc));
            let cloud = seeded_cloud();
            let ctx = context(store.mock(Some(owner_cluster())), cloud.clone());

            let action = run(&store, &ctx).await.unwrap();

            assert_eq!(action, Action::requeue(Duration::from_secs(1)));
            assert_eq!(store.persist_count(), 1);
            assert!(has_finalizer(&store.last_persisted(), VIETTEL_CLUSTER_FINALIZER));
            assert!(cloud.events().is_empty());
        }
    }

    // =========================================================================
    // Convergence Stories
    // =========================================================================

    mod convergence {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn story_full_pass_records_every_resource() {
            let store = ObjectStore::new(Some(sample_cluster()));
            let cloud = seeded_cloud();
            let ctx = context(store.mock(Some(owner_cluster())), cloud.clone());

            let action = run(&store, &ctx).await.unwrap();

            assert_eq!(action, Action::requeue(Duration::from_secs(300)));
            assert_eq!(store.persist_count(), 1);

            let status = store.last_status();
            assert!(status.ready);
            assert_eq!(status.network.unwrap().id, "vpc-1");
            assert_eq!(status.subnet.unwrap().id, "subnet-1");
            assert_eq!(
                status.load_balancer.unwrap().name,
                "k8s-api-lb-default-demo"
            );
            assert!(status.server_group.is_some());
            assert!(status.listener.is_some());
            assert!(status.control_plane_security_group.is_some());
            assert!(status.worker_security_group.is_some());
            assert_eq!(status.failure_reason, None);

            // 2 groups, 9 rules, load balancer, server group, listener
            assert_eq!(cloud.total_creates(), 14);
        }

        #[tokio::test(start_paused = true)]
        async fn story_second_pass_creates_nothing() {
            let store = ObjectStore::new(Some(sample_cluster()));
            let cloud = seeded_cloud();
            let ctx = context(store.mock(Some(owner_cluster())), cloud.clone());

            run(&store, &ctx).await.unwrap();
            let first = store.last_status();
            cloud.clear_events();
            run(&store, &ctx).await.unwrap();

            assert_eq!(cloud.total_creates(), 0);
            assert_eq!(store.last_status(), first);
            assert_eq!(store.persist_count(), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn story_unmanaged_security_groups_are_skipped() {
            let mut vc = sample_cluster();
            vc.spec.managed_security_groups = false;
            let store = ObjectStore::new(Some(vc));
            let cloud = seeded_cloud();
            let ctx = context(store.mock(Some(owner_cluster())), cloud.clone());

            run(&store, &ctx).await.unwrap();

            assert_eq!(cloud.create_count(ResourceKind::SecurityGroup), 0);
            assert_eq!(cloud.create_count(ResourceKind::SecurityGroupRule), 0);
            let status = store.last_status();
            assert!(status.ready);
            assert!(status.control_plane_security_group.is_none());
        }
    }

    // =========================================================================
    // Failure Reporting Stories
    // =========================================================================

    mod failures {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn story_create_failure_is_reported_then_cleared() {
            let store = ObjectStore::new(Some(sample_cluster()));
            let cloud = seeded_cloud();
            cloud.fail_create("k8s-api-lb-default-demo", "quota exceeded");
            let ctx = context(store.mock(Some(owner_cluster())), cloud.clone());

            let err = run(&store, &ctx).await.unwrap_err();
            assert!(matches!(err, Error::CreationFailed { .. }));

            let status = store.last_status();
            assert!(!status.ready);
            assert_eq!(status.failure_reason, Some(FailureReason::CreateClusterError));
            let message = status.failure_message.unwrap();
            assert!(message.contains("k8s-api-lb-default-demo"));
            assert!(message.contains("quota exceeded"));
            assert_eq!(store.persist_count(), 1);

            cloud.heal();
            run(&store, &ctx).await.unwrap();

            let status = store.last_status();
            assert!(status.ready);
            assert_eq!(status.failure_reason, None);
            assert_eq!(status.failure_message, None);
        }

        #[tokio::test(start_paused = true)]
        async fn story_failure_on_ready_cluster_is_an_update_error() {
            let mut vc = sample_cluster();
            vc.status = Some(ViettelClusterStatus {
                ready: true,
                ..Default::default()
            });
            let store = ObjectStore::new(Some(vc));
            let cloud = seeded_cloud();
            cloud.fail_create("k8s-api-ls-default-demo", "listener limit");
            let ctx = context(store.mock(Some(owner_cluster())), cloud.clone());

            run(&store, &ctx).await.unwrap_err();

            assert_eq!(
                store.last_status().failure_reason,
                Some(FailureReason::UpdateClusterError)
            );
        }

        #[tokio::test(start_paused = true)]
        async fn story_invalid_package_is_unsupported_and_backs_off() {
            let mut vc = sample_cluster();
            vc.spec.load_balancer_topology = Some("SINGLE".to_string());
            vc.spec.load_balancer_package = Some("GIGANTIC".to_string());
            let store = ObjectStore::new(Some(vc));
            let cloud = seeded_cloud();
            let ctx = context(store.mock(Some(owner_cluster())), cloud.clone());

            let err = run(&store, &ctx).await.unwrap_err();

            assert!(err.is_terminal());
            assert_eq!(cloud.create_count(ResourceKind::LoadBalancer), 0);
            assert_eq!(
                store.last_status().failure_reason,
                Some(FailureReason::UnsupportedChangeError)
            );
            assert_eq!(
                error_policy(Arc::new(sample_cluster()), &err, ctx.clone()),
                Action::requeue(Duration::from_secs(60))
            );
        }

        #[tokio::test(start_paused = true)]
        async fn story_missing_vpc_is_unsupported() {
            let store = ObjectStore::new(Some(sample_cluster()));
            let cloud = Arc::new(FakeCloud::new());
            let ctx = context(store.mock(Some(owner_cluster())), cloud.clone());

            run(&store, &ctx).await.unwrap_err();

            assert_eq!(
                store.last_status().failure_reason,
                Some(FailureReason::UnsupportedChangeError)
            );
            assert_eq!(cloud.total_creates(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn story_persist_failure_is_surfaced_with_pass_failure() {
            let store = ObjectStore::new(Some(sample_cluster()));
            let cloud = seeded_cloud();
            cloud.fail_create("k8s-api-lb-default-demo", "quota exceeded");

            let mut kube = MockKubeClient::new();
            let object = store.object.clone();
            kube.expect_get_viettel_cluster()
                .returning(move |_, _| Ok(object.lock().unwrap().clone()));
            kube.expect_get_cluster()
                .returning(|_, _| Ok(Some(owner_cluster())));
            kube.expect_persist_viettel_cluster()
                .times(1)
                .returning(|_, _| Err(Error::serialization("patch rejected")));
            let ctx = context(kube, cloud);

            let err = run(&store, &ctx).await.unwrap_err();

            match err {
                Error::Combined { primary, persist } => {
                    assert!(matches!(*primary, Error::CreationFailed { .. }));
                    assert!(matches!(*persist, Error::Serialization(_)));
                }
                other => panic!("expected combined error, got {other:?}"),
            }
        }
    }

    // =========================================================================
    // Deletion Stories
    // =========================================================================

    mod deletion {
        use super::*;

        fn deleting_cluster() -> ViettelCluster {
            let mut vc = sample_cluster();
            vc.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
            vc
        }

        fn seed_owned(cloud: &FakeCloud) {
            cloud.seed(ResourceKind::LoadBalancer, "k8s-api-lb-default-demo");
            cloud.seed(ResourceKind::ServerGroup, "k8s-api-sg-default-demo");
            cloud.seed(ResourceKind::Listener, "k8s-api-ls-default-demo");
            cloud.seed(ResourceKind::SecurityGroup, "k8s-api-sec-default-demo-controlplane");
            cloud.seed(ResourceKind::SecurityGroup, "k8s-api-sec-default-demo-worker");
        }

        #[tokio::test]
        async fn story_delete_destroys_owned_resources_once() {
            let store = ObjectStore::new(Some(deleting_cluster()));
            let cloud = seeded_cloud();
            seed_owned(&cloud);
            let ctx = context(store.mock(Some(owner_cluster())), cloud.clone());

            let action = run(&store, &ctx).await.unwrap();

            assert_eq!(action, Action::await_change());
            assert_eq!(cloud.total_creates(), 0);
            assert_eq!(cloud.destroyed(ResourceKind::Listener).len(), 1);
            assert_eq!(cloud.destroyed(ResourceKind::ServerGroup).len(), 1);
            assert_eq!(cloud.destroyed(ResourceKind::LoadBalancer).len(), 1);
            assert_eq!(cloud.destroyed(ResourceKind::SecurityGroup).len(), 2);
            // The VPC and subnet belong to the user
            assert!(cloud.destroyed(ResourceKind::Network).is_empty());
            assert!(cloud.destroyed(ResourceKind::Subnet).is_empty());

            assert_eq!(store.persist_count(), 1);
            assert!(!has_finalizer(&store.last_persisted(), VIETTEL_CLUSTER_FINALIZER));
        }

        #[tokio::test]
        async fn story_delete_proceeds_without_owner() {
            let mut vc = deleting_cluster();
            vc.metadata.owner_references = None;
            let store = ObjectStore::new(Some(vc));
            let cloud = seeded_cloud();
            seed_owned(&cloud);
            let ctx = context(store.mock(None), cloud.clone());

            run(&store, &ctx).await.unwrap();

            assert_eq!(cloud.destroyed(ResourceKind::LoadBalancer).len(), 1);
            assert!(!has_finalizer(&store.last_persisted(), VIETTEL_CLUSTER_FINALIZER));
        }

        #[tokio::test]
        async fn story_duplicate_names_block_deletion() {
            let store = ObjectStore::new(Some(deleting_cluster()));
            let cloud = seeded_cloud();
            seed_owned(&cloud);
            cloud.seed(ResourceKind::LoadBalancer, "k8s-api-lb-default-demo");
            let ctx = context(store.mock(Some(owner_cluster())), cloud.clone());

            let err = run(&store, &ctx).await.unwrap_err();

            assert!(matches!(err, Error::Conflict { .. }));
            assert!(cloud.destroyed(ResourceKind::LoadBalancer).is_empty());
            let persisted = store.last_persisted();
            assert!(has_finalizer(&persisted, VIETTEL_CLUSTER_FINALIZER));
            assert_eq!(
                persisted.status.unwrap().failure_reason,
                Some(FailureReason::DeleteClusterError)
            );
        }
    }
}
