//! Kubernetes access shared by the provider's controllers
//!
//! Controllers never talk to the API server directly; they go through the
//! [`KubeClient`] trait so reconcile passes can be exercised against mocks.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ApiResource, DynamicObject, Patch, PatchParams, PostParams};
use kube::core::GroupVersionKind;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::cloud::CloudClient;
use crate::config::ReconcileConfig;
use crate::crd::{
    ApiEndpoint, Cluster, ComponentState, DataStore, DataStoreSpec, Etcd, EtcdSpec,
    InfrastructureTarget, NestedCluster, NestedClusterStatus, NestedComponent,
    NestedControlPlane, TenantControlPlane, TenantControlPlaneSpec, ViettelCluster,
};
use crate::{Error, FIELD_MANAGER};

/// Trait abstracting Kubernetes client operations for the provider
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a ViettelCluster, `None` if it no longer exists
    async fn get_viettel_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ViettelCluster>, Error>;

    /// Write the differences between two versions of a ViettelCluster
    ///
    /// Status is patched first, then finalizers, so a pass that removes the
    /// last finalizer still records its outcome.
    async fn persist_viettel_cluster(
        &self,
        before: &ViettelCluster,
        after: &ViettelCluster,
    ) -> Result<(), Error>;

    /// Fetch a Cluster API Cluster
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, Error>;

    /// Fetch a NestedControlPlane
    async fn get_control_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NestedControlPlane>, Error>;

    /// Write the differences between two versions of a NestedControlPlane
    async fn persist_control_plane(
        &self,
        before: &NestedControlPlane,
        after: &NestedControlPlane,
    ) -> Result<(), Error>;

    /// Observe a nested component's readiness
    async fn observe_component(
        &self,
        namespace: &str,
        component: NestedComponent,
        name: &str,
    ) -> Result<ComponentState, Error>;

    /// Create a nested component with an empty spec, owned by `owner`
    ///
    /// Succeeds if an object of that name already exists.
    async fn create_component(
        &self,
        namespace: &str,
        component: NestedComponent,
        name: &str,
        owner: &OwnerReference,
    ) -> Result<(), Error>;

    /// Write the API server endpoint onto a cluster's infrastructure object
    async fn publish_endpoint(
        &self,
        namespace: &str,
        target: &InfrastructureTarget,
        endpoint: &ApiEndpoint,
    ) -> Result<(), Error>;

    /// Fetch a NestedCluster
    async fn get_nested_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NestedCluster>, Error>;

    /// Patch the status of a NestedCluster
    async fn patch_nested_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &NestedClusterStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn create_owned<K>(&self, namespace: &str, mut obj: K, owner: &OwnerReference) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        obj.meta_mut().namespace = Some(namespace.to_string());
        obj.meta_mut().owner_references = Some(vec![owner.clone()]);
        let name = obj.name_any();

        match self
            .api::<K>(namespace)
            .create(&PostParams::default(), &obj)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                debug!(%name, "component already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Build a status merge patch that also clears fields `after` dropped
///
/// Optional status fields are skipped when serialized, so a plain merge
/// patch could never unset them.
pub(crate) fn status_patch<S: Serialize>(before: Option<&S>, after: &S) -> Result<Value, Error> {
    let mut status = serde_json::to_value(after)?;
    if let (Some(before), Some(fields)) = (before, status.as_object_mut()) {
        if let Value::Object(previous) = serde_json::to_value(before)? {
            for key in previous.keys() {
                fields.entry(key.clone()).or_insert(Value::Null);
            }
        }
    }
    Ok(serde_json::json!({ "status": status }))
}

/// Build the finalizer merge patch
///
/// The patch is pinned to the newest version the API server returned: the
/// object written by this pass's status patch if there was one, else the
/// fetched object. A status write moves the version.
pub(crate) fn finalizer_patch<K: Resource>(
    fetched: &K,
    status_written: Option<&K>,
    finalizers: &[String],
) -> Value {
    let latest = status_written.unwrap_or(fetched);
    // resourceVersion makes a concurrent finalizer change fail with a conflict
    serde_json::json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": latest.resource_version(),
        }
    })
}

async fn persist_object<K, S>(
    api: &Api<K>,
    before: (&K, Option<&S>),
    after: (&K, Option<&S>),
) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    S: Serialize + PartialEq,
{
    let name = after.0.name_any();
    let params = PatchParams::apply(FIELD_MANAGER);

    let mut latest = None;
    if before.1 != after.1 {
        if let Some(status) = after.1 {
            let patch = status_patch(before.1, status)?;
            latest = Some(api.patch_status(&name, &params, &Patch::Merge(&patch)).await?);
        }
    }

    if before.0.finalizers() != after.0.finalizers() {
        let patch = finalizer_patch(after.0, latest.as_ref(), after.0.finalizers());
        api.patch(&name, &params, &Patch::Merge(&patch)).await?;
    }

    Ok(())
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_viettel_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ViettelCluster>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn persist_viettel_cluster(
        &self,
        before: &ViettelCluster,
        after: &ViettelCluster,
    ) -> Result<(), Error> {
        let api: Api<ViettelCluster> = self.api(&after.namespace().unwrap_or_default());
        persist_object(
            &api,
            (before, before.status.as_ref()),
            (after, after.status.as_ref()),
        )
        .await
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_control_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NestedControlPlane>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn persist_control_plane(
        &self,
        before: &NestedControlPlane,
        after: &NestedControlPlane,
    ) -> Result<(), Error> {
        let api: Api<NestedControlPlane> = self.api(&after.namespace().unwrap_or_default());
        persist_object(
            &api,
            (before, before.status.as_ref()),
            (after, after.status.as_ref()),
        )
        .await
    }

    async fn observe_component(
        &self,
        namespace: &str,
        component: NestedComponent,
        name: &str,
    ) -> Result<ComponentState, Error> {
        let state = match component {
            NestedComponent::Etcd => self
                .get_opt::<Etcd>(namespace, name)
                .await?
                .as_ref()
                .map_or(ComponentState::Absent, ComponentState::from),
            NestedComponent::DataStore => self
                .get_opt::<DataStore>(namespace, name)
                .await?
                .as_ref()
                .map_or(ComponentState::Absent, ComponentState::from),
            NestedComponent::TenantControlPlane => self
                .get_opt::<TenantControlPlane>(namespace, name)
                .await?
                .as_ref()
                .map_or(ComponentState::Absent, ComponentState::from),
        };
        Ok(state)
    }

    async fn create_component(
        &self,
        namespace: &str,
        component: NestedComponent,
        name: &str,
        owner: &OwnerReference,
    ) -> Result<(), Error> {
        match component {
            NestedComponent::Etcd => {
                self.create_owned(namespace, Etcd::new(name, EtcdSpec {}), owner)
                    .await
            }
            NestedComponent::DataStore => {
                self.create_owned(namespace, DataStore::new(name, DataStoreSpec {}), owner)
                    .await
            }
            NestedComponent::TenantControlPlane => {
                self.create_owned(
                    namespace,
                    TenantControlPlane::new(name, TenantControlPlaneSpec {}),
                    owner,
                )
                .await
            }
        }
    }

    async fn publish_endpoint(
        &self,
        namespace: &str,
        target: &InfrastructureTarget,
        endpoint: &ApiEndpoint,
    ) -> Result<(), Error> {
        let (group, version) = target
            .api_version
            .split_once('/')
            .unwrap_or(("", target.api_version.as_str()));
        let gvk = GroupVersionKind::gvk(group, version, target.kind_name());
        let resource = ApiResource::from_gvk(&gvk);
        let target_namespace = target.namespace.as_deref().unwrap_or(namespace);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), target_namespace, &resource);

        let patch = serde_json::json!({
            "spec": { "controlPlaneEndpoint": endpoint }
        });
        api.patch(
            &target.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn get_nested_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NestedCluster>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn patch_nested_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &NestedClusterStatus,
    ) -> Result<(), Error> {
        let api: Api<NestedCluster> = self.api(namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Controller context containing shared state and clients
///
/// The context is shared across all reconciliation calls and holds
/// resources that are expensive to create.
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client, cloud)
///     .config(ReconcileConfig::default())
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Viettel Cloud client
    pub cloud: Arc<dyn CloudClient>,
    /// Requeue intervals and poll schedule
    pub config: ReconcileConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, cloud: Arc<dyn CloudClient>) -> ContextBuilder {
        ContextBuilder::new(client, cloud)
    }

    /// Create a context for testing with custom mock clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        cloud: Arc<dyn CloudClient>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            kube,
            cloud,
            config,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    cloud: Arc<dyn CloudClient>,
    kube: Option<Arc<dyn KubeClient>>,
    config: ReconcileConfig,
}

impl ContextBuilder {
    fn new(client: Client, cloud: Arc<dyn CloudClient>) -> Self {
        Self {
            client,
            cloud,
            kube: None,
            config: ReconcileConfig::default(),
        }
    }

    /// Set requeue intervals and the poll schedule
    pub fn config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Build the context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            cloud: self.cloud,
            config: self.config,
        }
    }
}
