//! Viettel Cloud backend abstraction
//!
//! [`CloudClient`] is the narrow seam between convergence logic and the REST
//! API: list by name, create from typed attributes, retrieve by ID, destroy.
//! Every call is scoped by a [`ProjectScope`].

mod http;
mod poller;
mod resource;

#[cfg(test)]
pub(crate) mod fake;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

pub use http::{CloudConfig, HttpCloudClient};
pub use poller::{wait_active, wait_provisioned};
pub use resource::{
    Algorithm, Direction, ExternalResource, ListQuery, ListenerSpec, LoadBalancerSpec, OperatingStatus,
    Protocol, ProvisioningStatus, Readiness, ResourceKind, ResourceSpec, SecurityGroupSpec,
    SecurityRule, ServerGroupSpec,
};

use crate::retry::BackoffPolicy;
use crate::Error;

/// Project/tenant scope of every backend call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectScope {
    /// Project ID
    pub project_id: String,
}

impl ProjectScope {
    /// Create a scope for the given project
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
        }
    }
}

/// Trait abstracting the Viettel Cloud resource API
///
/// Implementations wrap errors with the resource kind and ID before
/// returning them.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// List resources of a kind matching the query
    async fn list(
        &self,
        kind: ResourceKind,
        scope: &ProjectScope,
        query: &ListQuery,
    ) -> Result<Vec<ExternalResource>, Error>;

    /// Create a resource and return its backend-assigned ID
    async fn create(&self, scope: &ProjectScope, spec: &ResourceSpec) -> Result<String, Error>;

    /// Fetch a single resource by ID
    async fn retrieve(
        &self,
        kind: ResourceKind,
        scope: &ProjectScope,
        id: &str,
    ) -> Result<ExternalResource, Error>;

    /// Destroy a resource by ID
    async fn destroy(&self, kind: ResourceKind, scope: &ProjectScope, id: &str)
        -> Result<(), Error>;

    /// Give a route table a default route to the internet
    async fn enable_internet_access(
        &self,
        scope: &ProjectScope,
        route_table_id: &str,
    ) -> Result<(), Error>;
}

/// A cloud client bound to one project, poll schedule and call deadline
///
/// Every call made through a session is wrapped in [`with_deadline`].
#[derive(Clone, Copy)]
pub struct Session<'a> {
    /// Backend client
    pub cloud: &'a dyn CloudClient,
    /// Project of every call
    pub scope: &'a ProjectScope,
    /// Readiness poll schedule
    pub policy: &'a BackoffPolicy,
    /// Deadline of a single call
    pub call_timeout: Duration,
}

impl<'a> Session<'a> {
    /// Bind a client to a scope and timing policy
    pub fn new(
        cloud: &'a dyn CloudClient,
        scope: &'a ProjectScope,
        policy: &'a BackoffPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            cloud,
            scope,
            policy,
            call_timeout,
        }
    }

    /// List resources of a kind matching the query, re-checking the filter locally
    pub async fn list(
        &self,
        kind: ResourceKind,
        query: &ListQuery,
    ) -> Result<Vec<ExternalResource>, Error> {
        let op = format!("list {kind}");
        let items = with_deadline(self.call_timeout, &op, self.cloud.list(kind, self.scope, query))
            .await?;
        Ok(items.into_iter().filter(|r| query.matches(r)).collect())
    }

    /// Create a resource and return its ID
    pub async fn create(&self, spec: &ResourceSpec) -> Result<String, Error> {
        let op = format!("create {} {}", spec.kind(), spec.name());
        with_deadline(self.call_timeout, &op, self.cloud.create(self.scope, spec)).await
    }

    /// Fetch a resource by ID
    pub async fn retrieve(&self, kind: ResourceKind, id: &str) -> Result<ExternalResource, Error> {
        let op = format!("retrieve {kind} {id}");
        with_deadline(self.call_timeout, &op, self.cloud.retrieve(kind, self.scope, id)).await
    }

    /// Destroy a resource by ID
    pub async fn destroy(&self, kind: ResourceKind, id: &str) -> Result<(), Error> {
        let op = format!("destroy {kind} {id}");
        with_deadline(self.call_timeout, &op, self.cloud.destroy(kind, self.scope, id)).await
    }

    /// Enable internet access on a route table
    pub async fn enable_internet_access(&self, route_table_id: &str) -> Result<(), Error> {
        let op = format!("enable internet on route table {route_table_id}");
        with_deadline(
            self.call_timeout,
            &op,
            self.cloud.enable_internet_access(self.scope, route_table_id),
        )
        .await
    }
}

/// Run a backend call under a caller-supplied deadline
///
/// An elapsed deadline surfaces as [`Error::DeadlineExceeded`], a normal
/// per-pass failure.
pub async fn with_deadline<T, F>(timeout: Duration, operation: &str, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::DeadlineExceeded {
            operation: operation.to_string(),
            timeout,
        }),
    }
}
