//! Resource convergence: get-or-create with uniqueness-by-name
//!
//! The backend does not enforce unique names, so every ensure lists by name
//! first. One match is reused, none is created, more than one is a
//! [`Error::Conflict`] left for a human to resolve.

pub mod loadbalancer;
pub mod network;
pub mod security;

use tracing::{debug, info, warn};

use crate::cloud::{wait_active, ExternalResource, ListQuery, ResourceKind, ResourceSpec, Session};
use crate::Error;

/// Name suffix shared by every resource of one cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterKey {
    /// Namespace of the aggregate
    pub namespace: String,
    /// Name of the aggregate
    pub name: String,
}

impl ClusterKey {
    /// Create a key for the given aggregate
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Resource name for the given prefix
    pub fn resource_name(&self, prefix: &str) -> String {
        format!("{prefix}{}-{}", self.namespace, self.name)
    }
}

/// Ensure exactly one resource named after `spec` exists and is active.
///
/// `depends_on` resources must be active before a create is attempted, and
/// are waited on again after one, since the backend moves a parent through a
/// pending state while it attaches a child. Calling this again with the same
/// spec returns the same resource without creating anything.
pub async fn ensure_resource(
    session: &Session<'_>,
    spec: &ResourceSpec,
    depends_on: &[(ResourceKind, &ExternalResource)],
) -> Result<ExternalResource, Error> {
    let kind = spec.kind();
    let name = spec.name();

    let existing = session.list(kind, &ListQuery::by_name(name)).await?;
    let (resource, created) = match existing.as_slice() {
        [] => {
            for (dep_kind, dep) in depends_on {
                wait_active(session, *dep_kind, dep).await?;
            }

            info!(%kind, %name, "creating resource");
            let id = session
                .create(spec)
                .await
                .map_err(|e| Error::CreationFailed {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    message: e.to_string(),
                })?;
            (session.retrieve(kind, &id).await?, true)
        }
        [one] => {
            debug!(%kind, %name, id = %one.id, "resource exists");
            (session.retrieve(kind, &one.id).await?, false)
        }
        many => {
            let ids: Vec<String> = many.iter().map(|r| r.id.clone()).collect();
            warn!(%kind, %name, ?ids, "duplicate resources share a name");
            return Err(Error::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
                ids,
            });
        }
    };

    let resource = wait_active(session, kind, &resource).await?;

    if created {
        for (dep_kind, dep) in depends_on {
            wait_active(session, *dep_kind, dep).await?;
        }
    }

    Ok(resource)
}

/// Destroy the single resource of `kind` named `name`, if it exists.
///
/// Returns true if something was destroyed. Duplicates are a conflict here
/// too; deleting an arbitrary one would hide the problem.
pub async fn teardown(session: &Session<'_>, kind: ResourceKind, name: &str) -> Result<bool, Error> {
    let existing = session.list(kind, &ListQuery::by_name(name)).await?;
    match existing.as_slice() {
        [] => {
            debug!(%kind, %name, "nothing to delete");
            Ok(false)
        }
        [one] => {
            info!(%kind, %name, id = %one.id, "deleting resource");
            session.destroy(kind, &one.id).await?;
            Ok(true)
        }
        many => Err(Error::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
            ids: many.iter().map(|r| r.id.clone()).collect(),
        }),
    }
}
