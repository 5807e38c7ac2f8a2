//! Error types for the Viettel Cloud infrastructure provider

use std::time::Duration;

use thiserror::Error;

/// Main error type for provider operations
///
/// Every failure is scoped to a single reconcile pass of one aggregate. The
/// dispatcher decides per variant whether the failure is surfaced on the
/// object's status or handled locally.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A backend or cluster object does not exist
    #[error("{kind} {id} not found")]
    NotFound {
        /// Resource family or object kind
        kind: String,
        /// Identifier that was looked up
        id: String,
    },

    /// The owning aggregate has not been linked yet
    #[error("owner not resolved: {0}")]
    OwnerUnresolved(String),

    /// More than one backend resource carries the same name
    #[error("duplicate {kind} named {name}: {}", ids.join(", "))]
    Conflict {
        /// Resource family
        kind: String,
        /// Name shared by the duplicates
        name: String,
        /// IDs of every resource sharing the name
        ids: Vec<String>,
    },

    /// The backend rejected a create call
    #[error("failed to create {kind} {name}: {message}")]
    CreationFailed {
        /// Resource family
        kind: String,
        /// Name of the resource that was being created
        name: String,
        /// Raw backend error for diagnostics
        message: String,
    },

    /// A resource never reached its ready state within the poll budget
    #[error("{kind} {name} ({id}) not active after {attempts} attempts")]
    NotActive {
        /// Resource family
        kind: String,
        /// Resource name
        name: String,
        /// Backend-assigned ID
        id: String,
        /// Number of reads performed
        attempts: u32,
    },

    /// Communication with the cloud backend failed
    #[error("transport error on {kind} {id}: {message}")]
    Transport {
        /// Resource family
        kind: String,
        /// Resource ID, or the name/filter used when no ID is known yet
        id: String,
        /// Underlying error
        message: String,
    },

    /// The desired state asks for something this provider cannot do
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A call did not finish within its caller-supplied deadline
    #[error("{operation} exceeded deadline of {}s", timeout.as_secs())]
    DeadlineExceeded {
        /// What was being attempted
        operation: String,
        /// The deadline that elapsed
        timeout: Duration,
    },

    /// An object lacks metadata the API server always sets on stored objects
    #[error("{kind} {name} has no {field}")]
    MissingMetadata {
        /// Object kind
        kind: String,
        /// `namespace/name` of the object
        name: String,
        /// Missing metadata field
        field: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Reconcile failed and persisting the object afterward failed too
    #[error("{primary}; persisting status also failed: {persist}")]
    Combined {
        /// Failure from the reconcile pass itself
        primary: Box<Error>,
        /// Failure from the final patch
        persist: Box<Error>,
    },
}

impl Error {
    /// Create a not-found error for the given kind and identifier
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Create an owner-unresolved error with the given message
    pub fn owner_unresolved(msg: impl Into<String>) -> Self {
        Self::OwnerUnresolved(msg.into())
    }

    /// Create a transport error wrapping the given message
    pub fn transport(
        kind: impl Into<String>,
        id: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Transport {
            kind: kind.into(),
            id: id.into(),
            message: msg.into(),
        }
    }

    /// Create an unsupported-change error with the given message
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a missing-metadata error for the given object and field
    pub fn missing_metadata(
        kind: impl Into<String>,
        name: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::MissingMetadata {
            kind: kind.into(),
            name: name.into(),
            field: field.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Merge a reconcile outcome with the outcome of the final persist
    ///
    /// When both failed the reconcile failure stays primary.
    pub fn merge<T>(outcome: Result<T, Error>, persisted: Result<(), Error>) -> Result<T, Error> {
        match (outcome, persisted) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
            (Err(primary), Err(persist)) => Err(Self::Combined {
                primary: Box::new(primary),
                persist: Box::new(persist),
            }),
        }
    }

    /// Returns true if retrying cannot help until someone changes the world
    ///
    /// Duplicate names need manual cleanup and unsupported values need a
    /// spec correction.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Conflict { .. } | Self::Unsupported(_) => true,
            Self::Combined { primary, .. } => primary.is_terminal(),
            _ => false,
        }
    }

    /// Returns true if this failure should be written to the object's status
    ///
    /// Missing objects and unlinked owners are expected states, not failures.
    pub fn is_reportable(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::OwnerUnresolved(_) => false,
            Self::Combined { primary, .. } => primary.is_reportable(),
            _ => true,
        }
    }

    /// Returns true if the underlying Kubernetes API call returned 404
    pub fn is_kube_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
