//! Timing configuration shared by all controllers

use std::time::Duration;

use crate::retry::BackoffPolicy;

/// Requeue intervals and poll schedule used by every reconcile pass
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileConfig {
    /// Schedule for waiting on backend resources to become active
    pub poll: BackoffPolicy,
    /// Deadline of one backend call
    pub call_timeout: Duration,
    /// Resync interval once everything is converged
    pub ready_requeue: Duration,
    /// Requeue after a retryable failure
    pub error_requeue: Duration,
    /// Requeue after a failure that needs human action
    pub terminal_error_requeue: Duration,
    /// Requeue while the owning Cluster is not linked yet
    pub owner_requeue: Duration,
    /// Requeue after requesting a nested component
    pub resource_wait_requeue: Duration,
    /// Requeue while a nested component exists but is not ready
    pub immediate_requeue: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll: BackoffPolicy::default(),
            call_timeout: Duration::from_secs(30),
            ready_requeue: Duration::from_secs(300),
            error_requeue: Duration::from_secs(5),
            terminal_error_requeue: Duration::from_secs(60),
            owner_requeue: Duration::from_secs(5),
            resource_wait_requeue: Duration::from_secs(10),
            immediate_requeue: Duration::from_secs(1),
        }
    }
}
