//! Failure reporting onto aggregate status
//!
//! Every pass ends by either clearing the failure pair or recording exactly
//! one [`FailureReason`] with the error text. Expected states (object gone,
//! owner not linked yet) leave the status untouched.

use kube::runtime::controller::Action;

use crate::crd::{FailureReason, ReportsFailure};
use crate::Error;

/// Which branch of the dispatcher produced an outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcilePath {
    /// Converging toward the declared state
    Normal,
    /// Tearing down owned resources
    Delete,
}

/// Classify a failed pass, `None` if it should not be surfaced
pub fn failure_reason(error: &Error, path: ReconcilePath, was_ready: bool) -> Option<FailureReason> {
    if !error.is_reportable() {
        return None;
    }

    let reason = match (path, error) {
        (ReconcilePath::Delete, _) => FailureReason::DeleteClusterError,
        (ReconcilePath::Normal, Error::Unsupported(_)) => FailureReason::UnsupportedChangeError,
        (ReconcilePath::Normal, _) if was_ready => FailureReason::UpdateClusterError,
        (ReconcilePath::Normal, _) => FailureReason::CreateClusterError,
    };
    Some(reason)
}

/// Set the failure pair
pub fn record_failure<S: ReportsFailure>(status: &mut S, reason: FailureReason, message: impl Into<String>) {
    *status.failure_reason_mut() = Some(reason);
    *status.failure_message_mut() = Some(message.into());
}

/// Clear the failure pair after a successful pass
pub fn clear_failure<S: ReportsFailure>(status: &mut S) {
    *status.failure_reason_mut() = None;
    *status.failure_message_mut() = None;
}

/// Apply the outcome of a pass to the failure pair
pub fn record_outcome<S: ReportsFailure>(
    status: &mut S,
    outcome: &Result<Action, Error>,
    path: ReconcilePath,
    was_ready: bool,
) {
    match outcome {
        Ok(_) => clear_failure(status),
        Err(e) => {
            if let Some(reason) = failure_reason(e, path, was_ready) {
                record_failure(status, reason, e.to_string());
            }
        }
    }
}
