//! Waiting for a backend resource to become usable

use tracing::{debug, info};

use super::{with_deadline, ExternalResource, Readiness, ResourceKind, Session};
use crate::retry::{poll_with_backoff, PollOutcome};
use crate::Error;

/// Poll `resource` until its family's ready combination is observed.
///
/// Families without a provisioning state return at once without a read.
/// Each read is one retrieve under the session's call deadline; a failed read
/// ends the wait with that error. Running out of steps yields
/// [`Error::NotActive`]. Returns the record from the read that passed.
pub async fn wait_active(
    session: &Session<'_>,
    kind: ResourceKind,
    resource: &ExternalResource,
) -> Result<ExternalResource, Error> {
    wait_until(session, kind, resource, kind.readiness()).await
}

/// Poll `resource` until its provisioning status settles on ACTIVE
///
/// Used after removing a child, when only the pending update matters and the
/// operating status may legitimately stay down.
pub async fn wait_provisioned(
    session: &Session<'_>,
    kind: ResourceKind,
    resource: &ExternalResource,
) -> Result<ExternalResource, Error> {
    let rule = match kind.readiness() {
        Readiness::Immediate => Readiness::Immediate,
        Readiness::ProvisioningActive | Readiness::OnlineAndActive => {
            Readiness::ProvisioningActive
        }
    };
    wait_until(session, kind, resource, rule).await
}

async fn wait_until(
    session: &Session<'_>,
    kind: ResourceKind,
    resource: &ExternalResource,
    rule: Readiness,
) -> Result<ExternalResource, Error> {
    if rule == Readiness::Immediate {
        return Ok(resource.clone());
    }

    let operation = format!("{kind} {}", resource.name);

    let poll = poll_with_backoff(session.policy, &operation, || async move {
        let observed = session.retrieve(kind, &resource.id).await?;
        let ready = rule.is_satisfied(&observed);
        debug!(
            %kind,
            id = %observed.id,
            operating = ?observed.operating_status,
            provisioning = ?observed.provisioning_status,
            ready,
            "polled resource"
        );
        Ok::<_, Error>(ready.then_some(observed))
    });

    let outcome = match session.policy.deadline {
        Some(deadline) => with_deadline(deadline, &format!("wait for {operation}"), poll).await?,
        None => poll.await?,
    };

    match outcome {
        PollOutcome::Ready { attempts, value } => {
            info!(%kind, name = %resource.name, id = %resource.id, attempts, "resource active");
            Ok(value)
        }
        PollOutcome::Exhausted { attempts } => Err(Error::NotActive {
            kind: kind.to_string(),
            name: resource.name.clone(),
            id: resource.id.clone(),
            attempts,
        }),
    }
}
