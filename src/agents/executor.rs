//! Shared execution wrapper: observe → decide → store → publish

use tracing::{debug, info, warn};

use crate::bus::Event;
use crate::error::{AgentError, StoreError};
use crate::store::{write_with_retry, StateValue, Update};

use super::context::{AgentContext, AgentRuntime};
use super::traits::Agent;

/// Run one agent for one stimulus.
///
/// Events are built before anything is written so a serialization failure
/// leaves the store untouched. Nothing is published unless every record was
/// stored. A record older than the one already stored is skipped and not
/// published.
pub async fn execute<A: Agent>(
    agent: &A,
    ctx: &AgentContext,
    runtime: &AgentRuntime,
) -> Result<A::Decision, AgentError> {
    let kind = agent.kind();
    debug!(
        "{} observing for stimulus {} ({:?}/{:?})",
        kind, ctx.stimulus_id, ctx.patient_id, ctx.unit_id
    );

    let observation = agent.observe(ctx).await?;
    let decision = agent.decide(observation)?;
    let records = agent.records(&decision);

    let mut events = Vec::with_capacity(records.len());
    for (key, value) in &records {
        let payload = value.payload().map_err(|e| AgentError::Serialization {
            agent: kind,
            reason: format!("{key}: {e}"),
        })?;
        let event = Event::new(kind.topic(), kind.id(), ctx.patient_id.clone(), payload);
        events.push(event.at(ctx.now));
    }

    let mut fresh = Vec::with_capacity(records.len());
    for (key, value) in records {
        let incoming = value.produced_at();
        let outcome = write_with_retry(
            runtime.store.as_ref(),
            &key,
            kind.id(),
            &runtime.retry,
            |current| {
                let stored = current.and_then(StateValue::produced_at);
                if let (Some(stored), Some(incoming)) = (stored, incoming) {
                    if stored > incoming {
                        return Ok::<_, StoreError>(Update::Skip);
                    }
                }
                Ok(Update::Write(value.clone()))
            },
        )
        .await
        .map_err(|source| {
            warn!("{} could not store {}: {}", kind, key, source);
            AgentError::StoreConflict { agent: kind, source }
        })?;

        if outcome.written {
            debug!("{} wrote {} v{}", kind, key, outcome.version);
        } else {
            debug!(
                "{} skipped {}: v{} is newer than stimulus {}",
                kind, key, outcome.version, ctx.stimulus_id
            );
        }
        fresh.push(outcome.written);
    }

    let mut published = 0;
    for (event, written) in events.into_iter().zip(fresh) {
        if !written {
            continue;
        }
        let report = runtime.bus.publish(event).await;
        published += 1;
        if !report.all_delivered() {
            debug!(
                "{} delivery on {}: {}/{} handlers ok",
                kind, report.topic, report.delivered, report.subscribers
            );
        }
    }

    info!(
        "{} completed stimulus {} ({} record(s) published)",
        kind, ctx.stimulus_id, published
    );
    Ok(decision)
}
