//! Coordination executors
//!
//! Implements the per-message coordination modes over resolved targets:
//! direct dispatch with retry policy, concurrent broadcast with aggregation
//! verdicts, success-count consensus and ordered pipelines. Individual
//! dispatch failures inside a fan-out never abort peers; they are
//! synthesized into failure responses in the slot where the dispatch
//! failed.

use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::bus::MessageBus;
use super::domain_types::{
    AgentId, AggregationMode, BackoffStrategy, ConsensusType, FailureStrategy, Message,
    PipelineStage, Response, RetryPolicy, StageTransform,
};
use super::traits::BusError;

/// Dispatches to the single resolved target, retrying per the message's
/// retry policy when `with_retries` is set
///
/// Retries apply only to failure responses whose error code is listed in
/// `retryable_errors`; dispatch-layer errors (unresolved target, missing
/// agent) are never retried.
pub(crate) async fn execute_direct(
    bus: &MessageBus,
    message: Message,
    with_retries: bool,
) -> Result<Response, BusError> {
    let resolved = bus.resolve_targets(&message);
    let Some(head) = resolved.first().cloned() else {
        return Err(BusError::NoAgentsForTarget);
    };

    let mut response = bus.dispatch(&head, message.clone()).await?;
    if !with_retries {
        return Ok(response);
    }

    let policy = message.retry_policy.clone();
    let mut attempt = 0;
    while !response.success && attempt < policy.max_retries {
        let Some(error) = response.error.as_ref() else {
            break;
        };
        if !policy.retryable_errors.contains(&error.code) {
            break;
        }

        attempt += 1;
        let delay = backoff_delay(bus, &policy, attempt);
        debug!(
            message_id = %message.id,
            agent_id = %head,
            attempt,
            ?delay,
            code = %error.code,
            "retrying direct dispatch"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response = bus.dispatch(&head, message.clone()).await?;
    }

    Ok(response)
}

/// Dispatches to every resolved target concurrently and applies the
/// aggregation verdict
pub(crate) async fn execute_broadcast(
    bus: &MessageBus,
    message: Message,
    aggregation: AggregationMode,
    partial_success: bool,
) -> Result<Vec<Response>, BusError> {
    let resolved = bus.resolve_targets(&message);
    if resolved.is_empty() {
        return Err(BusError::CoordinationFailed {
            reason: "No agents found for target".to_owned(),
            responses: Vec::new(),
        });
    }

    let (responses, first_arrived) = fan_out(bus, &message, &resolved).await;
    let successes = responses.iter().filter(|response| response.success).count();

    let verdict = match aggregation {
        AggregationMode::All => successes == responses.len(),
        AggregationMode::Majority => successes * 2 > responses.len(),
        AggregationMode::First => {
            first_arrived.is_some_and(|index| responses[index].success)
        }
        AggregationMode::Any => successes > 0,
    };

    if verdict || (partial_success && successes > 0) {
        Ok(responses)
    } else {
        warn!(
            message_id = %message.id,
            successes,
            targets = responses.len(),
            "broadcast aggregation not satisfied"
        );
        Err(BusError::CoordinationFailed {
            reason: format!(
                "Broadcast aggregation not satisfied: {successes}/{} successful",
                responses.len()
            ),
            responses,
        })
    }
}

/// Dispatches like a broadcast, then checks the consensus threshold
///
/// The threshold is the full target count for unanimous votes and half the
/// count (rounded up) otherwise. Weighted votes use the host weigher when
/// one is installed and reduce to the majority count when not.
pub(crate) async fn execute_consensus(
    bus: &MessageBus,
    message: Message,
    consensus_type: ConsensusType,
    minimum_participants: u32,
) -> Result<Vec<Response>, BusError> {
    let resolved = bus.resolve_targets(&message);
    if resolved.len() < minimum_participants as usize {
        return Err(BusError::InsufficientParticipants {
            resolved: resolved.len(),
            minimum: minimum_participants,
        });
    }
    if resolved.is_empty() {
        return Err(BusError::CoordinationFailed {
            reason: "No agents found for target".to_owned(),
            responses: Vec::new(),
        });
    }

    let (responses, _) = fan_out(bus, &message, &resolved).await;
    let successes = responses.iter().filter(|response| response.success).count();

    let reached = match consensus_type {
        ConsensusType::Unanimous => successes == resolved.len(),
        ConsensusType::Majority => successes >= resolved.len().div_ceil(2),
        ConsensusType::Weighted => match bus.consensus_weigher() {
            Some(weigher) => {
                let total: f64 = resolved.iter().map(|id| weigher.weight(id)).sum();
                let carried: f64 = resolved
                    .iter()
                    .zip(&responses)
                    .filter(|(_, response)| response.success)
                    .map(|(id, _)| weigher.weight(id))
                    .sum();
                carried >= total / 2.0
            }
            None => successes >= resolved.len().div_ceil(2),
        },
    };

    if reached {
        Ok(responses)
    } else {
        warn!(
            message_id = %message.id,
            successes,
            targets = resolved.len(),
            "consensus not reached"
        );
        Err(BusError::ConsensusNotReached { responses })
    }
}

/// Runs the pipeline stages strictly in declaration order
///
/// Each stage message is a fresh envelope with a derived ID, the stage's
/// target and tool, and the (optionally transformed) output of the previous
/// stage as parameters. Dispatch-layer errors at a stage are equivalent to
/// failure responses under the same failure strategy.
pub(crate) async fn execute_pipeline(
    bus: &MessageBus,
    message: Message,
    stages: &[PipelineStage],
    failure_strategy: FailureStrategy,
) -> Result<Vec<Response>, BusError> {
    let mut responses = Vec::with_capacity(stages.len());
    let mut current = message.parameters.clone();

    for (index, stage) in stages.iter().enumerate() {
        // The retry strategy re-dispatches a failed stage exactly once; the
        // re-dispatch itself still runs under the message's retry policy.
        let attempts = if failure_strategy == FailureStrategy::Retry {
            2
        } else {
            1
        };

        let mut advanced = false;
        for attempt in 0..attempts {
            let input = apply_transform(stage.input_transform.as_ref(), current.clone());
            let stage_message = message.stage_message(index, stage, input);
            trace!(stage_id = %stage_message.id, attempt, "dispatching pipeline stage");

            let response = match execute_direct(bus, stage_message.clone(), true).await {
                Ok(response) => response,
                Err(error) => Response::synthesized_failure(&stage_message, error.to_string()),
            };
            let success = response.success;
            let result = response.result.clone();
            responses.push(response);

            if success {
                current =
                    apply_transform(stage.output_transform.as_ref(), result.unwrap_or(Value::Null));
                advanced = true;
                break;
            }
        }

        if !advanced {
            match failure_strategy {
                // A failed stage never produced the input the next stage
                // expects, so retry stops once its re-dispatch fails too.
                FailureStrategy::Abort | FailureStrategy::Retry => break,
                FailureStrategy::Skip => {}
            }
        }
    }

    Ok(responses)
}

/// Dispatches one message to every ID concurrently
///
/// Returns responses in the given ID order, with synthesized failure
/// responses in the slots whose dispatch failed, plus the index of the
/// first-arrived response.
pub(crate) async fn fan_out(
    bus: &MessageBus,
    message: &Message,
    agent_ids: &[AgentId],
) -> (Vec<Response>, Option<usize>) {
    let mut in_flight = FuturesUnordered::new();
    for (index, agent_id) in agent_ids.iter().enumerate() {
        let message = message.clone();
        in_flight.push(async move { (index, bus.dispatch(agent_id, message).await) });
    }

    let mut slots: Vec<Option<Response>> = agent_ids.iter().map(|_| None).collect();
    let mut first_arrived = None;
    while let Some((index, outcome)) = in_flight.next().await {
        if first_arrived.is_none() {
            first_arrived = Some(index);
        }
        slots[index] = Some(match outcome {
            Ok(response) => response,
            Err(error) => Response::synthesized_failure(message, error.to_string()),
        });
    }

    (slots.into_iter().flatten().collect(), first_arrived)
}

/// Delay before the given retry attempt (1-based)
fn backoff_delay(bus: &MessageBus, policy: &RetryPolicy, attempt: u32) -> Duration {
    let delay_ms = match policy.backoff_strategy {
        BackoffStrategy::Linear => policy.base_delay.saturating_mul(u64::from(attempt)),
        BackoffStrategy::Exponential => {
            let doublings = u32::min(attempt.saturating_sub(1), 63);
            policy.base_delay.saturating_mul(1u64 << doublings)
        }
        BackoffStrategy::Custom => {
            return bus.custom_backoff().map_or(
                Duration::from_millis(policy.base_delay),
                |hook| hook.delay(attempt, policy),
            );
        }
    };
    Duration::from_millis(delay_ms.min(policy.max_delay))
}

fn apply_transform(transform: Option<&StageTransform>, value: Value) -> Value {
    match transform {
        Some(transform) => transform(value),
        None => value,
    }
}
