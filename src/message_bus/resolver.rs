//! Target resolution
//!
//! Resolves a [`Target`] against a registry snapshot into an ordered,
//! de-duplicated list of agent IDs. Tie-break is registration order except
//! where a selection strategy says otherwise; missing agents are not
//! filtered here and surface later as `AGENT_NOT_FOUND`.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde_json::Value;
use tracing::trace;

use super::domain_types::{AgentIdentifier, CapabilityName, SelectionStrategy, Target};
use super::traits::ConditionEvaluator;
use crate::agent::Agent;
use crate::domain_types::AgentId;

/// Resolves a target into concrete agent IDs
///
/// `registry` is a registration-ordered snapshot; `evaluator` backs
/// `conditional` targets and leaves them unmatched when absent.
pub(crate) fn resolve(
    target: &Target,
    source: &AgentIdentifier,
    registry: &[Arc<Agent>],
    evaluator: Option<&Arc<dyn ConditionEvaluator>>,
) -> Vec<AgentId> {
    let resolved = match target {
        Target::Single { agent_id } => vec![agent_id.clone()],
        Target::Multiple { agent_ids, .. } => agent_ids.clone(),
        Target::Group {
            role,
            capabilities,
            max_agents,
            selection_strategy,
        } => {
            let mut matches: Vec<&Arc<Agent>> = registry
                .iter()
                .filter(|agent| agent.role() == role)
                .filter(|agent| has_capabilities(agent, capabilities.as_deref()))
                .collect();
            apply_strategy(&mut matches, *selection_strategy, capabilities.as_deref());
            if let Some(max) = max_agents {
                matches.truncate(*max);
            }
            matches.iter().map(|agent| agent.id().clone()).collect()
        }
        Target::Broadcast { exclude_source } => registry
            .iter()
            .map(|agent| agent.id())
            .filter(|id| !(*exclude_source && **id == source.agent_id))
            .cloned()
            .collect(),
        Target::Conditional {
            conditions,
            fallback,
        } => {
            let matches = conditional_matches(conditions, registry, evaluator);
            if matches.is_empty() {
                match fallback {
                    Some(fallback) => {
                        trace!("conditional target matched nothing, resolving fallback");
                        return resolve(fallback, source, registry, evaluator);
                    }
                    None => Vec::new(),
                }
            } else {
                matches
            }
        }
    };

    dedup_preserving_order(resolved)
}

fn has_capabilities(agent: &Arc<Agent>, requested: Option<&[CapabilityName]>) -> bool {
    requested.is_none_or(|requested| {
        requested
            .iter()
            .all(|capability| agent.capabilities().contains(capability))
    })
}

fn apply_strategy(
    matches: &mut Vec<&Arc<Agent>>,
    strategy: SelectionStrategy,
    requested: Option<&[CapabilityName]>,
) {
    match strategy {
        SelectionStrategy::Random => {
            matches.shuffle(&mut rand::thread_rng());
        }
        SelectionStrategy::LoadBalanced => {
            // Stable sort keeps registration order among equal loads.
            matches.sort_by_key(|agent| agent.in_flight());
        }
        SelectionStrategy::CapabilityMatched => {
            if let Some(requested) = requested {
                matches.sort_by_key(|agent| Reverse(capability_overlap(agent, requested)));
            }
        }
    }
}

fn capability_overlap(agent: &Arc<Agent>, requested: &[CapabilityName]) -> usize {
    requested
        .iter()
        .filter(|capability| agent.capabilities().contains(capability))
        .count()
}

fn conditional_matches(
    conditions: &[Value],
    registry: &[Arc<Agent>],
    evaluator: Option<&Arc<dyn ConditionEvaluator>>,
) -> Vec<AgentId> {
    let Some(evaluator) = evaluator else {
        return Vec::new();
    };
    registry
        .iter()
        .filter(|agent| evaluator.matches(conditions, &agent.status()))
        .map(|agent| agent.id().clone())
        .collect()
}

fn dedup_preserving_order(ids: Vec<AgentId>) -> Vec<AgentId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
