//! Trait seams and error types for the message bus
//!
//! The bus keeps its host-extensible behavior behind small traits: tool
//! bodies, conditional-target evaluation, consensus weighting and custom
//! retry backoff are all plugged in by the host.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::domain_types::{AgentId, Response, RetryPolicy};
use crate::agent::AgentStatus;

/// Boxed error returned by tool handlers
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A tool body invoked with opaque JSON parameters
///
/// Handlers returning a typed [`A2aError`] keep their error code through
/// classification; any other error is classified by its message text.
///
/// [`A2aError`]: super::domain_types::A2aError
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool against the message parameters
    async fn invoke(&self, parameters: Value) -> Result<Value, BoxError>;
}

#[async_trait]
impl<F> ToolHandler for F
where
    F: Fn(Value) -> Result<Value, BoxError> + Send + Sync,
{
    async fn invoke(&self, parameters: Value) -> Result<Value, BoxError> {
        (self)(parameters)
    }
}

/// Host predicate backing `conditional` targets
pub trait ConditionEvaluator: Send + Sync {
    /// Whether the agent satisfies the opaque conditions
    fn matches(&self, conditions: &[Value], agent: &AgentStatus) -> bool;
}

/// Host weighting hook for `weighted` consensus
///
/// Without an installed weigher, weighted consensus reduces to a majority
/// count.
pub trait ConsensusWeigher: Send + Sync {
    /// The voting weight of an agent
    fn weight(&self, agent_id: &AgentId) -> f64;
}

/// Host-supplied delay schedule for `custom` backoff
pub trait RetryBackoff: Send + Sync {
    /// Delay before the given retry attempt (1-based)
    fn delay(&self, attempt: u32, policy: &RetryPolicy) -> Duration;
}

/// Dispatch-layer failures surfaced as errors from `send` and `route`
///
/// Agent-internal failures never take this path: they are reported as
/// failure [`Response`]s. Inside a broadcast fan-out, per-target dispatch
/// failures are synthesized into failure responses instead, so the caller
/// always receives a complete list.
#[derive(Debug, Error)]
pub enum BusError {
    /// Target resolution produced no agents
    #[error("No agents found for target")]
    NoAgentsForTarget,

    /// A resolved agent ID is not registered
    #[error("Agent not found: {agent_id}")]
    AgentNotFound {
        /// The unresolved agent
        agent_id: AgentId,
    },

    /// The agent ID is already taken on this bus
    #[error("Agent already registered: {agent_id}")]
    AgentAlreadyRegistered {
        /// The conflicting agent
        agent_id: AgentId,
    },

    /// Consensus resolved fewer participants than the message requires
    #[error("Insufficient participants: {resolved} resolved, {minimum} required")]
    InsufficientParticipants {
        /// Number of resolved targets
        resolved: usize,
        /// `minimum_participants` from the coordination
        minimum: u32,
    },

    /// The consensus success threshold was not met
    #[error("Consensus not reached")]
    ConsensusNotReached {
        /// Every collected response, in resolved-target order
        responses: Vec<Response>,
    },

    /// A coordination produced no acceptable verdict
    #[error("Coordination failed: {reason}")]
    CoordinationFailed {
        /// What went wrong
        reason: String,
        /// Every collected response, in resolved-target order
        responses: Vec<Response>,
    },
}

impl BusError {
    /// Takes the responses collected before the coordination failed, if any
    #[must_use]
    pub fn into_responses(self) -> Vec<Response> {
        match self {
            Self::ConsensusNotReached { responses }
            | Self::CoordinationFailed { responses, .. } => responses,
            _ => Vec::new(),
        }
    }
}
