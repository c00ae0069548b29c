//! Typed publish/subscribe event surface
//!
//! Agents and the bus emit events on `tokio::sync::broadcast` channels with
//! zero-or-many subscribers. The bus forwards every registered agent's
//! stream into its own channel, so one bus subscription observes the whole
//! population. Events are delivered on the emitting task; no cross-agent
//! ordering is guaranteed.

use std::time::Duration;

use crate::domain_types::{AgentId, FailureKind};
use crate::message_bus::domain_types::{Message, Response};

/// Events emitted by an agent
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A message was processed to a success response
    MessageProcessed {
        /// The processed envelope
        message: Box<Message>,
        /// The success response
        response: Box<Response>,
    },
    /// A message was processed to an error response
    MessageError {
        /// The failed envelope
        message: Box<Message>,
        /// The error response
        response: Box<Response>,
    },
    /// A transient failure was injected
    FailureSimulated {
        /// Which failure type was injected
        kind: FailureKind,
        /// How long the injection lasts
        duration: Duration,
    },
}

/// Events emitted by the bus
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// An agent joined the registry
    AgentRegistered {
        /// The registered agent
        agent_id: AgentId,
    },
    /// An agent left the registry
    AgentUnregistered {
        /// The removed agent
        agent_id: AgentId,
    },
    /// An event forwarded from a registered agent's stream
    Agent {
        /// The emitting agent
        agent_id: AgentId,
        /// The forwarded event
        event: AgentEvent,
    },
}
