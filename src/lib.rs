//! # Switchboard - Agent-to-Agent Messaging Substrate
//!
//! Switchboard is an in-process message bus for populations of agents: it
//! routes typed request/response messages, mediates multi-agent
//! coordination patterns (direct, broadcast, consensus, pipeline) and
//! enforces per-message policy (priority, TTL, retries, resource and state
//! requirements).
//!
//! ## Core components
//!
//! - **Agent runtime**: per-agent tool set, resource pools, state map and
//!   failure injection behind [`Agent::process_message`]
//! - **Message bus**: registry, `send`/`broadcast`/`route`, metrics
//!   aggregation and a typed event surface
//! - **Coordination engine**: target resolution plus the four coordination
//!   executors
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use switchboard::agent::Agent;
//! use switchboard::message_bus::{
//!     AgentIdentifier, BusConfig, Coordination, Message, MessageBus, Target,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = MessageBus::new(BusConfig::development());
//!     for id in ["a1", "a2", "a3"] {
//!         bus.register_agent(Arc::new(Agent::new(id, "worker").with_tool("analyze")))?;
//!     }
//!
//!     let message = Message::builder(
//!         "m1",
//!         AgentIdentifier::new("host", "orchestrator"),
//!         Target::Broadcast { exclude_source: true },
//!         "analyze",
//!     )
//!     .coordination(Coordination::Broadcast {
//!         aggregation: switchboard::message_bus::AggregationMode::Majority,
//!         timeout: 5_000,
//!         partial_success: true,
//!     })
//!     .build();
//!
//!     let responses = bus.route(message).await?;
//!     println!("{} responses", responses.len());
//!     Ok(())
//! }
//! ```

// Core modules
pub mod agent;
pub mod domain_types;
pub mod events;
pub mod message_bus;
pub mod observability;

// Re-export the types most hosts touch
pub use crate::agent::{Agent, AgentStatus};
pub use crate::domain_types::{
    AgentId, CapabilityName, FailureKind, MessageCount, RoleName, ToolName,
};
pub use crate::events::{AgentEvent, BusEvent};
pub use crate::message_bus::{
    A2aError, A2aErrorCode, AgentIdentifier, BusConfig, BusError, Coordination, Message,
    MessageBus, MetricsSnapshot, Response, Target, ToolHandler,
};
