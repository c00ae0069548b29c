//! Message bus and coordination engine
//!
//! This module implements the agent-to-agent messaging substrate: a bus
//! that routes typed request/response messages between registered agents,
//! mediates coordination patterns and enforces per-message policy.
//!
//! ## Core components
//!
//! - [`MessageBus`]: registry, dispatch and metrics aggregation
//! - [`domain_types`]: the envelope model (messages, targets, coordination,
//!   responses, errors)
//! - the target resolver: turns a [`Target`] into concrete agent IDs
//! - the coordination executors: direct / broadcast / consensus / pipeline
//! - [`validator`]: pure outbound-message compliance checks
//! - [`metrics`]: counters, latency smoothing and dispatch histories
//!
//! ## Message flow
//!
//! ```text
//! Producer -> MessageBus::route -> resolver -> coordination executor
//!                                                   |
//!                                                   v
//!                                         Agent::process_message
//!                                    (validate -> allocate -> reconcile
//!                                             -> dispatch tool)
//! ```
//!
//! ## Usage example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use switchboard::agent::Agent;
//! use switchboard::message_bus::{
//!     AgentIdentifier, BusConfig, Message, MessageBus, Target,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = MessageBus::new(BusConfig::development());
//! bus.register_agent(Arc::new(Agent::new("A", "worker").with_tool("t1")))?;
//!
//! let message = Message::builder(
//!     "m1",
//!     AgentIdentifier::new("src", "host"),
//!     Target::Single { agent_id: "A".into() },
//!     "t1",
//! )
//! .build();
//!
//! let response = bus.send(message).await?;
//! println!("success: {}", response.success);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain_types;
pub mod metrics;
pub mod traits;
pub mod validator;

mod bus;
mod coordination;
mod resolver;

// Re-export key types for convenience
pub use bus::MessageBus;
pub use config::{BusConfig, BusConfigBuilder, ConfigError};
pub use domain_types::*;
pub use metrics::MetricsSnapshot;
pub use traits::{
    BoxError, BusError, ConditionEvaluator, ConsensusWeigher, RetryBackoff, ToolHandler,
};
pub use validator::{ComplianceIssue, ComplianceReport, validate};
