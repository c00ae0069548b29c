//! Base domain types for the switchboard message bus
//!
//! This module defines strongly-typed domain values shared by the agent
//! runtime and the bus, preventing primitive obsession and improving type
//! safety throughout the codebase.
//!
//! Identifiers are producer-assigned strings. They deliberately carry no
//! minimum-length bound: an empty identifier is representable so that the
//! compliance validator can report it as missing instead of the constructor
//! rejecting it.

use nutype::nutype;
use serde::{Deserialize, Serialize};

/// Unique identifier for an agent within a bus
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
    Deref
))]
pub struct AgentId(String);

impl AgentId {
    /// Returns the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        self
    }
}

/// Informal role grouping for an agent
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
    Deref
))]
pub struct RoleName(String);

impl RoleName {
    /// Returns the role as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        self
    }
}

/// Name of a tool an agent can execute
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
    Deref
))]
pub struct ToolName(String);

impl ToolName {
    /// Returns the tool name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        self
    }
}

/// Advisory capability tag carried by agents and targets
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
    Deref
))]
pub struct CapabilityName(String);

/// Monotonic count of messages observed by a metric
#[nutype(
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        From,
        Into
    ),
    default = 0
)]
pub struct MessageCount(u64);

impl MessageCount {
    /// The zero count
    #[must_use]
    pub fn zero() -> Self {
        Self::new(0)
    }

    /// Returns the count incremented by one, saturating at the maximum
    #[must_use]
    pub fn increment(self) -> Self {
        Self::new(self.into_inner().saturating_add(1))
    }

    /// Gets the value as u64
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.into_inner()
    }
}

/// Failure types an agent can be asked to simulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Delay message processing past its deadline
    Timeout,
    /// Empty the agent's resource pools
    Resource,
    /// Empty the agent's tool set
    Tool,
    /// Seed a state conflict record
    State,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::Resource => "resource",
            Self::Tool => "tool",
            Self::State => "state",
        };
        f.write_str(name)
    }
}
