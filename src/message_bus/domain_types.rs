//! Envelope model for the message bus
//!
//! This module defines the message envelope and its policy payloads:
//! targets, coordination modes, retry policy, state and resource
//! requirements, and the response/error shapes. These are the only wire
//! shapes the bus exposes: enums serialize as lowercase strings, error
//! codes as UPPER_SNAKE, and struct fields as camelCase.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use nutype::nutype;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use crate::domain_types::{AgentId, CapabilityName, MessageCount, RoleName, ToolName};

/// Unique identifier for a message, assigned by the producer
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
pub struct MessageId(String);

impl MessageId {
    /// Creates a new random message ID for producers that do not assign
    /// their own
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// Derives the ID of a pipeline stage message
    #[must_use]
    pub fn stage(&self, index: usize) -> Self {
        Self::new(format!("{self}-stage-{index}"))
    }

    /// Returns the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        self
    }
}

/// Producer wall-clock timestamp in milliseconds since the Unix epoch
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
pub struct MessageTimestamp(u64);

impl MessageTimestamp {
    /// Creates a timestamp for the current wall-clock time
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self::new(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Gets the value in milliseconds
    #[must_use]
    pub fn as_millis(self) -> u64 {
        self.into_inner()
    }

    /// Whether the timestamp was never set by the producer
    #[must_use]
    pub fn is_unset(self) -> bool {
        self.into_inner() == 0
    }
}

/// Message time-to-live in milliseconds
#[nutype(derive(
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
    From,
    Into
))]
pub struct TtlMs(u64);

impl TtlMs {
    /// Gets the value in milliseconds
    #[must_use]
    pub fn as_millis(self) -> u64 {
        self.into_inner()
    }
}

impl Default for TtlMs {
    fn default() -> Self {
        Self::new(30_000)
    }
}

/// Capacity for the bus event broadcast channel
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
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
        TryFrom,
        Into
    ),
    default = 1024
)]
pub struct ChannelCapacity(usize);

impl ChannelCapacity {
    /// Gets the value as usize for use with tokio channels
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Ring-buffer capacity for the message and response histories
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000_000),
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
        TryFrom,
        Into
    ),
    default = 10_000
)]
pub struct HistoryCapacity(usize);

impl HistoryCapacity {
    /// Gets the value as usize
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Identity of a message producer or responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentifier {
    /// Agent ID the bus trusts as the message origin
    pub agent_id: AgentId,
    /// Informal role grouping
    pub role: RoleName,
    /// Advisory capability tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<CapabilityName>>,
    /// Advisory version string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl AgentIdentifier {
    /// Creates an identifier with just an ID and role
    #[must_use]
    pub fn new(agent_id: impl Into<AgentId>, role: impl Into<RoleName>) -> Self {
        Self {
            agent_id: agent_id.into(),
            role: role.into(),
            capabilities: None,
            version: None,
        }
    }

    /// The placeholder identity used on synthesized failure responses
    #[must_use]
    pub fn unknown() -> Self {
        Self::new("unknown", "unknown")
    }
}

/// Message delivery priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    /// Background work
    Low,
    /// Normal traffic
    #[default]
    Medium,
    /// Latency-sensitive traffic
    High,
    /// Must-not-drop traffic
    Critical,
}

/// Backoff strategy for retried dispatches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base_delay * attempt`
    Linear,
    /// `base_delay * 2^(attempt - 1)`
    #[default]
    Exponential,
    /// Delegated to the host-installed [`RetryBackoff`] hook
    ///
    /// [`RetryBackoff`]: crate::message_bus::traits::RetryBackoff
    Custom,
}

/// Retry policy carried by each message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial dispatch
    pub max_retries: u32,
    /// How delays grow between attempts
    pub backoff_strategy: BackoffStrategy,
    /// Base delay in milliseconds
    pub base_delay: u64,
    /// Delay cap in milliseconds
    pub max_delay: u64,
    /// Error codes that make a failed response eligible for retry
    #[serde(default)]
    pub retryable_errors: Vec<A2aErrorCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_strategy: BackoffStrategy::Exponential,
            base_delay: 1_000,
            max_delay: 30_000,
            retryable_errors: vec![
                A2aErrorCode::Timeout,
                A2aErrorCode::InsufficientResources,
            ],
        }
    }
}

/// Error codes surfaced on failure responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum A2aErrorCode {
    /// Resolver produced an ID that is not registered
    AgentNotFound,
    /// Agent lacks the named tool
    ToolNotSupported,
    /// Resource pool shortfall during allocation
    InsufficientResources,
    /// Failure during state reconciliation
    StateConflict,
    /// Message TTL expired at the receiver
    Timeout,
    /// Reserved; surfaced by the host if integrated
    AuthorizationFailed,
    /// Catch-all for dispatch-layer failures
    CoordinationFailed,
}

impl fmt::Display for A2aErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AgentNotFound => "AGENT_NOT_FOUND",
            Self::ToolNotSupported => "TOOL_NOT_SUPPORTED",
            Self::InsufficientResources => "INSUFFICIENT_RESOURCES",
            Self::StateConflict => "STATE_CONFLICT",
            Self::Timeout => "TIMEOUT",
            Self::AuthorizationFailed => "AUTHORIZATION_FAILED",
            Self::CoordinationFailed => "COORDINATION_FAILED",
        };
        f.write_str(name)
    }
}

/// Advisory recovery hint attached to errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedAction {
    /// Action name, e.g. `retry`
    pub action: String,
    /// Suggested delay before the action, in milliseconds
    pub delay: u64,
}

impl Default for SuggestedAction {
    fn default() -> Self {
        Self {
            action: "retry".to_owned(),
            delay: 1_000,
        }
    }
}

/// Error payload carried on failure responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2aError {
    /// Machine-readable failure class
    pub code: A2aErrorCode,
    /// Human-readable description
    pub message: String,
    /// Whether retrying the message is meaningful
    pub recoverable: bool,
    /// Advisory recovery hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<SuggestedAction>,
}

impl A2aError {
    /// Creates an error, deriving the recoverable flag and the default
    /// suggested action from the code
    #[must_use]
    pub fn new(code: A2aErrorCode, message: impl Into<String>) -> Self {
        let recoverable = !matches!(
            code,
            A2aErrorCode::ToolNotSupported | A2aErrorCode::AgentNotFound
        );
        Self {
            code,
            message: message.into(),
            recoverable,
            suggested_action: Some(SuggestedAction::default()),
        }
    }
}

impl fmt::Display for A2aError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for A2aError {}

/// Resource pool types an agent owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Compute units
    Cpu,
    /// Memory units
    Memory,
    /// Accelerator units
    Gpu,
    /// Network units
    Network,
    /// Storage units
    Storage,
    /// Host-defined pool
    Custom,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Gpu => "gpu",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Per-message resource demand against an agent's pools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirement {
    /// Pool to draw from
    #[serde(rename = "type")]
    pub resource: ResourceType,
    /// Units to decrement
    pub amount: u64,
    /// Unit label; opaque to the bus
    #[serde(default)]
    pub unit: String,
    /// Allocation priority; advisory
    #[serde(default)]
    pub priority: MessagePriority,
    /// Intended hold duration in milliseconds; advisory
    #[serde(default)]
    pub duration: u64,
    /// Whether the allocation wants the pool exclusively; advisory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive: Option<bool>,
}

/// Access mode of a state requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateAccess {
    /// Ensure the composite key exists
    Read,
    /// Stamp a locked record
    Write,
    /// Stamp a locked record
    Exclusive,
    /// Merge a shared overlay onto the record
    Shared,
}

/// Consistency hint on a state requirement; advisory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    /// No ordering guarantee requested
    #[default]
    Eventual,
    /// Strong ordering requested
    Strong,
    /// Causal ordering requested
    Causal,
}

/// Per-message demand on an agent's state map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRequirement {
    /// Access mode
    #[serde(rename = "type")]
    pub access: StateAccess,
    /// Key namespace
    pub namespace: String,
    /// Ordered key parts; joined as `{namespace}:{k1}:{k2}:...`
    pub keys: Vec<String>,
    /// Consistency hint; advisory
    #[serde(default)]
    pub consistency: ConsistencyLevel,
    /// Reconciliation timeout in milliseconds; advisory
    #[serde(default)]
    pub timeout: u64,
}

impl StateRequirement {
    /// The composite key this requirement addresses
    #[must_use]
    pub fn composite_key(&self) -> String {
        let mut key = self.namespace.clone();
        for part in &self.keys {
            key.push(':');
            key.push_str(part);
        }
        key
    }
}

/// Advisory multi-target coordination hint carried on `multiple` targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiCoordination {
    /// Dispatch all at once
    #[default]
    Parallel,
    /// Dispatch one after another
    Sequential,
    /// First responder wins
    Race,
}

/// Strategy for choosing among matching group members
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Uniform random order over the matches
    Random,
    /// Fewest in-flight messages first
    LoadBalanced,
    /// Most capability overlap first
    #[default]
    CapabilityMatched,
}

/// Addressing specification resolved to a set of agent IDs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Target {
    /// One named agent
    Single {
        /// The addressed agent
        agent_id: AgentId,
    },
    /// An explicit list of agents
    Multiple {
        /// The addressed agents, in order
        agent_ids: Vec<AgentId>,
        /// Advisory hint to the producer; the bus applies the
        /// message-level coordination regardless
        #[serde(default)]
        coordination_mode: MultiCoordination,
    },
    /// All agents of a role, optionally filtered and truncated
    Group {
        /// Required role
        role: RoleName,
        /// Capabilities every member must carry
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capabilities: Option<Vec<CapabilityName>>,
        /// Truncate the selection to this many agents
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_agents: Option<usize>,
        /// How to order matching members
        #[serde(default)]
        selection_strategy: SelectionStrategy,
    },
    /// Every registered agent
    Broadcast {
        /// Leave the message source out of the fan-out
        #[serde(default)]
        exclude_source: bool,
    },
    /// Host-evaluated predicate over the registry
    Conditional {
        /// Opaque conditions passed to the host evaluator
        conditions: Vec<Value>,
        /// Target to resolve when no agent matches
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<Box<Target>>,
    },
}

/// Verdict rule for a broadcast coordination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    /// Every response must succeed
    All,
    /// More than half must succeed
    Majority,
    /// The first-arrived response must succeed
    First,
    /// At least one must succeed
    Any,
}

/// Threshold rule for a consensus coordination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusType {
    /// All resolved targets must succeed
    Unanimous,
    /// At least half (rounded up) must succeed
    Majority,
    /// Weighted by the host hook; reduces to majority without one
    Weighted,
}

/// Reaction to a failed pipeline stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStrategy {
    /// Stop the pipeline
    #[default]
    Abort,
    /// Continue with the input unchanged
    Skip,
    /// Re-dispatch the stage once, then stop if it still fails
    Retry,
}

/// Host-supplied value transform between pipeline stages
pub type StageTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// One stage of a pipeline coordination
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStage {
    /// Where the stage message is sent
    pub target: Target,
    /// Tool the stage invokes
    pub tool_name: ToolName,
    /// Transform applied to the stage input before dispatch
    #[serde(skip)]
    pub input_transform: Option<StageTransform>,
    /// Transform applied to the stage result before it feeds the next stage
    #[serde(skip)]
    pub output_transform: Option<StageTransform>,
}

impl PipelineStage {
    /// Creates a stage without transforms
    #[must_use]
    pub fn new(target: Target, tool_name: impl Into<ToolName>) -> Self {
        Self {
            target,
            tool_name: tool_name.into(),
            input_transform: None,
            output_transform: None,
        }
    }

    /// Attaches an input transform
    #[must_use]
    pub fn with_input_transform(mut self, transform: StageTransform) -> Self {
        self.input_transform = Some(transform);
        self
    }

    /// Attaches an output transform
    #[must_use]
    pub fn with_output_transform(mut self, transform: StageTransform) -> Self {
        self.output_transform = Some(transform);
        self
    }
}

impl fmt::Debug for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStage")
            .field("target", &self.target)
            .field("tool_name", &self.tool_name)
            .field("input_transform", &self.input_transform.is_some())
            .field("output_transform", &self.output_transform.is_some())
            .finish()
    }
}

impl PartialEq for PipelineStage {
    fn eq(&self, other: &Self) -> bool {
        // Transforms are opaque host closures and do not take part in
        // envelope equality.
        self.target == other.target && self.tool_name == other.tool_name
    }
}

/// Coordination mode applied to the resolved targets of one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Coordination {
    /// One target, one response
    Direct {
        /// Overall timeout in milliseconds; advisory
        #[serde(default = "default_coordination_timeout")]
        timeout: u64,
        /// Producer-side retry hint; the retry policy governs actual retries
        #[serde(default)]
        retries: u32,
        /// Whether the producer wants an acknowledgment; advisory
        #[serde(default)]
        acknowledgment: bool,
    },
    /// All resolved targets in parallel, verdict per aggregation rule
    Broadcast {
        /// Verdict rule over the collected responses
        aggregation: AggregationMode,
        /// Overall timeout in milliseconds; advisory
        #[serde(default = "default_coordination_timeout")]
        timeout: u64,
        /// Report overall success when only some responses succeed
        #[serde(default)]
        partial_success: bool,
    },
    /// All resolved targets in parallel, success-count threshold
    Consensus {
        /// Threshold rule
        consensus_type: ConsensusType,
        /// Voting timeout in milliseconds; advisory
        #[serde(default = "default_coordination_timeout")]
        voting_timeout: u64,
        /// Required number of resolved participants, checked pre-dispatch
        minimum_participants: u32,
    },
    /// Ordered stages, each fed by the previous stage's output
    Pipeline {
        /// Stages in execution order
        stages: Vec<PipelineStage>,
        /// Reaction to a failed stage
        #[serde(default)]
        failure_strategy: FailureStrategy,
    },
}

fn default_coordination_timeout() -> u64 {
    30_000
}

impl Default for Coordination {
    fn default() -> Self {
        Self::Direct {
            timeout: default_coordination_timeout(),
            retries: 0,
            acknowledgment: false,
        }
    }
}

impl Coordination {
    /// The lowercase mode name, as it appears on the wire
    #[must_use]
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Direct { .. } => "direct",
            Self::Broadcast { .. } => "broadcast",
            Self::Consensus { .. } => "consensus",
            Self::Pipeline { .. } => "pipeline",
        }
    }
}

/// The message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Producer-assigned unique ID
    pub id: MessageId,
    /// Correlation ID echoed on responses; defaults to `id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<MessageId>,
    /// Trusted producer identity
    pub source: AgentIdentifier,
    /// Addressing specification
    pub target: Target,
    /// Tool to invoke; opaque to the bus
    pub tool_name: ToolName,
    /// Tool parameters; opaque to the bus
    #[serde(default)]
    pub parameters: Value,
    /// Producer wall clock in milliseconds since the epoch
    pub timestamp: MessageTimestamp,
    /// Expiry window: the message is dead once `timestamp + ttl < now`
    #[serde(default)]
    pub ttl: TtlMs,
    /// Delivery priority; advisory
    #[serde(default)]
    pub priority: MessagePriority,
    /// Retry policy for direct dispatches
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Coordination mode applied by `route`
    #[serde(default)]
    pub coordination: Coordination,
    /// State demands, applied in declaration order
    #[serde(default)]
    pub state_requirements: Vec<StateRequirement>,
    /// Resource demands, allocated in declaration order
    #[serde(default)]
    pub resource_requirements: Vec<ResourceRequirement>,
    /// Inbound hop trail; responses record `len(route) + 1` hops
    #[serde(default)]
    pub route: Vec<AgentId>,
}

impl Message {
    /// Starts building a message envelope
    #[must_use]
    pub fn builder(
        id: impl Into<MessageId>,
        source: AgentIdentifier,
        target: Target,
        tool_name: impl Into<ToolName>,
    ) -> MessageBuilder {
        MessageBuilder::new(id.into(), source, target, tool_name.into())
    }

    /// The correlation ID a response must echo
    #[must_use]
    pub fn correlation(&self) -> MessageId {
        self.correlation_id.clone().unwrap_or_else(|| self.id.clone())
    }

    /// Hop count recorded on responses to this message
    #[must_use]
    pub fn hops(&self) -> u32 {
        u32::try_from(self.route.len()).unwrap_or(u32::MAX).saturating_add(1)
    }

    /// Whether the TTL window has passed at the given instant
    #[must_use]
    pub fn is_expired(&self, now: MessageTimestamp) -> bool {
        self.timestamp.as_millis().saturating_add(self.ttl.as_millis()) < now.as_millis()
    }

    /// Synthesizes the envelope for one pipeline stage
    ///
    /// The stage message is a fresh value sharing only the documented
    /// fields with the outer envelope: the ID is derived, the target, tool
    /// and parameters come from the stage, everything else is cloned.
    #[must_use]
    pub fn stage_message(&self, index: usize, stage: &PipelineStage, parameters: Value) -> Self {
        Self {
            id: self.id.stage(index),
            target: stage.target.clone(),
            tool_name: stage.tool_name.clone(),
            parameters,
            ..self.clone()
        }
    }
}

/// Builder for message envelopes
#[derive(Debug)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    fn new(id: MessageId, source: AgentIdentifier, target: Target, tool_name: ToolName) -> Self {
        Self {
            message: Message {
                id,
                correlation_id: None,
                source,
                target,
                tool_name,
                parameters: Value::Null,
                timestamp: MessageTimestamp::now(),
                ttl: TtlMs::default(),
                priority: MessagePriority::default(),
                retry_policy: RetryPolicy::default(),
                coordination: Coordination::default(),
                state_requirements: Vec::new(),
                resource_requirements: Vec::new(),
                route: Vec::new(),
            },
        }
    }

    /// Sets the correlation ID
    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<MessageId>) -> Self {
        self.message.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the tool parameters
    #[must_use]
    pub fn parameters(mut self, parameters: Value) -> Self {
        self.message.parameters = parameters;
        self
    }

    /// Sets the producer timestamp
    #[must_use]
    pub fn timestamp(mut self, timestamp: MessageTimestamp) -> Self {
        self.message.timestamp = timestamp;
        self
    }

    /// Sets the TTL
    #[must_use]
    pub fn ttl(mut self, ttl: impl Into<TtlMs>) -> Self {
        self.message.ttl = ttl.into();
        self
    }

    /// Sets the priority
    #[must_use]
    pub fn priority(mut self, priority: MessagePriority) -> Self {
        self.message.priority = priority;
        self
    }

    /// Sets the retry policy
    #[must_use]
    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.message.retry_policy = retry_policy;
        self
    }

    /// Sets the coordination mode
    #[must_use]
    pub fn coordination(mut self, coordination: Coordination) -> Self {
        self.message.coordination = coordination;
        self
    }

    /// Sets the state requirements
    #[must_use]
    pub fn state_requirements(mut self, requirements: Vec<StateRequirement>) -> Self {
        self.message.state_requirements = requirements;
        self
    }

    /// Sets the resource requirements
    #[must_use]
    pub fn resource_requirements(mut self, requirements: Vec<ResourceRequirement>) -> Self {
        self.message.resource_requirements = requirements;
        self
    }

    /// Sets the inbound hop trail
    #[must_use]
    pub fn route(mut self, route: Vec<AgentId>) -> Self {
        self.message.route = route;
        self
    }

    /// Finishes the envelope
    #[must_use]
    pub fn build(self) -> Message {
        self.message
    }
}

/// Pool deltas consumed while processing one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Compute units consumed
    pub cpu: u64,
    /// Memory units consumed
    pub memory: u64,
    /// Network units consumed
    pub network: u64,
}

impl ResourceUsage {
    /// Builds the usage record from pool snapshots taken before and after
    /// allocation
    #[must_use]
    pub fn from_pools(
        before: &HashMap<ResourceType, u64>,
        after: &HashMap<ResourceType, u64>,
    ) -> Self {
        let delta = |resource: ResourceType| {
            let was = before.get(&resource).copied().unwrap_or(0);
            let now = after.get(&resource).copied().unwrap_or(0);
            was.saturating_sub(now)
        };
        Self {
            cpu: delta(ResourceType::Cpu),
            memory: delta(ResourceType::Memory),
            network: delta(ResourceType::Network),
        }
    }
}

/// Metadata recorded on every response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// Wall-clock processing time at the responder, in milliseconds
    pub processing_time: u64,
    /// Pool deltas consumed by the message
    pub resource_usage: ResourceUsage,
    /// Bus handoffs traversed: inbound route length plus one
    pub hops: u32,
    /// Reserved; always false
    pub cached: bool,
}

impl ResponseMetadata {
    /// Metadata for a synthesized response: zero timings and usage, with
    /// the hop count the envelope mandates
    #[must_use]
    pub fn synthesized(hops: u32) -> Self {
        Self {
            processing_time: 0,
            resource_usage: ResourceUsage::default(),
            hops,
            cached: false,
        }
    }
}

/// Outcome of one agent dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Copy of the incoming message ID
    pub message_id: MessageId,
    /// Echo of the incoming correlation ID
    pub correlation_id: MessageId,
    /// Identity of the responder
    pub source: AgentIdentifier,
    /// Whether the message was processed to completion
    pub success: bool,
    /// Tool result; present iff success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload; present iff not success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<A2aError>,
    /// Per-dispatch metadata
    pub metadata: ResponseMetadata,
}

impl Response {
    /// Builds a success response for a message
    #[must_use]
    pub fn success(
        message: &Message,
        source: AgentIdentifier,
        result: Value,
        metadata: ResponseMetadata,
    ) -> Self {
        Self {
            message_id: message.id.clone(),
            correlation_id: message.correlation(),
            source,
            success: true,
            result: Some(result),
            error: None,
            metadata,
        }
    }

    /// Builds a failure response for a message
    #[must_use]
    pub fn failure(
        message: &Message,
        source: AgentIdentifier,
        error: A2aError,
        metadata: ResponseMetadata,
    ) -> Self {
        Self {
            message_id: message.id.clone(),
            correlation_id: message.correlation(),
            source,
            success: false,
            result: None,
            error: Some(error),
            metadata,
        }
    }

    /// Builds the response the bus synthesizes when a fan-out dispatch
    /// fails outside any agent
    #[must_use]
    pub fn synthesized_failure(message: &Message, reason: impl Into<String>) -> Self {
        Self::failure(
            message,
            AgentIdentifier::unknown(),
            A2aError::new(A2aErrorCode::CoordinationFailed, reason),
            ResponseMetadata::synthesized(message.hops()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_message() -> Message {
        Message::builder(
            "m1",
            AgentIdentifier::new("src", "tester"),
            Target::Single {
                agent_id: AgentId::from("A"),
            },
            "t1",
        )
        .parameters(json!({"x": 1}))
        .build()
    }

    #[test]
    fn correlation_defaults_to_message_id() {
        let message = sample_message();
        assert_eq!(message.correlation(), message.id);

        let message = Message {
            correlation_id: Some(MessageId::from("corr-7")),
            ..message
        };
        assert_eq!(message.correlation(), MessageId::from("corr-7"));
    }

    #[test]
    fn hops_counts_inbound_route_plus_one() {
        let mut message = sample_message();
        assert_eq!(message.hops(), 1);
        message.route = vec![AgentId::from("a"), AgentId::from("b")];
        assert_eq!(message.hops(), 3);
    }

    #[test]
    fn expiry_is_relative_to_timestamp_plus_ttl() {
        let message = Message {
            timestamp: MessageTimestamp::new(1_000),
            ttl: TtlMs::new(500),
            ..sample_message()
        };
        assert!(!message.is_expired(MessageTimestamp::new(1_500)));
        assert!(message.is_expired(MessageTimestamp::new(1_501)));
    }

    #[test]
    fn stage_message_shares_only_documented_fields() {
        let outer = sample_message();
        let stage = PipelineStage::new(
            Target::Single {
                agent_id: AgentId::from("B"),
            },
            "t2",
        );
        let staged = outer.stage_message(1, &stage, json!({"n": 2}));

        assert_eq!(staged.id, MessageId::from("m1-stage-1"));
        assert_eq!(staged.tool_name, ToolName::from("t2"));
        assert_eq!(staged.parameters, json!({"n": 2}));
        assert_eq!(staged.source, outer.source);
        assert_eq!(staged.ttl, outer.ttl);
    }

    #[test]
    fn error_codes_serialize_upper_snake() {
        let json = serde_json::to_string(&A2aErrorCode::ToolNotSupported).unwrap();
        assert_eq!(json, "\"TOOL_NOT_SUPPORTED\"");
        assert_eq!(A2aErrorCode::ToolNotSupported.to_string(), "TOOL_NOT_SUPPORTED");
    }

    #[test]
    fn recoverable_flag_follows_code() {
        assert!(!A2aError::new(A2aErrorCode::ToolNotSupported, "x").recoverable);
        assert!(!A2aError::new(A2aErrorCode::AgentNotFound, "x").recoverable);
        assert!(A2aError::new(A2aErrorCode::Timeout, "x").recoverable);
        assert!(A2aError::new(A2aErrorCode::StateConflict, "x").recoverable);
    }

    #[test]
    fn target_wire_shape_uses_type_tag_and_camel_case() {
        let target = Target::Group {
            role: RoleName::from("worker"),
            capabilities: None,
            max_agents: Some(3),
            selection_strategy: SelectionStrategy::LoadBalanced,
        };
        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json["type"], "group");
        assert_eq!(json["maxAgents"], 3);
        assert_eq!(json["selectionStrategy"], "load-balanced");
    }

    #[test]
    fn coordination_wire_shape_uses_mode_tag() {
        let coordination = Coordination::Consensus {
            consensus_type: ConsensusType::Unanimous,
            voting_timeout: 5_000,
            minimum_participants: 3,
        };
        let json = serde_json::to_value(&coordination).unwrap();
        assert_eq!(json["mode"], "consensus");
        assert_eq!(json["consensusType"], "unanimous");
        assert_eq!(json["minimumParticipants"], 3);
    }

    #[test]
    fn unknown_coordination_mode_is_rejected_at_the_serde_boundary() {
        let result: Result<Coordination, _> =
            serde_json::from_value(json!({"mode": "gossip", "timeout": 5000}));
        assert!(result.is_err());
    }

    #[test]
    fn composite_key_joins_namespace_and_parts() {
        let requirement = StateRequirement {
            access: StateAccess::Read,
            namespace: "jobs".to_owned(),
            keys: vec!["batch".to_owned(), "7".to_owned()],
            consistency: ConsistencyLevel::Eventual,
            timeout: 0,
        };
        assert_eq!(requirement.composite_key(), "jobs:batch:7");
    }

    #[test]
    fn resource_usage_is_the_pool_delta() {
        let before = HashMap::from([(ResourceType::Cpu, 100), (ResourceType::Memory, 1024)]);
        let after = HashMap::from([(ResourceType::Cpu, 90), (ResourceType::Memory, 1024)]);
        let usage = ResourceUsage::from_pools(&before, &after);
        assert_eq!(usage.cpu, 10);
        assert_eq!(usage.memory, 0);
        assert_eq!(usage.network, 0);
    }

    #[test]
    fn synthesized_failure_uses_unknown_source_and_zeroed_metadata() {
        let message = sample_message();
        let response = Response::synthesized_failure(&message, "boom");
        assert!(!response.success);
        assert_eq!(response.source, AgentIdentifier::unknown());
        assert_eq!(response.metadata.processing_time, 0);
        assert_eq!(response.metadata.hops, 1);
        let error = response.error.unwrap();
        assert_eq!(error.code, A2aErrorCode::CoordinationFailed);
        assert_eq!(error.message, "boom");
    }
}
