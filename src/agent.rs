//! Agent runtime: the execution envelope around tool dispatch
//!
//! An [`Agent`] is an in-process addressable unit owning a tool set, integer
//! resource pools and a state map. [`Agent::process_message`] validates the
//! envelope, allocates resources, reconciles state requirements and
//! dispatches the named tool, always producing a [`Response`] — agent-internal
//! failures never surface as errors to the bus.
//!
//! Failure injection is flag-based: each injected failure type sets a
//! time-bounded mode flag checked at the matching stage of processing, and a
//! timer restores the agent when the window closes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, trace};

use crate::domain_types::{AgentId, CapabilityName, FailureKind, RoleName, ToolName};
use crate::events::AgentEvent;
use crate::message_bus::domain_types::{
    A2aError, A2aErrorCode, AgentIdentifier, Message, MessageTimestamp, ResourceRequirement,
    ResourceType, ResourceUsage, Response, ResponseMetadata, StateAccess, StateRequirement,
};
use crate::message_bus::traits::{BoxError, ToolHandler};

/// Capacity of each agent's event broadcast channel
const AGENT_EVENT_CAPACITY: usize = 256;

/// State-map key seeded by the `state` failure injection
const SIMULATED_CONFLICT_KEY: &str = "simulated:conflict";

/// A live failure-injection window
#[derive(Debug, Clone, Copy)]
struct FailureWindow {
    expires_at: Instant,
    duration: Duration,
}

/// Snapshot taken when an injection empties part of the agent, restored at
/// expiry
enum Saved {
    Pools(HashMap<ResourceType, u64>),
    Tools(Vec<(ToolName, Option<Arc<dyn ToolHandler>>)>),
}

/// Point-in-time view of an agent, as returned by `status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Agent ID
    pub id: AgentId,
    /// Informal role grouping
    pub role: RoleName,
    /// Advisory capability tags
    pub capabilities: Vec<CapabilityName>,
    /// Tools the agent currently supports
    pub supported_tools: Vec<ToolName>,
    /// Remaining units per resource pool
    pub resources: HashMap<ResourceType, u64>,
    /// Messages currently in flight at this agent
    pub message_queue: usize,
    /// Milliseconds since the agent was created
    #[serde(rename = "uptime")]
    pub uptime_ms: u64,
}

/// An in-process addressable unit that executes named tools
pub struct Agent {
    id: AgentId,
    role: RoleName,
    capabilities: Vec<CapabilityName>,
    /// Supported tools; `None` means the stock echo handler
    tools: DashMap<ToolName, Option<Arc<dyn ToolHandler>>>,
    resources: DashMap<ResourceType, u64>,
    state: DashMap<String, Value>,
    failure_flags: DashMap<FailureKind, FailureWindow>,
    saved: DashMap<FailureKind, Saved>,
    in_flight: AtomicUsize,
    /// One envelope at a time relative to this agent's state and pools
    processing: tokio::sync::Mutex<()>,
    started_at: Instant,
    events: tokio::sync::broadcast::Sender<AgentEvent>,
}

impl Agent {
    /// Creates an agent with the default resource pools
    /// (cpu=100, memory=1024, network=1000)
    #[must_use]
    pub fn new(id: impl Into<AgentId>, role: impl Into<RoleName>) -> Self {
        let resources = DashMap::new();
        resources.insert(ResourceType::Cpu, 100);
        resources.insert(ResourceType::Memory, 1024);
        resources.insert(ResourceType::Network, 1000);

        let (events, _) = tokio::sync::broadcast::channel(AGENT_EVENT_CAPACITY);

        Self {
            id: id.into(),
            role: role.into(),
            capabilities: Vec::new(),
            tools: DashMap::new(),
            resources,
            state: DashMap::new(),
            failure_flags: DashMap::new(),
            saved: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            processing: tokio::sync::Mutex::new(()),
            started_at: Instant::now(),
            events,
        }
    }

    /// Adds an advisory capability tag
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<CapabilityName>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Registers a tool served by the stock echo handler
    #[must_use]
    pub fn with_tool(self, name: impl Into<ToolName>) -> Self {
        self.tools.insert(name.into(), None);
        self
    }

    /// Registers a tool with a host-supplied handler
    #[must_use]
    pub fn with_tool_handler(
        self,
        name: impl Into<ToolName>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        self.tools.insert(name.into(), Some(handler));
        self
    }

    /// Overrides one resource pool
    #[must_use]
    pub fn with_resource(self, resource: ResourceType, amount: u64) -> Self {
        self.resources.insert(resource, amount);
        self
    }

    /// The agent's ID
    #[must_use]
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// The agent's role
    #[must_use]
    pub fn role(&self) -> &RoleName {
        &self.role
    }

    /// The agent's capability tags
    #[must_use]
    pub fn capabilities(&self) -> &[CapabilityName] {
        &self.capabilities
    }

    /// Number of messages currently in flight at this agent
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Registers a tool at runtime; `None` selects the stock echo handler
    pub fn add_tool(&self, name: impl Into<ToolName>, handler: Option<Arc<dyn ToolHandler>>) {
        let name = name.into();
        debug!(agent_id = %self.id, tool = %name, "tool registered");
        self.tools.insert(name, handler);
    }

    /// Deregisters a tool; returns whether it was present
    pub fn remove_tool(&self, name: &ToolName) -> bool {
        let removed = self.tools.remove(name).is_some();
        if removed {
            debug!(agent_id = %self.id, tool = %name, "tool deregistered");
        }
        removed
    }

    /// Subscribes to this agent's event stream
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Reports the agent's current status
    #[must_use]
    pub fn status(&self) -> AgentStatus {
        let mut supported_tools: Vec<ToolName> =
            self.tools.iter().map(|entry| entry.key().clone()).collect();
        supported_tools.sort();

        AgentStatus {
            id: self.id.clone(),
            role: self.role.clone(),
            capabilities: self.capabilities.clone(),
            supported_tools,
            resources: self.pool_snapshot(),
            message_queue: self.in_flight(),
            uptime_ms: u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// The identity this agent stamps on its responses
    #[must_use]
    pub fn identifier(&self) -> AgentIdentifier {
        AgentIdentifier {
            agent_id: self.id.clone(),
            role: self.role.clone(),
            capabilities: if self.capabilities.is_empty() {
                None
            } else {
                Some(self.capabilities.clone())
            },
            version: None,
        }
    }

    /// Processes one message through the execution envelope
    ///
    /// Always returns a response; every internal failure is mapped to a
    /// failure response carrying an [`A2aError`].
    #[instrument(skip_all, fields(agent_id = %self.id, message_id = %message.id))]
    pub async fn process_message(&self, message: Message) -> Response {
        let started = Instant::now();
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        // Injected timeout stalls the whole dispatch before any validation,
        // so short-TTL messages expire inside the window.
        if let Some(window) = self.active_failure(FailureKind::Timeout) {
            trace!(agent_id = %self.id, "simulated timeout active, stalling dispatch");
            tokio::time::sleep(window.duration + Duration::from_secs(1)).await;
        }

        let response = {
            let _serial = self.processing.lock().await;
            self.run_envelope(&message, started).await
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let event = if response.success {
            AgentEvent::MessageProcessed {
                message: Box::new(message),
                response: Box::new(response.clone()),
            }
        } else {
            AgentEvent::MessageError {
                message: Box::new(message),
                response: Box::new(response.clone()),
            }
        };
        let _ = self.events.send(event);

        response
    }

    /// Injects a transient failure of the given type
    ///
    /// The flag clears automatically after `duration`; `resource` and
    /// `tool` injections restore the pre-injection pools and tool set.
    pub fn simulate_failure(self: &Arc<Self>, kind: FailureKind, duration: Duration) {
        info!(agent_id = %self.id, %kind, ?duration, "failure injected");
        self.failure_flags.insert(
            kind,
            FailureWindow {
                expires_at: Instant::now() + duration,
                duration,
            },
        );

        match kind {
            FailureKind::Timeout => {}
            FailureKind::Resource => {
                self.saved
                    .insert(FailureKind::Resource, Saved::Pools(self.pool_snapshot()));
                self.resources.clear();
            }
            FailureKind::Tool => {
                let entries = self
                    .tools
                    .iter()
                    .map(|entry| (entry.key().clone(), entry.value().clone()))
                    .collect();
                self.saved.insert(FailureKind::Tool, Saved::Tools(entries));
                self.tools.clear();
            }
            FailureKind::State => {
                self.state.insert(
                    SIMULATED_CONFLICT_KEY.to_owned(),
                    json!({
                        "locked": true,
                        "conflict": true,
                        "timestamp": MessageTimestamp::now().as_millis(),
                    }),
                );
            }
        }

        let agent = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            agent.clear_failure(kind);
        });

        let _ = self.events.send(AgentEvent::FailureSimulated { kind, duration });
    }

    fn clear_failure(&self, kind: FailureKind) {
        self.failure_flags.remove(&kind);
        match kind {
            FailureKind::Timeout => {}
            FailureKind::Resource => {
                if let Some((_, Saved::Pools(pools))) = self.saved.remove(&FailureKind::Resource) {
                    self.resources.clear();
                    for (resource, amount) in pools {
                        self.resources.insert(resource, amount);
                    }
                }
            }
            FailureKind::Tool => {
                if let Some((_, Saved::Tools(tools))) = self.saved.remove(&FailureKind::Tool) {
                    for (name, handler) in tools {
                        self.tools.insert(name, handler);
                    }
                }
            }
            FailureKind::State => {
                self.state.remove(SIMULATED_CONFLICT_KEY);
            }
        }
        debug!(agent_id = %self.id, %kind, "injected failure cleared");
    }

    fn active_failure(&self, kind: FailureKind) -> Option<FailureWindow> {
        let window = self.failure_flags.get(&kind).map(|entry| *entry.value())?;
        if Instant::now() < window.expires_at {
            Some(window)
        } else {
            self.failure_flags.remove(&kind);
            None
        }
    }

    fn pool_snapshot(&self) -> HashMap<ResourceType, u64> {
        self.resources
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// The validate -> allocate -> reconcile -> dispatch pipeline
    ///
    /// Runs under the processing lock; everything before tool dispatch
    /// executes without yielding.
    async fn run_envelope(&self, message: &Message, started: Instant) -> Response {
        let now = MessageTimestamp::now();
        let hops = message.hops();

        if let Some(error) = validate_envelope(message, now) {
            return self.error_response(message, error, started, ResourceUsage::default(), hops);
        }

        if !self.tools.contains_key(&message.tool_name) {
            let error = A2aError::new(
                A2aErrorCode::ToolNotSupported,
                format!("Tool {} not supported", message.tool_name),
            );
            return self.error_response(message, error, started, ResourceUsage::default(), hops);
        }

        let pools_before = self.pool_snapshot();
        let allocation = self.allocate_resources(&message.resource_requirements);
        let usage = ResourceUsage::from_pools(&pools_before, &self.pool_snapshot());
        if let Err(error) = allocation {
            return self.error_response(message, error, started, usage, hops);
        }

        if let Err(error) = self.apply_state_requirements(&message.state_requirements, now) {
            return self.error_response(message, error, started, usage, hops);
        }

        let handler = self
            .tools
            .get(&message.tool_name)
            .and_then(|entry| entry.value().clone());
        let result = match handler {
            Some(handler) => match handler.invoke(message.parameters.clone()).await {
                Ok(value) => value,
                Err(source) => {
                    let error = classify_failure(&source);
                    return self.error_response(message, error, started, usage, hops);
                }
            },
            None => self.echo_record(message, now),
        };

        trace!(agent_id = %self.id, tool = %message.tool_name, "tool dispatched");
        let metadata = ResponseMetadata {
            processing_time: elapsed_ms(started),
            resource_usage: usage,
            hops,
            cached: false,
        };
        Response::success(message, self.identifier(), result, metadata)
    }

    /// Decrements pools in declaration order; the first shortfall fails the
    /// message and earlier decrements stay in place.
    fn allocate_resources(&self, requirements: &[ResourceRequirement]) -> Result<(), A2aError> {
        for requirement in requirements {
            let available = self
                .resources
                .get(&requirement.resource)
                .map_or(0, |entry| *entry.value());
            if available < requirement.amount {
                return Err(A2aError::new(
                    A2aErrorCode::InsufficientResources,
                    format!(
                        "Insufficient {}: required {}, available {}",
                        requirement.resource, requirement.amount, available
                    ),
                ));
            }
            if let Some(mut pool) = self.resources.get_mut(&requirement.resource) {
                *pool = available - requirement.amount;
            }
        }
        Ok(())
    }

    fn apply_state_requirements(
        &self,
        requirements: &[StateRequirement],
        now: MessageTimestamp,
    ) -> Result<(), A2aError> {
        if !requirements.is_empty() && self.active_failure(FailureKind::State).is_some() {
            return Err(A2aError::new(
                A2aErrorCode::StateConflict,
                "State conflict detected during reconciliation",
            ));
        }

        for requirement in requirements {
            let key = requirement.composite_key();
            match requirement.access {
                StateAccess::Read => {
                    self.state.entry(key).or_insert(Value::Null);
                }
                StateAccess::Write | StateAccess::Exclusive => {
                    self.state.insert(
                        key,
                        json!({ "locked": true, "timestamp": now.as_millis() }),
                    );
                }
                StateAccess::Shared => {
                    let mut entry = self.state.entry(key).or_insert(Value::Null);
                    if let Value::Object(existing) = entry.value_mut() {
                        existing.insert("shared".to_owned(), Value::Bool(true));
                        existing.insert("timestamp".to_owned(), json!(now.as_millis()));
                    } else {
                        *entry.value_mut() =
                            json!({ "shared": true, "timestamp": now.as_millis() });
                    }
                }
            }
        }
        Ok(())
    }

    /// The stock record returned when a tool has no registered handler
    fn echo_record(&self, message: &Message, now: MessageTimestamp) -> Value {
        json!({
            "tool": message.tool_name,
            "parameters": message.parameters,
            "result": "mock_success",
            "timestamp": now.as_millis(),
            "agentId": self.id,
        })
    }

    fn error_response(
        &self,
        message: &Message,
        error: A2aError,
        started: Instant,
        usage: ResourceUsage,
        hops: u32,
    ) -> Response {
        debug!(agent_id = %self.id, message_id = %message.id, code = %error.code, "message failed");
        let metadata = ResponseMetadata {
            processing_time: elapsed_ms(started),
            resource_usage: usage,
            hops,
            cached: false,
        };
        Response::failure(message, self.identifier(), error, metadata)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("capabilities", &self.capabilities)
            .field("tools", &self.tools.len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Fail-fast envelope checks, in the order the reference applies them
fn validate_envelope(message: &Message, now: MessageTimestamp) -> Option<A2aError> {
    let missing = if message.id.is_empty() {
        Some("id")
    } else if message.source.agent_id.is_empty() {
        Some("source")
    } else if crate::message_bus::validator::target_is_empty(&message.target) {
        Some("target")
    } else if message.tool_name.is_empty() {
        Some("toolName")
    } else {
        None
    };
    if let Some(field) = missing {
        return Some(A2aError::new(
            A2aErrorCode::CoordinationFailed,
            format!("Invalid message: missing required field {field}"),
        ));
    }

    if message.is_expired(now) {
        return Some(A2aError::new(A2aErrorCode::Timeout, "Message expired"));
    }

    None
}

/// Maps a tool handler failure onto the error taxonomy
///
/// Typed [`A2aError`] values pass through unchanged; anything else falls
/// back to the reference's text classification so hosts throwing plain
/// errors keep their codes.
fn classify_failure(source: &BoxError) -> A2aError {
    if let Some(error) = source.downcast_ref::<A2aError>() {
        return error.clone();
    }

    let text = source.to_string();
    let code = if text.contains("not supported") {
        A2aErrorCode::ToolNotSupported
    } else if text.contains("not found") {
        A2aErrorCode::AgentNotFound
    } else if text.contains("Insufficient") {
        A2aErrorCode::InsufficientResources
    } else if text.contains("expired") {
        A2aErrorCode::Timeout
    } else {
        A2aErrorCode::CoordinationFailed
    };
    A2aError::new(code, text)
}
