//! The message bus: agent registry, dispatch and metrics aggregation
//!
//! One [`MessageBus`] owns its registry, metrics and histories; nothing is
//! process-wide. Registration wires each agent's event stream into the bus
//! channel; unregistration detaches it. Dispatch observes a
//! registration-ordered snapshot of the registry, so register/unregister
//! never tear a resolution in half.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace};

use super::config::BusConfig;
use super::coordination;
use super::domain_types::{AgentId, Coordination, Message, MessageTimestamp, Response};
use super::metrics::{BusMetrics, DispatchHistory, MetricsSnapshot};
use super::resolver;
use super::traits::{BusError, ConditionEvaluator, ConsensusWeigher, RetryBackoff};
use crate::agent::{Agent, AgentStatus};
use crate::events::BusEvent;

/// A registry entry: the agent plus its registration order and the task
/// forwarding its events into the bus channel
struct RegisteredAgent {
    agent: Arc<Agent>,
    seq: u64,
    forwarder: JoinHandle<()>,
}

impl Drop for RegisteredAgent {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// In-process message bus routing typed request/response messages between
/// registered agents
pub struct MessageBus {
    config: BusConfig,
    registry: DashMap<AgentId, RegisteredAgent>,
    registration_seq: AtomicU64,
    metrics: BusMetrics,
    history: Mutex<DispatchHistory>,
    events: broadcast::Sender<BusEvent>,
    condition_evaluator: Option<Arc<dyn ConditionEvaluator>>,
    consensus_weigher: Option<Arc<dyn ConsensusWeigher>>,
    custom_backoff: Option<Arc<dyn RetryBackoff>>,
}

impl MessageBus {
    /// Creates a bus with the given configuration
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.as_usize());
        let history = Mutex::new(DispatchHistory::new(config.history_capacity.as_usize()));
        Self {
            config,
            registry: DashMap::new(),
            registration_seq: AtomicU64::new(0),
            metrics: BusMetrics::default(),
            history,
            events,
            condition_evaluator: None,
            consensus_weigher: None,
            custom_backoff: None,
        }
    }

    /// Installs the host predicate backing `conditional` targets
    #[must_use]
    pub fn with_condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.condition_evaluator = Some(evaluator);
        self
    }

    /// Installs the host weighting hook for `weighted` consensus
    #[must_use]
    pub fn with_consensus_weigher(mut self, weigher: Arc<dyn ConsensusWeigher>) -> Self {
        self.consensus_weigher = Some(weigher);
        self
    }

    /// Installs the host delay schedule for `custom` backoff
    #[must_use]
    pub fn with_custom_backoff(mut self, backoff: Arc<dyn RetryBackoff>) -> Self {
        self.custom_backoff = Some(backoff);
        self
    }

    /// Registers an agent and wires its event stream into the bus channel
    ///
    /// # Errors
    /// Returns [`BusError::AgentAlreadyRegistered`] if the ID is taken.
    pub fn register_agent(&self, agent: Arc<Agent>) -> Result<(), BusError> {
        let agent_id = agent.id().clone();
        match self.registry.entry(agent_id.clone()) {
            Entry::Occupied(_) => Err(BusError::AgentAlreadyRegistered { agent_id }),
            Entry::Vacant(slot) => {
                let seq = self.registration_seq.fetch_add(1, Ordering::SeqCst);
                let forwarder = self.spawn_forwarder(&agent);
                slot.insert(RegisteredAgent {
                    agent,
                    seq,
                    forwarder,
                });
                info!(agent_id = %agent_id, "agent registered");
                let _ = self.events.send(BusEvent::AgentRegistered { agent_id });
                Ok(())
            }
        }
    }

    /// Removes an agent and detaches its event wiring
    ///
    /// # Errors
    /// Returns [`BusError::AgentNotFound`] if the ID is not registered.
    pub fn unregister_agent(&self, agent_id: &AgentId) -> Result<(), BusError> {
        match self.registry.remove(agent_id) {
            Some(_) => {
                info!(agent_id = %agent_id, "agent unregistered");
                let _ = self.events.send(BusEvent::AgentUnregistered {
                    agent_id: agent_id.clone(),
                });
                Ok(())
            }
            None => Err(BusError::AgentNotFound {
                agent_id: agent_id.clone(),
            }),
        }
    }

    /// Sends a message as a direct coordination without retries
    ///
    /// # Errors
    /// Returns a [`BusError`] when the target resolves to no agent or the
    /// resolved agent is not registered. Agent-internal failures are
    /// reported in the response, not here.
    #[instrument(skip_all, fields(message_id = %message.id))]
    pub async fn send(&self, message: Message) -> Result<Response, BusError> {
        coordination::execute_direct(self, message, false).await
    }

    /// Fans a message out to an explicit list of agents, best-effort
    ///
    /// Individual dispatch failures are synthesized into failure responses,
    /// so the returned list always matches the given ID order and length.
    #[instrument(skip_all, fields(message_id = %message.id, targets = agent_ids.len()))]
    pub async fn broadcast(&self, message: Message, agent_ids: &[AgentId]) -> Vec<Response> {
        coordination::fan_out(self, &message, agent_ids).await.0
    }

    /// Routes a message per its coordination mode
    ///
    /// # Errors
    /// Returns a [`BusError`] when resolution, aggregation verdicts,
    /// consensus thresholds or participant minimums fail; collected
    /// responses travel inside the error where the contract requires them.
    #[instrument(skip_all, fields(message_id = %message.id, mode = message.coordination.mode()))]
    pub async fn route(&self, message: Message) -> Result<Vec<Response>, BusError> {
        debug!(mode = message.coordination.mode(), "routing message");
        match message.coordination.clone() {
            Coordination::Direct { .. } => coordination::execute_direct(self, message, true)
                .await
                .map(|response| vec![response]),
            Coordination::Broadcast {
                aggregation,
                partial_success,
                ..
            } => coordination::execute_broadcast(self, message, aggregation, partial_success).await,
            Coordination::Consensus {
                consensus_type,
                minimum_participants,
                ..
            } => {
                coordination::execute_consensus(self, message, consensus_type, minimum_participants)
                    .await
            }
            Coordination::Pipeline {
                stages,
                failure_strategy,
            } => coordination::execute_pipeline(self, message, &stages, failure_strategy).await,
        }
    }

    /// Takes a point-in-time metrics snapshot
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        let throughput = self
            .history
            .lock()
            .map_or(0, |history| history.throughput(MessageTimestamp::now()));
        self.metrics.snapshot(throughput)
    }

    /// Zeroes every counter and clears both histories; idempotent
    pub fn reset_metrics(&self) {
        self.metrics.reset();
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }

    /// Lists registered agents in registration order
    #[must_use]
    pub fn list_agents(&self) -> Vec<AgentStatus> {
        self.registry_snapshot()
            .iter()
            .map(|agent| agent.status())
            .collect()
    }

    /// Subscribes to the bus event channel
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    /// Whether both histories are empty
    #[must_use]
    pub fn history_is_empty(&self) -> bool {
        self.history.lock().map_or(true, |history| history.is_empty())
    }

    /// Registration-ordered snapshot of the registry
    pub(crate) fn registry_snapshot(&self) -> Vec<Arc<Agent>> {
        let mut entries: Vec<(u64, Arc<Agent>)> = self
            .registry
            .iter()
            .map(|entry| (entry.value().seq, Arc::clone(&entry.value().agent)))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, agent)| agent).collect()
    }

    /// Resolves the message target against the current registry snapshot
    pub(crate) fn resolve_targets(&self, message: &Message) -> Vec<AgentId> {
        resolver::resolve(
            &message.target,
            &message.source,
            &self.registry_snapshot(),
            self.condition_evaluator.as_ref(),
        )
    }

    /// Hands one message to one registered agent, recording metrics and
    /// histories on the way
    pub(crate) async fn dispatch(
        &self,
        agent_id: &AgentId,
        message: Message,
    ) -> Result<Response, BusError> {
        let agent = self
            .registry
            .get(agent_id)
            .map(|entry| Arc::clone(&entry.value().agent))
            .ok_or_else(|| BusError::AgentNotFound {
                agent_id: agent_id.clone(),
            })?;

        if self.config.enable_detailed_logs {
            debug!(agent_id = %agent_id, message_id = %message.id, "dispatching");
        } else {
            trace!(agent_id = %agent_id, message_id = %message.id, "dispatching");
        }

        self.metrics.record_sent();
        if let Ok(mut history) = self.history.lock() {
            history.record_message(&message);
        }

        let response = agent.process_message(message).await;

        self.metrics.record_response(&response);
        if let Ok(mut history) = self.history.lock() {
            history.record_response(&response);
        }

        Ok(response)
    }

    pub(crate) fn consensus_weigher(&self) -> Option<&Arc<dyn ConsensusWeigher>> {
        self.consensus_weigher.as_ref()
    }

    pub(crate) fn custom_backoff(&self) -> Option<&Arc<dyn RetryBackoff>> {
        self.custom_backoff.as_ref()
    }

    fn spawn_forwarder(&self, agent: &Arc<Agent>) -> JoinHandle<()> {
        let mut receiver = agent.subscribe();
        let events = self.events.clone();
        let agent_id = agent.id().clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let _ = events.send(BusEvent::Agent {
                            agent_id: agent_id.clone(),
                            event,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!(agent_id = %agent_id, skipped, "event forwarder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("config", &self.config)
            .field("agents", &self.registry.len())
            .finish()
    }
}
