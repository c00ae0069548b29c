//! End-to-end coordination tests for the message bus
//!
//! Exercises the full producer path: envelope construction, target
//! resolution, coordination execution and the agent execution envelope.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use switchboard::agent::Agent;
use switchboard::events::BusEvent;
use switchboard::message_bus::{
    A2aErrorCode, AggregationMode, AgentIdentifier, BackoffStrategy, BoxError, BusConfig,
    BusError, ConsensusType, Coordination, FailureStrategy, Message, MessageBus, MessageId,
    MessageTimestamp, PipelineStage, ResourceRequirement, ResourceType, RetryPolicy, Target,
    ToolHandler, TtlMs,
};
use switchboard::{AgentEvent, AgentId};
use tokio::time::timeout;

fn testing_bus() -> MessageBus {
    MessageBus::new(BusConfig::testing())
}

fn worker(id: &str, tool: &str) -> Arc<Agent> {
    Arc::new(Agent::new(id, "worker").with_tool(tool))
}

fn source() -> AgentIdentifier {
    AgentIdentifier::new("src", "tester")
}

fn direct_message(id: &str, agent_id: &str, tool: &str) -> Message {
    Message::builder(
        id,
        source(),
        Target::Single {
            agent_id: agent_id.into(),
        },
        tool,
    )
    .parameters(json!({"x": 1}))
    .coordination(Coordination::Direct {
        timeout: 5_000,
        retries: 0,
        acknowledgment: true,
    })
    .build()
}

#[test_log::test(tokio::test)]
async fn direct_send_succeeds_with_hops_and_ids() {
    let bus = testing_bus();
    bus.register_agent(worker("A", "t1")).unwrap();

    let response = bus.send(direct_message("m1", "A", "t1")).await.unwrap();

    assert!(response.success);
    assert_eq!(response.message_id, MessageId::from("m1"));
    assert_eq!(response.correlation_id, MessageId::from("m1"));
    assert_eq!(response.metadata.hops, 1);
    assert!(!response.metadata.cached);
    assert_eq!(response.source.agent_id, AgentId::from("A"));
}

#[test_log::test(tokio::test)]
async fn expired_message_fails_with_timeout() {
    let bus = testing_bus();
    bus.register_agent(worker("A", "t1")).unwrap();

    let message = Message {
        timestamp: MessageTimestamp::new(MessageTimestamp::now().as_millis() - 60_000),
        ttl: TtlMs::new(1_000),
        ..direct_message("m2", "A", "t1")
    };
    let response = bus.send(message).await.unwrap();

    assert!(!response.success);
    assert_eq!(response.error.unwrap().code, A2aErrorCode::Timeout);
}

#[test_log::test(tokio::test)]
async fn resource_shortfall_fails_with_insufficient_resources() {
    let bus = testing_bus();
    bus.register_agent(worker("B", "t1")).unwrap();

    let message = Message {
        resource_requirements: vec![ResourceRequirement {
            resource: ResourceType::Cpu,
            amount: 150,
            unit: "units".to_owned(),
            priority: Default::default(),
            duration: 1_000,
            exclusive: None,
        }],
        ..direct_message("m3", "B", "t1")
    };
    let response = bus.send(message).await.unwrap();

    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.code, A2aErrorCode::InsufficientResources);
    assert!(error.recoverable);
}

#[test_log::test(tokio::test)]
async fn broadcast_majority_reports_success_with_partial_failures() {
    let bus = testing_bus();
    // Three agents support the tool, two do not and will reject.
    for id in ["w1", "w2", "w3"] {
        bus.register_agent(worker(id, "t")).unwrap();
    }
    for id in ["w4", "w5"] {
        bus.register_agent(worker(id, "u")).unwrap();
    }

    let message = Message::builder("m4", source(), Target::Broadcast { exclude_source: true }, "t")
        .coordination(Coordination::Broadcast {
            aggregation: AggregationMode::Majority,
            timeout: 5_000,
            partial_success: true,
        })
        .build();

    let responses = bus.route(message).await.unwrap();

    assert_eq!(responses.len(), 5);
    let successes = responses.iter().filter(|response| response.success).count();
    assert_eq!(successes, 3);
    let rejects: Vec<_> = responses
        .iter()
        .filter(|response| !response.success)
        .map(|response| response.error.as_ref().unwrap().code)
        .collect();
    assert_eq!(rejects, vec![A2aErrorCode::ToolNotSupported; 2]);
}

#[test_log::test(tokio::test)]
async fn unanimous_consensus_failure_still_carries_all_responses() {
    let bus = testing_bus();
    bus.register_agent(worker("c1", "t")).unwrap();
    bus.register_agent(worker("c2", "t")).unwrap();
    bus.register_agent(worker("c3", "other")).unwrap();

    let message = Message::builder("m5", source(), Target::Broadcast { exclude_source: true }, "t")
        .coordination(Coordination::Consensus {
            consensus_type: ConsensusType::Unanimous,
            voting_timeout: 5_000,
            minimum_participants: 3,
        })
        .build();

    let error = bus.route(message).await.unwrap_err();
    assert!(error.to_string().contains("Consensus not reached"));
    let responses = error.into_responses();
    assert_eq!(responses.len(), 3);
    assert_eq!(responses.iter().filter(|r| r.success).count(), 2);
}

#[test_log::test(tokio::test)]
async fn majority_consensus_reaches_threshold() {
    let bus = testing_bus();
    bus.register_agent(worker("c1", "t")).unwrap();
    bus.register_agent(worker("c2", "t")).unwrap();
    bus.register_agent(worker("c3", "other")).unwrap();

    let message = Message::builder("m6", source(), Target::Broadcast { exclude_source: true }, "t")
        .coordination(Coordination::Consensus {
            consensus_type: ConsensusType::Majority,
            voting_timeout: 5_000,
            minimum_participants: 3,
        })
        .build();

    let responses = bus.route(message).await.unwrap();
    assert_eq!(responses.len(), 3);
}

#[test_log::test(tokio::test)]
async fn consensus_checks_minimum_participants_before_dispatch() {
    let bus = testing_bus();
    bus.register_agent(worker("c1", "t")).unwrap();

    let message = Message::builder("m7", source(), Target::Broadcast { exclude_source: true }, "t")
        .coordination(Coordination::Consensus {
            consensus_type: ConsensusType::Majority,
            voting_timeout: 5_000,
            minimum_participants: 3,
        })
        .build();

    let error = bus.route(message).await.unwrap_err();
    assert!(matches!(
        error,
        BusError::InsufficientParticipants {
            resolved: 1,
            minimum: 3
        }
    ));
}

#[test_log::test(tokio::test)]
async fn pipeline_transforms_flow_between_stages() {
    let bus = testing_bus();
    bus.register_agent(worker("A", "t1")).unwrap();

    let seen_by_stage_1: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let capture = Arc::clone(&seen_by_stage_1);
    let handler: Arc<dyn ToolHandler> = Arc::new(move |parameters: Value| -> Result<Value, BoxError> {
        *capture.lock().unwrap() = Some(parameters.clone());
        Ok(parameters)
    });
    bus.register_agent(Arc::new(
        Agent::new("B", "worker").with_tool_handler("t2", handler),
    ))
    .unwrap();

    let stages = vec![
        PipelineStage::new(
            Target::Single {
                agent_id: "A".into(),
            },
            "t1",
        )
        .with_output_transform(Arc::new(|_| json!({"n": 2}))),
        PipelineStage::new(
            Target::Single {
                agent_id: "B".into(),
            },
            "t2",
        )
        .with_input_transform(Arc::new(|value| {
            json!({"n": value["n"].as_i64().unwrap_or(0) + 1})
        })),
    ];

    let message = Message::builder("m8", source(), Target::Single { agent_id: "A".into() }, "t1")
        .parameters(json!({"n": 0}))
        .coordination(Coordination::Pipeline {
            stages,
            failure_strategy: FailureStrategy::Abort,
        })
        .build();

    let responses = bus.route(message).await.unwrap();

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].message_id, MessageId::from("m8-stage-0"));
    assert_eq!(responses[1].message_id, MessageId::from("m8-stage-1"));
    assert!(responses.iter().all(|response| response.success));
    assert_eq!(*seen_by_stage_1.lock().unwrap(), Some(json!({"n": 3})));
}

#[test_log::test(tokio::test)]
async fn pipeline_abort_stops_at_the_failed_stage() {
    let bus = testing_bus();
    bus.register_agent(worker("A", "t1")).unwrap();
    bus.register_agent(worker("B", "t2")).unwrap();

    let stages = vec![
        PipelineStage::new(Target::Single { agent_id: "A".into() }, "missing"),
        PipelineStage::new(Target::Single { agent_id: "B".into() }, "t2"),
    ];
    let message = Message::builder("m9", source(), Target::Single { agent_id: "A".into() }, "t1")
        .coordination(Coordination::Pipeline {
            stages,
            failure_strategy: FailureStrategy::Abort,
        })
        .build();

    let responses = bus.route(message).await.unwrap();

    assert_eq!(responses.len(), 1);
    assert!(!responses[0].success);
}

#[test_log::test(tokio::test)]
async fn pipeline_skip_keeps_the_input_for_the_next_stage() {
    let bus = testing_bus();
    bus.register_agent(worker("A", "t1")).unwrap();

    let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let capture = Arc::clone(&seen);
    let handler: Arc<dyn ToolHandler> = Arc::new(move |parameters: Value| -> Result<Value, BoxError> {
        *capture.lock().unwrap() = Some(parameters.clone());
        Ok(parameters)
    });
    bus.register_agent(Arc::new(
        Agent::new("B", "worker").with_tool_handler("t2", handler),
    ))
    .unwrap();

    let stages = vec![
        PipelineStage::new(Target::Single { agent_id: "A".into() }, "missing"),
        PipelineStage::new(Target::Single { agent_id: "B".into() }, "t2"),
    ];
    let message = Message::builder("m10", source(), Target::Single { agent_id: "A".into() }, "t1")
        .parameters(json!({"seed": true}))
        .coordination(Coordination::Pipeline {
            stages,
            failure_strategy: FailureStrategy::Skip,
        })
        .build();

    let responses = bus.route(message).await.unwrap();

    assert_eq!(responses.len(), 2);
    assert!(!responses[0].success);
    assert!(responses[1].success);
    assert_eq!(*seen.lock().unwrap(), Some(json!({"seed": true})));
}

#[test_log::test(tokio::test)]
async fn empty_pipeline_returns_no_responses() {
    let bus = testing_bus();
    let message = Message::builder("m11", source(), Target::Single { agent_id: "A".into() }, "t1")
        .coordination(Coordination::Pipeline {
            stages: Vec::new(),
            failure_strategy: FailureStrategy::Abort,
        })
        .build();

    let responses = bus.route(message).await.unwrap();
    assert!(responses.is_empty());
}

#[test_log::test(tokio::test)]
async fn route_retries_retryable_error_codes() {
    let bus = testing_bus();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handler: Arc<dyn ToolHandler> = Arc::new(move |parameters: Value| -> Result<Value, BoxError> {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(Box::new(switchboard::A2aError::new(
                A2aErrorCode::Timeout,
                "simulated stall expired",
            )))
        } else {
            Ok(parameters)
        }
    });
    bus.register_agent(Arc::new(
        Agent::new("A", "worker").with_tool_handler("t1", handler),
    ))
    .unwrap();

    let message = Message {
        retry_policy: RetryPolicy {
            max_retries: 2,
            backoff_strategy: BackoffStrategy::Linear,
            base_delay: 1,
            max_delay: 10,
            retryable_errors: vec![A2aErrorCode::Timeout],
        },
        ..direct_message("m12", "A", "t1")
    };

    let responses = bus.route(message).await.unwrap();
    assert_eq!(responses.len(), 1);
    assert!(responses[0].success);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test_log::test(tokio::test)]
async fn route_does_not_retry_non_retryable_codes() {
    let bus = testing_bus();
    bus.register_agent(worker("A", "t1")).unwrap();

    let message = Message {
        retry_policy: RetryPolicy {
            max_retries: 3,
            backoff_strategy: BackoffStrategy::Linear,
            base_delay: 1,
            max_delay: 10,
            retryable_errors: vec![A2aErrorCode::Timeout],
        },
        ..direct_message("m13", "A", "missing")
    };

    let responses = bus.route(message).await.unwrap();
    assert!(!responses[0].success);
    assert_eq!(
        responses[0].error.as_ref().unwrap().code,
        A2aErrorCode::ToolNotSupported
    );
    // One dispatch only: TOOL_NOT_SUPPORTED is not in retryable_errors.
    assert_eq!(bus.metrics().total_messages.as_u64(), 1);
}

#[test_log::test(tokio::test)]
async fn send_errors_on_unresolved_targets() {
    let bus = testing_bus();

    let error = bus.send(direct_message("m14", "ghost", "t1")).await.unwrap_err();
    assert!(matches!(error, BusError::AgentNotFound { .. }));

    let message = Message::builder(
        "m15",
        source(),
        Target::Group {
            role: "nobody".into(),
            capabilities: None,
            max_agents: None,
            selection_strategy: Default::default(),
        },
        "t1",
    )
    .build();
    let error = bus.send(message).await.unwrap_err();
    assert!(matches!(error, BusError::NoAgentsForTarget));
}

#[test_log::test(tokio::test)]
async fn explicit_broadcast_synthesizes_slots_for_failed_dispatches() {
    let bus = testing_bus();
    bus.register_agent(worker("A", "t1")).unwrap();

    let ids = vec![AgentId::from("A"), AgentId::from("ghost")];
    let responses = bus
        .broadcast(direct_message("m16", "A", "t1"), &ids)
        .await;

    assert_eq!(responses.len(), 2);
    assert!(responses[0].success);
    assert!(!responses[1].success);
    let synthesized = &responses[1];
    assert_eq!(synthesized.source.agent_id, AgentId::from("unknown"));
    assert_eq!(synthesized.source.role.as_str(), "unknown");
    assert_eq!(
        synthesized.error.as_ref().unwrap().code,
        A2aErrorCode::CoordinationFailed
    );
    assert_eq!(synthesized.metadata.processing_time, 0);
}

#[test_log::test(tokio::test)]
async fn correlation_id_is_echoed_when_present() {
    let bus = testing_bus();
    bus.register_agent(worker("A", "t1")).unwrap();

    let message = Message {
        correlation_id: Some(MessageId::from("corr-1")),
        route: vec![AgentId::from("hop1"), AgentId::from("hop2")],
        ..direct_message("m17", "A", "t1")
    };
    let response = bus.send(message).await.unwrap();

    assert_eq!(response.correlation_id, MessageId::from("corr-1"));
    assert_eq!(response.metadata.hops, 3);
}

#[test_log::test(tokio::test)]
async fn metrics_track_dispatches_and_reset_idempotently() {
    let bus = testing_bus();
    bus.register_agent(worker("A", "t1")).unwrap();

    bus.send(direct_message("m18", "A", "t1")).await.unwrap();
    bus.send(direct_message("m19", "A", "missing")).await.unwrap();

    let snapshot = bus.metrics();
    assert_eq!(snapshot.total_messages.as_u64(), 2);
    assert_eq!(snapshot.successful_messages.as_u64(), 1);
    assert_eq!(snapshot.failed_messages.as_u64(), 1);
    assert!(snapshot.throughput >= 2);

    bus.reset_metrics();
    bus.reset_metrics();

    let snapshot = bus.metrics();
    assert_eq!(snapshot.total_messages.as_u64(), 0);
    assert_eq!(snapshot.successful_messages.as_u64(), 0);
    assert_eq!(snapshot.failed_messages.as_u64(), 0);
    assert_eq!(snapshot.throughput, 0);
    assert!(bus.history_is_empty());
}

#[test_log::test(tokio::test)]
async fn bus_events_cover_registration_and_processing() {
    let bus = testing_bus();
    let mut events = bus.subscribe();

    bus.register_agent(worker("A", "t1")).unwrap();
    let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    assert!(matches!(
        event,
        BusEvent::AgentRegistered { agent_id } if agent_id == AgentId::from("A")
    ));

    bus.send(direct_message("m20", "A", "t1")).await.unwrap();
    let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    match event {
        BusEvent::Agent {
            agent_id,
            event: AgentEvent::MessageProcessed { message, response },
        } => {
            assert_eq!(agent_id, AgentId::from("A"));
            assert_eq!(message.id, MessageId::from("m20"));
            assert!(response.success);
        }
        other => panic!("expected forwarded MessageProcessed, got {other:?}"),
    }

    bus.unregister_agent(&AgentId::from("A")).unwrap();
    let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    assert!(matches!(
        event,
        BusEvent::AgentUnregistered { agent_id } if agent_id == AgentId::from("A")
    ));
}

#[test_log::test(tokio::test)]
async fn group_targets_route_to_role_members_in_order() {
    let bus = testing_bus();
    bus.register_agent(worker("w1", "t")).unwrap();
    bus.register_agent(Arc::new(Agent::new("x1", "other").with_tool("t"))).unwrap();
    bus.register_agent(worker("w2", "t")).unwrap();

    let message = Message::builder(
        "m21",
        source(),
        Target::Group {
            role: "worker".into(),
            capabilities: None,
            max_agents: None,
            selection_strategy: Default::default(),
        },
        "t",
    )
    .coordination(Coordination::Broadcast {
        aggregation: AggregationMode::All,
        timeout: 5_000,
        partial_success: false,
    })
    .build();

    let responses = bus.route(message).await.unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].source.agent_id, AgentId::from("w1"));
    assert_eq!(responses[1].source.agent_id, AgentId::from("w2"));
}
