//! Property tests for the outbound-message validator

use proptest::prelude::*;
use switchboard::message_bus::{
    AgentIdentifier, ConsensusType, Coordination, Message, MessageTimestamp, RetryPolicy, Target,
    TtlMs, validate,
};

fn arbitrary_message() -> impl Strategy<Value = Message> {
    (
        "[a-z0-9]{0,8}",
        "[a-z0-9]{0,8}",
        "[a-z0-9]{0,8}",
        0_u64..10_000,
        0_u64..100_000,
        0_u32..20,
        0_u32..5,
        any::<bool>(),
    )
        .prop_map(
            |(id, source_id, tool, timestamp, ttl, max_retries, minimum, consensus)| {
                let coordination = if consensus {
                    Coordination::Consensus {
                        consensus_type: ConsensusType::Majority,
                        voting_timeout: 5_000,
                        minimum_participants: minimum,
                    }
                } else {
                    Coordination::default()
                };
                Message::builder(
                    id,
                    AgentIdentifier::new(source_id, "tester"),
                    Target::Single {
                        agent_id: "A".into(),
                    },
                    tool,
                )
                .timestamp(MessageTimestamp::new(timestamp))
                .ttl(TtlMs::new(ttl))
                .retry_policy(RetryPolicy {
                    max_retries,
                    ..RetryPolicy::default()
                })
                .coordination(coordination)
                .build()
            },
        )
}

proptest! {
    #[test]
    fn valid_iff_no_errors(message in arbitrary_message()) {
        let report = validate(&message);
        prop_assert_eq!(report.valid, report.errors.is_empty());
    }

    #[test]
    fn validation_is_deterministic(message in arbitrary_message()) {
        let first = validate(&message);
        let second = validate(&message);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn consensus_below_two_participants_never_validates(
        message in arbitrary_message(),
        minimum in 0_u32..2,
    ) {
        let message = Message {
            coordination: Coordination::Consensus {
                consensus_type: ConsensusType::Majority,
                voting_timeout: 5_000,
                minimum_participants: minimum,
            },
            ..message
        };
        prop_assert!(!validate(&message).valid);
    }
}
