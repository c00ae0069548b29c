//! Outbound message compliance checks
//!
//! A pure function over the envelope: it never touches the bus. Errors are
//! cross-field problems that make a message undeliverable; warnings flag
//! configurations that are legal but likely mistakes.

use thiserror::Error;

use super::domain_types::{Coordination, Message, Target};

/// TTLs below this invite spurious expiry
const SHORT_TTL_MS: u64 = 1_000;

/// Retry counts above this are almost certainly misconfigured
const EXCESSIVE_RETRIES: u32 = 10;

/// One compliance finding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComplianceIssue {
    /// The producer never assigned a message ID
    #[error("message id is missing")]
    MissingId,

    /// The source identity carries no agent ID
    #[error("source agent id is missing")]
    MissingSourceAgent,

    /// The target cannot address any agent
    #[error("target does not address any agent")]
    EmptyTarget,

    /// The tool name is empty
    #[error("tool name is missing")]
    MissingToolName,

    /// The producer never stamped the message
    #[error("timestamp is not set")]
    MissingTimestamp,

    /// Consensus over fewer than two participants is not a vote
    #[error("consensus requires at least 2 participants, got {minimum}")]
    ConsensusParticipantsTooLow {
        /// The configured `minimum_participants`
        minimum: u32,
    },

    /// TTL under one second
    #[error("ttl of {ttl}ms invites spurious expiry")]
    ShortTtl {
        /// The configured TTL in milliseconds
        ttl: u64,
    },

    /// More retries than any backoff schedule can usefully spend
    #[error("max retries of {max_retries} exceeds 10")]
    ExcessiveRetries {
        /// The configured retry count
        max_retries: u32,
    },
}

/// Result of validating one outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceReport {
    /// Whether the message may be dispatched; equivalent to
    /// `errors.is_empty()`
    pub valid: bool,
    /// Findings that make the message undeliverable
    pub errors: Vec<ComplianceIssue>,
    /// Findings worth a second look
    pub warnings: Vec<ComplianceIssue>,
}

/// Validates an outbound message
///
/// Deterministic on its input and free of side effects.
#[must_use]
pub fn validate(message: &Message) -> ComplianceReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if message.id.is_empty() {
        errors.push(ComplianceIssue::MissingId);
    }
    if message.source.agent_id.is_empty() {
        errors.push(ComplianceIssue::MissingSourceAgent);
    }
    if target_is_empty(&message.target) {
        errors.push(ComplianceIssue::EmptyTarget);
    }
    if message.tool_name.is_empty() {
        errors.push(ComplianceIssue::MissingToolName);
    }
    if message.timestamp.is_unset() {
        errors.push(ComplianceIssue::MissingTimestamp);
    }
    if let Coordination::Consensus {
        minimum_participants,
        ..
    } = &message.coordination
    {
        if *minimum_participants < 2 {
            errors.push(ComplianceIssue::ConsensusParticipantsTooLow {
                minimum: *minimum_participants,
            });
        }
    }

    if message.ttl.as_millis() < SHORT_TTL_MS {
        warnings.push(ComplianceIssue::ShortTtl {
            ttl: message.ttl.as_millis(),
        });
    }
    if message.retry_policy.max_retries > EXCESSIVE_RETRIES {
        warnings.push(ComplianceIssue::ExcessiveRetries {
            max_retries: message.retry_policy.max_retries,
        });
    }

    ComplianceReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// A typed target is always present; "missing" means it cannot address
/// anyone. The agent's fail-fast envelope check applies the same
/// interpretation.
pub(crate) fn target_is_empty(target: &Target) -> bool {
    match target {
        Target::Single { agent_id } => agent_id.is_empty(),
        Target::Multiple { agent_ids, .. } => agent_ids.is_empty(),
        Target::Group { role, .. } => role.is_empty(),
        Target::Broadcast { .. } | Target::Conditional { .. } => false,
    }
}
