//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use std::collections::HashSet;

use uuid::Uuid;

use crate::models::{
    LockedDistribution, MemberIntention, NegotiationSession, SessionParticipant, SessionStatus,
};
use crate::negotiation::NegotiationPolicy;

/// Validate that a session and its participant set agree with the lock rule
pub fn assert_negotiation_invariants(
    session: &NegotiationSession,
    participants: &[SessionParticipant],
    policy: &NegotiationPolicy,
) {
    let mut seen = HashSet::with_capacity(participants.len());
    for p in participants {
        debug_assert!(
            p.session_id == session.id,
            "Participant {} belongs to session {} but is held by {}",
            p.user_id,
            p.session_id,
            session.id
        );
        debug_assert!(
            seen.insert(p.user_id),
            "Session {} lists participant {} twice",
            session.id,
            p.user_id
        );
        debug_assert!(
            p.current_percentage > 0.0 && p.current_percentage <= 100.0,
            "Participant {} in session {} holds out-of-range percentage {}",
            p.user_id,
            session.id,
            p.current_percentage
        );
    }

    match session.status {
        SessionStatus::Completed => {
            debug_assert!(
                session.locked_at.is_some(),
                "Session {} is completed without lockedAt",
                session.id
            );
            debug_assert!(
                policy.lock_condition_met(participants),
                "Session {} is completed but the lock condition does not hold",
                session.id
            );
        }
        SessionStatus::Active => {
            debug_assert!(
                session.locked_at.is_none(),
                "Session {} is active but has lockedAt",
                session.id
            );
            debug_assert!(
                !policy.lock_condition_met(participants),
                "Session {} satisfies the lock condition but is still active",
                session.id
            );
        }
        SessionStatus::Abandoned => {}
    }
}

/// Validate a recorded intention
pub fn assert_intention_invariants(intention: &MemberIntention) {
    debug_assert!(
        intention.desired_percentage <= intention.max_percentage,
        "Intention {} has desired {} above max {}",
        intention.id,
        intention.desired_percentage,
        intention.max_percentage
    );
    debug_assert!(
        intention.desired_percentage > 0.0 && intention.max_percentage <= 100.0,
        "Intention {} is outside (0, 100]",
        intention.id
    );
}

/// Validate that a locked distribution covers exactly the participant set
pub fn assert_distribution_invariants(
    distribution: &LockedDistribution,
    participants: &[SessionParticipant],
) {
    debug_assert!(
        distribution.shares.len() == participants.len(),
        "Distribution for session {} has {} shares for {} participants",
        distribution.session_id,
        distribution.shares.len(),
        participants.len()
    );
    for p in participants {
        debug_assert!(
            distribution.shares.get(&p.user_id) == Some(&p.current_percentage),
            "Distribution for session {} disagrees with participant {}",
            distribution.session_id,
            p.user_id
        );
    }
}

/// Validate that a user ID is not nil
pub fn assert_user_id_valid(user_id: Uuid, context: &str) {
    debug_assert!(
        user_id != Uuid::nil(),
        "Nil user_id in context: {}",
        context
    );
}
