//! Negotiation state machine
//!
//! Authoritative rules for one session: applying a participant's update,
//! re-evaluating the lock condition over the whole participant set, and
//! emitting transition log entries. Performs no I/O; callers persist the
//! outcome and fan it out.
//!
//! Session states: `active -> completed` via the lock rule, or
//! `active -> abandoned` via an explicit abandon. Both are terminal.

mod policy;

pub use policy::{
    all_confirmed, percentage_changed, revokes_confirmation, total_percentage,
    validate_intention, validate_percentage, NegotiationPolicy, DEFAULT_TARGET_PERCENTAGE,
    DEFAULT_TOLERANCE, MAX_PERCENTAGE,
};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::invariants::assert_negotiation_invariants;
use crate::models::{
    LockedDistribution, MemberIntention, NegotiationSession, ParticipantStatus, ParticipantUpdate,
    SessionParticipant, SessionStatus, Transition, TransitionKind,
};

/// Result of applying one accepted update
#[derive(Debug, Clone)]
pub struct Applied {
    /// The updating participant after the change
    pub participant: SessionParticipant,
    /// Log entries in the order they happened
    pub transitions: Vec<Transition>,
    /// Present when this update locked the session
    pub distribution: Option<LockedDistribution>,
}

impl Applied {
    pub fn locked(&self) -> bool {
        self.distribution.is_some()
    }

    pub fn confirmation_revoked(&self) -> bool {
        self.transitions
            .iter()
            .any(|t| t.kind == TransitionKind::ConfirmationRevoked)
    }
}

/// In-memory view of one session and its participants
#[derive(Debug, Clone)]
pub struct Negotiation {
    session: NegotiationSession,
    participants: Vec<SessionParticipant>,
    policy: NegotiationPolicy,
}

impl Negotiation {
    pub fn new(
        session: NegotiationSession,
        participants: Vec<SessionParticipant>,
        policy: NegotiationPolicy,
    ) -> Self {
        Self {
            session,
            participants,
            policy,
        }
    }

    pub fn session(&self) -> &NegotiationSession {
        &self.session
    }

    pub fn participants(&self) -> &[SessionParticipant] {
        &self.participants
    }

    pub fn participant(&self, user_id: Uuid) -> Option<&SessionParticipant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participant(user_id).is_some()
    }

    pub fn total_percentage(&self) -> f64 {
        total_percentage(&self.participants)
    }

    pub fn policy(&self) -> NegotiationPolicy {
        self.policy
    }

    pub fn into_parts(self) -> (NegotiationSession, Vec<SessionParticipant>) {
        (self.session, self.participants)
    }

    fn ensure_active(&self) -> Result<()> {
        match self.session.status {
            SessionStatus::Active => Ok(()),
            status => Err(Error::Conflict(format!(
                "session {} is {}",
                self.session.id,
                status.as_str()
            ))),
        }
    }

    fn participant_index(&self, user_id: Uuid) -> Result<usize> {
        self.participants
            .iter()
            .position(|p| p.user_id == user_id)
            .ok_or_else(|| {
                Error::Forbidden(format!(
                    "user {} is not a participant of session {}",
                    user_id, self.session.id
                ))
            })
    }

    /// Apply one participant's update and re-check the lock rule.
    ///
    /// A percentage is applied before a status, so an update carrying both
    /// a new number and `confirmed` ends up confirmed at the new number.
    pub fn apply(
        &mut self,
        user_id: Uuid,
        update: ParticipantUpdate,
        now: DateTime<Utc>,
    ) -> Result<Applied> {
        self.ensure_active()?;
        if update.is_empty() {
            return Err(Error::Validation(
                "update must carry a percentage or a status".into(),
            ));
        }
        if let Some(value) = update.percentage {
            validate_percentage(value)?;
        }

        let idx = self.participant_index(user_id)?;
        let session_id = self.session.id;
        let mut transitions = Vec::new();

        {
            let participant = &mut self.participants[idx];

            if let Some(value) = update.percentage {
                let old = participant.current_percentage;
                if percentage_changed(old, value) {
                    if revokes_confirmation(participant.status, old, value) {
                        participant.status = ParticipantStatus::Adjusting;
                        transitions.push(
                            Transition::new(
                                session_id,
                                user_id,
                                TransitionKind::ConfirmationRevoked,
                                now,
                            )
                            .with_status(ParticipantStatus::Adjusting),
                        );
                    }
                    participant.current_percentage = value;
                    transitions.push(
                        Transition::new(session_id, user_id, TransitionKind::PercentageChanged, now)
                            .with_percentage(value),
                    );
                }
            }

            if let Some(status) = update.status {
                if participant.status != status {
                    participant.status = status;
                    transitions.push(
                        Transition::new(session_id, user_id, TransitionKind::StatusChanged, now)
                            .with_status(status),
                    );
                }
            }

            participant.last_updated_at = now;
        }

        let distribution = if self.policy.lock_condition_met(&self.participants) {
            let distribution = self.lock(now);
            transitions.push(Transition::new(
                session_id,
                user_id,
                TransitionKind::Locked,
                now,
            ));
            Some(distribution)
        } else {
            None
        };

        assert_negotiation_invariants(&self.session, &self.participants, &self.policy);

        Ok(Applied {
            participant: self.participants[idx].clone(),
            transitions,
            distribution,
        })
    }

    fn lock(&mut self, now: DateTime<Utc>) -> LockedDistribution {
        self.session.status = SessionStatus::Completed;
        self.session.locked_at = Some(now);
        LockedDistribution {
            session_id: self.session.id,
            locked_at: now,
            shares: self
                .participants
                .iter()
                .map(|p| (p.user_id, p.current_percentage))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    /// Terminate an active session without a distribution
    pub fn abandon(&mut self, user_id: Uuid, now: DateTime<Utc>) -> Result<Transition> {
        self.ensure_active()?;
        self.participant_index(user_id)?;
        self.session.status = SessionStatus::Abandoned;
        Ok(Transition::new(
            self.session.id,
            user_id,
            TransitionKind::Abandoned,
            now,
        ))
    }

    /// Presence is connection-derived and allowed in any session state
    pub fn set_online(&mut self, user_id: Uuid, is_online: bool) -> Result<&SessionParticipant> {
        let idx = self.participant_index(user_id)?;
        self.participants[idx].is_online = is_online;
        Ok(&self.participants[idx])
    }

    /// Build the read model returned to clients
    pub fn snapshot(&self, intentions: &[MemberIntention]) -> SessionSnapshot {
        let participants = self
            .participants
            .iter()
            .map(|p| {
                let intention = intentions.iter().find(|i| i.user_id == p.user_id);
                ParticipantView {
                    participant: p.clone(),
                    desired_percentage: intention.map(|i| i.desired_percentage),
                    max_percentage: intention.map(|i| i.max_percentage),
                }
            })
            .collect();

        SessionSnapshot {
            session: self.session.clone(),
            participants,
            total_percentage: self.total_percentage(),
            target_percentage: self.policy.target_percentage,
        }
    }
}

/// Participant state alongside the intention it was seeded from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    #[serde(flatten)]
    pub participant: SessionParticipant,
    pub desired_percentage: Option<f64>,
    pub max_percentage: Option<f64>,
}

/// Session plus participant snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: NegotiationSession,
    pub participants: Vec<ParticipantView>,
    pub total_percentage: f64,
    pub target_percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    struct Fixture {
        negotiation: Negotiation,
        a: Uuid,
        b: Uuid,
        c: Uuid,
    }

    /// Three members seeded at A:40, B:35, C:25
    fn fixture() -> Fixture {
        let session = NegotiationSession::new(Uuid::new_v4(), Uuid::new_v4());
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let participants = vec![
            SessionParticipant::seeded(session.id, a, 40.0),
            SessionParticipant::seeded(session.id, b, 35.0),
            SessionParticipant::seeded(session.id, c, 25.0),
        ];
        Fixture {
            negotiation: Negotiation::new(session, participants, NegotiationPolicy::default()),
            a,
            b,
            c,
        }
    }

    #[test]
    fn test_all_confirm_locks() {
        let Fixture {
            mut negotiation,
            a,
            b,
            c,
        } = fixture();
        let now = Utc::now();

        let applied = negotiation
            .apply(a, ParticipantUpdate::set_and_confirm(40.0), now)
            .unwrap();
        assert!(!applied.locked());
        let applied = negotiation
            .apply(b, ParticipantUpdate::set_and_confirm(35.0), now)
            .unwrap();
        assert!(!applied.locked());
        let applied = negotiation
            .apply(c, ParticipantUpdate::set_and_confirm(25.0), now)
            .unwrap();

        let distribution = applied.distribution.expect("session should lock");
        assert_eq!(distribution.shares[&a], 40.0);
        assert_eq!(distribution.shares[&b], 35.0);
        assert_eq!(distribution.shares[&c], 25.0);
        assert_eq!(negotiation.session().status, SessionStatus::Completed);
        assert_eq!(negotiation.session().locked_at, Some(now));
        assert_eq!(
            applied.transitions.last().map(|t| t.kind),
            Some(TransitionKind::Locked)
        );
    }

    #[test]
    fn test_change_after_confirm_revokes() {
        let Fixture {
            mut negotiation,
            a,
            b,
            c,
        } = fixture();
        let now = Utc::now();

        negotiation.apply(a, ParticipantUpdate::confirm(), now).unwrap();
        negotiation.apply(b, ParticipantUpdate::confirm(), now).unwrap();
        let applied = negotiation
            .apply(b, ParticipantUpdate::percentage(36.0), now)
            .unwrap();

        assert!(applied.confirmation_revoked());
        assert_eq!(applied.participant.status, ParticipantStatus::Adjusting);
        assert!((negotiation.total_percentage() - 101.0).abs() < 1e-9);

        // C confirming cannot lock: B is adjusting and the sum is 101
        let applied = negotiation.apply(c, ParticipantUpdate::confirm(), now).unwrap();
        assert!(!applied.locked());
        assert_eq!(negotiation.session().status, SessionStatus::Active);
    }

    #[test]
    fn test_same_value_keeps_confirmation() {
        let Fixture {
            mut negotiation, a, ..
        } = fixture();
        let now = Utc::now();

        negotiation.apply(a, ParticipantUpdate::confirm(), now).unwrap();
        let applied = negotiation
            .apply(a, ParticipantUpdate::percentage(40.0), now)
            .unwrap();
        assert_eq!(applied.participant.status, ParticipantStatus::Confirmed);
        assert!(applied.transitions.is_empty());
    }

    #[test]
    fn test_all_confirmed_but_wrong_sum_stays_active() {
        let Fixture {
            mut negotiation,
            a,
            b,
            c,
        } = fixture();
        let now = Utc::now();

        negotiation
            .apply(a, ParticipantUpdate::set_and_confirm(50.0), now)
            .unwrap();
        negotiation.apply(b, ParticipantUpdate::confirm(), now).unwrap();
        let applied = negotiation.apply(c, ParticipantUpdate::confirm(), now).unwrap();

        assert!(!applied.locked());
        assert!(all_confirmed(negotiation.participants()));
        assert_eq!(negotiation.session().status, SessionStatus::Active);
    }

    #[test]
    fn test_lock_from_other_participant_move() {
        // The check covers the whole set, not only the mover
        let Fixture {
            mut negotiation,
            a,
            b,
            c,
        } = fixture();
        let now = Utc::now();

        negotiation
            .apply(a, ParticipantUpdate::set_and_confirm(45.0), now)
            .unwrap();
        negotiation.apply(b, ParticipantUpdate::confirm(), now).unwrap();
        negotiation.apply(c, ParticipantUpdate::confirm(), now).unwrap();
        assert_eq!(negotiation.session().status, SessionStatus::Active);

        let applied = negotiation
            .apply(c, ParticipantUpdate::set_and_confirm(20.0), now)
            .unwrap();
        assert!(applied.locked());
    }

    #[test]
    fn test_completed_session_rejects_updates() {
        let Fixture {
            mut negotiation,
            a,
            b,
            c,
        } = fixture();
        let now = Utc::now();
        for user in [a, b, c] {
            negotiation.apply(user, ParticipantUpdate::confirm(), now).unwrap();
        }
        assert_eq!(negotiation.session().status, SessionStatus::Completed);

        let err = negotiation
            .apply(a, ParticipantUpdate::percentage(10.0), now)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_non_participant_forbidden() {
        let Fixture {
            mut negotiation, ..
        } = fixture();
        let err = negotiation
            .apply(Uuid::new_v4(), ParticipantUpdate::confirm(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let Fixture {
            mut negotiation, a, ..
        } = fixture();
        for bad in [0.0, -1.0, 100.01, f64::INFINITY] {
            let err = negotiation
                .apply(a, ParticipantUpdate::percentage(bad), Utc::now())
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
        assert_eq!(negotiation.participant(a).unwrap().current_percentage, 40.0);
    }

    #[test]
    fn test_empty_update_rejected() {
        let Fixture {
            mut negotiation, a, ..
        } = fixture();
        let err = negotiation
            .apply(a, ParticipantUpdate::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_abandon_is_terminal() {
        let Fixture {
            mut negotiation, a, b, ..
        } = fixture();
        let transition = negotiation.abandon(a, Utc::now()).unwrap();
        assert_eq!(transition.kind, TransitionKind::Abandoned);
        assert_eq!(negotiation.session().status, SessionStatus::Abandoned);

        assert!(negotiation.abandon(b, Utc::now()).is_err());
        assert!(negotiation
            .apply(b, ParticipantUpdate::confirm(), Utc::now())
            .is_err());
    }

    #[test]
    fn test_presence_does_not_touch_negotiation_state() {
        let Fixture {
            mut negotiation, a, ..
        } = fixture();
        negotiation.set_online(a, true).unwrap();
        let participant = negotiation.participant(a).unwrap();
        assert!(participant.is_online);
        assert_eq!(participant.status, ParticipantStatus::Adjusting);
        assert_eq!(participant.current_percentage, 40.0);
    }

    #[test]
    fn test_random_sequences_keep_sum_and_lock_rule() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let Fixture {
                mut negotiation,
                a,
                b,
                c,
            } = fixture();
            let users = [a, b, c];
            let mut expected: BTreeMap<Uuid, f64> =
                [(a, 40.0), (b, 35.0), (c, 25.0)].into_iter().collect();

            for _ in 0..30 {
                let user = users[rng.gen_range(0..users.len())];
                let update = match rng.gen_range(0..3) {
                    0 => ParticipantUpdate::percentage(rng.gen_range(1..=60) as f64),
                    1 => ParticipantUpdate::confirm(),
                    _ => ParticipantUpdate::set_and_confirm(rng.gen_range(1..=60) as f64),
                };

                let applied = match negotiation.apply(user, update, Utc::now()) {
                    Ok(applied) => applied,
                    Err(Error::Conflict(_)) => break,
                    Err(e) => panic!("unexpected error: {e}"),
                };
                if let Some(value) = update.percentage {
                    expected.insert(user, value);
                }

                let expected_sum: f64 = expected.values().sum();
                assert!((negotiation.total_percentage() - expected_sum).abs() < 1e-9);

                let should_lock = negotiation
                    .participants()
                    .iter()
                    .all(|p| p.status == ParticipantStatus::Confirmed)
                    && (expected_sum - 100.0).abs() <= 0.01;
                assert_eq!(applied.locked(), should_lock);
                if applied.locked() {
                    break;
                }
            }
        }
    }
}
