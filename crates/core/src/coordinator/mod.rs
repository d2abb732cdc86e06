//! Intention & calculation coordinator
//!
//! Bridges the pre-negotiation intention round into a live session and
//! drives every persisted negotiation mutation. Multi-step operations run
//! inside [`Transactional::atomically`](crate::storage::Transactional::atomically);
//! a caller holding the store exclusively therefore serializes updates per session.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::invariants::{assert_distribution_invariants, assert_intention_invariants};
use crate::models::{
    Calculation, CostBaseline, GroupMember, IntentionStatus, IntentionView, MemberIntention,
    NegotiationSession, ParticipantUpdate, SessionParticipant, SessionStatus, Transition,
};
use crate::negotiation::{validate_intention, Applied, Negotiation, NegotiationPolicy, SessionSnapshot};
use crate::permissions::{GroupAction, PermissionMatrix};
use crate::storage::{GroupRepository, Storage};

/// Result of a persisted participant update
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// Session and participants after the update
    pub snapshot: SessionSnapshot,
    /// What the state machine did, with storage-assigned sequences
    pub applied: Applied,
}

/// Whether a (group, property) negotiation has locked
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStatus {
    pub is_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<BTreeMap<Uuid, f64>>,
}

/// One row per active member, `unset` where nothing was recorded yet
pub fn merge_intentions(
    members: &[GroupMember],
    intentions: &[MemberIntention],
) -> Vec<IntentionView> {
    members
        .iter()
        .filter(|m| m.is_active())
        .map(|m| {
            intentions
                .iter()
                .find(|i| i.user_id == m.user_id)
                .map(IntentionView::from)
                .unwrap_or_else(|| IntentionView::unset(m.user_id))
        })
        .collect()
}

/// True once every member row carries recorded intentions
pub fn intentions_complete(views: &[IntentionView]) -> bool {
    !views.is_empty() && views.iter().all(|v| v.status == IntentionStatus::IntentionsSet)
}

/// Resolve an active membership allowed to perform `action`
fn require_member<S: GroupRepository + ?Sized>(
    store: &S,
    user_id: Uuid,
    group_id: Uuid,
    action: GroupAction,
) -> Result<GroupMember> {
    let member = store
        .get_group_membership(user_id, group_id)?
        .ok_or_else(|| {
            Error::Forbidden(format!("user {} is not a member of group {}", user_id, group_id))
        })?;

    if !PermissionMatrix::can_perform(member.status, action) {
        return Err(Error::Forbidden(format!(
            "user {} may not {:?} in group {}",
            user_id, action, group_id
        )));
    }
    Ok(member)
}

pub struct Coordinator<'a, S: Storage> {
    store: &'a S,
    policy: NegotiationPolicy,
}

impl<'a, S: Storage> Coordinator<'a, S> {
    pub fn new(store: &'a S, policy: NegotiationPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> NegotiationPolicy {
        self.policy
    }

    fn calculation(&self, calculation_id: Uuid) -> Result<Calculation> {
        self.store
            .find_calculation_by_id(calculation_id)?
            .ok_or_else(|| Error::NotFound(format!("calculation {}", calculation_id)))
    }

    fn load(store: &S, session_id: Uuid, policy: NegotiationPolicy) -> Result<Negotiation> {
        let session = store
            .find_session_by_id(session_id)?
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;
        let participants = store.list_participants(session_id)?;
        Ok(Negotiation::new(session, participants, policy))
    }

    /// Participants always see their session; other active members may too
    fn require_viewer(&self, negotiation: &Negotiation, user_id: Uuid) -> Result<()> {
        if negotiation.is_participant(user_id) {
            return Ok(());
        }
        let calculation = self.calculation(negotiation.session().calculation_id)?;
        require_member(
            self.store,
            user_id,
            calculation.group_id,
            GroupAction::ViewNegotiation,
        )?;
        Ok(())
    }

    fn snapshot(&self, negotiation: &Negotiation) -> Result<SessionSnapshot> {
        let intentions = self
            .store
            .list_intentions(negotiation.session().calculation_id)?;
        Ok(negotiation.snapshot(&intentions))
    }

    /// Return the calculation for (group, property), creating it on first access
    #[instrument(skip(self, costs))]
    pub fn get_or_create_calculation(
        &self,
        group_id: Uuid,
        property_id: Uuid,
        requester: Uuid,
        costs: Option<CostBaseline>,
    ) -> Result<Calculation> {
        if self.store.find_group_by_id(group_id)?.is_none() {
            return Err(Error::NotFound(format!("group {}", group_id)));
        }
        require_member(self.store, requester, group_id, GroupAction::OpenCalculation)?;

        self.store.atomically(|store| {
            if let Some(existing) = store.find_calculation_for(group_id, property_id)? {
                return Ok(existing);
            }
            let calculation =
                Calculation::new(group_id, property_id, requester, costs.unwrap_or_default());
            store.create_calculation(&calculation)?;
            info!(calculation_id = %calculation.id, "Calculation created");
            Ok(calculation)
        })
    }

    /// Record or supersede the caller's own intention
    #[instrument(skip(self))]
    pub fn set_intentions(
        &self,
        calculation_id: Uuid,
        user_id: Uuid,
        desired: f64,
        max: f64,
    ) -> Result<MemberIntention> {
        validate_intention(desired, max)?;
        let calculation = self.calculation(calculation_id)?;
        require_member(
            self.store,
            user_id,
            calculation.group_id,
            GroupAction::SetOwnIntentions,
        )?;

        self.store.atomically(|store| {
            if let Some(session) = store.find_live_session(calculation_id)? {
                if session.status == SessionStatus::Completed {
                    return Err(Error::Conflict(format!(
                        "calculation {} is locked",
                        calculation_id
                    )));
                }
            }

            let intention = MemberIntention::new(calculation_id, user_id, desired, max);
            assert_intention_invariants(&intention);
            store.upsert_intention(&intention)?;
            store
                .find_intention(calculation_id, user_id)?
                .ok_or_else(|| Error::NotFound(format!("intention for {}", user_id)))
        })
    }

    /// One row per active member of the calculation's group
    #[instrument(skip(self))]
    pub fn get_intentions(&self, calculation_id: Uuid, requester: Uuid) -> Result<Vec<IntentionView>> {
        let calculation = self.calculation(calculation_id)?;
        require_member(
            self.store,
            requester,
            calculation.group_id,
            GroupAction::ViewIntentions,
        )?;

        let members = self.store.list_active_members(calculation.group_id)?;
        let intentions = self.store.list_intentions(calculation_id)?;
        Ok(merge_intentions(&members, &intentions))
    }

    /// Return the live session for a calculation, creating and seeding it
    /// once every active member has set intentions.
    #[instrument(skip(self))]
    pub fn get_or_create_negotiation_session(
        &self,
        calculation_id: Uuid,
        creator: Uuid,
    ) -> Result<NegotiationSession> {
        let calculation = self.calculation(calculation_id)?;
        require_member(
            self.store,
            creator,
            calculation.group_id,
            GroupAction::StartNegotiation,
        )?;

        self.store.atomically(|store| {
            if let Some(existing) = store.find_live_session(calculation_id)? {
                debug!(session_id = %existing.id, "Reusing live session");
                return Ok(existing);
            }

            let members = store.list_active_members(calculation.group_id)?;
            let intentions = store.list_intentions(calculation_id)?;
            let views = merge_intentions(&members, &intentions);
            if !intentions_complete(&views) {
                let missing = views
                    .iter()
                    .filter(|v| v.status == IntentionStatus::Unset)
                    .count();
                return Err(Error::IntentionsIncomplete(format!(
                    "{} of {} members have not set intentions",
                    missing,
                    views.len()
                )));
            }

            // Seed from active members only, in membership order
            let seed: Vec<MemberIntention> = members
                .iter()
                .filter_map(|m| intentions.iter().find(|i| i.user_id == m.user_id).cloned())
                .collect();

            let session = NegotiationSession::new(calculation_id, creator);
            store.create_session(&session)?;
            Self::seed_participants(store, session.id, &seed)?;
            info!(
                session_id = %session.id,
                participants = seed.len(),
                "Negotiation session created"
            );
            Ok(session)
        })
    }

    /// Seed one participant per intention; a no-op once participants exist
    #[instrument(skip(self, intentions))]
    pub fn initialize_session_participants(
        &self,
        session_id: Uuid,
        intentions: &[MemberIntention],
    ) -> Result<Vec<SessionParticipant>> {
        if self.store.find_session_by_id(session_id)?.is_none() {
            return Err(Error::NotFound(format!("session {}", session_id)));
        }
        self.store
            .atomically(|store| Self::seed_participants(store, session_id, intentions))
    }

    fn seed_participants(
        store: &S,
        session_id: Uuid,
        intentions: &[MemberIntention],
    ) -> Result<Vec<SessionParticipant>> {
        if store.count_participants(session_id)? > 0 {
            return store.list_participants(session_id);
        }
        if let Some(unset) = intentions.iter().find(|i| !i.is_set()) {
            return Err(Error::IntentionsIncomplete(format!(
                "member {} has not set intentions",
                unset.user_id
            )));
        }

        let participants: Vec<SessionParticipant> = intentions
            .iter()
            .map(|i| SessionParticipant::seeded(session_id, i.user_id, i.desired_percentage))
            .collect();
        store.insert_participants(&participants)?;
        Ok(participants)
    }

    /// Open (or reuse) the calculation and its session in one call
    pub fn start_negotiation(
        &self,
        group_id: Uuid,
        property_id: Uuid,
        creator: Uuid,
        costs: Option<CostBaseline>,
    ) -> Result<(Calculation, NegotiationSession)> {
        let calculation = self.get_or_create_calculation(group_id, property_id, creator, costs)?;
        let session = self.get_or_create_negotiation_session(calculation.id, creator)?;
        Ok((calculation, session))
    }

    /// Apply a participant's own update and persist everything it caused
    #[instrument(skip(self))]
    pub fn update_participant(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        update: ParticipantUpdate,
    ) -> Result<UpdateOutcome> {
        let policy = self.policy;
        let (negotiation, applied) = self.store.atomically(|store| {
            let mut negotiation = Self::load(store, session_id, policy)?;
            let mut applied = negotiation.apply(user_id, update, Utc::now())?;

            store.update_participant(&applied.participant)?;
            for transition in applied.transitions.iter_mut() {
                transition.sequence = store.append_transition(transition)?;
            }
            if let Some(distribution) = &applied.distribution {
                assert_distribution_invariants(distribution, negotiation.participants());
                store.update_session_status(negotiation.session())?;
                store.save_distribution(distribution)?;
                info!(session_id = %session_id, "Negotiation locked");
            }
            Ok((negotiation, applied))
        })?;

        Ok(UpdateOutcome {
            snapshot: self.snapshot(&negotiation)?,
            applied,
        })
    }

    /// Persist connection-derived presence. Returns false for non-participants.
    pub fn set_online(&self, session_id: Uuid, user_id: Uuid, is_online: bool) -> Result<bool> {
        self.store.set_participant_online(session_id, user_id, is_online)
    }

    /// Current session plus participant snapshot
    #[instrument(skip(self))]
    pub fn get_session(&self, session_id: Uuid, requester: Uuid) -> Result<SessionSnapshot> {
        let negotiation = Self::load(self.store, session_id, self.policy)?;
        self.require_viewer(&negotiation, requester)?;
        self.snapshot(&negotiation)
    }

    /// Lock state for a (group, property) pair
    #[instrument(skip(self))]
    pub fn completion_status(
        &self,
        group_id: Uuid,
        property_id: Uuid,
        requester: Uuid,
    ) -> Result<CompletionStatus> {
        require_member(self.store, requester, group_id, GroupAction::ViewNegotiation)?;

        let Some(calculation) = self.store.find_calculation_for(group_id, property_id)? else {
            return Ok(CompletionStatus::default());
        };
        let Some(session) = self.store.find_live_session(calculation.id)? else {
            return Ok(CompletionStatus::default());
        };

        let distribution = self.store.find_distribution(session.id)?;
        Ok(CompletionStatus {
            is_completed: session.status == SessionStatus::Completed,
            session_id: Some(session.id),
            locked_at: session.locked_at,
            distribution: distribution.map(|d| d.shares),
        })
    }

    /// Terminate an active session without a distribution
    #[instrument(skip(self))]
    pub fn abandon_session(&self, session_id: Uuid, user_id: Uuid) -> Result<Transition> {
        let policy = self.policy;
        self.store.atomically(|store| {
            let mut negotiation = Self::load(store, session_id, policy)?;
            let mut transition = negotiation.abandon(user_id, Utc::now())?;
            store.update_session_status(negotiation.session())?;
            transition.sequence = store.append_transition(&transition)?;
            info!(session_id = %session_id, user_id = %user_id, "Negotiation abandoned");
            Ok(transition)
        })
    }

    /// Ordered transition log of a session
    pub fn session_history(&self, session_id: Uuid, requester: Uuid) -> Result<Vec<Transition>> {
        let negotiation = Self::load(self.store, session_id, self.policy)?;
        self.require_viewer(&negotiation, requester)?;
        self.store.list_transitions(session_id)
    }
}
