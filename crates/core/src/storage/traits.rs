//! Storage repository traits
//!
//! These traits define the storage interface used by the coordinator,
//! allowing for different implementations (SQLite, mock).

use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AuthToken, Calculation, Group, GroupMember, LockedDistribution, MemberIntention,
    NegotiationSession, SessionParticipant, Transition, User,
};

/// User and token operations (stand-in for the external auth provider)
pub trait UserRepository {
    /// Create a new user
    fn create_user(&self, user: &User) -> Result<()>;

    /// Find user by ID
    fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Store a bearer token
    fn issue_token(&self, token: &AuthToken) -> Result<()>;

    /// Resolve a non-expired bearer token
    fn find_valid_token(&self, token: &str) -> Result<Option<AuthToken>>;
}

/// Group membership lookups
pub trait GroupRepository {
    /// Create a new group
    fn create_group(&self, group: &Group) -> Result<()>;

    /// Find group by ID
    fn find_group_by_id(&self, id: Uuid) -> Result<Option<Group>>;

    /// Add a membership
    fn add_group_member(&self, member: &GroupMember) -> Result<()>;

    /// Get a membership in any status
    fn get_group_membership(&self, user_id: Uuid, group_id: Uuid) -> Result<Option<GroupMember>>;

    /// List the group's active members
    fn list_active_members(&self, group_id: Uuid) -> Result<Vec<GroupMember>>;
}

/// Calculation operations
pub trait CalculationRepository {
    /// Create a calculation
    fn create_calculation(&self, calculation: &Calculation) -> Result<()>;

    /// Find calculation by ID
    fn find_calculation_by_id(&self, id: Uuid) -> Result<Option<Calculation>>;

    /// Find the calculation for a (group, property) pair
    fn find_calculation_for(&self, group_id: Uuid, property_id: Uuid)
        -> Result<Option<Calculation>>;
}

/// Member intention operations
pub trait IntentionRepository {
    /// Insert or supersede a member's intention
    fn upsert_intention(&self, intention: &MemberIntention) -> Result<()>;

    /// Find one member's intention
    fn find_intention(&self, calculation_id: Uuid, user_id: Uuid)
        -> Result<Option<MemberIntention>>;

    /// List recorded intentions for a calculation
    fn list_intentions(&self, calculation_id: Uuid) -> Result<Vec<MemberIntention>>;
}

/// Negotiation session operations
pub trait NegotiationRepository {
    /// Create a session
    fn create_session(&self, session: &NegotiationSession) -> Result<()>;

    /// Find session by ID
    fn find_session_by_id(&self, id: Uuid) -> Result<Option<NegotiationSession>>;

    /// Find the active or completed session for a calculation
    fn find_live_session(&self, calculation_id: Uuid) -> Result<Option<NegotiationSession>>;

    /// Persist status and lock stamp
    fn update_session_status(&self, session: &NegotiationSession) -> Result<()>;

    /// Insert participant rows
    fn insert_participants(&self, participants: &[SessionParticipant]) -> Result<()>;

    /// List participants of a session
    fn list_participants(&self, session_id: Uuid) -> Result<Vec<SessionParticipant>>;

    /// Count participants of a session
    fn count_participants(&self, session_id: Uuid) -> Result<u64>;

    /// Persist a participant's percentage and status
    fn update_participant(&self, participant: &SessionParticipant) -> Result<()>;

    /// Persist presence. Returns false if the user is not a participant.
    fn set_participant_online(&self, session_id: Uuid, user_id: Uuid, is_online: bool)
        -> Result<bool>;

    /// Persist the final distribution
    fn save_distribution(&self, distribution: &LockedDistribution) -> Result<()>;

    /// Load the final distribution
    fn find_distribution(&self, session_id: Uuid) -> Result<Option<LockedDistribution>>;

    /// Append to the transition log
    fn append_transition(&self, transition: &Transition) -> Result<u64>;

    /// Read the transition log
    fn list_transitions(&self, session_id: Uuid) -> Result<Vec<Transition>>;
}

/// Run a closure as one atomic unit of work
pub trait Transactional {
    /// Commit if the closure succeeds, roll back otherwise
    fn atomically<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>;
}

/// Combined storage interface
///
/// Provides access to all repository operations.
/// Implementations may be backed by SQLite or mocks.
pub trait Storage:
    UserRepository
    + GroupRepository
    + CalculationRepository
    + IntentionRepository
    + NegotiationRepository
    + Transactional
{
}

// Blanket implementation: any type implementing all traits implements Storage
impl<T> Storage for T where
    T: UserRepository
        + GroupRepository
        + CalculationRepository
        + IntentionRepository
        + NegotiationRepository
        + Transactional
{
}
