//! SQLite storage layer for Cohome

mod calculations;
mod groups;
mod intentions;
mod migrations;
mod negotiations;
mod parse;
mod traits;
mod users;

use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AuthToken, Calculation, Group, GroupMember, LockedDistribution, MemberIntention,
    NegotiationSession, SessionParticipant, Transition, User,
};
use rusqlite::Connection;
use std::path::Path;
use tracing::instrument;

pub use calculations::CalculationStore;
pub use groups::GroupStore;
pub use intentions::IntentionStore;
pub use negotiations::NegotiationStore;
pub use traits::{
    CalculationRepository, GroupRepository, IntentionRepository, NegotiationRepository, Storage,
    Transactional, UserRepository,
};
pub use users::UserStore;

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initialize database schema via migrations
    fn init(&self) -> Result<()> {
        migrations::run_migrations(&self.conn)?;
        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> u32 {
        self.conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap_or(0)
    }

    /// Get user store
    pub fn users(&self) -> UserStore<'_> {
        UserStore::new(&self.conn)
    }

    /// Get group store
    pub fn groups(&self) -> GroupStore<'_> {
        GroupStore::new(&self.conn)
    }

    /// Get calculation store
    pub fn calculations(&self) -> CalculationStore<'_> {
        CalculationStore::new(&self.conn)
    }

    /// Get intention store
    pub fn intentions(&self) -> IntentionStore<'_> {
        IntentionStore::new(&self.conn)
    }

    /// Get negotiation store
    pub fn negotiations(&self) -> NegotiationStore<'_> {
        NegotiationStore::new(&self.conn)
    }
}

// Implement repository traits for Database
// This enables using Database through the trait interface

impl UserRepository for Database {
    fn create_user(&self, user: &User) -> Result<()> {
        self.users().create(user)
    }

    fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.users().find_by_id(id)
    }

    fn issue_token(&self, token: &AuthToken) -> Result<()> {
        self.users().issue_token(token)
    }

    fn find_valid_token(&self, token: &str) -> Result<Option<AuthToken>> {
        self.users().find_valid_token(token)
    }
}

impl GroupRepository for Database {
    fn create_group(&self, group: &Group) -> Result<()> {
        self.groups().create(group)
    }

    fn find_group_by_id(&self, id: Uuid) -> Result<Option<Group>> {
        self.groups().find_by_id(id)
    }

    fn add_group_member(&self, member: &GroupMember) -> Result<()> {
        self.groups().add_member(member)
    }

    fn get_group_membership(&self, user_id: Uuid, group_id: Uuid) -> Result<Option<GroupMember>> {
        self.groups().get_membership(user_id, group_id)
    }

    fn list_active_members(&self, group_id: Uuid) -> Result<Vec<GroupMember>> {
        self.groups().list_active_members(group_id)
    }
}

impl CalculationRepository for Database {
    fn create_calculation(&self, calculation: &Calculation) -> Result<()> {
        self.calculations().create(calculation)
    }

    fn find_calculation_by_id(&self, id: Uuid) -> Result<Option<Calculation>> {
        self.calculations().find_by_id(id)
    }

    fn find_calculation_for(
        &self,
        group_id: Uuid,
        property_id: Uuid,
    ) -> Result<Option<Calculation>> {
        self.calculations().find_for(group_id, property_id)
    }
}

impl IntentionRepository for Database {
    fn upsert_intention(&self, intention: &MemberIntention) -> Result<()> {
        self.intentions().upsert(intention)
    }

    fn find_intention(
        &self,
        calculation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<MemberIntention>> {
        self.intentions().find(calculation_id, user_id)
    }

    fn list_intentions(&self, calculation_id: Uuid) -> Result<Vec<MemberIntention>> {
        self.intentions().list_for_calculation(calculation_id)
    }
}

impl NegotiationRepository for Database {
    fn create_session(&self, session: &NegotiationSession) -> Result<()> {
        self.negotiations().create_session(session)
    }

    fn find_session_by_id(&self, id: Uuid) -> Result<Option<NegotiationSession>> {
        self.negotiations().find_session(id)
    }

    fn find_live_session(&self, calculation_id: Uuid) -> Result<Option<NegotiationSession>> {
        self.negotiations().find_live_session(calculation_id)
    }

    fn update_session_status(&self, session: &NegotiationSession) -> Result<()> {
        self.negotiations().update_session_status(session)
    }

    fn insert_participants(&self, participants: &[SessionParticipant]) -> Result<()> {
        self.negotiations().insert_participants(participants)
    }

    fn list_participants(&self, session_id: Uuid) -> Result<Vec<SessionParticipant>> {
        self.negotiations().list_participants(session_id)
    }

    fn count_participants(&self, session_id: Uuid) -> Result<u64> {
        self.negotiations().count_participants(session_id)
    }

    fn update_participant(&self, participant: &SessionParticipant) -> Result<()> {
        self.negotiations().update_participant(participant)
    }

    fn set_participant_online(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        is_online: bool,
    ) -> Result<bool> {
        self.negotiations()
            .set_participant_online(session_id, user_id, is_online)
    }

    fn save_distribution(&self, distribution: &LockedDistribution) -> Result<()> {
        self.negotiations().save_distribution(distribution)
    }

    fn find_distribution(&self, session_id: Uuid) -> Result<Option<LockedDistribution>> {
        self.negotiations().find_distribution(session_id)
    }

    fn append_transition(&self, transition: &Transition) -> Result<u64> {
        self.negotiations().append_transition(transition)
    }

    fn list_transitions(&self, session_id: Uuid) -> Result<Vec<Transition>> {
        self.negotiations().list_transitions(session_id)
    }
}

impl Transactional for Database {
    fn atomically<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        // Statements issued through `self.conn` inside `f` run on this transaction;
        // dropping it on the error path rolls back.
        let tx = self.conn.unchecked_transaction()?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }
}
