//! Negotiation session storage: sessions, participants, locked distributions,
//! and the transition log

use std::collections::BTreeMap;

use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{
    parse_datetime, parse_datetime_opt, parse_participant_status, parse_participant_status_opt,
    parse_session_status, parse_transition_kind, parse_uuid, OptionalExt,
};
use crate::error::Result;
use crate::models::{
    LockedDistribution, NegotiationSession, SessionParticipant, Transition,
};

const SESSION_COLUMNS: &str = "id, calculation_id, status, locked_at, created_by, created_at";

pub struct NegotiationStore<'a> {
    conn: &'a Connection,
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<NegotiationSession> {
    Ok(NegotiationSession {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        calculation_id: parse_uuid(&row.get::<_, String>(1)?)?,
        status: parse_session_status(&row.get::<_, String>(2)?)?,
        locked_at: parse_datetime_opt(row.get::<_, Option<String>>(3)?)?,
        created_by: parse_uuid(&row.get::<_, String>(4)?)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?)?,
    })
}

fn row_to_participant(row: &Row<'_>) -> rusqlite::Result<SessionParticipant> {
    Ok(SessionParticipant {
        session_id: parse_uuid(&row.get::<_, String>(0)?)?,
        user_id: parse_uuid(&row.get::<_, String>(1)?)?,
        current_percentage: row.get(2)?,
        status: parse_participant_status(&row.get::<_, String>(3)?)?,
        is_online: row.get::<_, i32>(4)? != 0,
        last_updated_at: parse_datetime(&row.get::<_, String>(5)?)?,
    })
}

impl<'a> NegotiationStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a session
    #[instrument(skip(self, session), fields(session_id = %session.id, calculation_id = %session.calculation_id))]
    pub fn create_session(&self, session: &NegotiationSession) -> Result<()> {
        self.conn.execute(
            "INSERT INTO negotiation_sessions (id, calculation_id, status, locked_at, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id.to_string(),
                session.calculation_id.to_string(),
                session.status.as_str(),
                session.locked_at.map(|t| t.to_rfc3339()),
                session.created_by.to_string(),
                session.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find session by ID
    #[instrument(skip(self))]
    pub fn find_session(&self, id: Uuid) -> Result<Option<NegotiationSession>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM negotiation_sessions WHERE id = ?1");
        let session = self
            .conn
            .query_row(&sql, params![id.to_string()], row_to_session)
            .optional()?;
        Ok(session)
    }

    /// Find the active or completed session for a calculation
    #[instrument(skip(self))]
    pub fn find_live_session(&self, calculation_id: Uuid) -> Result<Option<NegotiationSession>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM negotiation_sessions
             WHERE calculation_id = ?1 AND status != 'abandoned'"
        );
        let session = self
            .conn
            .query_row(&sql, params![calculation_id.to_string()], row_to_session)
            .optional()?;
        Ok(session)
    }

    /// Persist a session's status and lock stamp
    #[instrument(skip(self, session), fields(session_id = %session.id, status = session.status.as_str()))]
    pub fn update_session_status(&self, session: &NegotiationSession) -> Result<()> {
        self.conn.execute(
            "UPDATE negotiation_sessions SET status = ?1, locked_at = ?2 WHERE id = ?3",
            params![
                session.status.as_str(),
                session.locked_at.map(|t| t.to_rfc3339()),
                session.id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Insert participant rows
    #[instrument(skip(self, participants), fields(count = participants.len()))]
    pub fn insert_participants(&self, participants: &[SessionParticipant]) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO session_participants
                (session_id, user_id, current_percentage, status, is_online, last_updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for p in participants {
            stmt.execute(params![
                p.session_id.to_string(),
                p.user_id.to_string(),
                p.current_percentage,
                p.status.as_str(),
                p.is_online as i32,
                p.last_updated_at.to_rfc3339(),
            ])?;
        }
        Ok(())
    }

    /// List participants in seeding order
    #[instrument(skip(self))]
    pub fn list_participants(&self, session_id: Uuid) -> Result<Vec<SessionParticipant>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, user_id, current_percentage, status, is_online, last_updated_at
             FROM session_participants WHERE session_id = ?1
             ORDER BY rowid",
        )?;

        let participants = stmt
            .query_map(params![session_id.to_string()], row_to_participant)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(participants)
    }

    /// Count participants for a session
    pub fn count_participants(&self, session_id: Uuid) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM session_participants WHERE session_id = ?1",
            params![session_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Persist a participant's percentage and status
    #[instrument(skip(self, participant), fields(session_id = %participant.session_id, user_id = %participant.user_id))]
    pub fn update_participant(&self, participant: &SessionParticipant) -> Result<()> {
        self.conn.execute(
            "UPDATE session_participants
             SET current_percentage = ?1, status = ?2, last_updated_at = ?3
             WHERE session_id = ?4 AND user_id = ?5",
            params![
                participant.current_percentage,
                participant.status.as_str(),
                participant.last_updated_at.to_rfc3339(),
                participant.session_id.to_string(),
                participant.user_id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Update presence only. Returns false if the user is not a participant.
    #[instrument(skip(self))]
    pub fn set_participant_online(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        is_online: bool,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE session_participants SET is_online = ?1 WHERE session_id = ?2 AND user_id = ?3",
            params![is_online as i32, session_id.to_string(), user_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Persist the final distribution
    #[instrument(skip(self, distribution), fields(session_id = %distribution.session_id))]
    pub fn save_distribution(&self, distribution: &LockedDistribution) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO locked_distributions (session_id, user_id, percentage, locked_at)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (user_id, percentage) in &distribution.shares {
            stmt.execute(params![
                distribution.session_id.to_string(),
                user_id.to_string(),
                percentage,
                distribution.locked_at.to_rfc3339(),
            ])?;
        }
        Ok(())
    }

    /// Load the final distribution, if the session locked
    #[instrument(skip(self))]
    pub fn find_distribution(&self, session_id: Uuid) -> Result<Option<LockedDistribution>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, percentage, locked_at FROM locked_distributions WHERE session_id = ?1",
        )?;

        let rows = stmt
            .query_map(params![session_id.to_string()], |row| {
                Ok((
                    parse_uuid(&row.get::<_, String>(0)?)?,
                    row.get::<_, f64>(1)?,
                    parse_datetime(&row.get::<_, String>(2)?)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let Some(locked_at) = rows.first().map(|(_, _, at)| *at) else {
            return Ok(None);
        };
        let shares = rows
            .into_iter()
            .map(|(user_id, pct, _)| (user_id, pct))
            .collect::<BTreeMap<_, _>>();

        Ok(Some(LockedDistribution {
            session_id,
            locked_at,
            shares,
        }))
    }

    /// Append to the transition log, returning the assigned sequence number
    #[instrument(skip(self, transition), fields(session_id = %transition.session_id, kind = transition.kind.as_str()))]
    pub fn append_transition(&self, transition: &Transition) -> Result<u64> {
        let next: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM session_transitions WHERE session_id = ?1",
            params![transition.session_id.to_string()],
            |row| row.get(0),
        )?;

        self.conn.execute(
            "INSERT INTO session_transitions (session_id, sequence, user_id, kind, percentage, status, at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                transition.session_id.to_string(),
                next,
                transition.user_id.to_string(),
                transition.kind.as_str(),
                transition.percentage,
                transition.status.map(|s| s.as_str()),
                transition.at.to_rfc3339(),
            ],
        )?;
        Ok(next as u64)
    }

    /// List the transition log in order
    #[instrument(skip(self))]
    pub fn list_transitions(&self, session_id: Uuid) -> Result<Vec<Transition>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, sequence, user_id, kind, percentage, status, at
             FROM session_transitions WHERE session_id = ?1
             ORDER BY sequence",
        )?;

        let transitions = stmt
            .query_map(params![session_id.to_string()], |row| {
                Ok(Transition {
                    session_id: parse_uuid(&row.get::<_, String>(0)?)?,
                    sequence: row.get::<_, i64>(1)? as u64,
                    user_id: parse_uuid(&row.get::<_, String>(2)?)?,
                    kind: parse_transition_kind(&row.get::<_, String>(3)?)?,
                    percentage: row.get(4)?,
                    status: parse_participant_status_opt(row.get::<_, Option<String>>(5)?)?,
                    at: parse_datetime(&row.get::<_, String>(6)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transitions)
    }
}
