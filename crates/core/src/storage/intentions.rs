//! Member intention storage operations

use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_intention_status, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::MemberIntention;

pub struct IntentionStore<'a> {
    conn: &'a Connection,
}

fn row_to_intention(row: &Row<'_>) -> rusqlite::Result<MemberIntention> {
    Ok(MemberIntention {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        calculation_id: parse_uuid(&row.get::<_, String>(1)?)?,
        user_id: parse_uuid(&row.get::<_, String>(2)?)?,
        desired_percentage: row.get(3)?,
        max_percentage: row.get(4)?,
        status: parse_intention_status(&row.get::<_, String>(5)?)?,
        updated_at: parse_datetime(&row.get::<_, String>(6)?)?,
    })
}

impl<'a> IntentionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert or supersede a member's intention (one row per calculation and user)
    #[instrument(skip(self, intention), fields(calculation_id = %intention.calculation_id, user_id = %intention.user_id))]
    pub fn upsert(&self, intention: &MemberIntention) -> Result<()> {
        self.conn.execute(
            "INSERT INTO member_intentions
                (id, calculation_id, user_id, desired_percentage, max_percentage, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(calculation_id, user_id) DO UPDATE SET
                desired_percentage = ?4, max_percentage = ?5, status = ?6, updated_at = ?7",
            params![
                intention.id.to_string(),
                intention.calculation_id.to_string(),
                intention.user_id.to_string(),
                intention.desired_percentage,
                intention.max_percentage,
                intention.status.as_str(),
                intention.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find one member's intention
    #[instrument(skip(self))]
    pub fn find(&self, calculation_id: Uuid, user_id: Uuid) -> Result<Option<MemberIntention>> {
        let intention = self
            .conn
            .query_row(
                "SELECT id, calculation_id, user_id, desired_percentage, max_percentage, status, updated_at
                 FROM member_intentions WHERE calculation_id = ?1 AND user_id = ?2",
                params![calculation_id.to_string(), user_id.to_string()],
                row_to_intention,
            )
            .optional()?;
        Ok(intention)
    }

    /// List all recorded intentions for a calculation
    #[instrument(skip(self))]
    pub fn list_for_calculation(&self, calculation_id: Uuid) -> Result<Vec<MemberIntention>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, calculation_id, user_id, desired_percentage, max_percentage, status, updated_at
             FROM member_intentions WHERE calculation_id = ?1
             ORDER BY updated_at",
        )?;

        let intentions = stmt
            .query_map(params![calculation_id.to_string()], row_to_intention)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(intentions)
    }
}
