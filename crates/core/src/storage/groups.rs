//! Group and membership storage operations

use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_member_status, parse_uuid, role_from_u8, OptionalExt};
use crate::error::Result;
use crate::models::{Group, GroupMember, MemberStatus};

pub struct GroupStore<'a> {
    conn: &'a Connection,
}

impl<'a> GroupStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a new group
    #[instrument(skip(self, group), fields(group_id = %group.id))]
    pub fn create(&self, group: &Group) -> Result<()> {
        self.conn.execute(
            "INSERT INTO buying_groups (id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                group.id.to_string(),
                group.name,
                group.created_by.to_string(),
                group.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find group by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Group>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_by, created_at FROM buying_groups WHERE id = ?1")?;

        let group = stmt
            .query_row(params![id.to_string()], |row| {
                Ok(Group {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    name: row.get(1)?,
                    created_by: parse_uuid(&row.get::<_, String>(2)?)?,
                    created_at: parse_datetime(&row.get::<_, String>(3)?)?,
                })
            })
            .optional()?;

        Ok(group)
    }

    /// Add membership
    #[instrument(skip(self, member), fields(user_id = %member.user_id, group_id = %member.group_id, role = ?member.role))]
    pub fn add_member(&self, member: &GroupMember) -> Result<()> {
        self.conn.execute(
            "INSERT INTO group_members (id, group_id, user_id, role, status, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                member.id.to_string(),
                member.group_id.to_string(),
                member.user_id.to_string(),
                member.role as u8,
                member.status.as_str(),
                member.joined_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get membership regardless of status
    #[instrument(skip(self))]
    pub fn get_membership(&self, user_id: Uuid, group_id: Uuid) -> Result<Option<GroupMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, group_id, user_id, role, status, joined_at FROM group_members
             WHERE user_id = ?1 AND group_id = ?2",
        )?;

        let member = stmt
            .query_row(params![user_id.to_string(), group_id.to_string()], |row| {
                Ok(GroupMember {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    group_id: parse_uuid(&row.get::<_, String>(1)?)?,
                    user_id: parse_uuid(&row.get::<_, String>(2)?)?,
                    role: role_from_u8(row.get::<_, u8>(3)?),
                    status: parse_member_status(&row.get::<_, String>(4)?)?,
                    joined_at: parse_datetime(&row.get::<_, String>(5)?)?,
                })
            })
            .optional()?;

        Ok(member)
    }

    /// List active members, oldest first
    #[instrument(skip(self))]
    pub fn list_active_members(&self, group_id: Uuid) -> Result<Vec<GroupMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, group_id, user_id, role, status, joined_at FROM group_members
             WHERE group_id = ?1 AND status = 'active'
             ORDER BY joined_at, user_id",
        )?;

        let members = stmt
            .query_map(params![group_id.to_string()], |row| {
                Ok(GroupMember {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    group_id: parse_uuid(&row.get::<_, String>(1)?)?,
                    user_id: parse_uuid(&row.get::<_, String>(2)?)?,
                    role: role_from_u8(row.get::<_, u8>(3)?),
                    status: parse_member_status(&row.get::<_, String>(4)?)?,
                    joined_at: parse_datetime(&row.get::<_, String>(5)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(members)
    }

    /// Update membership status
    #[instrument(skip(self))]
    pub fn update_status(&self, user_id: Uuid, group_id: Uuid, status: MemberStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE group_members SET status = ?1 WHERE user_id = ?2 AND group_id = ?3",
            params![status.as_str(), user_id.to_string(), group_id.to_string()],
        )?;
        Ok(())
    }
}
