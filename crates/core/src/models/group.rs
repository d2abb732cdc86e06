//! Buying group and membership models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A set of users jointly pursuing a property purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(name: String, created_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            created_by,
            created_at: Utc::now(),
        }
    }
}

/// Group roles in priority order (highest to lowest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum GroupRole {
    /// Created the group
    Owner = 2,
    /// Regular co-buyer
    Member = 1,
}

impl GroupRole {
    pub fn display_name(&self) -> &'static str {
        match self {
            GroupRole::Owner => "Owner",
            GroupRole::Member => "Member",
        }
    }
}

impl std::fmt::Display for GroupRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Where a user stands in a group's membership lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    /// Requested to join, not yet accepted
    Pending,
    Active,
    Left,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Pending => "pending",
            MemberStatus::Active => "active",
            MemberStatus::Left => "left",
        }
    }
}

/// A user's membership in a group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub id: Uuid,
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub role: GroupRole,
    pub status: MemberStatus,
    pub joined_at: DateTime<Utc>,
}

impl GroupMember {
    pub fn new(group_id: Uuid, user_id: Uuid, role: GroupRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            user_id,
            role,
            status: MemberStatus::Active,
            joined_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}
