//! Negotiation session, participant, and transition log models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session-level state. `Completed` and `Abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != SessionStatus::Active
    }
}

/// A participant is either still moving their number or standing behind it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Adjusting,
    Confirmed,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Adjusting => "adjusting",
            ParticipantStatus::Confirmed => "confirmed",
        }
    }
}

/// Live negotiation tied 1:1 to a calculation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationSession {
    pub id: Uuid,
    pub calculation_id: Uuid,
    pub status: SessionStatus,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl NegotiationSession {
    pub fn new(calculation_id: Uuid, created_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            calculation_id,
            status: SessionStatus::Active,
            locked_at: None,
            created_by,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Per-member live state within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParticipant {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub current_percentage: f64,
    pub status: ParticipantStatus,
    pub is_online: bool,
    pub last_updated_at: DateTime<Utc>,
}

impl SessionParticipant {
    /// Seed a participant from their desired share
    pub fn seeded(session_id: Uuid, user_id: Uuid, desired_percentage: f64) -> Self {
        Self {
            session_id,
            user_id,
            current_percentage: desired_percentage,
            status: ParticipantStatus::Adjusting,
            is_online: false,
            last_updated_at: Utc::now(),
        }
    }
}

/// Fields a participant may change on their own record
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantUpdate {
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub status: Option<ParticipantStatus>,
}

impl ParticipantUpdate {
    pub fn percentage(value: f64) -> Self {
        Self {
            percentage: Some(value),
            status: None,
        }
    }

    pub fn confirm() -> Self {
        Self {
            percentage: None,
            status: Some(ParticipantStatus::Confirmed),
        }
    }

    pub fn set_and_confirm(value: f64) -> Self {
        Self {
            percentage: Some(value),
            status: Some(ParticipantStatus::Confirmed),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.percentage.is_none() && self.status.is_none()
    }
}

/// Final userId -> percentage map persisted when a session locks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedDistribution {
    pub session_id: Uuid,
    pub locked_at: DateTime<Utc>,
    pub shares: BTreeMap<Uuid, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    PercentageChanged,
    StatusChanged,
    ConfirmationRevoked,
    Locked,
    Abandoned,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::PercentageChanged => "percentage_changed",
            TransitionKind::StatusChanged => "status_changed",
            TransitionKind::ConfirmationRevoked => "confirmation_revoked",
            TransitionKind::Locked => "locked",
            TransitionKind::Abandoned => "abandoned",
        }
    }
}

/// One entry in a session's append-only transition log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub session_id: Uuid,
    /// Assigned by storage on append; zero until persisted
    pub sequence: u64,
    pub user_id: Uuid,
    pub kind: TransitionKind,
    pub percentage: Option<f64>,
    pub status: Option<ParticipantStatus>,
    pub at: DateTime<Utc>,
}

impl Transition {
    pub fn new(session_id: Uuid, user_id: Uuid, kind: TransitionKind, at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            sequence: 0,
            user_id,
            kind,
            percentage: None,
            status: None,
            at,
        }
    }

    pub fn with_percentage(mut self, percentage: f64) -> Self {
        self.percentage = Some(percentage);
        self
    }

    pub fn with_status(mut self, status: ParticipantStatus) -> Self {
        self.status = Some(status);
        self
    }
}
