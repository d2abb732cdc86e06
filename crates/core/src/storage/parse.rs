//! Database value parsing utilities
//!
//! Provides error-safe parsing of stored values.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Error as SqlError;
use uuid::Uuid;

use crate::models::{
    GroupRole, IntentionStatus, MemberStatus, ParticipantStatus, SessionStatus, TransitionKind,
};

/// A stored enum column held a value this build does not know
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
struct UnknownValue {
    kind: &'static str,
    value: String,
}

fn unknown(kind: &'static str, value: &str) -> SqlError {
    SqlError::FromSqlConversionFailure(
        0,
        Type::Text,
        Box::new(UnknownValue {
            kind,
            value: value.to_string(),
        }),
    )
}

/// Parse a UUID from a database string column
pub fn parse_uuid(s: &str) -> Result<Uuid, SqlError> {
    Uuid::parse_str(s).map_err(|e| SqlError::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Parse a DateTime from an RFC3339 string
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SqlError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SqlError::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Parse an optional DateTime from an RFC3339 string
pub fn parse_datetime_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>, SqlError> {
    s.map(|s| parse_datetime(&s)).transpose()
}

/// Convert a u8 to GroupRole
pub fn role_from_u8(value: u8) -> GroupRole {
    match value {
        2 => GroupRole::Owner,
        _ => GroupRole::Member,
    }
}

pub fn parse_member_status(s: &str) -> Result<MemberStatus, SqlError> {
    match s {
        "pending" => Ok(MemberStatus::Pending),
        "active" => Ok(MemberStatus::Active),
        "left" => Ok(MemberStatus::Left),
        other => Err(unknown("member status", other)),
    }
}

pub fn parse_intention_status(s: &str) -> Result<IntentionStatus, SqlError> {
    match s {
        "unset" => Ok(IntentionStatus::Unset),
        "intentions_set" => Ok(IntentionStatus::IntentionsSet),
        other => Err(unknown("intention status", other)),
    }
}

pub fn parse_session_status(s: &str) -> Result<SessionStatus, SqlError> {
    match s {
        "active" => Ok(SessionStatus::Active),
        "completed" => Ok(SessionStatus::Completed),
        "abandoned" => Ok(SessionStatus::Abandoned),
        other => Err(unknown("session status", other)),
    }
}

pub fn parse_participant_status(s: &str) -> Result<ParticipantStatus, SqlError> {
    match s {
        "adjusting" => Ok(ParticipantStatus::Adjusting),
        "confirmed" => Ok(ParticipantStatus::Confirmed),
        other => Err(unknown("participant status", other)),
    }
}

pub fn parse_participant_status_opt(
    s: Option<String>,
) -> Result<Option<ParticipantStatus>, SqlError> {
    s.map(|s| parse_participant_status(&s)).transpose()
}

pub fn parse_transition_kind(s: &str) -> Result<TransitionKind, SqlError> {
    match s {
        "percentage_changed" => Ok(TransitionKind::PercentageChanged),
        "status_changed" => Ok(TransitionKind::StatusChanged),
        "confirmation_revoked" => Ok(TransitionKind::ConfirmationRevoked),
        "locked" => Ok(TransitionKind::Locked),
        "abandoned" => Ok(TransitionKind::Abandoned),
        other => Err(unknown("transition kind", other)),
    }
}

/// Extension trait for converting rusqlite Results to Option
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, SqlError>;
}

impl<T> OptionalExt<T> for Result<T, SqlError> {
    fn optional(self) -> Result<Option<T>, SqlError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(SqlError::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
