//! Member intentions - desired/max ownership shares recorded before negotiation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentionStatus {
    Unset,
    IntentionsSet,
}

impl IntentionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentionStatus::Unset => "unset",
            IntentionStatus::IntentionsSet => "intentions_set",
        }
    }
}

/// One member's recorded intention for a calculation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberIntention {
    pub id: Uuid,
    pub calculation_id: Uuid,
    pub user_id: Uuid,
    pub desired_percentage: f64,
    pub max_percentage: f64,
    pub status: IntentionStatus,
    pub updated_at: DateTime<Utc>,
}

impl MemberIntention {
    pub fn new(calculation_id: Uuid, user_id: Uuid, desired: f64, max: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            calculation_id,
            user_id,
            desired_percentage: desired,
            max_percentage: max,
            status: IntentionStatus::IntentionsSet,
            updated_at: Utc::now(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.status == IntentionStatus::IntentionsSet
    }
}

/// Intention row as reported for every current member, recorded or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentionView {
    pub user_id: Uuid,
    pub desired_percentage: Option<f64>,
    pub max_percentage: Option<f64>,
    pub status: IntentionStatus,
}

impl IntentionView {
    pub fn unset(user_id: Uuid) -> Self {
        Self {
            user_id,
            desired_percentage: None,
            max_percentage: None,
            status: IntentionStatus::Unset,
        }
    }
}

impl From<&MemberIntention> for IntentionView {
    fn from(intention: &MemberIntention) -> Self {
        Self {
            user_id: intention.user_id,
            desired_percentage: Some(intention.desired_percentage),
            max_percentage: Some(intention.max_percentage),
            status: intention.status,
        }
    }
}
