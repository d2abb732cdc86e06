//! Push channel message types
//!
//! Every message is one JSON object tagged by `type`, delivered as a single
//! server-sent event.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use cohome_core::ParticipantStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one open push channel (one browser tab)
pub type ConnectionId = Uuid;

/// Server-to-client push messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum PushMessage {
    /// Acknowledges a freshly opened channel
    Connected {
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Full presence snapshot, sent on every (re)connect
    OnlineUsers {
        users: Vec<Uuid>,
        timestamp: DateTime<Utc>,
    },

    UserJoined {
        user_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        socket_id: Option<ConnectionId>,
        timestamp: DateTime<Utc>,
    },

    UserLeft {
        user_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        socket_id: Option<ConnectionId>,
        timestamp: DateTime<Utc>,
    },

    PercentageUpdate {
        user_id: Uuid,
        percentage: f64,
        status: ParticipantStatus,
        timestamp: DateTime<Utc>,
    },

    StatusChange {
        user_id: Uuid,
        status: ParticipantStatus,
        timestamp: DateTime<Utc>,
    },

    /// The session locked; carries the final distribution
    NegotiationCompleted {
        session_id: Uuid,
        locked_at: DateTime<Utc>,
        distribution: BTreeMap<Uuid, f64>,
        timestamp: DateTime<Utc>,
    },

    NegotiationAbandoned {
        session_id: Uuid,
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    Heartbeat {
        timestamp: DateTime<Utc>,
    },
}

impl PushMessage {
    pub fn connected(user_id: Uuid) -> Self {
        PushMessage::Connected {
            user_id,
            timestamp: Utc::now(),
        }
    }

    pub fn online_users(users: BTreeSet<Uuid>) -> Self {
        PushMessage::OnlineUsers {
            users: users.into_iter().collect(),
            timestamp: Utc::now(),
        }
    }

    pub fn user_joined(user_id: Uuid, socket_id: ConnectionId) -> Self {
        PushMessage::UserJoined {
            user_id,
            socket_id: Some(socket_id),
            timestamp: Utc::now(),
        }
    }

    pub fn user_left(user_id: Uuid, socket_id: ConnectionId) -> Self {
        PushMessage::UserLeft {
            user_id,
            socket_id: Some(socket_id),
            timestamp: Utc::now(),
        }
    }

    pub fn percentage_update(user_id: Uuid, percentage: f64, status: ParticipantStatus) -> Self {
        PushMessage::PercentageUpdate {
            user_id,
            percentage,
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn status_change(user_id: Uuid, status: ParticipantStatus) -> Self {
        PushMessage::StatusChange {
            user_id,
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn negotiation_completed(
        session_id: Uuid,
        locked_at: DateTime<Utc>,
        distribution: BTreeMap<Uuid, f64>,
    ) -> Self {
        PushMessage::NegotiationCompleted {
            session_id,
            locked_at,
            distribution,
            timestamp: Utc::now(),
        }
    }

    pub fn negotiation_abandoned(session_id: Uuid, user_id: Uuid) -> Self {
        PushMessage::NegotiationAbandoned {
            session_id,
            user_id,
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat() -> Self {
        PushMessage::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    /// Wire name carried in the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::Connected { .. } => "connected",
            PushMessage::OnlineUsers { .. } => "online-users",
            PushMessage::UserJoined { .. } => "user-joined",
            PushMessage::UserLeft { .. } => "user-left",
            PushMessage::PercentageUpdate { .. } => "percentage-update",
            PushMessage::StatusChange { .. } => "status-change",
            PushMessage::NegotiationCompleted { .. } => "negotiation-completed",
            PushMessage::NegotiationAbandoned { .. } => "negotiation-abandoned",
            PushMessage::Heartbeat { .. } => "heartbeat",
        }
    }

    /// Serialize message to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize message from a JSON string
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_wire_shape() {
        let user = Uuid::new_v4();
        let msg = PushMessage::percentage_update(user, 36.0, ParticipantStatus::Adjusting);
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "percentage-update");
        assert_eq!(value["userId"], user.to_string());
        assert_eq!(value["percentage"], 36.0);
        assert_eq!(value["status"], "adjusting");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_kind_matches_tag() {
        let samples = [
            PushMessage::connected(Uuid::new_v4()),
            PushMessage::online_users(BTreeSet::new()),
            PushMessage::user_joined(Uuid::new_v4(), Uuid::new_v4()),
            PushMessage::user_left(Uuid::new_v4(), Uuid::new_v4()),
            PushMessage::status_change(Uuid::new_v4(), ParticipantStatus::Confirmed),
            PushMessage::negotiation_completed(Uuid::new_v4(), Utc::now(), BTreeMap::new()),
            PushMessage::negotiation_abandoned(Uuid::new_v4(), Uuid::new_v4()),
            PushMessage::heartbeat(),
        ];
        for msg in samples {
            let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
            assert_eq!(value["type"], msg.kind());
        }
    }

    #[test]
    fn test_presence_carries_socket_id() {
        let socket = Uuid::new_v4();
        let msg = PushMessage::user_left(Uuid::new_v4(), socket);
        let decoded = PushMessage::from_json(&msg.to_json().unwrap()).unwrap();
        match decoded {
            PushMessage::UserLeft { socket_id, .. } => assert_eq!(socket_id, Some(socket)),
            other => panic!("Wrong message type: {}", other.kind()),
        }
    }
}
