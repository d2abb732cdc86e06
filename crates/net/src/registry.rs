//! Session registry
//!
//! Process-local directory of open push channels per negotiation session,
//! used only for fan-out. Nothing here is persisted: after a restart the
//! map is rebuilt as clients reconnect.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::{ConnectionId, PushMessage};

/// One registered push channel
#[derive(Debug, Clone)]
pub struct Channel {
    id: ConnectionId,
    user_id: Uuid,
    tx: mpsc::Sender<PushMessage>,
}

impl Channel {
    pub fn new(user_id: Uuid, tx: mpsc::Sender<PushMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            tx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Vec<Channel>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Vec<Channel>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Vec<Channel>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a channel. Returns true if it is the user's first channel
    /// in the session. Registering the same channel twice is a no-op.
    pub fn add_connection(&self, session_id: Uuid, channel: Channel) -> bool {
        let mut sessions = self.write();
        let channels = sessions.entry(session_id).or_default();

        if channels.iter().any(|c| c.id == channel.id) {
            return false;
        }
        let first = !channels.iter().any(|c| c.user_id == channel.user_id);
        debug!(
            session_id = %session_id,
            user_id = %channel.user_id,
            connection_id = %channel.id,
            first,
            "Channel registered"
        );
        channels.push(channel);
        first
    }

    /// Deregister exactly one channel. Returns true if it was the user's
    /// last channel, i.e. the user just went offline.
    pub fn remove_connection(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        connection_id: ConnectionId,
    ) -> bool {
        let mut sessions = self.write();
        let Some(channels) = sessions.get_mut(&session_id) else {
            return false;
        };

        let before = channels.len();
        channels.retain(|c| !(c.id == connection_id && c.user_id == user_id));
        let removed = channels.len() < before;
        let still_online = channels.iter().any(|c| c.user_id == user_id);

        if channels.is_empty() {
            sessions.remove(&session_id);
        }

        if removed {
            debug!(
                session_id = %session_id,
                user_id = %user_id,
                connection_id = %connection_id,
                "Channel deregistered"
            );
        }
        removed && !still_online
    }

    /// Distinct users with at least one open channel
    pub fn online_users(&self, session_id: Uuid) -> BTreeSet<Uuid> {
        self.read()
            .get(&session_id)
            .map(|channels| channels.iter().map(|c| c.user_id).collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, session_id: Uuid, user_id: Uuid) -> bool {
        self.read()
            .get(&session_id)
            .is_some_and(|channels| channels.iter().any(|c| c.user_id == user_id))
    }

    /// Number of open channels in a session
    pub fn connection_count(&self, session_id: Uuid) -> usize {
        self.read().get(&session_id).map_or(0, Vec::len)
    }

    /// Number of sessions with at least one open channel
    pub fn session_count(&self) -> usize {
        self.read().len()
    }

    /// Deliver `msg` to every channel of the session except those owned by
    /// `exclude`. Channels that cannot accept the message are pruned.
    /// Returns the number of channels the message was queued on.
    pub fn broadcast(&self, session_id: Uuid, msg: &PushMessage, exclude: Option<Uuid>) -> usize {
        // Iterate a snapshot so concurrent add/remove only affect later broadcasts
        let snapshot: Vec<Channel> = match self.read().get(&session_id) {
            Some(channels) => channels.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for channel in snapshot.iter().filter(|c| Some(c.user_id) != exclude) {
            match channel.tx.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        session_id = %session_id,
                        user_id = %channel.user_id,
                        connection_id = %channel.id,
                        kind = msg.kind(),
                        "Channel queue full, pruning"
                    );
                    failed.push(channel);
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(
                        session_id = %session_id,
                        user_id = %channel.user_id,
                        connection_id = %channel.id,
                        kind = msg.kind(),
                        "Channel closed, pruning"
                    );
                    failed.push(channel);
                }
            }
        }

        for channel in failed {
            if self.remove_connection(session_id, channel.user_id, channel.id) {
                self.notify_user_left(session_id, channel.user_id, channel.id);
            }
        }

        delivered
    }

    /// Tell everyone else in the session that `user_id` came online
    pub fn notify_user_joined(&self, session_id: Uuid, user_id: Uuid, connection_id: ConnectionId) {
        let msg = PushMessage::user_joined(user_id, connection_id);
        self.broadcast(session_id, &msg, Some(user_id));
    }

    /// Tell everyone else in the session that `user_id` went offline
    pub fn notify_user_left(&self, session_id: Uuid, user_id: Uuid, connection_id: ConnectionId) {
        let msg = PushMessage::user_left(user_id, connection_id);
        self.broadcast(session_id, &msg, Some(user_id));
    }
}
