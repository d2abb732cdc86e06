//! Connection gateway
//!
//! Terminates one server-to-client push channel per (session, user, tab).
//! Opening registers the channel and queues the `connected` and
//! `online-users` messages; the returned [`GatewayConnection`] owns a guard
//! whose drop deregisters the channel, so cleanup runs on every exit path
//! including an abrupt client disconnect.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::response::sse::Event;
use futures_util::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{ConnectionId, PushMessage};
use crate::registry::{Channel, SessionRegistry};

/// Default heartbeat interval
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default per-channel queue depth
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// `connected` and `online-users` are queued before anything else
const INITIAL_MESSAGES: usize = 2;

/// Persists connection-derived presence outside the registry
pub trait PresenceSink: Send + Sync {
    fn set_online(&self, session_id: Uuid, user_id: Uuid, is_online: bool);
}

#[derive(Debug, Clone)]
pub struct Gateway {
    registry: Arc<SessionRegistry>,
    capacity: usize,
    heartbeat: Duration,
}

impl Gateway {
    pub fn new(registry: Arc<SessionRegistry>, capacity: usize, heartbeat: Duration) -> Self {
        Self {
            registry,
            capacity: capacity.max(INITIAL_MESSAGES),
            heartbeat,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Register a new channel for an already authenticated user
    pub fn open(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        presence: Option<Arc<dyn PresenceSink>>,
    ) -> GatewayConnection {
        let (tx, rx) = mpsc::channel(self.capacity);
        let channel = Channel::new(user_id, tx.clone());
        let connection_id = channel.id();

        // Both fit: the queue is fresh and at least INITIAL_MESSAGES deep
        let _ = tx.try_send(PushMessage::connected(user_id));
        let first = self.registry.add_connection(session_id, channel);
        let _ = tx.try_send(PushMessage::online_users(
            self.registry.online_users(session_id),
        ));
        // The registry holds the only sender from here on, so pruning ends the stream
        drop(tx);

        if first {
            self.registry
                .notify_user_joined(session_id, user_id, connection_id);
            if let Some(sink) = &presence {
                sink.set_online(session_id, user_id, true);
            }
        }

        info!(
            session_id = %session_id,
            user_id = %user_id,
            connection_id = %connection_id,
            "Push channel opened"
        );

        GatewayConnection {
            rx,
            heartbeat: self.heartbeat,
            guard: ConnectionGuard {
                registry: self.registry.clone(),
                session_id,
                user_id,
                connection_id,
                presence,
            },
        }
    }
}

/// Deregisters its channel when dropped
struct ConnectionGuard {
    registry: Arc<SessionRegistry>,
    session_id: Uuid,
    user_id: Uuid,
    connection_id: ConnectionId,
    presence: Option<Arc<dyn PresenceSink>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let went_offline =
            self.registry
                .remove_connection(self.session_id, self.user_id, self.connection_id);
        // Also covers a channel the registry already pruned
        if !self.registry.is_online(self.session_id, self.user_id) {
            if let Some(sink) = &self.presence {
                sink.set_online(self.session_id, self.user_id, false);
            }
        }
        if went_offline {
            self.registry
                .notify_user_left(self.session_id, self.user_id, self.connection_id);
        }

        info!(
            session_id = %self.session_id,
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            "Push channel closed"
        );
    }
}

/// One open push channel: `Connecting -> Open -> Closed`, where dropping
/// the value is the only way to close it.
pub struct GatewayConnection {
    rx: mpsc::Receiver<PushMessage>,
    heartbeat: Duration,
    guard: ConnectionGuard,
}

impl GatewayConnection {
    pub fn connection_id(&self) -> ConnectionId {
        self.guard.connection_id
    }

    pub fn session_id(&self) -> Uuid {
        self.guard.session_id
    }

    pub fn user_id(&self) -> Uuid {
        self.guard.user_id
    }

    /// Next queued message; `None` once the registry dropped the channel
    pub async fn recv(&mut self) -> Option<PushMessage> {
        self.rx.recv().await
    }

    /// Queued message without waiting
    pub fn try_recv(&mut self) -> Option<PushMessage> {
        self.rx.try_recv().ok()
    }

    /// Turn the connection into an SSE event stream that interleaves
    /// heartbeats and ends on shutdown or when the channel is pruned.
    pub fn into_events(
        self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> impl Stream<Item = Result<Event, Infallible>> {
        let GatewayConnection {
            mut rx,
            heartbeat,
            guard,
        } = self;

        stream! {
            let _guard = guard;
            let mut ticker = time::interval_at(Instant::now() + heartbeat, heartbeat);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let msg = tokio::select! {
                    received = rx.recv() => match received {
                        Some(msg) => msg,
                        None => {
                            debug!("Channel dropped by registry");
                            break;
                        }
                    },
                    _ = ticker.tick() => PushMessage::heartbeat(),
                    _ = shutdown.recv() => break,
                };

                match msg.to_json() {
                    Ok(data) => yield Ok(Event::default().data(data)),
                    Err(e) => warn!(error = %e, kind = msg.kind(), "Failed to encode push message"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(Uuid, bool)>>,
    }

    impl PresenceSink for RecordingSink {
        fn set_online(&self, _session_id: Uuid, user_id: Uuid, is_online: bool) {
            self.calls.lock().unwrap().push((user_id, is_online));
        }
    }

    fn gateway() -> Gateway {
        Gateway::new(
            Arc::new(SessionRegistry::new()),
            DEFAULT_CHANNEL_CAPACITY,
            HEARTBEAT_INTERVAL,
        )
    }

    fn drain(conn: &mut GatewayConnection) -> Vec<PushMessage> {
        let mut out = Vec::new();
        while let Some(msg) = conn.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_open_queues_connected_then_snapshot() {
        let gateway = gateway();
        let session = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let _a = gateway.open(session, a, None);
        let mut conn = gateway.open(session, b, None);

        match conn.recv().await {
            Some(PushMessage::Connected { user_id, .. }) => assert_eq!(user_id, b),
            other => panic!("expected connected, got {:?}", other),
        }
        match conn.recv().await {
            Some(PushMessage::OnlineUsers { users, .. }) => {
                assert_eq!(users.len(), 2);
                assert!(users.contains(&a) && users.contains(&b));
            }
            other => panic!("expected online-users, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_two_tabs_then_close_both() {
        let gateway = gateway();
        let registry = gateway.registry().clone();
        let session = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let sink = Arc::new(RecordingSink::default());

        let mut watcher = gateway.open(session, b, None);
        let tab1 = gateway.open(session, a, Some(sink.clone() as Arc<dyn PresenceSink>));
        let tab2 = gateway.open(session, a, Some(sink.clone() as Arc<dyn PresenceSink>));
        let tab2_id = tab2.connection_id();

        assert_eq!(registry.online_users(session).len(), 2);
        let joined: Vec<_> = drain(&mut watcher)
            .into_iter()
            .filter(|m| matches!(m, PushMessage::UserJoined { .. }))
            .collect();
        assert_eq!(joined.len(), 1, "second tab must not announce a join");

        drop(tab1);
        assert!(registry.is_online(session, a));
        assert!(drain(&mut watcher).is_empty());

        drop(tab2);
        assert!(!registry.is_online(session, a));
        match drain(&mut watcher).as_slice() {
            [PushMessage::UserLeft {
                user_id, socket_id, ..
            }] => {
                assert_eq!(*user_id, a);
                assert_eq!(*socket_id, Some(tab2_id));
            }
            other => panic!("expected a single user-left, got {:?}", other),
        }

        assert_eq!(*sink.calls.lock().unwrap(), vec![(a, true), (a, false)]);
    }

    #[tokio::test]
    async fn test_pruned_channel_ends_stream() {
        let gateway = Gateway::new(Arc::new(SessionRegistry::new()), 2, HEARTBEAT_INTERVAL);
        let registry = gateway.registry().clone();
        let session = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        // Capacity two, already holding connected + online-users
        let mut slow = gateway.open(session, a, None);
        registry.broadcast(session, &PushMessage::heartbeat(), Some(b));

        assert!(!registry.is_online(session, a));
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_stream_emits_heartbeat() {
        use futures_util::StreamExt;

        let gateway = Gateway::new(
            Arc::new(SessionRegistry::new()),
            DEFAULT_CHANNEL_CAPACITY,
            Duration::from_secs(30),
        );
        let registry = gateway.registry().clone();
        let session = Uuid::new_v4();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let conn = gateway.open(session, Uuid::new_v4(), None);
        let events = conn.into_events(shutdown_rx);
        tokio::pin!(events);

        // connected, online-users, then the first heartbeat after the interval
        for _ in 0..3 {
            assert!(events.next().await.is_some());
        }

        shutdown_tx.send(()).unwrap();
        assert!(events.next().await.is_none());
        assert_eq!(registry.connection_count(session), 0);
    }
}
