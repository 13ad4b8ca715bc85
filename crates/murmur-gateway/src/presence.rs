use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use murmur_types::events::ServerEvent;
use murmur_types::models::UserId;

/// What a connection's outbound loop receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    /// A newer connection for the same user took over the presence entry
    Superseded,
}

/// Sending half of one live connection. Cloning is cheap and every clone
/// feeds the same outbound queue, so events reach the client in push order.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                conn_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queues an event for the client. Returns false once the connection is
    /// gone; callers treat that as a silent drop.
    pub fn push(&self, event: ServerEvent) -> bool {
        self.tx.send(Outbound::Event(event)).is_ok()
    }

    fn supersede(&self) {
        let _ = self.tx.send(Outbound::Superseded);
    }
}

/// Process-scoped map of user id -> live connection.
///
/// One entry per user; a later `register` for the same user replaces the
/// earlier handle (last write wins) and tells the old connection to close.
#[derive(Clone, Default)]
pub struct Presence {
    entries: Arc<RwLock<HashMap<UserId, ConnectionHandle>>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the entry for `user_id`. Returns the displaced
    /// handle, if any, after signalling it to close.
    pub async fn register(&self, user_id: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let displaced = self.entries.write().await.insert(user_id, handle);
        if let Some(old) = &displaced {
            old.supersede();
        }
        displaced
    }

    /// Removes the entry for `user_id` whichever connection owns it. No-op if absent.
    pub async fn unregister(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.entries.write().await.remove(&user_id)
    }

    /// Removes the entry only if it still belongs to `conn_id`, so a stale
    /// connection closing cannot evict its replacement. Returns whether
    /// anything was removed.
    pub async fn release(&self, user_id: UserId, conn_id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(&user_id) {
            Some(handle) if handle.conn_id == conn_id => {
                entries.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.entries.read().await.get(&user_id).cloned()
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        self.entries.read().await.keys().copied().collect()
    }

    /// Registers `handle` and announces it, all under one write lock: the
    /// new connection is queued a `status:user-online` for every other
    /// present user and they are queued one for `user_id`. A concurrent
    /// join or leave lands wholly before or after, so no one's view misses
    /// it. Returns the displaced handle, if any, after signalling it.
    pub async fn join(&self, user_id: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut entries = self.entries.write().await;
        for (uid, other) in entries.iter().filter(|(uid, _)| **uid != user_id) {
            handle.push(ServerEvent::UserOnline { user_id: *uid });
            other.push(ServerEvent::UserOnline { user_id });
        }
        let displaced = entries.insert(user_id, handle);
        if let Some(old) = &displaced {
            old.supersede();
        }
        displaced
    }

    /// `release` plus the `status:user-offline` broadcast under the same
    /// lock, so a reconnect cannot be announced before the old offline.
    pub async fn leave(&self, user_id: UserId, conn_id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(&user_id) {
            Some(handle) if handle.conn_id == conn_id => {
                entries.remove(&user_id);
                for other in entries.values() {
                    other.push(ServerEvent::UserOffline { user_id });
                }
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregister_clears_lookup() {
        let presence = Presence::new();
        let (handle, _rx) = ConnectionHandle::new();

        presence.register(1, handle.clone()).await;
        assert_eq!(presence.lookup(1).await.map(|h| h.conn_id()), Some(handle.conn_id()));

        presence.unregister(1).await;
        assert!(presence.lookup(1).await.is_none());

        // Duplicate disconnects are tolerated
        assert!(presence.unregister(1).await.is_none());
    }

    #[tokio::test]
    async fn last_register_wins() {
        let presence = Presence::new();
        let (h1, mut rx1) = ConnectionHandle::new();
        let (h2, _rx2) = ConnectionHandle::new();

        presence.register(1, h1.clone()).await;
        let displaced = presence.register(1, h2.clone()).await;

        assert_eq!(displaced.map(|h| h.conn_id()), Some(h1.conn_id()));
        assert_eq!(presence.lookup(1).await.map(|h| h.conn_id()), Some(h2.conn_id()));
        assert_eq!(rx1.try_recv().ok(), Some(Outbound::Superseded));
    }

    #[tokio::test]
    async fn stale_release_keeps_newer_entry() {
        let presence = Presence::new();
        let (h1, _rx1) = ConnectionHandle::new();
        let (h2, _rx2) = ConnectionHandle::new();

        presence.register(1, h1.clone()).await;
        presence.register(1, h2.clone()).await;

        assert!(!presence.release(1, h1.conn_id()).await);
        assert!(presence.lookup(1).await.is_some());

        assert!(presence.release(1, h2.conn_id()).await);
        assert!(presence.lookup(1).await.is_none());
        assert!(!presence.release(1, h2.conn_id()).await);
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(o) = rx.try_recv() {
            out.push(o);
        }
        out
    }

    #[tokio::test]
    async fn join_exchanges_online_status() {
        let presence = Presence::new();
        let (h1, mut rx1) = ConnectionHandle::new();
        let (h2, mut rx2) = ConnectionHandle::new();

        assert!(presence.join(1, h1).await.is_none());
        assert!(drain(&mut rx1).is_empty());

        presence.join(2, h2).await;
        assert_eq!(drain(&mut rx1), vec![Outbound::Event(ServerEvent::UserOnline { user_id: 2 })]);
        assert_eq!(drain(&mut rx2), vec![Outbound::Event(ServerEvent::UserOnline { user_id: 1 })]);
    }

    #[tokio::test]
    async fn leave_announces_only_for_the_owning_connection() {
        let presence = Presence::new();
        let (h1, mut rx1) = ConnectionHandle::new();
        let (old, _old_rx) = ConnectionHandle::new();
        let (new, _new_rx) = ConnectionHandle::new();
        presence.join(1, h1).await;
        presence.join(2, old.clone()).await;
        presence.join(2, new.clone()).await;
        drain(&mut rx1);

        assert!(!presence.leave(2, old.conn_id()).await);
        assert!(drain(&mut rx1).is_empty());

        assert!(presence.leave(2, new.conn_id()).await);
        assert_eq!(drain(&mut rx1), vec![Outbound::Event(ServerEvent::UserOffline { user_id: 2 })]);
        assert!(presence.lookup(2).await.is_none());
    }

    #[tokio::test]
    async fn push_to_closed_connection_is_silent() {
        let (handle, rx) = ConnectionHandle::new();
        drop(rx);
        assert!(!handle.push(ServerEvent::Typing { sender_id: 1 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lifecycles_leave_a_consistent_table() {
        let presence = Presence::new();
        let mut tasks = Vec::new();

        for user_id in 0..32 {
            let presence = presence.clone();
            tasks.push(tokio::spawn(async move {
                let (handle, _rx) = ConnectionHandle::new();
                let conn_id = handle.conn_id();
                presence.register(user_id, handle).await;
                let _ = presence.lookup(user_id).await;
                if user_id % 2 == 0 {
                    presence.release(user_id, conn_id).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut online = presence.online_users().await;
        online.sort();
        let expected: Vec<UserId> = (0..32).filter(|id| id % 2 == 1).collect();
        assert_eq!(online, expected);
    }
}
