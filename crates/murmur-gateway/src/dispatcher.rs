use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, error, info, trace, warn};

use murmur_db::Database;
use murmur_types::events::{ClientEvent, ServerEvent};
use murmur_types::models::{ContentType, FileDescriptor, Message, UserId};

use crate::error::RelayError;
use crate::gate::Identity;
use crate::presence::{ConnectionHandle, Presence};
use crate::resolver::ConversationResolver;
use crate::with_db;

/// Lifecycle of one gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Admitted by the gate, not yet in the Presence Table
    Connected = 0,
    /// Registered; events are relayed
    Active = 1,
    /// Terminal
    Closed = 2,
}

/// One authenticated connection as the dispatcher sees it.
pub struct Session {
    identity: Identity,
    handle: ConnectionHandle,
    state: AtomicU8,
}

impl Session {
    pub fn new(identity: Identity, handle: ConnectionHandle) -> Self {
        Self {
            identity,
            handle,
            state: AtomicU8::new(ConnectionState::Connected as u8),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            0 => ConnectionState::Connected,
            1 => ConnectionState::Active,
            _ => ConnectionState::Closed,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Pushes to this connection unless it has closed.
    fn push(&self, event: ServerEvent) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.handle.push(event);
    }
}

/// Routes events between connected users and owns the Presence Table.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    db: Arc<Database>,
    presence: Presence,
    resolver: ConversationResolver,
}

impl Dispatcher {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                resolver: ConversationResolver::new(db.clone()),
                presence: Presence::new(),
                db,
            }),
        }
    }

    pub fn presence(&self) -> &Presence {
        &self.inner.presence
    }

    pub fn resolver(&self) -> &ConversationResolver {
        &self.inner.resolver
    }

    /// connected -> active: greet the client, then join the Presence Table,
    /// which shows it who is already online and announces it to everyone
    /// else in one step.
    pub async fn connect(&self, session: &Session) {
        if session.state() != ConnectionState::Connected {
            return;
        }
        let user_id = session.user_id();

        session.push(ServerEvent::Ready {
            user_id,
            username: session.username().to_string(),
        });

        if let Some(old) = self.inner.presence.join(user_id, session.handle().clone()).await {
            info!(
                "{} ({}) reconnected, superseding connection {}",
                session.username(),
                user_id,
                old.conn_id()
            );
        }
        session.set_state(ConnectionState::Active);
    }

    /// -> closed. Safe to call more than once. An event already being
    /// handled still persists; its pushes to this session are dropped.
    pub async fn disconnect(&self, session: &Session) {
        if session.state() == ConnectionState::Closed {
            return;
        }
        session.set_state(ConnectionState::Closed);

        let user_id = session.user_id();
        if !self.inner.presence.leave(user_id, session.handle().conn_id()).await {
            debug!("{} ({}) closed a superseded connection", session.username(), user_id);
        }
    }

    /// Handles one inbound event. Callers await this before reading the next
    /// frame, which keeps per-connection processing in arrival order.
    pub async fn handle_event(&self, session: &Session, event: ClientEvent) {
        if session.state() != ConnectionState::Active {
            warn!(
                "{} ({}) sent an event while {:?}, ignoring",
                session.username(),
                session.user_id(),
                session.state()
            );
            return;
        }

        match event {
            ClientEvent::MessageSend { recipient_id, content } => {
                self.relay_message(session, recipient_id, ContentType::Text, content, "Failed to send message.")
                    .await;
            }

            ClientEvent::FileSend {
                recipient_id,
                file_url,
                file_name,
                file_type,
            } => {
                let content_type = ContentType::for_mime(&file_type);
                let descriptor = FileDescriptor {
                    url: file_url,
                    name: file_name,
                    mime_type: file_type,
                };
                let content = match serde_json::to_string(&descriptor) {
                    Ok(content) => content,
                    Err(e) => {
                        error!("failed to encode file descriptor from {}: {}", session.user_id(), e);
                        session.push(ServerEvent::Error {
                            message: "Failed to send file message.".into(),
                        });
                        return;
                    }
                };
                self.relay_message(session, recipient_id, content_type, content, "Failed to send file message.")
                    .await;
            }

            ClientEvent::Typing { recipient_id } => {
                match self.inner.presence.lookup(recipient_id).await {
                    Some(handle) => {
                        handle.push(ServerEvent::Typing {
                            sender_id: session.user_id(),
                        });
                    }
                    None => trace!("typing from {} to offline {} dropped", session.user_id(), recipient_id),
                }
            }
        }
    }

    /// Persist, then forward to the recipient if present and echo to the
    /// sender. On failure only the sender hears about it.
    async fn relay_message(
        &self,
        session: &Session,
        recipient_id: UserId,
        content_type: ContentType,
        content: String,
        failure_text: &str,
    ) {
        let sender_id = session.user_id();

        let message = match self.persist(sender_id, recipient_id, content_type, content).await {
            Ok(message) => message,
            Err(e) => {
                error!(
                    sender_id,
                    recipient_id,
                    "failed to relay {} message: {}",
                    content_type,
                    e
                );
                session.push(ServerEvent::Error {
                    message: failure_text.to_string(),
                });
                return;
            }
        };

        debug!(
            "message {} in conversation {} from {} to {}",
            message.id, message.conversation_id, sender_id, recipient_id
        );

        match self.inner.presence.lookup(recipient_id).await {
            Some(handle) => {
                handle.push(ServerEvent::MessageReceive(message.clone()));
            }
            None => trace!("recipient {} offline, message {} kept for history", recipient_id, message.id),
        }

        session.push(ServerEvent::MessageReceive(message));
    }

    async fn persist(
        &self,
        sender_id: UserId,
        recipient_id: UserId,
        content_type: ContentType,
        content: String,
    ) -> Result<Message, RelayError> {
        let conversation_id = self.inner.resolver.find_or_create(sender_id, recipient_id).await?;

        let row = with_db(&self.inner.db, Some(conversation_id), move |db| {
            db.insert_message(conversation_id, sender_id, content_type, &content)
        })
        .await?;

        Message::try_from(row).map_err(|e| RelayError::persistence(Some(conversation_id), e))
    }
}
