use serde::{Deserialize, Serialize};

use crate::models::{Message, UserId};

/// Events sent FROM client TO server over the gateway WebSocket.
///
/// Frames look like `{"event": "message:send", "data": {"recipientId": 2, "content": "hi"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Send a text message to another user
    #[serde(rename = "message:send", rename_all = "camelCase")]
    MessageSend { recipient_id: UserId, content: String },

    /// Share an already-uploaded file with another user
    #[serde(rename = "file:send", rename_all = "camelCase")]
    FileSend {
        recipient_id: UserId,
        file_url: String,
        file_name: String,
        file_type: String,
    },

    /// Tell another user we are typing
    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing { recipient_id: UserId },
}

/// Events sent FROM server TO client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Connection admitted and registered
    #[serde(rename = "ready", rename_all = "camelCase")]
    Ready { user_id: UserId, username: String },

    /// A persisted message, delivered to the recipient and echoed to the sender
    #[serde(rename = "message:receive")]
    MessageReceive(Message),

    /// The sender is typing to us
    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing { sender_id: UserId },

    #[serde(rename = "status:user-online", rename_all = "camelCase")]
    UserOnline { user_id: UserId },

    #[serde(rename = "status:user-offline", rename_all = "camelCase")]
    UserOffline { user_id: UserId },

    /// A request from this connection failed
    #[serde(rename = "error")]
    Error { message: String },
}
