use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ConversationId = i64;
pub type MessageId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
}

/// How a message's `content` column is to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    File,
}

impl ContentType {
    /// Attachments with an `image/*` MIME type render inline; everything else is a file.
    pub fn for_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            Self::Image
        } else {
            Self::File
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

/// Serialized into `Message::content` for image and file messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub url: String,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
}

/// A persisted direct message. This is the canonical form pushed to both
/// the recipient and (as an echo) the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub content_type: ContentType,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Decodes the attachment descriptor of an image or file message.
    pub fn file_descriptor(&self) -> Option<FileDescriptor> {
        match self.content_type {
            ContentType::Text => None,
            ContentType::Image | ContentType::File => serde_json::from_str(&self.content).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_type_picks_content_type() {
        assert_eq!(ContentType::for_mime("image/png"), ContentType::Image);
        assert_eq!(ContentType::for_mime("image/svg+xml"), ContentType::Image);
        assert_eq!(ContentType::for_mime("application/pdf"), ContentType::File);
        assert_eq!(ContentType::for_mime(""), ContentType::File);
    }

    #[test]
    fn file_descriptor_uses_type_key() {
        let descriptor = FileDescriptor {
            url: "/uploads/x.png".into(),
            name: "x.png".into(),
            mime_type: "image/png".into(),
        };
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "url": "/uploads/x.png", "name": "x.png", "type": "image/png" })
        );
    }

    #[test]
    fn content_type_parses_stored_values() {
        assert_eq!("image".parse::<ContentType>().unwrap(), ContentType::Image);
        assert!("video".parse::<ContentType>().is_err());
    }
}
