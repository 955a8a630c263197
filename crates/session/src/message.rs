use serde::{Deserialize, Serialize};

use super::ids::{MessageId, ParticipantId, SessionId};

/// Display metadata for the active conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ChatSession {
    pub fn new(id: SessionId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            avatar: None,
            description: None,
        }
    }
}

/// One member of a conversation roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Participant {
    pub fn new(id: ParticipantId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            display_name: None,
            avatar: None,
        }
    }

    /// Name shown to users, preferring the full name over the handle.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

/// Payload interpretation for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Text,
    Image,
}

/// Where a message entered the session; diagnostics only, never part of ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    #[default]
    History,
    Live,
}

/// One chat message within a single session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub author: ParticipantId,
    pub content: String,
    #[serde(default)]
    pub kind: ContentKind,
    /// Seconds since the unix epoch.
    pub created_at: i64,
    #[serde(default)]
    pub provenance: Provenance,
}

impl Message {
    pub fn new(
        id: MessageId,
        author: ParticipantId,
        content: impl Into<String>,
        kind: ContentKind,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            author,
            content: content.into(),
            kind,
            created_at,
            provenance: Provenance::History,
        }
    }

    /// Creates a text message, the common case in fixtures and transports.
    pub fn text(
        id: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self::new(
            MessageId::new(id),
            ParticipantId::new(author),
            content,
            ContentKind::Text,
            created_at,
        )
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }
}

/// A message pushed by the real-time transport, tagged with its owning session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub session_id: SessionId,
    pub message: Message,
}

impl IncomingMessage {
    pub fn new(session_id: SessionId, message: Message) -> Self {
        Self {
            session_id,
            message,
        }
    }
}
