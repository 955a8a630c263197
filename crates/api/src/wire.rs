//! JSON shapes returned by the chat backend and their mapping into session types.
//!
//! Every response is wrapped as `{"data": {...}}`. A response that decodes but lacks the
//! expected field is reported as `MalformedPayload`, which callers treat like any other
//! fetch failure.

use parley_session::{
    ChatSession, ContentKind, IncomingMessage, Message, MessageId, Participant, ParticipantId,
    SessionId, SliceKind,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use snafu::{OptionExt, ResultExt};

use super::provider::{DecodeSnafu, Endpoint, FetchResult, MalformedPayloadSnafu};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ChatData {
    #[serde(default)]
    chat: Option<ChatDto>,
}

#[derive(Debug, Deserialize)]
struct MessagesData {
    #[serde(default)]
    messages: Option<Vec<MessageDto>>,
}

#[derive(Debug, Deserialize)]
struct ParticipantsData {
    #[serde(default)]
    participants: Option<Vec<UserDto>>,
}

/// Ids arrive as strings from most endpoints and as integers from a few older ones.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(i64),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            Self::Text(raw) => raw,
            Self::Number(raw) => raw.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireContentType {
    Code(u8),
    Label(String),
}

impl WireContentType {
    fn into_kind(self) -> Option<ContentKind> {
        match self {
            Self::Code(0) => Some(ContentKind::Text),
            Self::Code(1) => Some(ContentKind::Image),
            Self::Code(_) => None,
            Self::Label(label) => match label.trim().to_ascii_lowercase().as_str() {
                "0" | "text" => Some(ContentKind::Text),
                "1" | "image" => Some(ContentKind::Image),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatDto {
    id: WireId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "image")]
    avatar: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDto {
    id: WireId,
    #[serde(default)]
    username: Option<String>,
    #[serde(default, alias = "fullName")]
    fullname: Option<String>,
    #[serde(default)]
    profile_image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDto {
    id: WireId,
    #[serde(default)]
    user: Option<UserDto>,
    #[serde(default)]
    user_id: Option<WireId>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    content_type: Option<WireContentType>,
    #[serde(default)]
    created_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveEventDto {
    #[serde(default, alias = "chatId")]
    session_id: Option<WireId>,
    #[serde(default)]
    message: Option<MessageDto>,
}

fn decode<T>(endpoint: Endpoint, body: &str) -> FetchResult<T>
where
    T: DeserializeOwned,
{
    let envelope: Envelope<T> = serde_json::from_str(body).context(DecodeSnafu {
        stage: "decode-envelope",
        endpoint,
    })?;

    envelope.data.context(MalformedPayloadSnafu {
        stage: "unwrap-envelope",
        endpoint,
        field: "data",
    })
}

pub(crate) fn decode_chat(body: &str) -> FetchResult<ChatSession> {
    let endpoint = Endpoint::Slice(SliceKind::Metadata);
    let chat = decode::<ChatData>(endpoint, body)?
        .chat
        .context(MalformedPayloadSnafu {
            stage: "decode-chat",
            endpoint,
            field: "data.chat",
        })?;

    let id = chat.id.into_string();
    let name = chat.name.filter(|name| !name.trim().is_empty()).unwrap_or_else(|| id.clone());
    Ok(ChatSession {
        id: SessionId::new(id),
        name,
        avatar: chat.avatar,
        description: chat.description,
    })
}

pub(crate) fn decode_messages(body: &str) -> FetchResult<Vec<Message>> {
    let endpoint = Endpoint::Slice(SliceKind::History);
    let messages = decode::<MessagesData>(endpoint, body)?
        .messages
        .context(MalformedPayloadSnafu {
            stage: "decode-messages",
            endpoint,
            field: "data.messages",
        })?;

    messages
        .into_iter()
        .map(|message| message_from_dto(endpoint, message))
        .collect()
}

pub(crate) fn decode_participants(body: &str) -> FetchResult<Vec<Participant>> {
    let endpoint = Endpoint::Slice(SliceKind::Roster);
    let participants = decode::<ParticipantsData>(endpoint, body)?
        .participants
        .context(MalformedPayloadSnafu {
            stage: "decode-participants",
            endpoint,
            field: "data.participants",
        })?;

    Ok(participants.into_iter().map(participant_from_dto).collect())
}

/// Decodes one `{"sessionId": .., "message": {..}}` event pushed by a live transport.
pub fn decode_incoming_message(body: &str) -> FetchResult<IncomingMessage> {
    let endpoint = Endpoint::Live;
    let event: LiveEventDto = serde_json::from_str(body).context(DecodeSnafu {
        stage: "decode-live-event",
        endpoint,
    })?;

    let session_id = event
        .session_id
        .map(WireId::into_string)
        .filter(|id| !id.trim().is_empty())
        .context(MalformedPayloadSnafu {
            stage: "decode-live-session",
            endpoint,
            field: "sessionId",
        })?;
    let message = event.message.context(MalformedPayloadSnafu {
        stage: "decode-live-message",
        endpoint,
        field: "message",
    })?;

    Ok(IncomingMessage::new(
        SessionId::new(session_id),
        message_from_dto(endpoint, message)?,
    ))
}

fn participant_from_dto(user: UserDto) -> Participant {
    let id = user.id.into_string();
    Participant {
        username: user.username.unwrap_or_else(|| id.clone()),
        id: ParticipantId::new(id),
        display_name: user.fullname,
        avatar: user.profile_image,
    }
}

fn message_from_dto(endpoint: Endpoint, message: MessageDto) -> FetchResult<Message> {
    let author = message
        .user
        .map(|user| user.id)
        .or(message.user_id)
        .context(MalformedPayloadSnafu {
            stage: "decode-message-author",
            endpoint,
            field: "messages[].user",
        })?;
    let content = message.content.context(MalformedPayloadSnafu {
        stage: "decode-message-content",
        endpoint,
        field: "messages[].content",
    })?;
    let kind = match message.content_type {
        // Older payloads omit the type for plain text.
        None => ContentKind::Text,
        Some(content_type) => content_type.into_kind().context(MalformedPayloadSnafu {
            stage: "decode-message-content-type",
            endpoint,
            field: "messages[].contentType",
        })?,
    };
    let created_at = message.created_at.context(MalformedPayloadSnafu {
        stage: "decode-message-created-at",
        endpoint,
        field: "messages[].createdAt",
    })?;

    Ok(Message::new(
        MessageId::new(message.id.into_string()),
        ParticipantId::new(author.into_string()),
        content,
        kind,
        created_at,
    ))
}
