use serde::{Deserialize, Serialize};

use crate::{ChatId, Message, UserId};

/// Close code sent when the first frame is not a valid `connect`.
pub const CLOSE_UNAUTHENTICATED: u16 = 4001;
/// Close code sent when no `connect` frame arrives within the handshake window.
pub const CLOSE_HANDSHAKE_TIMEOUT: u16 = 4002;

/// Events a client may send over the gateway socket.
///
/// Every inbound kind is enumerated here and matched exhaustively by the
/// connection handler, so an unhandled kind is a compile error rather than a
/// silently ignored string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Must be the first frame on every connection; carries the access token.
    Connect { token: String },
    SendMessage { chat_id: ChatId, body: String },
    TypingStart { chat_id: ChatId },
    TypingStop { chat_id: ChatId },
}

/// Events the server pushes to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Acknowledges a successful `connect`; the socket is now registered.
    Ready { user_id: UserId },
    MessageReceived(Message),
    TypingStart { chat_id: ChatId, sender_id: UserId },
    TypingStop { chat_id: ChatId, sender_id: UserId },
    /// The receiving user was added to (or is a founding member of) a chat.
    RoomJoined { chat_id: ChatId },
    /// The receiving user was removed from a chat, or the chat was deleted.
    RoomLeft { chat_id: ChatId },
    /// Terminal outcome of the triggering call, reported to the origin only.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_round_trip_tagged_envelope() {
        let raw = r#"{"t":"send-message","d":{"chat_id":7,"body":"hi"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::SendMessage { chat_id, body } => {
                assert_eq!(chat_id, 7);
                assert_eq!(body, "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_kind_is_rejected() {
        let raw = r#"{"t":"shutdown-server","d":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn server_events_serialize_with_kebab_case_tags() {
        let event = ServerEvent::RoomJoined { chat_id: 12 };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["t"], "room-joined");
        assert_eq!(value["d"]["chat_id"], 12);
    }
}
