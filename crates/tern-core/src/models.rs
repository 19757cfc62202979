//! Data models for Tern
//!
//! Defines the wire-level `Event` pushed by the server and the entities the
//! stores are built around: messages, channels, guilds, users, and friend
//! requests. All ids are UUIDs generated by the server; an event's id is
//! reused as the id of whatever entity it produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a server-pushed event
///
/// Types that this client has no store for decode to `Unknown` and are
/// routed to whatever subscribers exist (usually none) instead of failing
/// the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Message,
    Call,
    Notification,
    FriendRequest,
    #[serde(other)]
    Unknown,
}

/// A typed, timestamped notification pushed over the WebSocket connection
///
/// `receiver_id` is the routing target: for `Message` events it is the
/// channel the message belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new outbound event with a fresh id and the current time
    pub fn new(
        event_type: EventType,
        sender_id: Uuid,
        receiver_id: Uuid,
        text: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            sender_id,
            receiver_id,
            text: text.into(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }
}

/// A chat message, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub sender_id: Uuid,
    pub channel_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build the message carried by a `Message`-typed event
    ///
    /// The event id becomes the message id and the event's receiver is the
    /// channel it was sent to.
    pub fn from_event(event: &Event) -> Self {
        Self {
            id: event.event_id,
            content: event.text.clone(),
            sender_id: event.sender_id,
            channel_id: event.receiver_id,
            created_at: event.timestamp,
        }
    }

    /// Ordering key within a channel: ascending by creation time, ties
    /// broken by id so the order is deterministic.
    pub fn sort_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }
}

/// Channel kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Dm,
    GuildText,
    GuildVoice,
}

/// A conversation container: a direct-message channel or a guild channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn is_dm(&self) -> bool {
        self.channel_type == ChannelType::Dm
    }
}

/// A guild (server) the current user is a member of
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Guild {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A lazily-cached user reference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
}

/// A pending friend request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FriendRequest {
    pub id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl FriendRequest {
    /// Build the request carried by a `FriendRequest`-typed event
    pub fn from_event(event: &Event) -> Self {
        Self {
            id: event.event_id,
            from_user_id: event.sender_id,
            to_user_id: event.receiver_id,
            created_at: event.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_decodes_wire_json() {
        let json = r#"{
            "event_id": "7f1b9a4e-33cf-4d23-9c41-57aef1b2d601",
            "event_type": "message",
            "sender_id": "f4b8e7c1-9d2a-4d05-8a57-6a2f1c3b4d5e",
            "receiver_id": "0a1b2c3d-4e5f-4678-9abc-def012345678",
            "text": "hello there",
            "timestamp": "2024-05-01T12:30:00+00:00"
        }"#;

        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, EventType::Message);
        assert_eq!(event.text, "hello there");
        assert!(event.metadata.is_none());
    }

    #[test]
    fn test_unknown_event_type() {
        let json = r#"{
            "event_id": "7f1b9a4e-33cf-4d23-9c41-57aef1b2d601",
            "event_type": "typing_indicator",
            "sender_id": "f4b8e7c1-9d2a-4d05-8a57-6a2f1c3b4d5e",
            "receiver_id": "0a1b2c3d-4e5f-4678-9abc-def012345678",
            "text": "",
            "timestamp": "2024-05-01T12:30:00Z"
        }"#;

        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, EventType::Unknown);
    }

    #[test]
    fn test_message_from_event() {
        let event = Event::new(
            EventType::Message,
            Uuid::new_v4(),
            Uuid::new_v4(),
            "content here",
        );

        let message = Message::from_event(&event);
        assert_eq!(message.id, event.event_id);
        assert_eq!(message.channel_id, event.receiver_id);
        assert_eq!(message.sender_id, event.sender_id);
        assert_eq!(message.content, "content here");
        assert_eq!(message.created_at, event.timestamp);
    }

    #[test]
    fn test_friend_request_from_event() {
        let event = Event::new(EventType::FriendRequest, Uuid::new_v4(), Uuid::new_v4(), "");

        let request = FriendRequest::from_event(&event);
        assert_eq!(request.id, event.event_id);
        assert_eq!(request.from_user_id, event.sender_id);
        assert_eq!(request.to_user_id, event.receiver_id);
    }

    #[test]
    fn test_channel_type_wire_values() {
        let json = r#"{
            "id": "0a1b2c3d-4e5f-4678-9abc-def012345678",
            "type": "guild_text",
            "guild_id": "7f1b9a4e-33cf-4d23-9c41-57aef1b2d601",
            "created_at": "2024-05-01T12:30:00Z"
        }"#;

        let channel: Channel = serde_json::from_str(json).unwrap();
        assert_eq!(channel.channel_type, ChannelType::GuildText);
        assert!(!channel.is_dm());
        assert!(channel.name.is_none());

        let dm: Channel = serde_json::from_str(
            r#"{
                "id": "0a1b2c3d-4e5f-4678-9abc-def012345678",
                "type": "dm",
                "created_at": "2024-05-01T12:30:00Z"
            }"#,
        )
        .unwrap();
        assert!(dm.is_dm());
        assert!(dm.guild_id.is_none());
    }

    #[test]
    fn test_sort_key_breaks_ties_by_id() {
        let now = Utc::now();
        let a = Message {
            id: Uuid::parse_str("00000000-0000-4000-8000-000000000001").unwrap(),
            content: "a".into(),
            sender_id: Uuid::new_v4(),
            channel_id: Uuid::new_v4(),
            created_at: now,
        };
        let b = Message {
            id: Uuid::parse_str("00000000-0000-4000-8000-000000000002").unwrap(),
            content: "b".into(),
            sender_id: a.sender_id,
            channel_id: a.channel_id,
            created_at: now,
        };

        assert!(a.sort_key() < b.sort_key());
    }
}
