//! Shared test fixtures: an in-memory [`ChatApi`] that records every call,
//! plus model builders.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use crate::api::{ApiError, ChatApi, ParticipantMap};
use crate::models::{Channel, ChannelType, FriendRequest, Guild, Message, User};

/// One recorded REST call
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ApiCall {
    UserChannels,
    UserGuilds,
    CreateGuild(String),
    Guild(Uuid),
    ChannelMessages(Uuid),
    UsersById(Vec<Uuid>),
    ChannelParticipants(Vec<Uuid>),
    FriendRequests,
    CreateFriendRequest(String),
    AcceptFriendRequest(Uuid),
    RejectFriendRequest(Uuid),
}

/// In-memory [`ChatApi`] with canned responses and per-endpoint failure
/// injection
#[derive(Default)]
pub(crate) struct FakeApi {
    pub channels: Mutex<Vec<Channel>>,
    pub guilds: Mutex<Vec<Guild>>,
    pub users: Mutex<Vec<User>>,
    pub participants: Mutex<ParticipantMap>,
    pub requests: Mutex<Vec<FriendRequest>>,
    pub messages: Mutex<HashMap<Uuid, Vec<Message>>>,
    pub calls: Mutex<Vec<ApiCall>>,
    pub failing: Mutex<HashSet<&'static str>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, endpoint: &'static str) {
        self.failing.lock().unwrap().insert(endpoint);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, endpoint: &'static str) -> Result<(), ApiError> {
        if self.failing.lock().unwrap().contains(endpoint) {
            return Err(ApiError::Status {
                path: endpoint.to_string(),
                status: 500,
                body: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn user_channels(&self) -> Result<Vec<Channel>, ApiError> {
        self.record(ApiCall::UserChannels);
        self.check("user_channels")?;
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn user_guilds(&self) -> Result<Vec<Guild>, ApiError> {
        self.record(ApiCall::UserGuilds);
        self.check("user_guilds")?;
        Ok(self.guilds.lock().unwrap().clone())
    }

    async fn create_guild(&self, name: &str) -> Result<Guild, ApiError> {
        self.record(ApiCall::CreateGuild(name.to_string()));
        self.check("create_guild")?;
        let created = guild(name);
        self.guilds.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn guild(&self, id: Uuid) -> Result<Guild, ApiError> {
        self.record(ApiCall::Guild(id));
        self.check("guild")?;
        self.guilds
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| ApiError::Status {
                path: format!("/guilds/{id}"),
                status: 404,
                body: "not found".to_string(),
            })
    }

    async fn channel_messages(&self, channel_id: Uuid) -> Result<Vec<Message>, ApiError> {
        self.record(ApiCall::ChannelMessages(channel_id));
        self.check("channel_messages")?;
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(&channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn users_by_id(&self, ids: &[Uuid]) -> Result<Vec<User>, ApiError> {
        self.record(ApiCall::UsersById(ids.to_vec()));
        self.check("users_by_id")?;
        let users = self.users.lock().unwrap();
        Ok(users
            .iter()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn channel_participants(&self, channel_ids: &[Uuid]) -> Result<ParticipantMap, ApiError> {
        self.record(ApiCall::ChannelParticipants(channel_ids.to_vec()));
        self.check("channel_participants")?;
        let participants = self.participants.lock().unwrap();
        Ok(channel_ids
            .iter()
            .filter_map(|id| participants.get(id).map(|users| (*id, users.clone())))
            .collect())
    }

    async fn friend_requests(&self) -> Result<Vec<FriendRequest>, ApiError> {
        self.record(ApiCall::FriendRequests);
        self.check("friend_requests")?;
        Ok(self.requests.lock().unwrap().clone())
    }

    async fn create_friend_request(&self, to_username: &str) -> Result<FriendRequest, ApiError> {
        self.record(ApiCall::CreateFriendRequest(to_username.to_string()));
        self.check("create_friend_request")?;
        Ok(friend_request(Uuid::new_v4(), Uuid::new_v4()))
    }

    async fn accept_friend_request(&self, id: Uuid) -> Result<(), ApiError> {
        self.record(ApiCall::AcceptFriendRequest(id));
        self.check("accept_friend_request")
    }

    async fn reject_friend_request(&self, id: Uuid) -> Result<(), ApiError> {
        self.record(ApiCall::RejectFriendRequest(id));
        self.check("reject_friend_request")
    }
}

pub(crate) fn user(username: &str) -> User {
    User {
        id: Uuid::new_v4(),
        username: username.to_string(),
    }
}

pub(crate) fn guild(name: &str) -> Guild {
    let now = Utc::now();
    Guild {
        id: Uuid::new_v4(),
        name: name.to_string(),
        icon: None,
        owner_id: Uuid::new_v4(),
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn dm_channel() -> Channel {
    Channel {
        id: Uuid::new_v4(),
        name: None,
        channel_type: ChannelType::Dm,
        guild_id: None,
        description: None,
        created_at: Utc::now(),
    }
}

pub(crate) fn guild_channel(guild_id: Uuid, name: &str) -> Channel {
    Channel {
        id: Uuid::new_v4(),
        name: Some(name.to_string()),
        channel_type: ChannelType::GuildText,
        guild_id: Some(guild_id),
        description: None,
        created_at: Utc::now(),
    }
}

pub(crate) fn friend_request(from: Uuid, to: Uuid) -> FriendRequest {
    FriendRequest {
        id: Uuid::new_v4(),
        from_user_id: from,
        to_user_id: to,
        created_at: Utc::now(),
    }
}

/// A message in `channel_id` created `offset_secs` after a fixed base time
pub(crate) fn message_at(channel_id: Uuid, offset_secs: i64) -> Message {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    Message {
        id: Uuid::new_v4(),
        content: format!("message at +{offset_secs}s"),
        sender_id: Uuid::new_v4(),
        channel_id,
        created_at: base + Duration::seconds(offset_secs),
    }
}
