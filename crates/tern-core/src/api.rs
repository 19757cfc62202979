//! REST API client
//!
//! Bulk/initial loads come from the REST API; live updates come from the
//! push connection. The stores consume [`ChatApi`] so tests can substitute
//! an in-memory fake; [`HttpApi`] is the reqwest-backed implementation that
//! attaches the bearer token from the [`TokenProvider`] to every request.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::auth::TokenProvider;
use crate::models::{Channel, FriendRequest, Guild, Message, User};

/// Errors from REST calls
///
/// Fetch failures leave previously-cached store state untouched; callers
/// log and isolate them per fan-out branch.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} from {path}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Participants keyed by channel id
pub type ParticipantMap = HashMap<Uuid, Vec<Uuid>>;

#[derive(Debug, Serialize)]
struct BulkUsersRequest<'a> {
    ids: &'a [Uuid],
}

#[derive(Debug, Deserialize)]
struct BulkUsersResponse {
    users: Vec<User>,
}

#[derive(Debug, Serialize)]
struct GuildCreateRequest<'a> {
    name: &'a str,
}

/// The bulk endpoints the synchronization layer depends on
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Channels the current user is a member of
    async fn user_channels(&self) -> Result<Vec<Channel>, ApiError>;

    /// Guilds the current user is a member of
    async fn user_guilds(&self) -> Result<Vec<Guild>, ApiError>;

    /// Create a guild owned by the current user
    async fn create_guild(&self, name: &str) -> Result<Guild, ApiError>;

    /// Fetch one guild by id
    async fn guild(&self, id: Uuid) -> Result<Guild, ApiError>;

    /// Message page for a channel
    async fn channel_messages(&self, channel_id: Uuid) -> Result<Vec<Message>, ApiError>;

    /// Users by id, in bulk
    async fn users_by_id(&self, ids: &[Uuid]) -> Result<Vec<User>, ApiError>;

    /// Participant ids for each of the given channels
    async fn channel_participants(&self, channel_ids: &[Uuid]) -> Result<ParticipantMap, ApiError>;

    /// Friend requests addressed to the current user
    async fn friend_requests(&self) -> Result<Vec<FriendRequest>, ApiError>;

    /// Send a friend request by username
    async fn create_friend_request(&self, to_username: &str) -> Result<FriendRequest, ApiError>;

    async fn accept_friend_request(&self, id: Uuid) -> Result<(), ApiError>;

    async fn reject_friend_request(&self, id: Uuid) -> Result<(), ApiError>;
}

/// reqwest-backed [`ChatApi`] implementation
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Attach the bearer token when one is available; an absent token just
    /// omits the header.
    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        path: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.authorize(builder).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(path, status = status.as_u16(), "REST call completed");
        serde_json::from_str(&body).map_err(|source| ApiError::Decode {
            path: path.to_string(),
            source,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(path, self.client.get(self.url(path))).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.execute(path, self.client.post(self.url(path)).json(body))
            .await
    }

    /// POST with no response body of interest
    async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        let response = self.authorize(self.client.post(self.url(path))).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(path, status = status.as_u16(), "REST call completed");
        Ok(())
    }
}

#[async_trait]
impl ChatApi for HttpApi {
    async fn user_channels(&self) -> Result<Vec<Channel>, ApiError> {
        self.get_json("/channels/me").await
    }

    async fn user_guilds(&self) -> Result<Vec<Guild>, ApiError> {
        self.get_json("/guilds/me").await
    }

    async fn create_guild(&self, name: &str) -> Result<Guild, ApiError> {
        self.post_json("/guilds", &GuildCreateRequest { name }).await
    }

    async fn guild(&self, id: Uuid) -> Result<Guild, ApiError> {
        self.get_json(&format!("/guilds/{id}")).await
    }

    async fn channel_messages(&self, channel_id: Uuid) -> Result<Vec<Message>, ApiError> {
        self.get_json(&format!("/messages/{channel_id}")).await
    }

    async fn users_by_id(&self, ids: &[Uuid]) -> Result<Vec<User>, ApiError> {
        let response: BulkUsersResponse =
            self.post_json("/users/bulk", &BulkUsersRequest { ids }).await?;
        Ok(response.users)
    }

    async fn channel_participants(&self, channel_ids: &[Uuid]) -> Result<ParticipantMap, ApiError> {
        self.post_json("/channels/bulk/participants", channel_ids)
            .await
    }

    async fn friend_requests(&self) -> Result<Vec<FriendRequest>, ApiError> {
        self.get_json("/friendship/friends/request/me").await
    }

    async fn create_friend_request(&self, to_username: &str) -> Result<FriendRequest, ApiError> {
        let path = "/friendship/friends/request";
        let builder = self
            .client
            .post(self.url(path))
            .query(&[("to_username", to_username)]);
        self.execute(path, builder).await
    }

    async fn accept_friend_request(&self, id: Uuid) -> Result<(), ApiError> {
        self.post_empty(&format!("/friendship/friends/request/{id}/accept"))
            .await
    }

    async fn reject_friend_request(&self, id: Uuid) -> Result<(), ApiError> {
        self.post_empty(&format!("/friendship/friends/request/{id}/reject"))
            .await
    }
}
