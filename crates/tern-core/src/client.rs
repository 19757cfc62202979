//! Client composition
//!
//! [`ChatClient`] assembles the synchronization layer: event bus, entity
//! stores, REST client, connection manager, and the bus wiring that turns
//! live events into store mutations. Everything is explicitly constructed
//! and injected, so tests can build isolated instances with a fake API,
//! and logout is a real reset instead of process state.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::{ChatApi, HttpApi};
use crate::auth::TokenProvider;
use crate::bus::EventBus;
use crate::config::Config;
use crate::init::Initializer;
use crate::models::EventType;
use crate::store::{ChannelStore, FriendRequestStore, GuildStore, MessageStore, UserStore};
use crate::sync::{ConnectError, ConnectionManager};

pub struct ChatClient {
    bus: Arc<EventBus>,
    connection: Arc<ConnectionManager>,
    messages: Arc<MessageStore>,
    channels: Arc<ChannelStore>,
    guilds: Arc<GuildStore>,
    users: Arc<UserStore>,
    friends: Arc<FriendRequestStore>,
}

impl ChatClient {
    /// Build a client talking to the configured REST and WebSocket
    /// endpoints
    pub fn new(config: &Config, tokens: Arc<dyn TokenProvider>) -> Self {
        let api: Arc<dyn ChatApi> = Arc::new(HttpApi::new(config.api_url.as_str(), tokens.clone()));
        Self::with_api(config, tokens, api)
    }

    /// Build a client against any [`ChatApi`] implementation (test seam)
    pub fn with_api(
        config: &Config,
        tokens: Arc<dyn TokenProvider>,
        api: Arc<dyn ChatApi>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let messages = Arc::new(MessageStore::new(api.clone()));
        let channels = Arc::new(ChannelStore::new(api.clone()));
        let guilds = Arc::new(GuildStore::new(api.clone()));
        let users = Arc::new(UserStore::new(api.clone()));
        let friends = Arc::new(FriendRequestStore::new(api));

        let connection = Arc::new(ConnectionManager::new(
            config.ws_url.clone(),
            config.reconnect.to_reconnect_config(),
            tokens,
            bus.clone(),
        ));

        let client = Self {
            bus,
            connection,
            messages,
            channels,
            guilds,
            users,
            friends,
        };
        client.wire();
        client
    }

    /// Route live events into the stores
    ///
    /// MESSAGE events land in the message store and lazily resolve their
    /// sender; FRIEND_REQUEST events land in the friend-request store and
    /// resolve their originator. The user fetches are spawned so bus
    /// dispatch stays synchronous.
    fn wire(&self) {
        let messages = self.messages.clone();
        let users = self.users.clone();
        self.bus.subscribe(EventType::Message, move |event| {
            messages.apply_event(event);
            spawn_user_fetch(&users, event.sender_id);
        });

        let friends = self.friends.clone();
        let users = self.users.clone();
        self.bus.subscribe(EventType::FriendRequest, move |event| {
            friends.apply_event(event);
            spawn_user_fetch(&users, event.sender_id);
        });
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn messages(&self) -> &Arc<MessageStore> {
        &self.messages
    }

    pub fn channels(&self) -> &Arc<ChannelStore> {
        &self.channels
    }

    pub fn guilds(&self) -> &Arc<GuildStore> {
        &self.guilds
    }

    pub fn users(&self) -> &Arc<UserStore> {
        &self.users
    }

    pub fn friends(&self) -> &Arc<FriendRequestStore> {
        &self.friends
    }

    /// The bootstrap orchestrator over this client's stores
    pub fn initializer(&self) -> Initializer {
        Initializer::new(
            self.channels.clone(),
            self.guilds.clone(),
            self.users.clone(),
            self.friends.clone(),
            self.messages.clone(),
        )
    }

    /// Bootstrap the stores, then open the push connection
    ///
    /// Bootstrap failures are isolated per branch and logged; only a
    /// missing token or a bad URL fails the start.
    pub async fn start(&self) -> Result<(), ConnectError> {
        self.initializer().bootstrap().await;
        self.connection.connect()
    }

    /// Tear down the session: close the connection (suppressing any
    /// further reconnects), then reset every store
    pub async fn logout(&self) {
        self.connection.shutdown().await;
        self.messages.clear();
        self.channels.clear();
        self.guilds.clear();
        self.users.clear();
        self.friends.clear();
        info!("session reset");
    }
}

/// Resolve a referenced user in the background, if a runtime is available
fn spawn_user_fetch(users: &Arc<UserStore>, id: uuid::Uuid) {
    if users.contains(id) {
        return;
    }
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        debug!(user_id = %id, "no runtime; skipping background user fetch");
        return;
    };
    let users = users.clone();
    handle.spawn(async move {
        if let Err(error) = users.fetch_missing(&[id]).await {
            warn!(user_id = %id, error = %error, "failed to fetch referenced user");
        }
    });
}
