//! Tern Core Library
//!
//! This crate is the real-time synchronization layer of the Tern chat
//! client: it maintains a single authenticated push connection to the
//! server, reconciles server-pushed events with REST-fetched snapshots,
//! and exposes consistent, deduplicated, incrementally-updated views of
//! messages, channels, guilds, users, and friend requests.
//!
//! # Architecture
//!
//! - **Event bus**: in-process typed pub/sub for server events
//! - **Connection manager**: one WebSocket connection per session, with
//!   automatic reconnect and capped exponential backoff
//! - **Entity stores**: normalized in-memory caches merging the push and
//!   pull paths idempotently by entity id
//! - **Initializer**: best-effort bootstrap fan-out with the
//!   channels → participants → users dependency order
//!
//! # Quick Start
//!
//! ```text
//! let tokens = Arc::new(StaticTokenProvider::new(token));
//! let client = ChatClient::new(&config, tokens);
//!
//! client.start().await?;
//!
//! // Read the synchronized state
//! let channels = client.channels().dm_channels();
//! let messages = client.messages().channel_messages(channel_id);
//! ```
//!
//! # Modules
//!
//! - `client`: dependency-injected composition root (main entry point)
//! - `models`: events and entities
//! - `bus`: event routing
//! - `store`: entity stores
//! - `sync`: push connection and reconnect policy
//! - `init`: bootstrap sequencing
//! - `api`: REST client
//! - `auth`: bearer-token seam
//! - `config`: application configuration

pub mod api;
pub mod auth;
pub mod bus;
pub mod client;
pub mod config;
pub mod init;
pub mod models;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiError, ChatApi, HttpApi};
pub use auth::{StaticTokenProvider, TokenProvider};
pub use bus::{EventBus, SubscriptionId};
pub use client::ChatClient;
pub use config::{Config, ReconnectSettings};
pub use init::Initializer;
pub use models::{
    Channel, ChannelType, Event, EventType, FriendRequest, Guild, Message, User,
};
pub use store::{
    ChannelStore, Entity, EntityMap, FriendRequestStore, GuildStore, MessageStore, UserStore,
};
pub use sync::{
    ConnectError, ConnectionManager, ConnectionState, ReconnectConfig, ReconnectPolicy,
};
