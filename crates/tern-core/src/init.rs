//! Bootstrap sequencing
//!
//! Once authentication is valid, the independent bulk fetches (channels,
//! guilds, friend requests) run concurrently and best-effort: any branch
//! may fail without taking the others down. Participants can only be
//! fetched after the channel list exists, and users only after the
//! participant ids are known, so those two phases run in order.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{ChannelStore, FriendRequestStore, GuildStore, MessageStore, UserStore};

#[derive(Clone)]
pub struct Initializer {
    channels: Arc<ChannelStore>,
    guilds: Arc<GuildStore>,
    users: Arc<UserStore>,
    friends: Arc<FriendRequestStore>,
    messages: Arc<MessageStore>,
}

impl Initializer {
    pub fn new(
        channels: Arc<ChannelStore>,
        guilds: Arc<GuildStore>,
        users: Arc<UserStore>,
        friends: Arc<FriendRequestStore>,
        messages: Arc<MessageStore>,
    ) -> Self {
        Self {
            channels,
            guilds,
            users,
            friends,
            messages,
        }
    }

    /// Populate the stores from the REST API
    ///
    /// Phase 1: channels, guilds, and friend requests in parallel.
    /// Phase 2: DM participants (needs channel ids).
    /// Phase 3: the users referenced so far (needs participant ids).
    pub async fn bootstrap(&self) {
        info!("starting store bootstrap");

        let (channels, guilds, requests) = tokio::join!(
            self.channels.refresh(),
            self.guilds.refresh(),
            self.friends.refresh(),
        );
        if let Err(error) = channels {
            warn!(error = %error, "channel bootstrap failed");
        }
        if let Err(error) = guilds {
            warn!(error = %error, "guild bootstrap failed");
        }
        if let Err(error) = requests {
            warn!(error = %error, "friend request bootstrap failed");
        }

        if let Err(error) = self.channels.fetch_dm_participants().await {
            warn!(error = %error, "participant bootstrap failed");
        }

        self.sync_users().await;
        info!("store bootstrap completed");
    }

    /// Fetch the users referenced by the current store contents that are
    /// not cached yet
    ///
    /// References come from channel participants, message senders, and
    /// friend-request originators. Called at the end of bootstrap and
    /// again whenever live events introduce new ids.
    pub async fn sync_users(&self) {
        let mut ids: Vec<Uuid> = self.channels.participant_ids();
        ids.extend(self.friends.from_user_ids());
        ids.extend(self.messages.sender_ids());

        if ids.is_empty() {
            return;
        }

        if let Err(error) = self.users.fetch_missing(&ids).await {
            warn!(error = %error, "user fetch failed");
        }
    }
}
