//! Guild membership store

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::{ApiError, ChatApi};
use crate::models::Guild;
use crate::store::EntityMap;

pub struct GuildStore {
    map: EntityMap<Guild>,
    api: Arc<dyn ChatApi>,
}

impl GuildStore {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self {
            map: EntityMap::new(),
            api,
        }
    }

    pub fn merge<I: IntoIterator<Item = Guild>>(&self, guilds: I) -> usize {
        self.map.merge(guilds)
    }

    pub fn get(&self, id: Uuid) -> Option<Guild> {
        self.map.get(id)
    }

    pub fn get_many(&self, ids: &[Uuid]) -> Vec<Guild> {
        self.map.get_many(ids)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.map.contains(id)
    }

    pub fn missing(&self, ids: &[Uuid]) -> Vec<Uuid> {
        self.map.missing(ids)
    }

    pub fn all(&self) -> Vec<Guild> {
        self.map.all()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.map.subscribe()
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    /// Bulk-load the guilds the current user belongs to
    pub async fn refresh(&self) -> Result<usize, ApiError> {
        let epoch = self.map.epoch();
        let guilds = self.api.user_guilds().await?;
        Ok(self.map.merge_at_epoch(epoch, guilds))
    }

    /// Create a guild and cache the result
    pub async fn create(&self, name: &str) -> Result<Guild, ApiError> {
        let epoch = self.map.epoch();
        let guild = self.api.create_guild(name).await?;
        self.map.merge_at_epoch(epoch, [guild.clone()]);
        Ok(guild)
    }

    /// Fetch one guild, skipping the request when it is already cached
    pub async fn fetch(&self, id: Uuid) -> Result<Guild, ApiError> {
        if let Some(guild) = self.map.get(id) {
            debug!(guild_id = %id, "guild already cached");
            return Ok(guild);
        }

        let epoch = self.map.epoch();
        let guild = self.api.guild(id).await?;
        self.map.merge_at_epoch(epoch, [guild.clone()]);
        Ok(guild)
    }

    /// Fetch the guilds in `ids` that are not cached yet, one by one;
    /// failures are logged per guild and do not abort the rest.
    pub async fn fetch_missing(&self, ids: &[Uuid]) -> usize {
        let mut fetched = 0;
        for id in self.map.missing(ids) {
            match self.fetch(id).await {
                Ok(_) => fetched += 1,
                Err(error) => warn!(guild_id = %id, error = %error, "failed to fetch guild"),
            }
        }
        fetched
    }
}
