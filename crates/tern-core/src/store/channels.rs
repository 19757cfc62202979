//! Channel store
//!
//! Holds channel metadata plus the participant ids of each channel. The
//! participant index is what the initializer mines for user ids, so both
//! live in one store and share one epoch.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::api::{ApiError, ChatApi};
use crate::models::Channel;
use crate::store::Entity;

struct Inner {
    channels: HashMap<Uuid, Channel>,
    participants: HashMap<Uuid, Vec<Uuid>>,
    epoch: u64,
}

pub struct ChannelStore {
    inner: Mutex<Inner>,
    revision: watch::Sender<u64>,
    api: Arc<dyn ChatApi>,
}

impl ChannelStore {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner {
                channels: HashMap::new(),
                participants: HashMap::new(),
                epoch: 0,
            }),
            revision,
            api,
        }
    }

    pub fn merge<I: IntoIterator<Item = Channel>>(&self, channels: I) -> usize {
        let count = {
            let mut inner = self.inner.lock().unwrap();
            let mut count = 0;
            for channel in channels {
                inner.channels.insert(channel.id(), channel);
                count += 1;
            }
            count
        };
        if count > 0 {
            self.notify();
        }
        count
    }

    pub fn get(&self, id: Uuid) -> Option<Channel> {
        self.inner.lock().unwrap().channels.get(&id).cloned()
    }

    pub fn get_many(&self, ids: &[Uuid]) -> Vec<Channel> {
        let inner = self.inner.lock().unwrap();
        ids.iter()
            .filter_map(|id| inner.channels.get(id).cloned())
            .collect()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.inner.lock().unwrap().channels.contains_key(&id)
    }

    pub fn missing(&self, ids: &[Uuid]) -> Vec<Uuid> {
        let inner = self.inner.lock().unwrap();
        let mut seen = HashSet::new();
        ids.iter()
            .filter(|id| !inner.channels.contains_key(id) && seen.insert(**id))
            .copied()
            .collect()
    }

    pub fn all(&self) -> Vec<Channel> {
        self.inner.lock().unwrap().channels.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Direct-message channels
    pub fn dm_channels(&self) -> Vec<Channel> {
        self.inner
            .lock()
            .unwrap()
            .channels
            .values()
            .filter(|c| c.is_dm())
            .cloned()
            .collect()
    }

    /// Channels belonging to one guild
    pub fn guild_channels(&self, guild_id: Uuid) -> Vec<Channel> {
        self.inner
            .lock()
            .unwrap()
            .channels
            .values()
            .filter(|c| c.guild_id == Some(guild_id))
            .cloned()
            .collect()
    }

    /// Participant ids of one channel; empty when not yet fetched
    pub fn participants(&self, channel_id: Uuid) -> Vec<Uuid> {
        self.inner
            .lock()
            .unwrap()
            .participants
            .get(&channel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_participants(&self, channel_id: Uuid, user_ids: Vec<Uuid>) {
        self.inner
            .lock()
            .unwrap()
            .participants
            .insert(channel_id, user_ids);
        self.notify();
    }

    /// Distinct user ids across every known participant list
    pub fn participant_ids(&self) -> Vec<Uuid> {
        let inner = self.inner.lock().unwrap();
        let mut seen = HashSet::new();
        inner
            .participants
            .values()
            .flatten()
            .filter(|id| seen.insert(**id))
            .copied()
            .collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.channels.clear();
            inner.participants.clear();
            inner.epoch += 1;
        }
        self.notify();
    }

    fn epoch(&self) -> u64 {
        self.inner.lock().unwrap().epoch
    }

    fn notify(&self) {
        self.revision.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    /// Bulk-load the channels the current user is a member of
    pub async fn refresh(&self) -> Result<usize, ApiError> {
        let epoch = self.epoch();
        let channels = self.api.user_channels().await?;

        let count = {
            let mut inner = self.inner.lock().unwrap();
            if inner.epoch != epoch {
                debug!("discarding channel fetch from a previous session");
                return Ok(0);
            }
            let mut count = 0;
            for channel in channels {
                inner.channels.insert(channel.id(), channel);
                count += 1;
            }
            count
        };
        if count > 0 {
            self.notify();
        }
        Ok(count)
    }

    /// Refresh only if any of `ids` is not cached yet
    pub async fn fetch_missing(&self, ids: &[Uuid]) -> Result<usize, ApiError> {
        if self.missing(ids).is_empty() {
            debug!("all requested channels already cached");
            return Ok(0);
        }
        self.refresh().await
    }

    /// Fetch participant lists for every known DM channel
    ///
    /// Requires the channel list, so the initializer runs it after
    /// [`refresh`](Self::refresh). A no-op when there are no DM channels.
    pub async fn fetch_dm_participants(&self) -> Result<usize, ApiError> {
        let dm_ids: Vec<Uuid> = self.dm_channels().iter().map(|c| c.id).collect();
        if dm_ids.is_empty() {
            debug!("no DM channels; skipping participant fetch");
            return Ok(0);
        }

        let epoch = self.epoch();
        let fetched = self.api.channel_participants(&dm_ids).await?;

        let count = {
            let mut inner = self.inner.lock().unwrap();
            if inner.epoch != epoch {
                debug!("discarding participant fetch from a previous session");
                return Ok(0);
            }
            let count = fetched.len();
            inner.participants.extend(fetched);
            count
        };
        if count > 0 {
            self.notify();
        }
        Ok(count)
    }
}
