//! Entity stores
//!
//! One normalized in-memory collection per entity kind. Each store merges
//! data from two paths — REST snapshots and live push events — keyed by
//! entity id, so the same entity arriving via both paths produces one
//! entry. Merging is idempotent and commutative, making final state
//! independent of arrival order.
//!
//! Stores notify observers through a revision counter on a
//! [`tokio::sync::watch`] channel: every mutation bumps the counter, and
//! any rendering layer can `subscribe()` without this crate knowing about
//! it.
//!
//! # Modules
//!
//! - `messages`: message map + per-channel ordered index + unread set
//! - `channels`: channels + per-channel participant ids
//! - `guilds`: guild membership
//! - `users`: lazily-populated user reference cache
//! - `friends`: pending friend requests (the one store allowed to shrink)

mod channels;
mod friends;
mod guilds;
mod messages;
mod users;

pub use channels::ChannelStore;
pub use friends::FriendRequestStore;
pub use guilds::GuildStore;
pub use messages::MessageStore;
pub use users::UserStore;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Channel, FriendRequest, Guild, Message, User};

/// Anything a store can hold: identified by a server-assigned UUID
pub trait Entity: Clone + Send + 'static {
    fn id(&self) -> Uuid;
}

impl Entity for Message {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for Channel {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for Guild {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for User {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for FriendRequest {
    fn id(&self) -> Uuid {
        self.id
    }
}

struct MapInner<T> {
    entities: HashMap<Uuid, T>,
    epoch: u64,
}

/// Id-keyed collection shared by the entity stores
///
/// Carries the store contract: idempotent `merge`, lookups that never
/// panic on unknown ids, `missing` for fetch elision, an epoch guard that
/// drops REST responses raced by a `clear()` (logout), and the revision
/// watch used for change notification.
pub struct EntityMap<T: Entity> {
    inner: Mutex<MapInner<T>>,
    revision: watch::Sender<u64>,
}

impl<T: Entity> EntityMap<T> {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Mutex::new(MapInner {
                entities: HashMap::new(),
                epoch: 0,
            }),
            revision,
        }
    }

    /// Upsert entities by id; applying the same batch twice leaves the
    /// collection unchanged. Returns the number of entities applied.
    pub fn merge<I>(&self, entities: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let count = {
            let mut inner = self.inner.lock().unwrap();
            let mut count = 0;
            for entity in entities {
                inner.entities.insert(entity.id(), entity);
                count += 1;
            }
            count
        };
        if count > 0 {
            self.notify();
        }
        count
    }

    /// Merge a batch fetched while `epoch` was current; a batch that raced
    /// a reset is dropped.
    pub fn merge_at_epoch<I>(&self, epoch: u64, entities: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let count = {
            let mut inner = self.inner.lock().unwrap();
            if inner.epoch != epoch {
                debug!("discarding fetch result from a previous session");
                return 0;
            }
            let mut count = 0;
            for entity in entities {
                inner.entities.insert(entity.id(), entity);
                count += 1;
            }
            count
        };
        if count > 0 {
            self.notify();
        }
        count
    }

    pub fn get(&self, id: Uuid) -> Option<T> {
        self.inner.lock().unwrap().entities.get(&id).cloned()
    }

    /// Lookup many ids, silently skipping the ones not present
    pub fn get_many(&self, ids: &[Uuid]) -> Vec<T> {
        let inner = self.inner.lock().unwrap();
        ids.iter()
            .filter_map(|id| inner.entities.get(id).cloned())
            .collect()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.inner.lock().unwrap().entities.contains_key(&id)
    }

    /// The subset of `ids` not yet cached, deduplicated, input order kept
    pub fn missing(&self, ids: &[Uuid]) -> Vec<Uuid> {
        let inner = self.inner.lock().unwrap();
        let mut seen = HashSet::new();
        ids.iter()
            .filter(|id| !inner.entities.contains_key(id) && seen.insert(**id))
            .copied()
            .collect()
    }

    pub fn all(&self) -> Vec<T> {
        self.inner.lock().unwrap().entities.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.inner.lock().unwrap().entities.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, id: Uuid) -> Option<T> {
        let removed = self.inner.lock().unwrap().entities.remove(&id);
        if removed.is_some() {
            self.notify();
        }
        removed
    }

    /// Drop everything and invalidate in-flight fetches (logout)
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.entities.clear();
            inner.epoch += 1;
        }
        self.notify();
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().unwrap().epoch
    }

    /// Observe mutations: the received value is a revision counter that
    /// bumps on every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub(crate) fn notify(&self) {
        self.revision.send_modify(|revision| *revision = revision.wrapping_add(1));
    }
}

impl<T: Entity> Default for EntityMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
