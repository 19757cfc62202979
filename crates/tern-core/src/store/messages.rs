//! Message store
//!
//! One id-keyed map plus a per-channel index ordered by
//! `(created_at, id)`. Two write paths converge on that map: REST pages
//! via [`add_page`](MessageStore::add_page) and live push events via
//! [`add_live`](MessageStore::add_live), so a message delivered through
//! both appears exactly once, at the same position, regardless of which
//! path won the race.
//!
//! The store also owns the unread set: a live message for any channel
//! other than the one currently being viewed marks that channel unread;
//! viewing a channel clears it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::api::{ApiError, ChatApi};
use crate::models::{Event, EventType, Message};

struct Inner {
    messages: HashMap<Uuid, Message>,
    by_channel: HashMap<Uuid, Vec<Uuid>>,
    unread: HashSet<Uuid>,
    viewing: Option<Uuid>,
    epoch: u64,
}

impl Inner {
    /// Insert keeping the channel index sorted; returns whether the
    /// message was new. Re-inserting an existing id replaces the map
    /// entry and leaves the index untouched.
    fn insert_ordered(&mut self, message: Message) -> bool {
        let channel_id = message.channel_id;
        let key = message.sort_key();
        let id = message.id;

        if self.messages.insert(id, message).is_some() {
            return false;
        }

        let index = self.by_channel.entry(channel_id).or_default();
        let position = index.partition_point(|existing| {
            self.messages
                .get(existing)
                .map(|m| m.sort_key() < key)
                .unwrap_or(false)
        });
        index.insert(position, id);
        true
    }
}

pub struct MessageStore {
    inner: Mutex<Inner>,
    revision: watch::Sender<u64>,
    api: Arc<dyn ChatApi>,
}

impl MessageStore {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner {
                messages: HashMap::new(),
                by_channel: HashMap::new(),
                unread: HashSet::new(),
                viewing: None,
                epoch: 0,
            }),
            revision,
            api,
        }
    }

    /// Merge a batch of messages into their channels (idempotent)
    pub fn merge<I: IntoIterator<Item = Message>>(&self, messages: I) -> usize {
        let count = {
            let mut inner = self.inner.lock().unwrap();
            let mut count = 0;
            for message in messages {
                inner.insert_ordered(message);
                count += 1;
            }
            count
        };
        if count > 0 {
            self.notify();
        }
        count
    }

    /// Ingest a REST page for one channel
    ///
    /// Messages already known from the push path are deduplicated by id;
    /// the channel index stays sorted whatever order the page arrives in.
    pub fn add_page(&self, channel_id: Uuid, messages: Vec<Message>) -> usize {
        let count = {
            let mut inner = self.inner.lock().unwrap();
            let mut count = 0;
            for message in messages {
                if message.channel_id != channel_id {
                    debug!(
                        message_id = %message.id,
                        "dropping page message addressed to a different channel"
                    );
                    continue;
                }
                if inner.insert_ordered(message) {
                    count += 1;
                }
            }
            count
        };
        if count > 0 {
            self.notify();
        }
        count
    }

    /// Ingest one live message from the push connection
    ///
    /// New messages for a channel that is not currently being viewed mark
    /// that channel unread. A duplicate of an already-known id changes
    /// nothing.
    pub fn add_live(&self, message: Message) -> bool {
        let inserted = {
            let mut inner = self.inner.lock().unwrap();
            let channel_id = message.channel_id;
            let inserted = inner.insert_ordered(message);
            if inserted && inner.viewing != Some(channel_id) {
                inner.unread.insert(channel_id);
            }
            inserted
        };
        if inserted {
            self.notify();
        }
        inserted
    }

    /// Ingest a live MESSAGE event; other event types are ignored
    pub fn apply_event(&self, event: &Event) {
        if event.event_type != EventType::Message {
            debug!(event_type = ?event.event_type, "ignoring non-message event");
            return;
        }
        self.add_live(Message::from_event(event));
    }

    /// Messages of one channel, ordered by `(created_at, id)` ascending
    pub fn channel_messages(&self, channel_id: Uuid) -> Vec<Message> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_channel
            .get(&channel_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.messages.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, id: Uuid) -> Option<Message> {
        self.inner.lock().unwrap().messages.get(&id).cloned()
    }

    pub fn get_many(&self, ids: &[Uuid]) -> Vec<Message> {
        let inner = self.inner.lock().unwrap();
        ids.iter()
            .filter_map(|id| inner.messages.get(id).cloned())
            .collect()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.inner.lock().unwrap().messages.contains_key(&id)
    }

    pub fn missing(&self, ids: &[Uuid]) -> Vec<Uuid> {
        let inner = self.inner.lock().unwrap();
        let mut seen = HashSet::new();
        ids.iter()
            .filter(|id| !inner.messages.contains_key(id) && seen.insert(**id))
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct sender ids across every cached message
    pub fn sender_ids(&self) -> Vec<Uuid> {
        let inner = self.inner.lock().unwrap();
        let mut seen = HashSet::new();
        inner
            .messages
            .values()
            .map(|m| m.sender_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn remove(&self, message_id: Uuid) -> Option<Message> {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            let removed = inner.messages.remove(&message_id);
            if let Some(ref message) = removed {
                if let Some(index) = inner.by_channel.get_mut(&message.channel_id) {
                    index.retain(|id| *id != message_id);
                }
            }
            removed
        };
        if removed.is_some() {
            self.notify();
        }
        removed
    }

    /// Drop every message of one channel along with its index entry
    pub fn clear_channel(&self, channel_id: Uuid) {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(ids) = inner.by_channel.remove(&channel_id) {
                for id in ids {
                    inner.messages.remove(&id);
                }
            }
            inner.unread.remove(&channel_id);
        }
        self.notify();
    }

    /// Point the store at the channel currently on screen
    ///
    /// Viewing a channel marks it read; new live messages for it no
    /// longer count as unread until the viewer moves away.
    pub fn set_viewing(&self, channel_id: Option<Uuid>) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.viewing = channel_id;
            if let Some(id) = channel_id {
                inner.unread.remove(&id);
            }
        }
        self.notify();
    }

    /// Explicitly mark one channel read
    pub fn mark_read(&self, channel_id: Uuid) {
        let changed = self.inner.lock().unwrap().unread.remove(&channel_id);
        if changed {
            self.notify();
        }
    }

    pub fn is_unread(&self, channel_id: Uuid) -> bool {
        self.inner.lock().unwrap().unread.contains(&channel_id)
    }

    pub fn unread_channels(&self) -> Vec<Uuid> {
        self.inner.lock().unwrap().unread.iter().copied().collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.messages.clear();
            inner.by_channel.clear();
            inner.unread.clear();
            inner.viewing = None;
            inner.epoch += 1;
        }
        self.notify();
    }

    /// Pull a REST page for one channel and merge it
    pub async fn fetch_channel_messages(&self, channel_id: Uuid) -> Result<usize, ApiError> {
        let epoch = self.inner.lock().unwrap().epoch;
        let page = self.api.channel_messages(channel_id).await?;

        {
            let inner = self.inner.lock().unwrap();
            if inner.epoch != epoch {
                debug!("discarding message page from a previous session");
                return Ok(0);
            }
        }
        Ok(self.add_page(channel_id, page))
    }

    fn notify(&self) {
        self.revision.send_modify(|revision| *revision = revision.wrapping_add(1));
    }
}
