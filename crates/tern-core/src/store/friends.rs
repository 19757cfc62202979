//! Friend-request store
//!
//! The one store allowed to shrink: accepting or rejecting a request
//! removes it. Live FRIEND_REQUEST events and the REST snapshot converge
//! on the same id-keyed map.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::api::{ApiError, ChatApi};
use crate::models::{Event, EventType, FriendRequest};
use crate::store::EntityMap;

pub struct FriendRequestStore {
    map: EntityMap<FriendRequest>,
    api: Arc<dyn ChatApi>,
}

impl FriendRequestStore {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self {
            map: EntityMap::new(),
            api,
        }
    }

    pub fn merge<I: IntoIterator<Item = FriendRequest>>(&self, requests: I) -> usize {
        self.map.merge(requests)
    }

    pub fn get(&self, id: Uuid) -> Option<FriendRequest> {
        self.map.get(id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.map.contains(id)
    }

    pub fn missing(&self, ids: &[Uuid]) -> Vec<Uuid> {
        self.map.missing(ids)
    }

    pub fn all(&self) -> Vec<FriendRequest> {
        self.map.all()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn remove(&self, id: Uuid) -> Option<FriendRequest> {
        self.map.remove(id)
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.map.subscribe()
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    /// Ids of the users who sent the pending requests
    pub fn from_user_ids(&self) -> Vec<Uuid> {
        self.map.all().iter().map(|r| r.from_user_id).collect()
    }

    /// Ingest a live FRIEND_REQUEST event; other event types are ignored
    pub fn apply_event(&self, event: &Event) {
        if event.event_type != EventType::FriendRequest {
            debug!(event_type = ?event.event_type, "ignoring non-friend-request event");
            return;
        }
        self.map.merge([FriendRequest::from_event(event)]);
    }

    /// Bulk-load the pending requests addressed to the current user
    pub async fn refresh(&self) -> Result<usize, ApiError> {
        let epoch = self.map.epoch();
        let requests = self.api.friend_requests().await?;
        Ok(self.map.merge_at_epoch(epoch, requests))
    }

    /// Refresh only if any of `ids` is not cached yet
    pub async fn fetch_missing(&self, ids: &[Uuid]) -> Result<usize, ApiError> {
        if self.map.missing(ids).is_empty() {
            debug!("all requested friend requests already cached");
            return Ok(0);
        }
        self.refresh().await
    }

    /// Send a friend request and cache it
    pub async fn create(&self, to_username: &str) -> Result<FriendRequest, ApiError> {
        let epoch = self.map.epoch();
        let request = self.api.create_friend_request(to_username).await?;
        self.map.merge_at_epoch(epoch, [request.clone()]);
        Ok(request)
    }

    /// Accept a request; removed from the store once the server confirms
    pub async fn accept(&self, id: Uuid) -> Result<(), ApiError> {
        self.api.accept_friend_request(id).await?;
        self.map.remove(id);
        Ok(())
    }

    /// Reject a request; removed from the store once the server confirms
    pub async fn reject(&self, id: Uuid) -> Result<(), ApiError> {
        self.api.reject_friend_request(id).await?;
        self.map.remove(id);
        Ok(())
    }
}
