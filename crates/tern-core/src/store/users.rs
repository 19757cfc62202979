//! User reference cache
//!
//! Users are never fetched eagerly. The store fills in lazily whenever a
//! new batch of sender/participant/originator ids becomes visible, and
//! only for the ids not already present — the request collapses to no
//! network call at all when everything is cached.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::api::{ApiError, ChatApi};
use crate::models::User;
use crate::store::EntityMap;

pub struct UserStore {
    map: EntityMap<User>,
    api: Arc<dyn ChatApi>,
}

impl UserStore {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self {
            map: EntityMap::new(),
            api,
        }
    }

    pub fn merge<I: IntoIterator<Item = User>>(&self, users: I) -> usize {
        self.map.merge(users)
    }

    pub fn get(&self, id: Uuid) -> Option<User> {
        self.map.get(id)
    }

    pub fn get_many(&self, ids: &[Uuid]) -> Vec<User> {
        self.map.get_many(ids)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.map.contains(id)
    }

    pub fn missing(&self, ids: &[Uuid]) -> Vec<Uuid> {
        self.map.missing(ids)
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

    /// Fetch only the users in `ids` that are not cached yet
    ///
    /// Returns the number of users merged; zero when everything was
    /// already known (no request is issued in that case).
    pub async fn fetch_missing(&self, ids: &[Uuid]) -> Result<usize, ApiError> {
        let missing = self.map.missing(ids);
        if missing.is_empty() {
            debug!("all requested users already cached");
            return Ok(0);
        }

        let epoch = self.map.epoch();
        let users = self.api.users_by_id(&missing).await?;
        Ok(self.map.merge_at_epoch(epoch, users))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{user, ApiCall, FakeApi};

    #[tokio::test]
    async fn test_fetch_missing_requests_only_uncached_ids() {
        let api = Arc::new(FakeApi::new());
        let ada = user("ada");
        let grace = user("grace");
        api.users.lock().unwrap().push(ada.clone());
        api.users.lock().unwrap().push(grace.clone());

        let store = UserStore::new(api.clone());
        store.merge([ada.clone()]);

        let merged = store.fetch_missing(&[ada.id, grace.id]).await.unwrap();
        assert_eq!(merged, 1);
        assert_eq!(api.calls(), vec![ApiCall::UsersById(vec![grace.id])]);
        assert!(store.contains(grace.id));
    }

    #[tokio::test]
    async fn test_fetch_missing_elides_request_when_all_cached() {
        let api = Arc::new(FakeApi::new());
        let ada = user("ada");
        let grace = user("grace");

        let store = UserStore::new(api.clone());
        store.merge([ada.clone(), grace.clone()]);

        let merged = store.fetch_missing(&[ada.id, grace.id]).await.unwrap();
        assert_eq!(merged, 0);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_cache_untouched() {
        let api = Arc::new(FakeApi::new());
        api.fail("users_by_id");

        let store = UserStore::new(api.clone());
        let ada = user("ada");
        store.merge([ada.clone()]);

        let result = store.fetch_missing(&[Uuid::new_v4()]).await;
        assert!(result.is_err());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(ada.id).unwrap(), ada);
    }

    #[tokio::test]
    async fn test_clear_drops_inflight_fetch() {
        let api = Arc::new(FakeApi::new());
        let ada = user("ada");

        let store = UserStore::new(api.clone());
        // A fetch captured before logout carries the old epoch
        let epoch = store.map.epoch();
        store.clear();

        assert_eq!(store.map.merge_at_epoch(epoch, [ada]), 0);
        assert!(store.is_empty());
    }
}
