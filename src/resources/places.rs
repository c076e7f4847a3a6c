use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::security::identity::Principal;

/// A user-saved place. `owner_id` is the single ownership field the
/// access-control core compares against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: u64,
    pub owner_id: u64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Fields a client may set; id and ownership are server-assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceDraft {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// In-memory place store (replace with a persistent store in production).
#[derive(Debug, Clone, Default)]
pub struct PlaceStore {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Debug, Default)]
struct StoreInner {
    next_id: u64,
    places: BTreeMap<u64, Place>,
}

impl PlaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, owner_id: u64, draft: PlaceDraft) -> Place {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let place = Place {
            id: inner.next_id,
            owner_id,
            name: draft.name,
            latitude: draft.latitude,
            longitude: draft.longitude,
        };
        inner.places.insert(place.id, place.clone());
        place
    }

    pub async fn get(&self, id: u64) -> Option<Place> {
        self.inner.read().await.places.get(&id).cloned()
    }

    /// Update mutable fields, keeping id and owner as recorded.
    pub async fn update(&self, id: u64, draft: PlaceDraft) -> Option<Place> {
        let mut inner = self.inner.write().await;
        let place = inner.places.get_mut(&id)?;
        place.name = draft.name;
        place.latitude = draft.latitude;
        place.longitude = draft.longitude;
        Some(place.clone())
    }

    pub async fn delete(&self, id: u64) -> bool {
        self.inner.write().await.places.remove(&id).is_some()
    }

    /// Owner-filtered listing at the data-access boundary: regular users
    /// see only their own rows, admins see every row.
    pub async fn list_for(&self, principal: &Principal) -> Vec<Place> {
        let inner = self.inner.read().await;
        inner
            .places
            .values()
            .filter(|place| principal.role.is_admin() || place.owner_id == principal.id)
            .cloned()
            .collect()
    }
}
