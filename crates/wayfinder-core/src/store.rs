//! In-process [`ServiceStore`] backed by a map keyed on service id.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::error::AppError;
use crate::models::{DuplicatePair, Service};
use crate::traits::ServiceStore;

#[derive(Debug, Default)]
struct MemoryState {
    services: BTreeMap<Uuid, Service>,
    pairs: Vec<DuplicatePair>,
}

/// Keeps everything in memory. Upserts replace by id, so re-ingesting the
/// same upstream record never grows the store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::Generic("memory store lock poisoned".into()))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.services.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &Uuid) -> Option<Service> {
        self.lock().ok()?.services.get(id).cloned()
    }

    /// All stored services, ordered by id.
    pub fn services(&self) -> Vec<Service> {
        self.lock()
            .map(|s| s.services.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn duplicate_pairs(&self) -> Vec<DuplicatePair> {
        self.lock().map(|s| s.pairs.clone()).unwrap_or_default()
    }
}

impl ServiceStore for MemoryStore {
    async fn upsert_services(&self, services: &[Service]) -> Result<usize, AppError> {
        let mut state = self.lock()?;
        for service in services {
            state.services.insert(service.id, service.clone());
        }
        Ok(services.len())
    }

    async fn save_duplicate_pairs(&self, pairs: &[DuplicatePair]) -> Result<usize, AppError> {
        let mut state = self.lock()?;
        state.pairs.extend_from_slice(pairs);
        Ok(pairs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = MemoryStore::new();
        let mut service = Service::new("acnc", "11 222 333 444", "Food Relief Hub");
        assert_eq!(store.upsert_services(&[service.clone()]).await.unwrap(), 1);

        service.description = Some("Weekly hampers".into());
        store.upsert_services(&[service.clone()]).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(&service.id).unwrap().description.as_deref(),
            Some("Weekly hampers")
        );
    }

    #[tokio::test]
    async fn pairs_are_appended() {
        let store = MemoryStore::new();
        let pair = DuplicatePair {
            service_a: Uuid::new_v4(),
            service_b: Uuid::new_v4(),
            confidence: 1.0,
            matched_fields: Default::default(),
        };
        store.save_duplicate_pairs(&[pair.clone()]).await.unwrap();
        store.save_duplicate_pairs(&[pair]).await.unwrap();
        assert_eq!(store.duplicate_pairs().len(), 2);
        assert!(store.is_empty());
    }
}
