use super::{holds_refresh, CredentialPair, CredentialStore};
use std::sync::RwLock;

/// Process-local store. The pair lives behind one lock and is swapped whole.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pair: RwLock<Option<CredentialPair>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pair(pair: CredentialPair) -> Self {
        let store = Self::new();
        store.save(pair);
        store
    }
}

impl CredentialStore for MemoryStore {
    fn save(&self, pair: CredentialPair) {
        let mut guard = self
            .pair
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = pair.is_complete().then_some(pair);
    }

    fn clear(&self) {
        let mut guard = self
            .pair
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = None;
    }

    fn replace_if(&self, expected_refresh: &str, next: Option<CredentialPair>) -> bool {
        let mut guard = self
            .pair
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !holds_refresh(guard.as_ref(), expected_refresh) {
            return false;
        }
        *guard = next.filter(CredentialPair::is_complete);
        true
    }

    fn load(&self) -> Option<CredentialPair> {
        self.pair
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}
