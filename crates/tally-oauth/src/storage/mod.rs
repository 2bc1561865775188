//! Keyed secret storage for code verifiers and session tokens.
//!
//! The flow controller and PKCE engine only depend on the [`SecretStore`]
//! contract, so backends are interchangeable: [`KeyringStore`] persists
//! through the platform credential store, [`MemoryStore`] keeps everything
//! in-process and doubles as the canonical test seam.

mod keyring;

pub use self::keyring::KeyringStore;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;

/// Keyed string storage for short-lived secrets and session tokens.
///
/// Implementations must keep values within the client's trust boundary.
/// `get` reports an absent key as `Ok(None)` and `delete` is idempotent;
/// only backend failures surface as errors.
///
/// There is no compare-and-delete primitive, so a read-then-delete sequence
/// is not atomic across processes sharing a backend. Callers that race on
/// the same key must tolerate one of them observing `None`.
pub trait SecretStore {
    /// Saves `value` under `key`, overwriting any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    fn save(&self, key: &str, value: &str) -> Result<()>;

    /// Reads the value stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails. A missing key is not an
    /// error.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Removes the value stored under `key`. No-op if already absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend delete fails.
    fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory [`SecretStore`] backed by a shared map.
///
/// Clones share the same underlying map, so a test can hold onto a clone
/// and inspect what the code under test stored. Suitable for ephemeral
/// single-process sessions and as the canonical test double.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SecretStore for MemoryStore {
    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_save_get_roundtrip() {
        let store = MemoryStore::new();
        store.save("key", "value").unwrap();
        assert_eq!(store.get("key").unwrap(), Some("value".to_string()));
    }

    #[test]
    fn test_get_absent_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_save_overwrites() {
        let store = MemoryStore::new();
        store.save("key", "first").unwrap();
        store.save("key", "second").unwrap();
        assert_eq!(store.get("key").unwrap(), Some("second".to_string()));
    }

    #[test]
    fn test_delete_removes_and_is_idempotent() {
        let store = MemoryStore::new();
        store.save("key", "value").unwrap();

        store.delete("key").unwrap();
        assert_eq!(store.get("key").unwrap(), None);

        // Second delete of the same key is a no-op.
        store.delete("key").unwrap();
    }

    #[test]
    fn test_clones_share_state() {
        let store = MemoryStore::new();
        let observer = store.clone();

        store.save("shared", "value").unwrap();
        assert_eq!(observer.get("shared").unwrap(), Some("value".to_string()));
    }
}
