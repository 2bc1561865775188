//! Secret storage backed by the system keyring.
//!
//! Uses the platform's native credential storage:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager

use keyring::Entry;
use tracing::{debug, warn};

use super::SecretStore;
use crate::error::Result;

/// [`SecretStore`] adapter over the platform keyring.
///
/// Entries are scoped to a service name so multiple applications (or test
/// runs) do not collide. Values never leave the local credential store.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    /// Creates a store scoped to the given keyring service name.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Ok(Entry::new(&self.service, key)?)
    }
}

impl SecretStore for KeyringStore {
    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?.set_password(value)?;
        debug!("stored keyring secret for {key}");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => {
                debug!("no keyring secret found for {key}");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => {
                debug!("deleted keyring secret for {key}");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                debug!("no keyring secret to delete for {key}");
                Ok(())
            }
            Err(e) => {
                warn!("failed to delete keyring secret for {key}: {e}");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // Note: These tests interact with the actual system keyring.
    // They are marked as ignored by default to avoid polluting the keyring
    // during automated testing. Run manually with `cargo test -- --ignored`

    use super::*;

    #[test]
    #[ignore = "Interacts with system keyring"]
    fn test_store_and_retrieve_secret() {
        let store = KeyringStore::new("tally-oauth-test");

        store.save("test_key", "test_value").unwrap();
        assert_eq!(
            store.get("test_key").unwrap(),
            Some("test_value".to_string())
        );

        // Cleanup
        store.delete("test_key").unwrap();
        assert_eq!(store.get("test_key").unwrap(), None);
    }

    #[test]
    #[ignore = "Interacts with system keyring"]
    fn test_delete_absent_is_noop() {
        let store = KeyringStore::new("tally-oauth-test");
        store.delete("never_stored").unwrap();
    }
}
