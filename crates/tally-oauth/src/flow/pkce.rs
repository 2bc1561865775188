//! PKCE (Proof Key for Code Exchange) verifier and challenge management.
//!
//! PKCE (RFC 7636) binds an authorization code to the public client that
//! requested it, defeating code-interception attacks. This module generates
//! code verifiers, derives code challenges, and manages the verifier's
//! storage lifecycle: stored under a one-time random key at initiation,
//! fetched and invalidated when the redirect callback arrives.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::Result;
use crate::storage::SecretStore;

/// Length of a generated code verifier, in characters.
const CODE_VERIFIER_LEN: usize = 43;

/// Length of the random storage key that doubles as the OAuth `state`.
const STORAGE_KEY_LEN: usize = 20;

/// Generates a random code verifier.
///
/// Returns exactly 43 characters from the unreserved URI set: 32 bytes from
/// a cryptographically secure source, base64url-encoded without padding.
/// Every call is independent; collisions do not occur in practice.
#[must_use]
pub fn generate_code_verifier() -> String {
    let random_bytes: Vec<u8> = (0..32).map(|_| thread_rng().r#gen::<u8>()).collect();
    let verifier = URL_SAFE_NO_PAD.encode(random_bytes);
    debug_assert_eq!(verifier.len(), CODE_VERIFIER_LEN);
    verifier
}

/// Computes the code challenge for a verifier.
///
/// The paired authorization server expects standard Base64 over the
/// lowercase hex encoding of the SHA-256 digest, not the RFC 7636
/// Base64URL over the raw digest. Changing this encoding breaks the token
/// exchange against that server.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let digest_hex = hex::encode(hasher.finalize());
    STANDARD.encode(digest_hex)
}

/// Generates a random alphanumeric storage key.
fn generate_storage_key() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STORAGE_KEY_LEN)
        .map(char::from)
        .collect()
}

/// Manages code verifiers and their storage keys.
///
/// The storage key returned by [`store_code_verifier`] becomes the OAuth
/// `state` parameter, binding the verifier to one flow instance: the state
/// round-trips through the authorization server while the verifier itself
/// never appears in a URL.
///
/// [`store_code_verifier`]: PkceService::store_code_verifier
#[derive(Debug, Clone)]
pub struct PkceService<S> {
    key_storage: S,
    key_prefix: String,
}

impl<S: SecretStore> PkceService<S> {
    /// Creates a PKCE service over the given verifier store.
    #[must_use]
    pub fn new(key_storage: S) -> Self {
        Self {
            key_storage,
            key_prefix: String::new(),
        }
    }

    /// Namespaces stored verifier keys with a prefix.
    ///
    /// The prefix is applied to storage operations only; the key handed
    /// back to callers (and used as the OAuth `state`) stays unprefixed.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Stores a code verifier under a fresh random key.
    ///
    /// Returns the unprefixed key, which the flow controller sends as the
    /// OAuth `state` parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the verifier store write fails.
    pub fn store_code_verifier(&self, verifier: &str) -> Result<String> {
        let key = generate_storage_key();
        self.key_storage.save(&self.storage_key(&key), verifier)?;
        debug!("stored code verifier under key {key}");
        Ok(key)
    }

    /// Fetches the code verifier stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the verifier store read fails. A missing
    /// verifier is not an error.
    pub fn get_code_verifier(&self, key: &str) -> Result<Option<String>> {
        self.key_storage.get(&self.storage_key(key))
    }

    /// Deletes the code verifier stored under `key`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the verifier store delete fails.
    pub fn delete_code_verifier(&self, key: &str) -> Result<()> {
        self.key_storage.delete(&self.storage_key(key))
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_verifier_length_and_charset() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 43);
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_verifier_uniqueness() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let verifier = generate_code_verifier();
            assert!(seen.insert(verifier), "generated duplicate code verifier");
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_challenge_known_vector() {
        // Pinned against the paired authorization server's expectation.
        assert_eq!(
            generate_code_challenge("code-verifier"),
            "YTlkODBiMmQxYWY1YjFhMTQ3NGZhMGQ2N2Q2NTM2ZjE1MzRmMjIyZWRlZjcyOWM0MDY3MDQ2ZGNlNjlkYzNkOA=="
        );
    }

    #[test]
    fn test_challenge_deterministic() {
        let verifier = generate_code_verifier();
        assert_eq!(
            generate_code_challenge(&verifier),
            generate_code_challenge(&verifier)
        );
    }

    #[test]
    fn test_storage_key_shape() {
        let key = generate_storage_key();
        assert_eq!(key.len(), 20);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_store_get_delete_roundtrip() {
        let service = PkceService::new(MemoryStore::new()).with_key_prefix("app.tally.");
        let verifier = generate_code_verifier();

        let key = service.store_code_verifier(&verifier).unwrap();
        assert_eq!(service.get_code_verifier(&key).unwrap(), Some(verifier));

        service.delete_code_verifier(&key).unwrap();
        assert_eq!(service.get_code_verifier(&key).unwrap(), None);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let service = PkceService::new(MemoryStore::new()).with_key_prefix("app.tally.");
        let key = service.store_code_verifier("verifier").unwrap();

        service.delete_code_verifier(&key).unwrap();
        service.delete_code_verifier(&key).unwrap();
    }

    #[test]
    fn test_key_prefix_namespaces_storage() {
        let store = MemoryStore::new();
        let service = PkceService::new(store.clone()).with_key_prefix("app.tally.");

        let key = service.store_code_verifier("verifier").unwrap();

        // The returned key is unprefixed; the stored entry is not.
        assert!(!key.starts_with("app.tally."));
        assert_eq!(
            store.get(&format!("app.tally.{key}")).unwrap(),
            Some("verifier".to_string())
        );
        assert_eq!(store.get(&key).unwrap(), None);
    }

    proptest! {
        // The challenge is Base64 over the hex text of the digest; decoding
        // it must recover the lowercase hex of SHA-256(verifier) for any
        // input, not just the pinned vector.
        #[test]
        fn challenge_encodes_hex_digest(verifier in ".*") {
            let challenge = generate_code_challenge(&verifier);
            let decoded = STANDARD.decode(challenge).unwrap();

            let mut hasher = Sha256::new();
            hasher.update(verifier.as_bytes());
            let expected_hex = hex::encode(hasher.finalize());

            prop_assert_eq!(decoded, expected_hex.into_bytes());
        }
    }
}
