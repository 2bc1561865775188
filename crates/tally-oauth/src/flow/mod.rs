//! Client side of the Authorization Code Grant with PKCE.
//!
//! The flow has two phases. [`OAuthFlow::initiate_auth_request`] stores a
//! fresh code verifier and returns the authorization URL for the host to
//! navigate to. After the authorization server redirects back,
//! [`OAuthFlow::get_redirect_result`] consumes the callback: it retrieves
//! and invalidates the matching verifier, exchanges the authorization code
//! for tokens, and persists them. When a refresh token is already stored,
//! the same entry point rotates it instead of inspecting the callback.

mod pkce;

pub use pkce::{PkceService, generate_code_challenge, generate_code_verifier};

use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::storage::SecretStore;
use crate::token::{ErrorResponse, GrantRequest, TokenInfo, TokenResponse};

/// Session store key for the last-known access token.
const ACCESS_TOKEN_KEY: &str = "access_token";

/// Session store key for the last-known refresh token.
const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Session store key for the access-token expiry timestamp.
const TOKEN_EXPIRY_KEY: &str = "expiry_token";

/// Flow controller configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Authorization endpoint the user is redirected to.
    pub authorize_url: Url,
    /// Token endpoint for code exchange and refresh grants.
    pub token_url: Url,
    /// Redirect URI the authorization server sends the user back to.
    pub redirect_uri: String,
    /// Response types requested at authorization (comma-joined on the wire).
    pub response_types: Vec<String>,
}

impl FlowConfig {
    /// Creates a flow configuration. Response types default to `["code"]`.
    ///
    /// # Errors
    ///
    /// Returns an error if either endpoint URL is invalid.
    pub fn new(
        authorize_url: impl AsRef<str>,
        token_url: impl AsRef<str>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            authorize_url: Url::parse(authorize_url.as_ref())?,
            token_url: Url::parse(token_url.as_ref())?,
            redirect_uri: redirect_uri.into(),
            response_types: vec!["code".to_string()],
        })
    }

    /// Sets the response types requested in the authorization redirect.
    #[must_use]
    pub fn with_response_types(mut self, response_types: Vec<String>) -> Self {
        self.response_types = response_types;
        self
    }
}

/// Drives the two protocol phases and persists resulting tokens.
///
/// Generic over the verifier store `V` (held by the PKCE service) and the
/// session store `S`. The session store is owned exclusively by the flow:
/// all three session fields are overwritten together on every successful
/// grant, never partially updated.
#[derive(Debug)]
pub struct OAuthFlow<V, S> {
    pkce: PkceService<V>,
    session: S,
    config: FlowConfig,
    http_client: Client,
}

impl<V: SecretStore, S: SecretStore> OAuthFlow<V, S> {
    /// Creates a flow controller.
    #[must_use]
    pub fn new(pkce: PkceService<V>, session: S, config: FlowConfig) -> Self {
        Self {
            pkce,
            session,
            config,
            http_client: Client::new(),
        }
    }

    /// Starts the authorization phase.
    ///
    /// Generates and stores a fresh code verifier, derives its challenge,
    /// and returns the authorization URL. The host is expected to navigate
    /// the user to it; the in-process flow ends here until the redirect
    /// comes back.
    ///
    /// No `code_challenge_method` is sent: the paired authorization server
    /// implicitly assumes SHA-256.
    ///
    /// # Errors
    ///
    /// Returns an error if the verifier store write fails.
    pub fn initiate_auth_request(&self) -> Result<Url> {
        let code_verifier = generate_code_verifier();
        let state = self.pkce.store_code_verifier(&code_verifier)?;
        let code_challenge = generate_code_challenge(&code_verifier);

        let mut url = self.config.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", &self.config.response_types.join(","))
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", &state)
            .append_pair("code_challenge", &code_challenge);

        debug!("built authorization redirect with state {state}");
        Ok(url)
    }

    /// Completes the flow after a page load, typically at host startup.
    ///
    /// If a refresh token is already persisted, it is rotated immediately
    /// and the callback URL is not inspected: an existing session takes
    /// precedence over a fresh code exchange. Otherwise the callback's
    /// `state` and `code` select a stored verifier, which is deleted before
    /// the exchange is issued so a replayed callback cannot reuse it.
    ///
    /// Returns `Ok(None)` when the URL carries no callback, or when the
    /// `state` matches no stored verifier (expired, already consumed, or
    /// forged) — both are normal page loads, not errors.
    ///
    /// # Errors
    ///
    /// Returns an error if a token grant is rejected by the server, the
    /// response is malformed, or a storage operation fails.
    pub async fn get_redirect_result(&self, current_url: &Url) -> Result<Option<TokenInfo>> {
        if let Some(info) = self.refresh_session().await? {
            return Ok(Some(info));
        }

        let Some((state, code)) = callback_params(current_url) else {
            return Ok(None);
        };

        let Some(code_verifier) = self.pkce.get_code_verifier(&state)? else {
            warn!("no code verifier for callback state {state}");
            return Ok(None);
        };

        // Single use: the verifier is gone before the exchange is issued,
        // so a duplicated callback cannot replay it even if the exchange
        // itself fails.
        self.pkce.delete_code_verifier(&state)?;

        let info = self
            .request_token(GrantRequest::AuthorizationCode {
                code,
                code_verifier,
            })
            .await?;

        self.store_token_info(&info)?;
        Ok(Some(info))
    }

    /// Reads the persisted session tokens, if a complete set exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store read fails or the stored
    /// expiry is not a valid timestamp.
    pub fn session_tokens(&self) -> Result<Option<TokenInfo>> {
        let (Some(access_token), Some(refresh_token), Some(expiry)) = (
            self.session.get(ACCESS_TOKEN_KEY)?,
            self.session.get(REFRESH_TOKEN_KEY)?,
            self.session.get(TOKEN_EXPIRY_KEY)?,
        ) else {
            return Ok(None);
        };

        let expires_at = expiry
            .parse()
            .map_err(|_| Error::InvalidResponse(format!("malformed session expiry: {expiry}")))?;

        Ok(Some(TokenInfo {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    /// Rotates the stored refresh token, if one exists.
    ///
    /// Rotation is attempted on every call; expiry is not pre-checked.
    async fn refresh_session(&self) -> Result<Option<TokenInfo>> {
        let Some(refresh_token) = self.session.get(REFRESH_TOKEN_KEY)? else {
            return Ok(None);
        };

        let info = self
            .request_token(GrantRequest::RefreshToken { refresh_token })
            .await?;

        self.store_token_info(&info)?;
        Ok(Some(info))
    }

    /// Sends a grant to the token endpoint and normalizes the response.
    async fn request_token(&self, grant: GrantRequest) -> Result<TokenInfo> {
        debug!("requesting {} grant", grant.grant_type());

        let response = self
            .http_client
            .post(self.config.token_url.clone())
            .json(&grant)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Ok(error) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(error.into_error());
            }
            return Err(Error::InvalidResponse(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token_response: TokenResponse = response.json().await?;
        Ok(TokenInfo::from(token_response))
    }

    /// Overwrites the whole session with a new token set.
    fn store_token_info(&self, info: &TokenInfo) -> Result<()> {
        self.session.save(ACCESS_TOKEN_KEY, &info.access_token)?;
        self.session.save(REFRESH_TOKEN_KEY, &info.refresh_token)?;
        self.session
            .save(TOKEN_EXPIRY_KEY, &info.expires_at.to_string())?;
        Ok(())
    }
}

/// Extracts `state` and `code` from a callback URL's query string.
fn callback_params(url: &Url) -> Option<(String, String)> {
    let mut state = None;
    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "state" => state = Some(value.into_owned()),
            "code" => code = Some(value.into_owned()),
            _ => {}
        }
    }
    Some((state?, code?))
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
    use crate::storage::MemoryStore;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    const KEY_PREFIX: &str = "app.tally.";

    fn test_config(server: &ServerGuard) -> FlowConfig {
        FlowConfig::new(
            format!("{}/authorize", server.url()),
            format!("{}/oauth/token", server.url()),
            "http://localhost:3000/",
        )
        .unwrap()
        .with_response_types(vec!["code".to_string(), "id_token".to_string()])
    }

    fn test_flow(
        server: &ServerGuard,
    ) -> (OAuthFlow<MemoryStore, MemoryStore>, MemoryStore, MemoryStore) {
        let verifier_store = MemoryStore::new();
        let session_store = MemoryStore::new();
        let pkce = PkceService::new(verifier_store.clone()).with_key_prefix(KEY_PREFIX);
        let flow = OAuthFlow::new(pkce, session_store.clone(), test_config(server));
        (flow, verifier_store, session_store)
    }

    fn query_map(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn token_body(access: &str, refresh: &str, expires_at: i64) -> String {
        json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_at": expires_at,
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_initiate_builds_redirect_bound_to_stored_verifier() {
        let server = Server::new_async().await;
        let (flow, verifier_store, _) = test_flow(&server);

        let url = flow.initiate_auth_request().unwrap();
        let params = query_map(&url);

        assert_eq!(params.len(), 4);
        assert_eq!(params["response_type"], "code,id_token");
        assert_eq!(params["redirect_uri"], "http://localhost:3000/");

        let state = &params["state"];
        assert_eq!(state.len(), 20);

        // The state is a live key in the verifier store, and the challenge
        // in the URL verifies against the verifier stored under it.
        let verifier = verifier_store
            .get(&format!("{KEY_PREFIX}{state}"))
            .unwrap()
            .unwrap();
        assert_eq!(params["code_challenge"], generate_code_challenge(&verifier));
    }

    #[tokio::test]
    async fn test_initiate_omits_challenge_method() {
        let server = Server::new_async().await;
        let (flow, _, _) = test_flow(&server);

        let url = flow.initiate_auth_request().unwrap();
        assert!(!query_map(&url).contains_key("code_challenge_method"));
    }

    #[tokio::test]
    async fn test_no_callback_returns_none_without_exchange() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .expect(0)
            .create_async()
            .await;
        let (flow, _, _) = test_flow(&server);

        let current = Url::parse("http://localhost:3000/").unwrap();
        assert_eq!(flow.get_redirect_result(&current).await.unwrap(), None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_state_fails_closed_without_exchange() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .expect(0)
            .create_async()
            .await;
        let (flow, _, _) = test_flow(&server);

        let current = Url::parse("http://localhost:3000/?code=abc&state=forged").unwrap();
        assert_eq!(flow.get_redirect_result(&current).await.unwrap(), None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_code_exchange_persists_and_consumes_verifier() {
        let mut server = Server::new_async().await;
        let (flow, verifier_store, session_store) = test_flow(&server);

        let state = flow.pkce.store_code_verifier("the-verifier").unwrap();
        let mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::Json(json!({
                "grant_type": "authorization_code",
                "code": "auth-code",
                "code_verifier": "the-verifier",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(token_body("new-access", "new-refresh", 1999999999))
            .create_async()
            .await;

        let current =
            Url::parse(&format!("http://localhost:3000/?code=auth-code&state={state}")).unwrap();
        let info = flow.get_redirect_result(&current).await.unwrap().unwrap();

        mock.assert_async().await;
        assert_eq!(
            info,
            TokenInfo {
                access_token: "new-access".to_string(),
                refresh_token: "new-refresh".to_string(),
                expires_at: 1999999999,
            }
        );

        // All three session fields were overwritten.
        assert_eq!(
            session_store.get("access_token").unwrap().as_deref(),
            Some("new-access")
        );
        assert_eq!(
            session_store.get("refresh_token").unwrap().as_deref(),
            Some("new-refresh")
        );
        assert_eq!(
            session_store.get("expiry_token").unwrap().as_deref(),
            Some("1999999999")
        );

        // Single use: the verifier is gone, so a second tab replaying the
        // same callback (fresh session, shared verifier store) fails closed.
        assert_eq!(flow.pkce.get_code_verifier(&state).unwrap(), None);
        let second_tab = OAuthFlow::new(
            PkceService::new(verifier_store).with_key_prefix(KEY_PREFIX),
            MemoryStore::new(),
            test_config(&server),
        );
        assert_eq!(second_tab.get_redirect_result(&current).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stored_refresh_token_short_circuits_callback() {
        let mut server = Server::new_async().await;
        let (flow, _, session_store) = test_flow(&server);

        session_store.save("access_token", "old-access").unwrap();
        session_store.save("refresh_token", "old-refresh").unwrap();
        session_store.save("expiry_token", "1000000000").unwrap();

        // A callback is also present in the URL; the refresh branch must
        // win and the endpoint must only ever see a refresh grant.
        let state = flow.pkce.store_code_verifier("pending-verifier").unwrap();
        let mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::Json(json!({
                "grant_type": "refresh_token",
                "refresh_token": "old-refresh",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(token_body("rotated-access", "rotated-refresh", 2111111111))
            .create_async()
            .await;

        let current =
            Url::parse(&format!("http://localhost:3000/?code=auth-code&state={state}")).unwrap();
        let info = flow.get_redirect_result(&current).await.unwrap().unwrap();

        mock.assert_async().await;
        assert_eq!(info.access_token, "rotated-access");
        assert_eq!(info.refresh_token, "rotated-refresh");

        // Rotation replaced both tokens in the session store.
        assert_eq!(
            session_store.get("refresh_token").unwrap().as_deref(),
            Some("rotated-refresh")
        );
        assert_eq!(
            session_store.get("expiry_token").unwrap().as_deref(),
            Some("2111111111")
        );
    }

    #[tokio::test]
    async fn test_rejected_refresh_propagates_and_keeps_session() {
        let mut server = Server::new_async().await;
        let (flow, _, session_store) = test_flow(&server);

        session_store.save("refresh_token", "stale").unwrap();
        let mock = server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "invalid_grant", "error_description": "revoked"}"#)
            .create_async()
            .await;

        let current = Url::parse("http://localhost:3000/").unwrap();
        let err = flow.get_redirect_result(&current).await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, Error::OAuth { ref error, .. } if error == "invalid_grant"));
        assert_eq!(
            session_store.get("refresh_token").unwrap().as_deref(),
            Some("stale")
        );
    }

    #[tokio::test]
    async fn test_non_json_failure_surfaces_status_and_body() {
        let mut server = Server::new_async().await;
        let (flow, _, _) = test_flow(&server);

        let state = flow.pkce.store_code_verifier("the-verifier").unwrap();
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let current =
            Url::parse(&format!("http://localhost:3000/?code=auth-code&state={state}")).unwrap();
        let err = flow.get_redirect_result(&current).await.unwrap_err();

        assert!(matches!(err, Error::InvalidResponse(ref msg) if msg.contains("502")));
        // The verifier was still consumed before the failed exchange.
        assert_eq!(flow.pkce.get_code_verifier(&state).unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_an_error() {
        let mut server = Server::new_async().await;
        let (flow, _, _) = test_flow(&server);

        let state = flow.pkce.store_code_verifier("the-verifier").unwrap();
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "only-this"}"#)
            .create_async()
            .await;

        let current =
            Url::parse(&format!("http://localhost:3000/?code=auth-code&state={state}")).unwrap();
        assert!(flow.get_redirect_result(&current).await.is_err());
    }

    #[tokio::test]
    async fn test_session_tokens_roundtrip() {
        let server = Server::new_async().await;
        let (flow, _, session_store) = test_flow(&server);

        assert_eq!(flow.session_tokens().unwrap(), None);

        session_store.save("access_token", "access").unwrap();
        session_store.save("refresh_token", "refresh").unwrap();
        session_store.save("expiry_token", "1999999999").unwrap();

        assert_eq!(
            flow.session_tokens().unwrap(),
            Some(TokenInfo {
                access_token: "access".to_string(),
                refresh_token: "refresh".to_string(),
                expires_at: 1999999999,
            })
        );
    }

    /// Session store wrapper that logs the order of `save` calls.
    #[derive(Clone)]
    struct RecordingStore {
        inner: MemoryStore,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                log: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl SecretStore for RecordingStore {
        fn save(&self, key: &str, value: &str) -> crate::Result<()> {
            self.log.lock().unwrap().push(key.to_string());
            self.inner.save(key, value)
        }

        fn get(&self, key: &str) -> crate::Result<Option<String>> {
            self.inner.get(key)
        }

        fn delete(&self, key: &str) -> crate::Result<()> {
            self.inner.delete(key)
        }
    }

    #[tokio::test]
    async fn test_session_fields_written_in_fixed_order() {
        let mut server = Server::new_async().await;
        let session_store = RecordingStore::new();
        let pkce = PkceService::new(MemoryStore::new()).with_key_prefix(KEY_PREFIX);
        let flow = OAuthFlow::new(pkce, session_store.clone(), test_config(&server));

        let state = flow.pkce.store_code_verifier("the-verifier").unwrap();
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(token_body("access", "refresh", 1999999999))
            .create_async()
            .await;

        let current =
            Url::parse(&format!("http://localhost:3000/?code=auth-code&state={state}")).unwrap();
        flow.get_redirect_result(&current).await.unwrap();

        assert_eq!(
            *session_store.log.lock().unwrap(),
            vec!["access_token", "refresh_token", "expiry_token"]
        );
    }
}
