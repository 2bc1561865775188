//! # tally-oauth
//!
//! Client-side `OAuth2` Authorization Code Grant with PKCE for Tally
//! applications.
//!
//! ## Features
//!
//! - **PKCE protocol engine**: verifier generation, challenge derivation,
//!   single-use verifier storage keyed by the OAuth `state` parameter
//! - **Two-phase flow controller**: build the authorization redirect, then
//!   complete the code exchange from the callback URL
//! - **Refresh-token rotation**: an existing session is rotated before any
//!   callback is inspected; both tokens are always replaced together
//! - **Pluggable storage**: system keyring or in-memory backends behind one
//!   [`SecretStore`] contract
//!
//! ## Quick Start
//!
//! ```ignore
//! use tally_oauth::{FlowConfig, KeyringStore, OAuthFlow, PkceService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pkce = PkceService::new(KeyringStore::new("tally"))
//!         .with_key_prefix("app.tally.");
//!     let config = FlowConfig::new(
//!         "https://auth.example.com/authorize",
//!         "https://auth.example.com/oauth/token",
//!         "http://localhost:3000/",
//!     )?
//!     .with_response_types(vec!["code".into(), "id_token".into()]);
//!
//!     let flow = OAuthFlow::new(pkce, KeyringStore::new("tally-session"), config);
//!
//!     // Phase 1: send the user to the authorization server.
//!     let auth_url = flow.initiate_auth_request()?;
//!     println!("Visit: {auth_url}");
//!
//!     // Phase 2: after the redirect, hand the callback URL back in.
//!     let callback = url::Url::parse("http://localhost:3000/?code=...&state=...")?;
//!     if let Some(tokens) = flow.get_redirect_result(&callback).await? {
//!         println!("Access token: {}", tokens.access_token);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Security Model
//!
//! The code verifier never appears in a URL: only its SHA-256-derived
//! challenge travels with the redirect, and the verifier is deleted from
//! storage before the token exchange is issued, so a duplicated callback
//! cannot replay it. The random storage key doubles as the OAuth `state`
//! parameter, binding each verifier to one flow instance and providing
//! CSRF protection.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod flow;
pub mod storage;
pub mod token;

pub use error::{Error, Result};
pub use flow::{FlowConfig, OAuthFlow, PkceService};
pub use storage::{KeyringStore, MemoryStore, SecretStore};
pub use token::{GrantRequest, TokenInfo};
