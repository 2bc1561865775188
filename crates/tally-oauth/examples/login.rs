//! Example: interactive PKCE login against a Tally authorization server
//!
//! This example demonstrates how to:
//! 1. Configure the two-phase authorization flow
//! 2. Open the authorization URL in a browser
//! 3. Complete the code exchange from the pasted redirect URL
//! 4. Rotate the session via the stored refresh token on a later run
//!
//! ## Prerequisites
//!
//! Set environment variables pointing at your authorization server:
//! ```bash
//! export TALLY_AUTHORIZE_URL="https://auth.example.com/authorize"
//! export TALLY_TOKEN_URL="https://auth.example.com/oauth/token"
//! export TALLY_REDIRECT_URI="http://localhost:3000/"
//! ```
//!
//! ## Running
//!
//! ```bash
//! cargo run --example login
//! ```

use std::env;
use std::io::{self, Write};

use tally_oauth::{FlowConfig, KeyringStore, MemoryStore, OAuthFlow, PkceService};
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tally_oauth=debug")),
        )
        .init();

    let authorize_url = env::var("TALLY_AUTHORIZE_URL")
        .expect("TALLY_AUTHORIZE_URL environment variable not set");
    let token_url =
        env::var("TALLY_TOKEN_URL").expect("TALLY_TOKEN_URL environment variable not set");
    let redirect_uri =
        env::var("TALLY_REDIRECT_URI").unwrap_or_else(|_| "http://localhost:3000/".to_string());

    println!("Tally OAuth2 Example - Authorization Code Grant with PKCE");
    println!("=========================================================\n");

    // Verifiers only live for the duration of this run; the session
    // survives across runs in the system keyring so a second invocation
    // demonstrates refresh-token rotation.
    let pkce = PkceService::new(MemoryStore::new()).with_key_prefix("app.tally.");
    let session = KeyringStore::new("tally-oauth-example");

    let config = FlowConfig::new(&authorize_url, &token_url, redirect_uri)?
        .with_response_types(vec!["code".to_string(), "id_token".to_string()]);
    let flow = OAuthFlow::new(pkce, session, config);

    // A stored refresh token short-circuits the whole authorization phase.
    if flow.session_tokens()?.is_some() {
        println!("Found an existing session; rotating the refresh token...");
        let dummy = Url::parse("http://localhost/")?;
        match flow.get_redirect_result(&dummy).await {
            Ok(Some(tokens)) => {
                println!("✓ Session rotated!");
                println!("  Access token: {}...", &tokens.access_token[..20.min(tokens.access_token.len())]);
                println!("  Expires at: {}", tokens.expires_at);
                return Ok(());
            }
            Ok(None) => println!("No session after all; starting a fresh login.\n"),
            Err(e) => {
                println!("Rotation rejected ({e}); starting a fresh login.\n");
            }
        }
    }

    // Phase 1: build the redirect and hand control to the browser.
    let auth_url = flow.initiate_auth_request()?;
    println!("Opening the authorization URL in your browser:");
    println!("\n{auth_url}\n");
    if opener::open(auth_url.as_str()).is_err() {
        println!("(could not open a browser; please visit the URL manually)");
    }

    // Phase 2: in a real application the redirect lands back on the app's
    // own page; here we paste the full redirect URL instead.
    print!("Paste the full redirect URL you landed on: ");
    io::stdout().flush()?;

    let mut callback = String::new();
    io::stdin().read_line(&mut callback)?;
    let callback = callback.trim();

    if callback.is_empty() {
        println!("\nNo URL entered. Exiting.");
        return Ok(());
    }

    match flow.get_redirect_result(&Url::parse(callback)?).await? {
        Some(tokens) => {
            println!("\n✓ Token exchange successful!");
            println!("  Access token: {}...", &tokens.access_token[..20.min(tokens.access_token.len())]);
            println!("  Expires at: {}", tokens.expires_at);
            println!("\nRun this example again to see refresh-token rotation.");
        }
        None => {
            println!("\nNo usable callback found in that URL (missing code/state,");
            println!("or the login attempt expired). Start over to retry.");
        }
    }

    Ok(())
}
