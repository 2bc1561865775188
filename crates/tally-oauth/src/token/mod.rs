//! Token types and grant requests for the token endpoint.

use crate::error::Error;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Clock-skew buffer applied when deciding whether a token is expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Normalized token pair obtained from any successful grant.
///
/// Both tokens are always replaced together: a successful rotation yields a
/// whole new `TokenInfo`, and the rotated-out refresh token is never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Access token string.
    pub access_token: String,
    /// Refresh token for the next rotation.
    pub refresh_token: String,
    /// Absolute expiry of the access token as a Unix timestamp.
    pub expires_at: i64,
}

impl TokenInfo {
    /// Checks if the access token is expired (with a 60 second buffer).
    ///
    /// Provided for hosts that want to gate refreshes on expiry; the flow
    /// controller itself rotates unconditionally.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() + EXPIRY_SKEW_SECS >= self.expires_at
    }

    /// Returns true if the access token is still valid (not expired).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.is_expired()
    }
}

impl From<TokenResponse> for TokenInfo {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: response.expires_at,
        }
    }
}

/// Token response wire shape from the token endpoint.
///
/// The server reports an absolute `expires_at` timestamp rather than the
/// more common `expires_in` delta.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Refresh token.
    pub refresh_token: String,
    /// Unix timestamp when the access token expires.
    pub expires_at: i64,
}

/// Request body for the token endpoint.
///
/// Exactly one grant variant is active per request; the variant selects both
/// the wire shape and the server-side validation path.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
pub enum GrantRequest {
    /// Authorization-code exchange carrying the PKCE code verifier.
    AuthorizationCode {
        /// Authorization code from the redirect callback.
        code: String,
        /// Code verifier matching the challenge sent at authorization time.
        code_verifier: String,
    },
    /// Refresh-token rotation.
    RefreshToken {
        /// The currently stored refresh token.
        refresh_token: String,
    },
}

impl GrantRequest {
    /// Wire value of the `grant_type` field.
    #[must_use]
    pub const fn grant_type(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }
}

/// Error response from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,
    /// Error description.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Converts to an Error.
    #[must_use]
    pub fn into_error(self) -> Error {
        Error::oauth_error(self.error, self.error_description)
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
    use serde_json::json;

    #[test]
    fn test_authorization_code_grant_wire_shape() {
        let grant = GrantRequest::AuthorizationCode {
            code: "abc".to_string(),
            code_verifier: "verifier".to_string(),
        };

        let value = serde_json::to_value(&grant).unwrap();
        assert_eq!(
            value,
            json!({
                "grant_type": "authorization_code",
                "code": "abc",
                "code_verifier": "verifier",
            })
        );
        assert_eq!(grant.grant_type(), "authorization_code");
    }

    #[test]
    fn test_refresh_token_grant_wire_shape() {
        let grant = GrantRequest::RefreshToken {
            refresh_token: "refresh123".to_string(),
        };

        let value = serde_json::to_value(&grant).unwrap();
        assert_eq!(
            value,
            json!({
                "grant_type": "refresh_token",
                "refresh_token": "refresh123",
            })
        );
        assert_eq!(grant.grant_type(), "refresh_token");
    }

    #[test]
    fn test_token_info_from_response() {
        let response: TokenResponse = serde_json::from_str(
            r#"{
                "access_token": "access123",
                "refresh_token": "refresh456",
                "expires_at": 1999999999
            }"#,
        )
        .unwrap();

        let info = TokenInfo::from(response);
        assert_eq!(info.access_token, "access123");
        assert_eq!(info.refresh_token, "refresh456");
        assert_eq!(info.expires_at, 1999999999);
    }

    #[test]
    fn test_token_expiry_buffer() {
        let now = Utc::now().timestamp();

        // Nominally valid, but inside the 60 second skew buffer.
        let nearly_expired = TokenInfo {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: now + 30,
        };
        assert!(nearly_expired.is_expired());
        assert!(!nearly_expired.is_valid());

        let valid = TokenInfo {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: now + 3600,
        };
        assert!(!valid.is_expired());
        assert!(valid.is_valid());

        let long_gone = TokenInfo {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: now - 120,
        };
        assert!(long_gone.is_expired());
    }

    #[test]
    fn test_error_response_conversion() {
        let response: ErrorResponse = serde_json::from_str(
            r#"{"error": "invalid_grant", "error_description": "code expired"}"#,
        )
        .unwrap();

        let error = response.into_error();
        assert_eq!(
            error.to_string(),
            "OAuth2 error: invalid_grant - code expired"
        );
    }

    #[test]
    fn test_error_response_description_defaults_empty() {
        let response: ErrorResponse =
            serde_json::from_str(r#"{"error": "invalid_request"}"#).unwrap();
        assert_eq!(response.error_description, "");
    }
}
