//! JWT Authentication
//!
//! Validates JWTs from external auth providers (Firebase, Auth0, Supabase, etc.).
//! The server does NOT issue tokens - only validates them and maps the
//! subject to a [`UserId`].

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::env_flag;
use crate::matchmaking::entry::UserId;
use crate::network::protocol::{AuthRequest, ErrorCode};

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format (preferred for external providers).
    pub public_key_pem: Option<String>,
    /// HS256 secret (fallback for simple setups).
    pub secret: Option<String>,
    /// Whether to skip expiry validation (for testing only).
    pub skip_expiry: bool,
    /// Accept a bare `user_id` instead of a token (development only).
    pub allow_anonymous: bool,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: env_flag("AUTH_SKIP_EXPIRY"),
            allow_anonymous: env_flag("AUTH_ALLOW_ANONYMOUS"),
        }
    }

    /// Check if token validation is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Standard JWT claims we expect from auth providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - the user ID at the auth provider.
    pub sub: String,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at timestamp.
    #[serde(default)]
    pub iat: u64,
    /// Issuer (auth provider).
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Map the subject claim to a UserId.
    ///
    /// A numeric subject is used as-is, so ids issued by the account
    /// service line up. Anything else is hashed into the upper half of the
    /// id space.
    pub fn user_id(&self) -> UserId {
        if let Ok(id) = self.sub.parse::<u64>() {
            return UserId::new(id);
        }

        let mut hasher = Sha256::new();
        hasher.update(b"chess-user:");
        hasher.update(self.sub.as_bytes());
        let hash = hasher.finalize();

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash[..8]);
        UserId::new(u64::from_be_bytes(bytes) | 1 << 63)
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No authentication configured on server.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim doesn't match expected value.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim doesn't match expected value.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
}

impl AuthError {
    /// Protocol error code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::Expired => ErrorCode::TokenExpired,
            AuthError::NotConfigured | AuthError::MissingClaim(_) => ErrorCode::AuthFailed,
            _ => ErrorCode::InvalidToken,
        }
    }
}

/// Validate a JWT token and extract claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    if !config.is_configured() {
        return Err(AuthError::NotConfigured);
    }

    let algorithm = if config.public_key_pem.is_some() {
        Algorithm::RS256
    } else {
        Algorithm::HS256
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = std::collections::HashSet::new();

    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }

    if let Some(ref audience) = config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }

    // Tokens without an exp claim are accepted; present ones are enforced
    validation.validate_exp = !config.skip_expiry;

    let token_data: TokenData<TokenClaims> = if let Some(ref pem) = config.public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else if let Some(ref secret) = config.secret {
        let key = DecodingKey::from_secret(secret.as_bytes());
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else {
        return Err(AuthError::NotConfigured);
    };

    let claims = token_data.claims;
    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    Ok(claims)
}

/// Resolve an auth request to a user.
///
/// A token always goes through [`validate_token`]. A bare `user_id` is
/// only trusted when anonymous auth is enabled.
pub fn authenticate(request: &AuthRequest, config: &AuthConfig) -> Result<UserId, AuthError> {
    match (&request.token, request.user_id) {
        (Some(token), _) => validate_token(token, config).map(|claims| claims.user_id()),
        (None, Some(user_id)) if config.allow_anonymous => Ok(user_id),
        (None, Some(_)) => Err(AuthError::NotConfigured),
        (None, None) => Err(AuthError::MissingClaim("token".into())),
    }
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-key-256-bits-long!!";

    fn create_test_token(claims: &TokenClaims, secret: &str) -> String {
        let header = Header::new(Algorithm::HS256);
        let key = EncodingKey::from_secret(secret.as_bytes());
        encode(&header, claims, &key).unwrap()
    }

    fn test_claims(sub: &str) -> TokenClaims {
        let now = Utc::now().timestamp() as u64;
        TokenClaims {
            sub: sub.into(),
            exp: now + 3600,
            iat: now,
            iss: Some("test-issuer".into()),
            aud: Some(serde_json::json!("test-audience")),
        }
    }

    fn secret_config() -> AuthConfig {
        AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_token_validation() {
        let token = create_test_token(&test_claims("user123"), SECRET);

        let claims = validate_token(&token, &secret_config()).unwrap();
        assert_eq!(claims.sub, "user123");
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut claims = test_claims("user123");
        claims.exp = 1;
        let token = create_test_token(&claims, SECRET);

        let result = validate_token(&token, &secret_config());
        assert!(matches!(result, Err(AuthError::Expired)));
        assert_eq!(result.unwrap_err().code(), ErrorCode::TokenExpired);
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let token = create_test_token(&test_claims("user123"), "correct-secret-key-here!!!!!");

        let config = AuthConfig {
            secret: Some("wrong-secret-key-here!!!!!!".into()),
            ..Default::default()
        };

        let result = validate_token(&token, &config);
        assert!(matches!(result, Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_missing_sub_rejected() {
        let token = create_test_token(&test_claims(""), SECRET);

        let result = validate_token(&token, &secret_config());
        assert!(matches!(result, Err(AuthError::MissingClaim(_))));
    }

    #[test]
    fn test_issuer_validation() {
        let token = create_test_token(&test_claims("user123"), SECRET);

        let config = AuthConfig {
            issuer: Some("wrong-issuer".into()),
            ..secret_config()
        };

        let result = validate_token(&token, &config);
        assert!(matches!(result, Err(AuthError::InvalidIssuer)));
    }

    #[test]
    fn test_numeric_subject_is_user_id() {
        assert_eq!(test_claims("4711").user_id(), UserId::new(4711));
    }

    #[test]
    fn test_user_id_derivation() {
        let id1 = test_claims("auth0|abc").user_id();
        let id2 = test_claims("auth0|abc").user_id();
        let id3 = test_claims("auth0|xyz").user_id();

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
        // Derived ids never collide with small numeric ids
        assert!(id1.get() >= 1 << 63);
    }

    #[test]
    fn test_not_configured_error() {
        let result = validate_token("some.jwt.token", &AuthConfig::default());
        assert!(matches!(result, Err(AuthError::NotConfigured)));
    }

    #[test]
    fn test_skip_expiry_for_testing() {
        let mut claims = test_claims("user123");
        claims.exp = 1;
        let token = create_test_token(&claims, SECRET);

        let config = AuthConfig {
            skip_expiry: true,
            ..secret_config()
        };

        assert!(validate_token(&token, &config).is_ok());
    }

    #[test]
    fn test_authenticate_with_token() {
        let token = create_test_token(&test_claims("99"), SECRET);
        let request = AuthRequest { token: Some(token), user_id: None };

        assert_eq!(authenticate(&request, &secret_config()).unwrap(), UserId::new(99));
    }

    #[test]
    fn test_authenticate_anonymous_only_when_allowed() {
        let request = AuthRequest { token: None, user_id: Some(UserId::new(5)) };

        assert!(authenticate(&request, &secret_config()).is_err());

        let config = AuthConfig { allow_anonymous: true, ..Default::default() };
        assert_eq!(authenticate(&request, &config).unwrap(), UserId::new(5));

        let empty = AuthRequest { token: None, user_id: None };
        assert!(matches!(authenticate(&empty, &config), Err(AuthError::MissingClaim(_))));
    }
}
