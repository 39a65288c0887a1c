//! Authentication: bearer tokens and API keys.
//!
//! Tenant id is always and only derived from the authenticated principal —
//! a bearer token's `tenant_id` claim, or the tenant column of an API key
//! row. Nothing in a request body can move a caller across tenants.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use lattice_error::{AuthError, CoreError};

use crate::state::AppContext;

/// Raw API keys look like `lk_<43 url-safe base64 chars>`; only the SHA-256
/// of the whole raw key is ever stored.
pub const API_KEY_PREFIX: &str = "lk_";

/// Bearer token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub:       Uuid,
    /// Tenant scope.
    pub tenant_id: Uuid,
    /// Role names.
    #[serde(default)]
    pub roles:     Vec<String>,
    /// Expiry (seconds since epoch).
    pub exp:       u64,
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct Principal {
    /// User id from the `sub` claim.
    pub user_id:   Uuid,
    /// Tenant scope; every query this request makes is bound to it.
    pub tenant_id: Uuid,
    /// Role names.
    pub roles:     Vec<String>,
}

/// Decode and verify a bearer token.
///
/// # Errors
///
/// `AuthError::InvalidToken` for bad signatures or expired tokens.
pub fn decode_token(token: &str, secret: &str) -> Result<Principal, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AuthError::InvalidToken {
        reason: e.to_string(),
    })?;

    Ok(Principal {
        user_id:   data.claims.sub,
        tenant_id: data.claims.tenant_id,
        roles:     data.claims.roles,
    })
}

impl FromRequestParts<AppContext> for Principal {
    type Rejection = CoreError;

    async fn from_request_parts(
        parts: &mut Parts,
        context: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::MissingToken)?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MissingToken)?;

        Ok(decode_token(token, &context.config.secret_key)?)
    }
}

/// Hash a raw API key for storage and lookup.
#[must_use]
pub fn hash_api_key(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Mint a fresh raw API key. Shown exactly once at creation; only the hash
/// persists.
#[must_use]
pub fn mint_api_key() -> String {
    use base64::Engine;
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "{API_KEY_PREFIX}{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}

/// Validate the shape of a presented API key before touching storage.
///
/// # Errors
///
/// `AuthError::InvalidApiKey` for anything that does not look like a key.
pub fn check_api_key_format(raw: &str) -> Result<(), AuthError> {
    if raw.starts_with(API_KEY_PREFIX) && raw.len() > API_KEY_PREFIX.len() + 16 {
        Ok(())
    } else {
        Err(AuthError::InvalidApiKey)
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    fn token(secret: &str, tenant_id: Uuid) -> String {
        let claims = Claims {
            sub: Uuid::new_v4(),
            tenant_id,
            roles: vec!["analyst".to_string()],
            exp: u64::MAX / 2,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .expect("token encodes")
    }

    #[test]
    fn test_decode_round_trip() {
        let tenant = Uuid::new_v4();
        let principal = decode_token(&token("secret", tenant), "secret").expect("decodes");
        assert_eq!(principal.tenant_id, tenant);
        assert_eq!(principal.roles, vec!["analyst"]);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let err = decode_token(&token("secret", Uuid::new_v4()), "other").expect_err("must fail");
        assert!(matches!(err, AuthError::InvalidToken { .. }));
    }

    #[test]
    fn test_minted_keys_validate_and_hash() {
        let raw = mint_api_key();
        check_api_key_format(&raw).expect("fresh keys are well-formed");
        assert_eq!(hash_api_key(&raw).len(), 64);
        assert_ne!(hash_api_key(&raw), hash_api_key("lk_other-key-material"));
    }

    #[test]
    fn test_malformed_keys_rejected() {
        assert!(check_api_key_format("sk_live_123").is_err());
        assert!(check_api_key_format("lk_short").is_err());
        assert!(check_api_key_format("").is_err());
    }
}
