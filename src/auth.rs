//! JWT sessions, password hashing, and the token revocation store.

use argon2::Argon2;
use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
};
use dashmap::DashMap;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum AuthError {
    /// JWT encoding failed
    #[error("failed to encode JWT: {0}")]
    JwtEncode(#[from] jsonwebtoken::errors::Error),

    #[error("session token expired")]
    TokenExpired,

    #[error("invalid session token")]
    InvalidToken,

    #[error("failed to hash password")]
    Hashing,
}

/// JWT claims for session tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Ulid,

    /// Token expiration timestamp (Unix epoch seconds)
    pub exp: u64,

    /// Issued at timestamp (Unix epoch seconds)
    pub iat: u64,
}

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Handles JWT token generation and validation.
pub struct SessionManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl_secs: u64,
}

impl SessionManager {
    pub fn new(jwt_secret: &str, token_ttl_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            token_ttl_secs,
        }
    }

    pub fn issue_token(&self, user_id: Ulid) -> Result<String, AuthError> {
        let now = now_secs();
        let claims = Claims {
            user_id,
            exp: now + self.token_ttl_secs,
            iat: now,
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Validate a session token and extract its claims, distinguishing
    /// expiry from everything else.
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::default();
        let token_data =
            decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::InvalidToken,
                }
            })?;
        Ok(token_data.claims)
    }

    pub fn token_ttl_secs(&self) -> u64 {
        self.token_ttl_secs
    }
}

/// Hash a password into a PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| AuthError::Hashing)
}

/// Check a password against a stored PHC string. An unparseable stored
/// hash verifies as false, never as an error the caller must branch on.
pub fn verify_password(password: &str, phc: &str) -> bool {
    PasswordHash::new(phc)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Explicit store for revoked tokens. Each entry carries the token's own
/// expiry, so the sweeper can drop it once the token would no longer
/// verify anyway — the set stays bounded by the token TTL.
pub struct RevokedTokens {
    tokens: DashMap<String, u64>,
}

impl Default for RevokedTokens {
    fn default() -> Self {
        Self::new()
    }
}

impl RevokedTokens {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
        }
    }

    pub fn revoke(&self, token: String, exp: u64) {
        self.tokens.insert(token, exp);
    }

    pub fn is_revoked(&self, token: &str) -> bool {
        self.tokens.contains_key(token)
    }

    /// Drop entries whose tokens have expired. Returns how many were dropped.
    pub fn sweep(&self, now: u64) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, exp| *exp > now);
        before - self.tokens.len()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_and_verify_token() {
        let manager = SessionManager::new("test-secret", 3600);
        let user_id = Ulid::new();
        let token = manager.issue_token(user_id).unwrap();

        let claims = manager.verify_token(&token).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn expired_token_is_distinguished() {
        let manager = SessionManager::new("test-secret", 3600);

        // Forge a token that expired in the past.
        let now = now_secs();
        let claims = Claims {
            user_id: Ulid::new(),
            exp: now - 100,
            iat: now - 200,
        };
        let token = encode(&Header::default(), &claims, &manager.encoding_key).unwrap();

        let result = manager.verify_token(&token);
        assert!(matches!(result, Err(AuthError::TokenExpired)));
    }

    #[test]
    fn garbage_token_is_invalid() {
        let manager = SessionManager::new("test-secret", 3600);
        assert!(matches!(
            manager.verify_token("not-a-jwt"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let a = SessionManager::new("secret-a", 3600);
        let b = SessionManager::new("secret-b", 3600);
        let token = a.issue_token(Ulid::new()).unwrap();
        assert!(matches!(b.verify_token(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn password_hash_roundtrip() {
        let phc = hash_password("hunter2").unwrap();
        assert!(phc.starts_with("$argon2"));
        assert!(verify_password("hunter2", &phc));
        assert!(!verify_password("hunter3", &phc));
        // Two hashes of the same password never collide (random salt).
        assert_ne!(phc, hash_password("hunter2").unwrap());
    }

    #[test]
    fn verify_against_garbage_hash_is_false() {
        assert!(!verify_password("hunter2", "not-a-phc-string"));
    }

    #[test]
    fn revocation_and_sweep() {
        let revoked = RevokedTokens::new();
        let now = now_secs();

        revoked.revoke("live".into(), now + 1000);
        revoked.revoke("stale".into(), now - 1);
        assert!(revoked.is_revoked("live"));
        assert!(revoked.is_revoked("stale"));

        let dropped = revoked.sweep(now);
        assert_eq!(dropped, 1);
        assert!(revoked.is_revoked("live"));
        assert!(!revoked.is_revoked("stale"));
        assert_eq!(revoked.len(), 1);
    }
}
