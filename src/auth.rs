//! Password hashing and bearer-token issuance.
//!
//! Passwords are stored as `hex(salt):hex(key)` derived with scrypt. Tokens
//! are HS256 JWTs: a short-lived access token carrying full identity claims
//! and a longer-lived refresh token carrying only the user id.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use scrypt::{scrypt, Params};
use serde::{Deserialize, Serialize};

// scrypt parameters: N = 16384 (log2 = 14), r = 16, p = 1, dkLen = 64.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 16;
const SCRYPT_P: u32 = 1;
const SCRYPT_KEY_LEN: usize = 64;

#[derive(Debug)]
pub enum AuthError {
    Hash(String),
    Token(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Hash(msg) => write!(f, "password hash error: {msg}"),
            AuthError::Token(msg) => write!(f, "token error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

// ---------------------------------------------------------------------------
// Password hashing
// ---------------------------------------------------------------------------

/// Hash a password with scrypt and a fresh 16-byte salt.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt_hex = hex::encode(salt_bytes);
    let key = derive_key(password, &salt_hex)?;
    Ok(format!("{}:{}", salt_hex, hex::encode(key)))
}

/// Verify a password against a hash produced by [`hash_password`].
pub fn verify_password(hash: &str, password: &str) -> Result<bool, AuthError> {
    let (salt_hex, key_hex) = hash
        .split_once(':')
        .ok_or_else(|| AuthError::Hash("invalid password hash format".to_string()))?;
    let expected = hex::decode(key_hex)
        .map_err(|e| AuthError::Hash(format!("invalid hex in password hash: {e}")))?;
    let derived = derive_key(password, salt_hex)?;
    Ok(constant_time_equal(&derived, &expected))
}

fn derive_key(password: &str, salt_hex: &str) -> Result<Vec<u8>, AuthError> {
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, SCRYPT_KEY_LEN)
        .map_err(|e| AuthError::Hash(format!("invalid scrypt params: {e}")))?;
    let mut output = vec![0u8; SCRYPT_KEY_LEN];
    scrypt(password.as_bytes(), salt_hex.as_bytes(), &params, &mut output)
        .map_err(|e| AuthError::Hash(format!("scrypt failed: {e}")))?;
    Ok(output)
}

/// Compare two byte slices without short-circuiting on the first mismatch.
fn constant_time_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: i64,
    pub email: String,
    pub username: String,
    pub token_use: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by a refresh token; deliberately just the user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: i64,
    pub token_use: String,
    pub iat: i64,
    pub exp: i64,
}

/// Access/refresh pair returned by login, register, and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Why a presented token was rejected. `Expired` is reported separately so
/// clients know to refresh rather than re-login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Invalid,
}

/// Sign an access/refresh token pair for a user.
pub fn issue_token_pair(
    user_id: i64,
    email: &str,
    username: &str,
    secret: &str,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
) -> Result<TokenPair, AuthError> {
    let now = chrono::Utc::now().timestamp();
    let header = Header::new(Algorithm::HS256);
    let key = EncodingKey::from_secret(secret.as_bytes());

    let access = AccessClaims {
        sub: user_id,
        email: email.to_string(),
        username: username.to_string(),
        token_use: "access".to_string(),
        iat: now,
        exp: now + access_ttl_secs,
    };
    let access_token = jsonwebtoken::encode(&header, &access, &key)
        .map_err(|e| AuthError::Token(format!("access token signing failed: {e}")))?;

    let refresh = RefreshClaims {
        sub: user_id,
        token_use: "refresh".to_string(),
        iat: now,
        exp: now + refresh_ttl_secs,
    };
    let refresh_token = jsonwebtoken::encode(&header, &refresh, &key)
        .map_err(|e| AuthError::Token(format!("refresh token signing failed: {e}")))?;

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Verify an access token, distinguishing expiry from every other failure.
pub fn verify_access_token(token: &str, secret: &str) -> Result<AccessClaims, TokenError> {
    let claims: AccessClaims = decode_claims(token, secret)?;
    if claims.token_use != "access" {
        return Err(TokenError::Invalid);
    }
    Ok(claims)
}

/// Verify a refresh token. An access token presented here is rejected.
pub fn verify_refresh_token(token: &str, secret: &str) -> Result<RefreshClaims, TokenError> {
    let claims: RefreshClaims = decode_claims(token, secret)?;
    if claims.token_use != "refresh" {
        return Err(TokenError::Invalid);
    }
    Ok(claims)
}

fn decode_claims<T: serde::de::DeserializeOwned>(
    token: &str,
    secret: &str,
) -> Result<T, TokenError> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    match jsonwebtoken::decode::<T>(token, &key, &validation) {
        Ok(data) => Ok(data.claims),
        Err(e) => match e.kind() {
            ErrorKind::ExpiredSignature => Err(TokenError::Expired),
            _ => Err(TokenError::Invalid),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_password("one-day-at-a-time").unwrap();
        let parts: Vec<&str> = hash.split(':').collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 32); // 16-byte salt
        assert_eq!(parts[1].len(), 128); // 64-byte key

        assert!(verify_password(&hash, "one-day-at-a-time").unwrap());
        assert!(!verify_password(&hash, "wrong").unwrap());
    }

    #[test]
    fn salts_differ_between_calls() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
        assert!(verify_password(&a, "same").unwrap());
        assert!(verify_password(&b, "same").unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("no-colon-here", "pw").is_err());
    }

    #[test]
    fn token_pair_roundtrip() {
        let pair = issue_token_pair(7, "a@b.c", "alice", "secret", 3600, 86_400).unwrap();

        let access = verify_access_token(&pair.access_token, "secret").unwrap();
        assert_eq!(access.sub, 7);
        assert_eq!(access.email, "a@b.c");
        assert_eq!(access.username, "alice");

        let refresh = verify_refresh_token(&pair.refresh_token, "secret").unwrap();
        assert_eq!(refresh.sub, 7);
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let pair = issue_token_pair(7, "a@b.c", "alice", "secret", 3600, 86_400).unwrap();
        assert_eq!(
            verify_access_token(&pair.access_token, "other").unwrap_err(),
            TokenError::Invalid
        );
    }

    #[test]
    fn expired_access_token_is_reported_as_expired() {
        let pair = issue_token_pair(7, "a@b.c", "alice", "secret", -10, 86_400).unwrap();
        assert_eq!(
            verify_access_token(&pair.access_token, "secret").unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn token_kinds_do_not_cross_over() {
        let pair = issue_token_pair(7, "a@b.c", "alice", "secret", 3600, 86_400).unwrap();
        // A refresh token is not an access token
        assert_eq!(
            verify_access_token(&pair.refresh_token, "secret").unwrap_err(),
            TokenError::Invalid
        );
        // An access token is not a refresh token
        assert_eq!(
            verify_refresh_token(&pair.access_token, "secret").unwrap_err(),
            TokenError::Invalid
        );
    }
}
