/// JWT minting and validation.
///
/// Two token types are issued per login: a short-lived access token and a
/// long-lived refresh token. Both are HS256-signed and carry
/// `typ ∈ {access, refresh}`, `sub` (the user id), `iss`, `iat`, `exp`, and
/// a random `jti`. The refresh token is additionally hashed (SHA-256 hex)
/// before it touches the sessions table; the plaintext never reaches the
/// store.
///
/// # Security
///
/// - Algorithm is pinned to HS256; tokens signed with anything else are
///   rejected.
/// - The signing secret must be at least 32 bytes, checked at construction.
/// - Issuer and token type are validated on every parse.
/// - Clock skew leeway is configurable (default 60s).

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Error;

/// Minimum acceptable HMAC secret length in bytes.
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// Claims carried by every taskhive token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Token type discriminator.
    pub typ: TokenType,

    /// Subject: the user id, as a decimal string.
    pub sub: String,

    pub iss: String,
    pub iat: i64,
    pub exp: i64,

    /// Random unique token id, used by the blacklist.
    pub jti: String,
}

impl Claims {
    /// Parses the subject back into a user id.
    pub fn user_id(&self) -> Result<i64, Error> {
        self.sub.parse().map_err(|_| Error::InvalidToken)
    }
}

/// Signs and validates taskhive tokens with a single shared secret.
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    leeway: Duration,
}

impl TokenSigner {
    /// # Errors
    ///
    /// Returns an internal error when the secret is shorter than 32 bytes;
    /// this is a construction-time invariant, not a request-time failure.
    pub fn new(secret: &str, issuer: &str, leeway: Duration) -> Result<Self, Error> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::Internal(
                "jwt secret must be at least 32 bytes".to_string(),
            ));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            leeway,
        })
    }

    /// Mints a token for `user_id` expiring after `ttl`.
    pub fn mint(&self, user_id: i64, typ: TokenType, ttl: Duration) -> Result<String, Error> {
        let now = Utc::now();
        let claims = Claims {
            typ,
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::from_std(ttl).unwrap_or_default()).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("token signing failed: {e}")))
    }

    /// Validates signature, algorithm, expiry (with leeway), issuer, and
    /// token type. Every failure collapses to [`Error::InvalidToken`] so
    /// the caller cannot leak which check tripped.
    pub fn parse(&self, token: &str, expected: TokenType) -> Result<Claims, Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway.as_secs();
        validation.set_issuer(&[self.issuer.as_str()]);

        let data =
            decode::<Claims>(token, &self.decoding, &validation).map_err(|_| Error::InvalidToken)?;
        if data.claims.typ != expected {
            return Err(Error::InvalidToken);
        }
        Ok(data.claims)
    }
}

/// SHA-256 hex digest of a token, the form stored in `sessions.token_hash`.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
