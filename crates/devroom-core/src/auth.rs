//! Bearer-token verification.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AuthError;

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub email: String,
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
}

impl Claims {
    /// `_id`, else `sub`, else the email.
    pub fn user_id(&self) -> &str {
        self.id
            .as_deref()
            .or(self.sub.as_deref())
            .unwrap_or(&self.email)
    }
}

/// Validates a bearer credential and returns its claims.
pub trait TokenVerifier: Send + Sync + 'static {
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

/// HS256 verifier bound to the configured signing secret, with a denylist of
/// revoked tokens.
///
/// A denylist entry only lives until its token would be rejected as expired
/// anyway, so the list stays bounded by the tokens still in circulation.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    /// Revoked token -> unix time after which decoding rejects it by itself.
    revoked: RwLock<HashMap<String, u64>>,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.revoked.read().map(|r| r.len()).unwrap_or(0);
        write!(f, "JwtVerifier({count} revoked)")
    }
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            revoked: RwLock::new(HashMap::new()),
        }
    }

    /// Reject `token` from now on, even if it is otherwise valid. `expires_at`
    /// is the token's `exp` claim.
    pub fn revoke(&self, token: &str, expires_at: u64) {
        let now = unix_now();
        let deadline = expires_at.saturating_add(self.validation.leeway);
        if let Ok(mut revoked) = self.revoked.write() {
            revoked.retain(|_, until| *until > now);
            if deadline > now {
                revoked.insert(token.to_owned(), deadline);
            }
        }
    }

    fn is_revoked(&self, token: &str) -> bool {
        let now = unix_now();
        let stale = match self.revoked.read() {
            Ok(revoked) => match revoked.get(token) {
                Some(until) if *until > now => return true,
                Some(_) => true,
                None => false,
            },
            Err(_) => false,
        };
        if stale {
            if let Ok(mut revoked) = self.revoked.write() {
                revoked.remove(token);
            }
        }
        false
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        if self.is_revoked(token) {
            return Err(AuthError::Revoked);
        }
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => {
                debug!(error = %e, "token rejected");
                match e.kind() {
                    ErrorKind::ExpiredSignature => Err(AuthError::Expired),
                    _ => Err(AuthError::Invalid(e.to_string())),
                }
            }
        }
    }
}

/// Pick the credential for a handshake: the explicit auth field wins,
/// otherwise `Authorization: Bearer <token>`.
pub fn bearer_token<'a>(auth_field: Option<&'a str>, authorization: Option<&'a str>) -> Option<&'a str> {
    if let Some(token) = auth_field.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(token);
    }
    authorization
        .map(str::trim)
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
pub(crate) fn mint(secret: &str, claims: &Claims) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};
    encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes()))
        .expect("token should encode")
}

#[cfg(test)]
pub(crate) fn claims_for(id: &str, email: &str) -> Claims {
    let now = unix_now();
    Claims {
        email: email.to_owned(),
        id: Some(id.to_owned()),
        sub: None,
        exp: now + 3600,
        iat: now,
    }
}
