//! Session identity tokens handed to session instances.

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Token issuer claim.
pub const TOKEN_ISSUER: &str = "oqto-fleet";

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Session ID.
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues the token a session instance uses to call back into the platform.
#[derive(Debug, Clone)]
pub struct SessionTokenIssuer {
    secret: Option<String>,
    ttl_seconds: i64,
}

impl SessionTokenIssuer {
    pub fn new(secret: Option<String>, ttl_days: u32) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            ttl_seconds: i64::from(ttl_days) * 24 * 3600,
        }
    }

    /// Signed HS256 token for `session_id`, or an opaque random token when no
    /// secret is configured.
    pub fn issue(&self, session_id: &str) -> Result<String> {
        let Some(ref secret) = self.secret else {
            return Ok(uuid::Uuid::new_v4().simple().to_string());
        };

        let iat = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: session_id.to_string(),
            iss: TOKEN_ISSUER.to_string(),
            iat,
            exp: iat + self.ttl_seconds,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .context("signing session token")
    }

    /// Decode and validate a token issued by this issuer.
    pub fn verify(&self, token: &str) -> Result<SessionClaims> {
        let secret = self
            .secret
            .as_ref()
            .context("no session token secret configured")?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .context("validating session token")?;

        Ok(data.claims)
    }
}
