use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::AppError;

pub const TOKEN_ISSUER: &str = "stuudia-signup";
pub const TOKEN_AUDIENCE: &str = "stuudia-app";
/// Sign-up links expire after one day.
pub const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

// Plausible wall-clock window in seconds (2023-11 .. 2033-05). A clock outside
// it signs tokens that are already expired or valid for decades.
const MIN_SANE_EPOCH: i64 = 1_700_000_000;
const MAX_SANE_EPOCH: i64 = 2_000_000_000;

/// Claims carried by a sign-up token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupClaims {
    pub lead_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Issues HS256 sign-up tokens for captured leads.
#[derive(Clone)]
pub struct TokenIssuer {
    key: EncodingKey,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(secret: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_bytes()),
            clock,
        }
    }

    pub fn create_signup_token(
        &self,
        lead_id: &str,
        email: &str,
        nonce: Option<String>,
    ) -> Result<String, AppError> {
        let now = self.clock.now_secs();
        if now <= MIN_SANE_EPOCH || now >= MAX_SANE_EPOCH {
            return Err(AppError::Token(format!(
                "System clock looks wrong ({}), refusing to sign",
                now
            )));
        }

        let claims = SignupClaims {
            lead_id: lead_id.to_string(),
            email: email.to_string(),
            nonce,
            iat: now,
            exp: now + TOKEN_TTL_SECS,
            iss: TOKEN_ISSUER.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
        };

        Ok(encode(&Header::default(), &claims, &self.key)?)
    }

    /// `{base}/j/{token}` with a fresh nonce.
    pub fn generate_signup_link(
        &self,
        lead_id: &str,
        email: &str,
        base_url: &str,
    ) -> Result<String, AppError> {
        let token = self.create_signup_token(lead_id, email, Some(Uuid::new_v4().to_string()))?;
        Ok(format!("{}/j/{}", base_url.trim_end_matches('/'), token))
    }
}
