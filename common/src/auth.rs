// Bearer credential handling
//
// Tokens are issued elsewhere; this service validates them and resolves the
// caller identity and ownership scope used by every schedule lookup.

use crate::errors::AuthError;
use crate::models::{Caller, Scope, UserClaims};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// JWT token service for encoding and decoding tokens
#[derive(Clone)]
pub struct JwtService {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    expiration_hours: i64,
}

impl JwtService {
    #[instrument(skip(secret))]
    pub fn new(secret: &str, expiration_hours: u64) -> Self {
        Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            decoding_key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            expiration_hours: expiration_hours as i64,
        }
    }

    /// Issue a token; used by tooling and tests
    #[instrument(skip(self))]
    pub fn encode_token(
        &self,
        user_id: &str,
        username: &str,
        committee_id: Option<Uuid>,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = UserClaims {
            sub: user_id.to_string(),
            username: username.to_string(),
            committee_id,
            exp: (now + Duration::hours(self.expiration_hours)).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            AuthError::AuthenticationFailed(format!("Failed to encode token: {}", e))
        })
    }

    /// Decode and validate a JWT token
    #[instrument(skip(self, token))]
    pub fn decode_token(&self, token: &str) -> Result<UserClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let token_data =
            decode::<UserClaims>(token, &self.decoding_key, &validation).map_err(|e| {
                warn!(error = %e, "Rejected bearer token");
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::InvalidToken(format!("Token validation failed: {}", e)),
                }
            })?;

        Ok(token_data.claims)
    }

    /// Validate a token and resolve the caller
    ///
    /// Under global sharing every caller works in one pool; otherwise the
    /// token must name the caller's committee.
    pub fn resolve_caller(&self, token: &str, global_sharing: bool) -> Result<Caller, AuthError> {
        let claims = self.decode_token(token)?;
        let scope = if global_sharing {
            Scope::Global
        } else {
            let committee_id = claims.committee_id.ok_or_else(|| {
                AuthError::AuthenticationFailed("Token carries no committee".to_string())
            })?;
            Scope::Committee(committee_id)
        };

        Ok(Caller {
            user_id: claims.sub,
            scope,
        })
    }
}
