/// Authentication extractors and utilities
///
/// Token issuance belongs to the surrounding platform. This service only
/// verifies bearer tokens and turns them into an `Owner` principal.
use crate::{
    context::AppContext,
    error::{PinError, PinResult},
    pin_store::{Owner, OwnerType},
};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id
    pub sub: String,
    /// `human` or `agent`; humans when absent
    #[serde(default)]
    pub kind: Option<OwnerType>,
    pub exp: usize,
}

/// Resolves a bearer token to a principal
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> PinResult<Owner>;
}

/// HS256 JWT verification with a shared secret
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(jwt_secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Allow some clock skew (5 minutes)
        validation.leeway = 300;

        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, token: &str) -> PinResult<Owner> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            tracing::warn!("JWT verification failed: {}", e);
            match e.kind() {
                ErrorKind::ExpiredSignature => PinError::Authentication("Token has expired".to_string()),
                ErrorKind::InvalidSignature => {
                    PinError::Authentication("Invalid token signature".to_string())
                }
                _ => PinError::Authentication("Invalid token".to_string()),
            }
        })?;

        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(PinError::Authentication("Invalid token: missing 'sub' claim".to_string()));
        }

        Ok(Owner::new(claims.sub, claims.kind.unwrap_or(OwnerType::Human)))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Authenticated principal for the current request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal: Owner,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = PinError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| PinError::Authentication("Missing authorization header".to_string()))?;

        let principal = state.authenticator.authenticate(&token).await?;

        Ok(AuthContext { principal })
    }
}
