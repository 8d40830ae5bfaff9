//! JWT token validation
//! Tokens are issued by the identity service; this side only validates them.

use crate::{config::AppConfig, context::PrincipalKind, error::AppError};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (principal ID)
    pub sub: String,

    /// Principal roles
    #[serde(default)]
    pub roles: Vec<String>,

    /// Principal kind (user or service), defaults to user
    #[serde(default)]
    pub kind: Option<PrincipalKind>,

    /// Issued at
    pub iat: i64,

    /// Expiration
    pub exp: i64,
}

impl Claims {
    pub fn principal_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Unauthorized)
    }
}

/// JWT service
pub struct JwtService {
    decoding_key: DecodingKey,
}

impl JwtService {
    /// Create JWT service from config
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let secret = config.security.jwt_secret.expose_secret();

        // Ensure secret is at least 32 bytes for HS256
        if secret.len() < 32 {
            return Err(AppError::Config("JWT secret too short (min 32 chars)".to_string()));
        }

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        })
    }

    /// Validate and decode token
    pub fn validate_token(&self, token: &str) -> Result<Claims, AppError> {
        Ok(decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map_err(|e| {
                tracing::debug!("Token validation failed: {:?}", e);
                AppError::Unauthorized
            })?
            .claims)
    }
}
