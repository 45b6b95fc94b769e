use crate::error::{AppError, AppResult};
use crate::models::Role;
use crate::services::conversation_service::Sender;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tokens are issued elsewhere; this service only verifies them
const JWT_ALGORITHM: Algorithm = Algorithm::RS256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id as a UUID string
    pub sub: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub exp: i64,
}

/// Verifies bearer tokens presented on the WebSocket upgrade
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn from_public_key_pem(public_key_pem: &str) -> AppResult<Self> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| AppError::Config(format!("invalid JWT public key: {e}")))?;

        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.validate_exp = true;

        Ok(Self {
            decoding_key,
            validation,
        })
    }

    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "token rejected");
                AppError::Unauthorized
            })
    }

    /// Verify and turn the claims into the identity used for routing
    pub fn authenticate(&self, token: &str) -> AppResult<Sender> {
        let claims = self.verify(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized)?;

        Ok(Sender {
            user_id,
            role: claims.role,
            display_name: claims.name.filter(|n| !n.trim().is_empty()),
        })
    }
}
