use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};

use crate::error::ApiError;
use crate::models::Id;

/// Why a bearer credential was refused.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    #[error("malformed token")] Malformed,
    #[error("token expired")] Expired,
    #[error("invalid token")] Invalid,
}

/// Claims minted by the token service. The user id travels as `ID`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "ID")]
    pub id: Id,
    pub exp: usize,
}

/// Trusted identity of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Id,
}

/// Access-token verifier. Key material is fixed at startup and never changes.
#[derive(Clone)]
pub struct Verifier {
    key: DecodingKey,
    validation: Validation,
}

impl Verifier {
    /// RS256 tokens signed by the token service.
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, jsonwebtoken::errors::Error> {
        let key = DecodingKey::from_rsa_pem(pem)?;
        Ok(Self { key, validation: Validation::new(Algorithm::RS256) })
    }

    /// HS256 shared secret, for local setups and tests.
    pub fn from_secret(secret: &[u8]) -> Self {
        Self { key: DecodingKey::from_secret(secret), validation: Validation::new(Algorithm::HS256) }
    }

    pub fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                VerifyError::Malformed
            }
            ErrorKind::ExpiredSignature => VerifyError::Expired,
            _ => VerifyError::Invalid,
        })?;
        Ok(Identity { user_id: data.claims.id })
    }
}

/// Extractor yielding the verified caller.
pub struct Auth(pub Identity);

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let Some(verifier) = req.app_data::<web::Data<Verifier>>() else {
            tracing::error!("token verifier missing from app data");
            return ready(Err(ApiError::Internal));
        };
        // Delegate to BearerAuth to parse the header.
        let result = match BearerAuth::from_request(req, pl).into_inner() {
            Ok(bearer) => verifier.verify(bearer.token()),
            Err(_) => Err(VerifyError::Malformed),
        };
        ready(result.map(Auth).map_err(ApiError::from))
    }
}

/// Mint an HS256 token; the token service owns issuance in production.
pub fn create_jwt(secret: &[u8], user_id: Id, ttl: chrono::Duration) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = (chrono::Utc::now() + ttl).timestamp().max(0) as usize;
    encode(&Header::default(), &Claims { id: user_id, exp }, &EncodingKey::from_secret(secret))
}
