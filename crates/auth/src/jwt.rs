//! HS256 token signing and verification.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::claims::{validate_claims, JwtClaims, TokenValidationError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed or unsigned token: {0}")]
    Malformed(String),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Verifies a bearer token and returns its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenError>;
}

/// Signs claims into a bearer token.
pub trait JwtIssuer: Send + Sync {
    fn issue(&self, claims: &JwtClaims) -> Result<String, TokenError>;
}

/// HMAC-SHA256 validator over a shared secret.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        // Expiry lives in our own `expires_at` claim, checked by `validate_claims`
        // against the caller's clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;

        Self {
            key: DecodingKey::from_secret(&secret),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

pub struct Hs256JwtIssuer {
    key: EncodingKey,
}

impl Hs256JwtIssuer {
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            key: EncodingKey::from_secret(&secret),
        }
    }
}

impl JwtIssuer for Hs256JwtIssuer {
    fn issue(&self, claims: &JwtClaims) -> Result<String, TokenError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use classbook_core::{GuardianId, StudentId};

    #[test]
    fn issued_token_round_trips_through_validator() {
        let now = Utc::now();
        let claims = JwtClaims::student(StudentId::new(), now);
        let token = Hs256JwtIssuer::new(b"secret".to_vec()).issue(&claims).unwrap();

        let decoded = Hs256JwtValidator::new(b"secret".to_vec())
            .validate(&token, now + Duration::minutes(1))
            .unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn guardian_claim_survives_signing() {
        let now = Utc::now();
        let guardian_id = GuardianId::new();
        let token = Hs256JwtIssuer::new(b"secret".to_vec())
            .issue(&JwtClaims::guardian(guardian_id, now))
            .unwrap();

        let decoded = Hs256JwtValidator::new(b"secret".to_vec()).validate(&token, now).unwrap();
        assert_eq!(decoded.guardian_id, Some(guardian_id));
        assert_eq!(decoded.student_id, None);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = Utc::now();
        let token = Hs256JwtIssuer::new(b"secret".to_vec())
            .issue(&JwtClaims::admin(now))
            .unwrap();

        let err = Hs256JwtValidator::new(b"other".to_vec())
            .validate(&token, now)
            .unwrap_err();
        assert!(matches!(err, TokenError::Malformed(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let issued = Utc::now() - Duration::days(1);
        let token = Hs256JwtIssuer::new(b"secret".to_vec())
            .issue(&JwtClaims::admin(issued))
            .unwrap();

        let err = Hs256JwtValidator::new(b"secret".to_vec())
            .validate(&token, Utc::now())
            .unwrap_err();
        assert_eq!(err, TokenError::Claims(TokenValidationError::Expired));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = Hs256JwtValidator::new(b"secret".to_vec())
            .validate("not-a-token", Utc::now())
            .unwrap_err();
        assert!(matches!(err, TokenError::Malformed(_)));
    }
}
