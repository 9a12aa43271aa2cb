//! JWT token validation
//!
//! Tokens are HS256-signed by the lab's identity service and carry the
//! caller's platform role plus the lab roles matched against stage
//! `required_role`s.

use crate::auth::Role;
use crate::error::AppError;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// User email
    pub email: String,
    /// Platform role
    pub role: Role,
    /// Lab roles, e.g. `qa_lead`, `biosafety_officer`
    #[serde(default)]
    pub lab_roles: Vec<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Decode and validate a JWT token
pub fn decode_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::Unauthorized("Token expired".to_string())
        }
        jsonwebtoken::errors::ErrorKind::InvalidToken => {
            AppError::Unauthorized("Invalid token".to_string())
        }
        _ => AppError::Unauthorized(format!("Token validation failed: {}", e)),
    })?;

    Ok(token_data.claims)
}

#[cfg(test)]
pub fn issue_token(
    secret: &str,
    sub: Uuid,
    role: Role,
    lab_roles: &[&str],
    ttl: chrono::Duration,
) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = chrono::Utc::now();
    let claims = Claims {
        sub,
        email: format!("{}@lab.test", sub),
        role,
        lab_roles: lab_roles.iter().map(|r| r.to_string()).collect(),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .expect("token encodes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_round_trip_claims() {
        let sub = Uuid::new_v4();
        let token = issue_token("s3cret", sub, Role::Reviewer, &["qa_lead"], Duration::minutes(5));
        let claims = decode_token(&token, "s3cret").unwrap();
        assert_eq!(claims.sub, sub);
        assert_eq!(claims.role, Role::Reviewer);
        assert_eq!(claims.lab_roles, vec!["qa_lead".to_string()]);
    }

    #[test]
    fn test_rejects_wrong_secret_and_expired() {
        let token = issue_token("a", Uuid::new_v4(), Role::Admin, &[], Duration::minutes(5));
        assert!(matches!(decode_token(&token, "b"), Err(AppError::Unauthorized(_))));

        let expired = issue_token("a", Uuid::new_v4(), Role::Admin, &[], Duration::minutes(-10));
        assert!(matches!(decode_token(&expired, "a"), Err(AppError::Unauthorized(_))));
    }
}
