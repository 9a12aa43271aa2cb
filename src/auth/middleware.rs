//! Authentication middleware
//!
//! Extracts and validates bearer tokens, then exposes the claims to handlers
//! through request extensions.

use crate::auth::{decode_token, Claims, Role};
use crate::error::AppError;
use crate::state::SharedState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

pub async fn auth_middleware(
    State(state): State<SharedState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let TypedHeader(Authorization(bearer)) = bearer
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    let claims = decode_token(bearer.token(), &state.jwt_secret)?;

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Require at least the given platform role
pub fn require_role(claims: &Claims, required: Role) -> Result<(), AppError> {
    if claims.role < required {
        return Err(AppError::Forbidden(format!(
            "Requires {} role, you have {}",
            required, claims.role
        )));
    }
    Ok(())
}

/// Stage decisions need a reviewer holding the stage's lab role; admins may
/// act on any stage
pub fn require_stage_role(claims: &Claims, required_role: &str) -> Result<(), AppError> {
    require_role(claims, Role::Reviewer)?;
    if claims.role == Role::Admin || claims.lab_roles.iter().any(|r| r == required_role) {
        return Ok(());
    }
    Err(AppError::Forbidden(format!(
        "Stage requires lab role '{}'",
        required_role
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn claims(role: Role, lab_roles: &[&str]) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            email: "qa@lab.test".to_string(),
            role,
            lab_roles: lab_roles.iter().map(|r| r.to_string()).collect(),
            exp: 0,
            iat: 0,
        }
    }

    #[test]
    fn test_role_ordering() {
        assert!(require_role(&claims(Role::Operator, &[]), Role::Reviewer).is_ok());
        assert!(matches!(
            require_role(&claims(Role::Viewer, &[]), Role::Operator),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_stage_role_matching() {
        assert!(require_stage_role(&claims(Role::Reviewer, &["qa_lead"]), "qa_lead").is_ok());
        assert!(require_stage_role(&claims(Role::Reviewer, &["qa_lead"]), "biosafety").is_err());
        assert!(require_stage_role(&claims(Role::Admin, &[]), "biosafety").is_ok());
        assert!(require_stage_role(&claims(Role::Viewer, &["qa_lead"]), "qa_lead").is_err());
    }
}
