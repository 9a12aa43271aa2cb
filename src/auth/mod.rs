//! Authentication and authorization module
//!
//! Bearer JWT verification and role checks. Identity management lives
//! upstream; this service only verifies tokens it is handed.

mod jwt;
mod middleware;

pub use jwt::{decode_token, Claims};
pub use middleware::{auth_middleware, require_role, require_stage_role};

#[cfg(test)]
pub use jwt::issue_token;

use serde::{Deserialize, Serialize};

/// Operator roles, ordered by privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read-only access to ladders, simulations and events
    Viewer,
    /// Can decide stages whose required role they hold
    Reviewer,
    /// Can run simulations and manage overrides
    Operator,
    /// Everything, including stages outside their lab roles
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Viewer => write!(f, "viewer"),
            Role::Reviewer => write!(f, "reviewer"),
            Role::Operator => write!(f, "operator"),
            Role::Admin => write!(f, "admin"),
        }
    }
}
