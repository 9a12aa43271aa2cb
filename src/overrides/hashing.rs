//! Deterministic content hash for override idempotency

use crate::overrides::models::OverrideKind;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// SHA-256 over the canonical JSON of the execution inputs.
///
/// `serde_json::Map` keeps keys sorted, so the serialisation is stable
/// regardless of how the caller ordered its fields.
pub fn execution_hash(
    recommendation_id: &str,
    execution_id: Uuid,
    action: OverrideKind,
    baseline_id: Option<Uuid>,
    target_reviewer_id: Option<Uuid>,
) -> String {
    let canonical = json!({
        "action": action.as_str(),
        "baseline_id": baseline_id,
        "execution_id": execution_id,
        "recommendation_id": recommendation_id,
        "target_reviewer_id": target_reviewer_id,
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
